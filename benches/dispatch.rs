use std::hint::black_box;
use std::sync::Arc;

use brrtboot::container::{wire_all, Component, Registry};
use brrtboot::dispatcher::RequestDispatcher;
use brrtboot::interceptor::{
    is_matched, InterceptorChain, InterceptorEntry, Interceptor, MetricsInterceptor,
};
use brrtboot::reply::Reply;
use brrtboot::router::{Action, ActionContext, Controller, ParamType, RouteTable, Routes};
use brrtboot::server::{AppService, HttpRequest};
use criterion::{criterion_group, criterion_main, Criterion};
use http::Method;
use serde_json::json;

struct ZooController;

impl Component for ZooController {}

impl Controller for ZooController {
    fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
        routes
            .get("/", Action::new("root", |_ctx: &ActionContext<'_>| "ok"))
            .get("/zoo/animals", Action::new("list", |_ctx: &ActionContext<'_>| json!([])))
            .get(
                "/zoo/animals/{id}",
                Action::new("get_animal", |ctx: &ActionContext<'_>| {
                    Reply::json(json!({ "id": ctx.int("id") }))
                })
                .param("id", ParamType::Integer),
            )
            .get(
                "/zoo/animals/{id}/toys/{toy_id}",
                Action::new("animal_toy", |ctx: &ActionContext<'_>| {
                    Reply::json(json!({ "id": ctx.int("id"), "toy": ctx.str("toy_id") }))
                })
                .param("id", ParamType::Integer)
                .param("toy_id", ParamType::String),
            );
    }
}

fn service() -> AppService {
    let mut registry = Registry::new();
    registry.register_controller(ZooController);
    wire_all(&mut registry);
    let routes = RouteTable::build(&registry);
    let interceptors = InterceptorChain::new();
    interceptors.add(
        InterceptorEntry::new(
            "metrics",
            Arc::new(MetricsInterceptor::new()) as Arc<dyn Interceptor>,
        )
        .block("/**"),
    );
    AppService::new(routes, RequestDispatcher::default(), interceptors, None)
}

fn bench_pattern_matching(c: &mut Criterion) {
    let blocked = ["/admin/**", "/internal/*", "/health"];
    let allowed = ["/admin/login"];
    c.bench_function("interceptor_is_matched", |b| {
        b.iter(|| {
            black_box(is_matched(black_box("/admin/users/42"), &blocked, &allowed));
            black_box(is_matched(black_box("/zoo/animals"), &blocked, &allowed));
        })
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let service = service();
    c.bench_function("dispatch_literal", |b| {
        b.iter(|| black_box(service.handle(HttpRequest::new(Method::GET, "/zoo/animals"))))
    });
    c.bench_function("dispatch_template", |b| {
        b.iter(|| {
            black_box(service.handle(HttpRequest::new(Method::GET, "/zoo/animals/7/toys/ball")))
        })
    });
    c.bench_function("dispatch_miss", |b| {
        b.iter(|| black_box(service.handle(HttpRequest::new(Method::GET, "/nowhere"))))
    });
}

criterion_group!(benches, bench_pattern_matching, bench_dispatch);
criterion_main!(benches);
