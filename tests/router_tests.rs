//! Route table construction from registered controllers.

use std::sync::Arc;

use brrtboot::aspect::CheckKind;
use brrtboot::container::{wire_all, Component, Registry};
use brrtboot::reply::Reply;
use brrtboot::router::{
    Action, ActionContext, Controller, MethodFilter, OwnerInfo, ParamType, RouteEntry, RouteTable,
    Routes,
};
use http::Method;

mod common;
use common::components::{register_samples, AdminController, PingController};

fn sample_table() -> RouteTable {
    let mut registry = Registry::new();
    register_samples(&mut registry);
    wire_all(&mut registry);
    RouteTable::build(&registry)
}

#[test]
fn test_build_collects_controller_routes() {
    let table = sample_table();
    let routes: Vec<String> = table
        .entries()
        .map(|e| format!("{} {}", e.method(), e.path()))
        .collect();
    assert_eq!(
        routes,
        vec![
            "GET /ping",
            "GET /users/{id}",
            "POST /users",
            "GET /fail",
            "GET /boom",
            "GET /empty",
            "GET /admin/report",
            "GET /admin/open",
        ]
    );
}

#[test]
fn test_lookup_binds_owner_and_params() {
    let table = sample_table();

    let ping = table.lookup(&Method::GET, "/ping").unwrap();
    assert_eq!(ping.entry.name(), "ping");
    assert!(ping.entry.owner.is::<PingController>());
    assert!(ping.path_params.is_empty());

    let user = table.lookup(&Method::GET, "/users/42").unwrap();
    assert_eq!(user.entry.name(), "get_user");
    assert_eq!(user.path_params.len(), 1);
    assert_eq!(&*user.path_params[0].0, "id");
    assert_eq!(user.path_params[0].1, "42");
    assert_eq!(user.entry.params()[0].ty, ParamType::Integer);
}

#[test]
fn test_lookup_misses() {
    let table = sample_table();
    assert!(table.lookup(&Method::GET, "/missing").is_none());
    assert!(table.lookup(&Method::DELETE, "/ping").is_none());
    assert!(table.lookup(&Method::GET, "/users").is_none());
    assert!(table.lookup(&Method::GET, "/users/1/extra").is_none());
}

#[test]
fn test_owner_cors_and_action_cors() {
    let table = sample_table();
    let report = table.lookup(&Method::GET, "/admin/report").unwrap();
    assert!(report.entry.owner.is::<AdminController>());
    assert!(report.entry.cors.is_none());
    assert_eq!(
        report.entry.effective_cors().unwrap().allowed_origins,
        vec!["https://owner.example".to_string()]
    );

    let open = table.lookup(&Method::GET, "/admin/open").unwrap();
    assert_eq!(
        open.entry.effective_cors().unwrap().allowed_origins,
        vec!["https://action.example".to_string()]
    );
}

#[test]
fn test_checks_sorted_by_kind() {
    let table = sample_table();
    let report = table.lookup(&Method::GET, "/admin/report").unwrap();
    let kinds: Vec<CheckKind> = report.entry.checks.iter().map(|c| c.kind()).collect();
    assert_eq!(kinds, vec![CheckKind::Authentication, CheckKind::Permissions]);
}

struct EchoController;
impl Component for EchoController {}
impl Controller for EchoController {
    fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
        routes
            .any(
                "/echo",
                Action::new("echo_any", |ctx: &ActionContext<'_>| {
                    Reply::text(ctx.request.method.to_string())
                }),
            )
            .post("/echo", Action::new("echo_post", |_ctx: &ActionContext<'_>| "post"))
            .get("/echo/{word}", Action::new("echo_word", |_ctx: &ActionContext<'_>| "word"))
            .get("/echo/static", Action::new("echo_static", |_ctx: &ActionContext<'_>| "static"));
    }
}

#[test]
fn test_method_and_literal_precedence() {
    let mut registry = Registry::new();
    registry.register_controller(EchoController);
    let table = RouteTable::build(&registry);

    assert_eq!(table.lookup(&Method::POST, "/echo").unwrap().entry.name(), "echo_post");
    assert_eq!(table.lookup(&Method::PUT, "/echo").unwrap().entry.name(), "echo_any");
    assert_eq!(table.lookup(&Method::GET, "/echo/").unwrap().entry.name(), "echo_any");
    assert_eq!(
        table.lookup(&Method::GET, "/echo/static").unwrap().entry.name(),
        "echo_static"
    );
    assert_eq!(
        table.lookup(&Method::GET, "/echo/hello").unwrap().entry.name(),
        "echo_word"
    );
}

#[test]
fn test_insert_replaces_same_key() {
    let mut table = RouteTable::new();
    let owner = Arc::new(OwnerInfo::detached());
    table.insert(RouteEntry::new(
        MethodFilter::Only(Method::GET),
        "/x",
        Action::new("first", |_ctx: &ActionContext<'_>| "1"),
        Arc::clone(&owner),
    ));
    table.insert(RouteEntry::new(
        MethodFilter::Only(Method::GET),
        "/x/",
        Action::new("second", |_ctx: &ActionContext<'_>| "2"),
        owner,
    ));
    assert_eq!(table.len(), 1);
    assert_eq!(table.lookup(&Method::GET, "/x").unwrap().entry.name(), "second");
}
