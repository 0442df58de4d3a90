//! Startup phases, readiness, shutdown and restart over a fake transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use brrtboot::aspect::FailPolicy;
use brrtboot::config::{EnvConfig, ServerConfig};
use brrtboot::container::Registry;
use brrtboot::interceptor::InterceptorEntry;
use brrtboot::server::{HttpRequest, LocalTransport, Transport};
use brrtboot::{Application, StartupError};
use http::Method;

mod common;
use common::components::{register_aspects, register_samples, PingController};
use common::interceptors::{event_log, RecordingInterceptor};
use common::transport::FakeTransport;

fn samples(registry: &mut Registry) -> anyhow::Result<()> {
    register_samples(registry);
    Ok(())
}

#[test]
fn test_start_reaches_ready_and_serves() {
    common::tracing_init::init();
    let transport = Arc::new(FakeTransport::default());
    let app = Application::builder()
        .config(ServerConfig::default().with_port(9090).with_context_path("/api"))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .source(samples)
        .start()
        .unwrap();

    assert!(app.is_running());
    assert_eq!(app.url(), "http://localhost:9090/api");
    assert_eq!(transport.starts(), 1);
    assert_eq!(*transport.last_port.lock(), Some(9090));
    assert!(app.wiring().is_complete());

    let service = app.service().unwrap();
    assert_eq!(service.context_path(), Some("/api"));
    let resp = service.handle(HttpRequest::get("/ping"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body_str(), Some("pong"));

    let missing = service.handle(HttpRequest::get("/missing"));
    assert_eq!(missing.status, 404);
    let body = missing.body_json().unwrap();
    assert_eq!(body["error"], "Not Found");
    assert_eq!(body["path"], "/missing");
}

#[test]
fn test_sources_run_in_declaration_order() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let first = Arc::clone(&order);
    let second = Arc::clone(&order);
    let app = Application::builder()
        .transport(Arc::new(LocalTransport))
        .source(move |registry| {
            first.lock().push(registry.len());
            registry.register_controller(PingController);
            Ok(())
        })
        .source(move |registry| {
            second.lock().push(registry.len());
            Ok(())
        })
        .start()
        .unwrap();
    assert_eq!(*order.lock(), vec![0, 1]);
    assert!(app.local_addr().is_none());
}

#[test]
fn test_failing_source_aborts_startup() {
    let transport = Arc::new(FakeTransport::default());
    let result = Application::builder()
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .source(samples)
        .source(|_registry| anyhow::bail!("scan failed"))
        .start();

    match result {
        Err(StartupError::Scan { index, error }) => {
            assert_eq!(index, 1);
            assert_eq!(error.to_string(), "scan failed");
        }
        other => panic!("expected scan error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(transport.starts(), 0);
}

#[test]
fn test_bind_failure_is_startup_error() {
    let result = Application::builder()
        .transport(Arc::new(FakeTransport::failing()))
        .source(samples)
        .start();
    match result {
        Err(err @ StartupError::Bind(_)) => {
            assert!(err.to_string().contains("address already in use"));
        }
        other => panic!("expected bind error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_invalid_config_is_startup_error() {
    let result = Application::builder()
        .config_source(EnvConfig::default().with_vars([("BOOT_HTTP_PORT", "eighty")]))
        .transport(Arc::new(LocalTransport))
        .start();
    assert!(matches!(result, Err(StartupError::Config(_))));
}

#[test]
fn test_config_source_drives_fail_policy() {
    let transport = Arc::new(FakeTransport::default());
    let app = Application::builder()
        .config_source(EnvConfig::default().with_vars([
            ("BOOT_HTTP_PORT", "8181"),
            ("BOOT_ASPECT_FAIL_CLOSED", "true"),
        ]))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .source(samples)
        .start()
        .unwrap();

    assert_eq!(app.config().port, 8181);
    let service = app.service().unwrap();
    assert_eq!(service.dispatcher().fail_policy(), FailPolicy::Closed);
    // no aspects registered: guarded action rejected
    let resp = service.handle(HttpRequest::get("/admin/report"));
    assert_eq!(resp.status, 403);
}

#[test]
fn test_registry_aspects_are_used_by_default() {
    let app = Application::builder()
        .transport(Arc::new(LocalTransport))
        .source(samples)
        .source(|registry| {
            register_aspects(registry);
            Ok(())
        })
        .start()
        .unwrap();
    let service = app.service().unwrap();
    let resp = service.handle(
        HttpRequest::get("/admin/report")
            .with_header("x-user", "ada")
            .with_header("x-perms", "reports:read"),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(service.handle(HttpRequest::get("/admin/report")).status, 401);
}

#[test]
fn test_interceptors_wrap_routed_and_unrouted_requests() {
    let log = event_log();
    let app = Application::builder()
        .transport(Arc::new(LocalTransport))
        .interceptor(
            InterceptorEntry::new("rec", Arc::new(RecordingInterceptor::new("rec", &log)))
                .block("/**"),
        )
        .interceptor(
            InterceptorEntry::new(
                "deny",
                Arc::new(RecordingInterceptor::new("deny", &log).short_circuit(418)),
            )
            .block("/users/**"),
        )
        .source(samples)
        .start()
        .unwrap();
    let service = app.service().unwrap();

    assert_eq!(service.handle(HttpRequest::get("/ping")).status, 200);
    assert_eq!(service.handle(HttpRequest::get("/nowhere")).status, 404);
    let denied = service.handle(HttpRequest::get("/users/1"));
    assert_eq!(denied.status, 418);
    // entries whose before ran still see the short-circuit response
    assert_eq!(denied.get_header("x-after-rec"), Some("1"));
    assert_eq!(denied.get_header("x-after-deny"), Some("1"));

    assert_eq!(
        *log.lock(),
        vec![
            "rec.before /ping",
            "rec.after 200",
            "rec.before /nowhere",
            "rec.after 404",
            "rec.before /users/1",
            "deny.before /users/1",
            "rec.after 418",
            "deny.after 418",
        ]
    );
}

#[test]
fn test_shutdown_stops_listener_then_releases_registry() {
    let transport = Arc::new(FakeTransport::default());
    let mut app = Application::builder()
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .source(samples)
        .start()
        .unwrap();
    // the fake transport keeps a service clone; drop it so the registry can be cleared
    transport.last_service.lock().take();

    app.shutdown();
    assert!(!app.is_running());
    assert!(app.service().is_none());
    assert!(app.registry().is_none());
    assert_eq!(transport.stops(), 1);

    app.shutdown();
    assert_eq!(transport.stops(), 1);
}

#[test]
fn test_restart_rescans_and_keeps_interceptors() {
    let scans = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&scans);
    let transport = Arc::new(FakeTransport::default());
    let log = event_log();
    let mut app = Application::builder()
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .interceptor(
            InterceptorEntry::new("rec", Arc::new(RecordingInterceptor::new("rec", &log)))
                .block("/**"),
        )
        .source(move |registry| {
            counter.fetch_add(1, Ordering::SeqCst);
            register_samples(registry);
            Ok(())
        })
        .start()
        .unwrap();

    let before_restart = app.registry().unwrap().resolve::<PingController>().unwrap();
    app.restart().unwrap();

    assert!(app.is_running());
    assert_eq!(scans.load(Ordering::SeqCst), 2);
    assert_eq!(transport.starts(), 2);
    assert_eq!(transport.stops(), 1);
    let after_restart = app.registry().unwrap().resolve::<PingController>().unwrap();
    assert!(!Arc::ptr_eq(&before_restart, &after_restart));

    let resp = app
        .service()
        .unwrap()
        .handle(HttpRequest::new(Method::GET, "/ping"));
    assert_eq!(resp.status, 200);
    assert_eq!(app.interceptors().len(), 1);
    assert_eq!(log.lock().last().map(String::as_str), Some("rec.after 200"));
}

#[test]
fn test_drop_shuts_down() {
    let transport = Arc::new(FakeTransport::default());
    {
        let _app = Application::builder()
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .source(samples)
            .start()
            .unwrap();
    }
    assert_eq!(transport.stops(), 1);
}
