use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::info;

use brrtboot::config::{LayeredConfig, ServerConfig};
use brrtboot::container::{Component, ComponentDef, Inject, Injector};
use brrtboot::interceptor::{Interceptor, InterceptorEntry, MetricsInterceptor, TokenAuthInterceptor};
use brrtboot::reply::Reply;
use brrtboot::router::{Action, ActionContext, Controller, ParamType, Routes};
use brrtboot::server::MiniHttpTransport;
use brrtboot::telemetry::{init_logging, LogConfig};
use brrtboot::Application;

#[derive(Parser)]
#[command(name = "brrtboot")]
#[command(about = "brrtboot demo server", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `http.port`
    #[arg(short, long)]
    port: Option<u16>,

    /// Overrides `http.context_path`
    #[arg(long)]
    context_path: Option<String>,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,
}

trait Greeting: Send + Sync {
    fn greet(&self, name: &str) -> String;
}

struct EnglishGreeting;

impl Component for EnglishGreeting {}

impl Greeting for EnglishGreeting {
    fn greet(&self, name: &str) -> String {
        format!("Hello, {name}!")
    }
}

#[derive(Default)]
struct HelloController {
    greeting: Inject<dyn Greeting>,
}

impl Component for HelloController {
    fn wire(&self, injector: &mut Injector<'_>) {
        injector.inject(&self.greeting);
    }
}

impl Controller for HelloController {
    fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
        routes
            .get(
                "/ping",
                Action::new("ping", |_ctx: &ActionContext<'_>| "pong"),
            )
            .get(
                "/hello/{name}",
                Action::bind(&self, "hello", |this: &HelloController, ctx: &ActionContext<'_>| {
                    let name = ctx.str("name").unwrap_or("world");
                    match this.greeting.get() {
                        Some(greeting) => Reply::text(greeting.greet(name)),
                        None => Reply::text(format!("Hi, {name}")),
                    }
                })
                .param("name", ParamType::String),
            );
    }
}

struct StatusController {
    metrics: Arc<MetricsInterceptor>,
}

impl Component for StatusController {}

impl Controller for StatusController {
    fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
        routes
            .get(
                "/health",
                Action::new("health", |_ctx: &ActionContext<'_>| json!({ "status": "ok" })),
            )
            .get(
                "/admin/metrics",
                Action::bind(&self, "metrics", |this: &StatusController, _ctx: &ActionContext<'_>| {
                    this.metrics.snapshot()
                }),
            );
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&LogConfig::from_env())?;

    let source = LayeredConfig::standard(cli.config.as_deref())?;
    let mut config = ServerConfig::from_source(&source)?;
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let Some(ctx) = &cli.context_path {
        config = config.with_context_path(ctx);
    }

    let metrics = Arc::new(MetricsInterceptor::new());
    let mut builder = Application::builder()
        .config(config)
        .transport(Arc::new(MiniHttpTransport::new().with_host(cli.host.clone())))
        .interceptor(
            InterceptorEntry::new("metrics", Arc::clone(&metrics) as Arc<dyn Interceptor>)
                .block("/**"),
        );
    match std::env::var("BOOT_ADMIN_TOKEN") {
        Ok(token) if !token.is_empty() => {
            builder = builder.interceptor(
                InterceptorEntry::new(
                    "admin-token",
                    Arc::new(TokenAuthInterceptor::with_static_token(token)),
                )
                .block("/admin/**"),
            );
        }
        _ => info!("BOOT_ADMIN_TOKEN not set, /admin routes are open"),
    }

    let metrics_for_source = Arc::clone(&metrics);
    let mut app = builder
        .source(|registry| {
            registry.register_with(
                ComponentDef::new(EnglishGreeting)
                    .provides::<dyn Greeting>(|c| c as Arc<dyn Greeting>),
            );
            registry.register_controller(HelloController::default());
            Ok(())
        })
        .source(move |registry| {
            registry.register_controller(StatusController {
                metrics: Arc::clone(&metrics_for_source),
            });
            Ok(())
        })
        .start()
        .context("application failed to start")?;

    wait_for_shutdown();
    app.shutdown();
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "Shutdown signal received");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Signal handler unavailable, running until killed");
            loop {
                std::thread::park();
            }
        }
    }
}

#[cfg(not(unix))]
fn wait_for_shutdown() {
    loop {
        std::thread::park();
    }
}
