//! # brrtboot
//!
//! **brrtboot** is a component container and request dispatch core for HTTP
//! services on the `may` coroutine runtime. Components are registered
//! explicitly, wired through typed injection slots, and controllers declare
//! their routes in code. No reflection and no annotation scanning.
//!
//! ## Architecture
//!
//! - **[`container`]**: component registry (capability → instance) and the wiring engine
//! - **[`router`]**: controllers, actions and the route table
//! - **[`aspect`]**: gateway, authentication and permission pre-checks
//! - **[`dispatcher`]**: pre-check → invoke → post-process pipeline
//! - **[`interceptor`]**: global before/after hooks scoped by path pattern
//! - **[`reply`]**: handler results and their conversion to responses
//! - **[`cors`]**: CORS policies and the header applier
//! - **[`server`]**: request/response model, the per-request service, transports
//! - **[`lifecycle`]**: startup phases, readiness, shutdown and restart
//! - **[`config`]**: YAML/env configuration and [`ServerConfig`](config::ServerConfig)
//! - **[`telemetry`]**: `tracing` subscriber setup
//!
//! ## Request flow
//!
//! ```text
//! transport → AppService
//!   → InterceptorChain::before   (may short-circuit)
//!   → RouteTable::lookup         (miss → 404)
//!   → RequestDispatcher::dispatch
//!       pre-checks → bind params → action → reply conversion → CORS
//!   → InterceptorChain::after
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use brrtboot::prelude::*;
//!
//! struct Ping;
//! impl Component for Ping {}
//! impl Controller for Ping {
//!     fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
//!         routes.get("/ping", Action::new("ping", |_ctx: &ActionContext<'_>| "pong"));
//!     }
//! }
//!
//! let app = Application::builder()
//!     .config(ServerConfig::default().with_port(8080))
//!     .source(|registry| {
//!         registry.register_controller(Ping);
//!         Ok(())
//!     })
//!     .start()?;
//! ```

pub mod aspect;
pub mod config;
pub mod container;
pub mod cors;
pub mod dispatcher;
pub mod ids;
pub mod interceptor;
pub mod lifecycle;
pub mod reply;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod telemetry;

pub use lifecycle::{Application, ApplicationBuilder, RunningApp, StartupError};

/// The types most applications touch.
pub mod prelude {
    pub use crate::aspect::{
        AspectProvider, AuthenticationAspect, CheckOutcome, FailPolicy, GatewayCheckAspect,
        PermissionsAspect, StaticAspectProvider,
    };
    pub use crate::config::ServerConfig;
    pub use crate::container::{Component, ComponentDef, Inject, Injector, Registry};
    pub use crate::cors::CorsPolicy;
    pub use crate::interceptor::{Interceptor, InterceptorEntry};
    pub use crate::lifecycle::{Application, RunningApp};
    pub use crate::reply::Reply;
    pub use crate::router::{Action, ActionContext, Controller, ParamType, Routes};
    pub use crate::server::{HttpRequest, HttpResponse};
}
