//! Application startup, readiness and shutdown.
//!
//! `start` runs the phases in a fixed order: scan component sources, wire,
//! build the route table, start the listener. Any failure before the
//! listener is up aborts startup and nothing is left running.

use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::aspect::{AspectProvider, FailPolicy};
use crate::config::{ConfigError, ConfigSource, ServerConfig};
use crate::container::{wire_all, Registry, WiringReport};
use crate::cors::{CorsApplier, DefaultCorsApplier};
use crate::dispatcher::RequestDispatcher;
use crate::interceptor::{InterceptorChain, InterceptorEntry};
use crate::reply::{DefaultReplyConverter, ReplyConverter};
use crate::router::RouteTable;
use crate::server::{AppService, Listener, MiniHttpTransport, Transport};

/// Registers components into a fresh registry. Called once per start.
pub type ComponentSource = Arc<dyn Fn(&mut Registry) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug)]
pub enum StartupError {
    /// A component source failed; `index` is its declaration position.
    Scan { index: usize, error: anyhow::Error },
    Config(ConfigError),
    Bind(anyhow::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Scan { index, error } => {
                write!(f, "component source #{index} failed: {error}")
            }
            StartupError::Config(e) => write!(f, "configuration error: {e}"),
            StartupError::Bind(e) => write!(f, "listener failed to start: {e:#}"),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::Scan { error, .. } | StartupError::Bind(error) => Some(&**error),
            StartupError::Config(e) => Some(e),
        }
    }
}

impl From<ConfigError> for StartupError {
    fn from(e: ConfigError) -> Self {
        StartupError::Config(e)
    }
}

enum ConfigInput {
    Fixed(ServerConfig),
    Source(Box<dyn ConfigSource>),
}

/// Collects everything `start` needs.
pub struct ApplicationBuilder {
    config: ConfigInput,
    sources: Vec<ComponentSource>,
    aspects: Option<Arc<dyn AspectProvider>>,
    interceptors: InterceptorChain,
    converter: Option<Arc<dyn ReplyConverter>>,
    cors_applier: Arc<dyn CorsApplier>,
    transport: Arc<dyn Transport>,
    fail_policy: Option<FailPolicy>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self {
            config: ConfigInput::Fixed(ServerConfig::default()),
            sources: Vec::new(),
            aspects: None,
            interceptors: InterceptorChain::new(),
            converter: None,
            cors_applier: Arc::new(DefaultCorsApplier),
            transport: Arc::new(MiniHttpTransport::new()),
            fail_policy: None,
        }
    }
}

impl ApplicationBuilder {
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = ConfigInput::Fixed(config);
        self
    }

    /// Read [`ServerConfig`] from `source` at each start.
    #[must_use]
    pub fn config_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.config = ConfigInput::Source(Box::new(source));
        self
    }

    #[must_use]
    pub fn source<F>(mut self, source: F) -> Self
    where
        F: Fn(&mut Registry) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.sources.push(Arc::new(source));
        self
    }

    /// Aspect implementations. Without one, aspects are resolved from the
    /// registry by capability.
    #[must_use]
    pub fn aspects(mut self, provider: Arc<dyn AspectProvider>) -> Self {
        self.aspects = Some(provider);
        self
    }

    #[must_use]
    pub fn interceptor(self, entry: InterceptorEntry) -> Self {
        self.interceptors.add(entry);
        self
    }

    /// Replaces the default converter; `http.404`/`http.500` pages are
    /// then ignored.
    #[must_use]
    pub fn converter(mut self, converter: Arc<dyn ReplyConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    #[must_use]
    pub fn cors_applier(mut self, applier: Arc<dyn CorsApplier>) -> Self {
        self.cors_applier = applier;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Overrides `aspect.fail_closed`.
    #[must_use]
    pub fn fail_policy(mut self, policy: FailPolicy) -> Self {
        self.fail_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn build(self) -> Application {
        Application {
            inner: Arc::new(self),
        }
    }

    pub fn start(self) -> Result<RunningApp, StartupError> {
        self.build().start()
    }
}

/// A configured application. `start` may be called again after shutdown.
#[derive(Clone)]
pub struct Application {
    inner: Arc<ApplicationBuilder>,
}

fn read_page(kind: &str, path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(body) => Some(body),
        Err(e) => {
            warn!(page = kind, path = %path.display(), error = %e, "Page file unreadable, using the JSON body");
            None
        }
    }
}

impl Application {
    #[must_use]
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    /// The interceptor set, shared with every running instance.
    #[must_use]
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.inner.interceptors
    }

    fn resolve_config(&self) -> Result<ServerConfig, ConfigError> {
        match &self.inner.config {
            ConfigInput::Fixed(config) => Ok(config.clone()),
            ConfigInput::Source(source) => ServerConfig::from_source(source.as_ref()),
        }
    }

    fn scan(&self) -> Result<Registry, StartupError> {
        let mut registry = Registry::new();
        for (index, source) in self.inner.sources.iter().enumerate() {
            source(&mut registry).map_err(|error| {
                error!(index, error = %error, "Component source failed");
                StartupError::Scan { index, error }
            })?;
        }
        debug!(
            sources = self.inner.sources.len(),
            components = registry.len(),
            "Component scan complete"
        );
        Ok(registry)
    }

    fn converter_for(&self, config: &ServerConfig) -> Arc<dyn ReplyConverter> {
        if let Some(converter) = &self.inner.converter {
            return Arc::clone(converter);
        }
        let mut converter = DefaultReplyConverter::new();
        if let Some(page) = config.not_found_page.as_deref().and_then(|p| read_page("404", p)) {
            converter = converter.with_not_found_page(page);
        }
        if let Some(page) = config.error_page.as_deref().and_then(|p| read_page("500", p)) {
            converter = converter.with_error_page(page);
        }
        Arc::new(converter)
    }

    pub fn start(&self) -> Result<RunningApp, StartupError> {
        let started = Instant::now();
        let config = self.resolve_config()?;

        let mut registry = self.scan()?;
        let wiring = wire_all(&mut registry);
        let routes = RouteTable::build(&registry);
        let registry = Arc::new(registry);

        let aspects = match &self.inner.aspects {
            Some(provider) => Arc::clone(provider),
            None => Arc::clone(&registry) as Arc<dyn AspectProvider>,
        };
        let fail_policy = self.inner.fail_policy.unwrap_or(if config.fail_closed {
            FailPolicy::Closed
        } else {
            FailPolicy::Open
        });
        let dispatcher = RequestDispatcher::new(aspects)
            .with_fail_policy(fail_policy)
            .with_converter(self.converter_for(&config))
            .with_cors_applier(Arc::clone(&self.inner.cors_applier));

        let service = AppService::new(
            routes,
            dispatcher,
            self.inner.interceptors.clone(),
            config.context_path.clone(),
        );

        let listener = self
            .inner
            .transport
            .start(&config, service.clone())
            .map_err(|e| {
                error!(port = config.port, error = %e, "Listener failed to start");
                StartupError::Bind(e)
            })?;

        let url = match listener.local_addr() {
            Some(addr) => config.base_url_for_port(addr.port()),
            None => config.base_url(),
        };
        info!(
            url = %url,
            components = registry.len(),
            routes = service.routes().len(),
            interceptors = service.interceptors().len(),
            fail_policy = ?fail_policy,
            startup_ms = started.elapsed().as_millis() as u64,
            "Application ready"
        );

        Ok(RunningApp {
            app: self.clone(),
            config,
            url,
            wiring,
            registry: Some(registry),
            service: Some(service),
            listener: Some(listener),
        })
    }
}

/// A started application. Dropping it shuts it down.
pub struct RunningApp {
    app: Application,
    config: ServerConfig,
    url: String,
    wiring: WiringReport,
    registry: Option<Arc<Registry>>,
    service: Option<AppService>,
    listener: Option<Box<dyn Listener>>,
}

impl RunningApp {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr())
    }

    /// `http://localhost[:port][context_path]`
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn wiring(&self) -> &WiringReport {
        &self.wiring
    }

    /// `None` after shutdown.
    #[must_use]
    pub fn service(&self) -> Option<&AppService> {
        self.service.as_ref()
    }

    /// `None` after shutdown.
    #[must_use]
    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_deref()
    }

    #[must_use]
    pub fn interceptors(&self) -> &InterceptorChain {
        self.app.interceptors()
    }

    /// Stop the listener, then release the registry. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        listener.stop();
        self.service = None;
        if let Some(registry) = self.registry.take() {
            match Arc::try_unwrap(registry) {
                Ok(mut registry) => registry.clear(),
                Err(shared) => debug!(
                    refs = Arc::strong_count(&shared),
                    "Registry still referenced, released with the last handle"
                ),
            }
        }
        info!(url = %self.url, "Application stopped");
    }

    /// Shutdown followed by a fresh start from the same inputs.
    /// In-flight requests are not drained.
    pub fn restart(&mut self) -> Result<(), StartupError> {
        info!(url = %self.url, "Restarting application");
        self.shutdown();
        let next = self.app.start()?;
        *self = next;
        Ok(())
    }
}

impl Drop for RunningApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for RunningApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningApp")
            .field("url", &self.url)
            .field("running", &self.is_running())
            .finish()
    }
}
