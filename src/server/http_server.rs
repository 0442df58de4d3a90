use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use may::coroutine::JoinHandle;
use tracing::{debug, info, warn};

use super::service::AppService;
use crate::config::ServerConfig;
use crate::runtime_config::RuntimeConfig;

/// A running listener, stopped by the lifecycle controller on shutdown.
pub trait Listener: Send {
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Stop accepting connections. In-flight requests are not drained.
    fn stop(self: Box<Self>);
}

/// Starts a listener that feeds requests to an [`AppService`].
pub trait Transport: Send + Sync {
    fn start(&self, config: &ServerConfig, service: AppService) -> anyhow::Result<Box<dyn Listener>>;
}

/// `may_minihttp` HTTP/1.1 server on `may` coroutines.
#[derive(Debug, Clone)]
pub struct MiniHttpTransport {
    host: String,
    runtime: RuntimeConfig,
}

impl Default for MiniHttpTransport {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            runtime: RuntimeConfig::from_env(),
        }
    }
}

impl MiniHttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    fn resolve_addr(&self, port: u16) -> io::Result<SocketAddr> {
        let port = if port == 0 {
            // may_minihttp does not report the bound address; reserve a free port first
            let reserved = TcpListener::bind((self.host.as_str(), 0))?;
            reserved.local_addr()?.port()
        } else {
            port
        };
        (self.host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))
    }
}

impl Transport for MiniHttpTransport {
    fn start(&self, config: &ServerConfig, service: AppService) -> anyhow::Result<Box<dyn Listener>> {
        self.runtime.apply();
        let addr = self
            .resolve_addr(config.port)
            .with_context(|| format!("resolving {}:{}", self.host, config.port))?;
        let handle = may_minihttp::HttpServer(service)
            .start(addr)
            .with_context(|| format!("binding {addr}"))?;
        let listener = MiniHttpListener { addr, handle };
        if let Err(e) = listener.wait_ready() {
            warn!(addr = %addr, error = %e, "Listener did not accept a readiness connection");
        }
        info!(addr = %addr, "HTTP listener started");
        Ok(Box::new(listener))
    }
}

/// Handle to a running `may_minihttp` server.
pub struct MiniHttpListener {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MiniHttpListener {
    /// Polls the address with TCP connects until one succeeds (about 500ms at most).
    pub fn wait_ready(&self) -> io::Result<()> {
        let target = if self.addr.ip().is_unspecified() {
            SocketAddr::from(([127, 0, 0, 1], self.addr.port()))
        } else {
            self.addr
        };
        for _ in 0..100 {
            if TcpStream::connect(target).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }
}

impl Listener for MiniHttpListener {
    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    #[allow(unsafe_code)]
    fn stop(self: Box<Self>) {
        let MiniHttpListener { addr, handle } = *self;
        // SAFETY: `may` marks cancel as unsafe; the handle is owned here and
        // the server coroutine is not used after this point.
        unsafe {
            handle.coroutine().cancel();
        }
        if handle.join().is_err() {
            debug!(addr = %addr, "Server coroutine ended with a panic after cancel");
        }
        info!(addr = %addr, "HTTP listener stopped");
    }
}

/// A transport with no socket. Requests are fed through
/// [`RunningApp::service`](crate::lifecycle::RunningApp::service).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

struct LocalListener;

impl Listener for LocalListener {
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn stop(self: Box<Self>) {
        debug!("Local listener stopped");
    }
}

impl Transport for LocalTransport {
    fn start(&self, _config: &ServerConfig, _service: AppService) -> anyhow::Result<Box<dyn Listener>> {
        Ok(Box::new(LocalListener))
    }
}
