//! Per-controller and per-action CORS policies.
//!
//! A policy attached to an action wins over the owning controller's
//! [`Controller::cors`](crate::router::Controller::cors). The dispatcher hands
//! the chosen policy to a [`CorsApplier`], which writes the
//! `Access-Control-*` headers.

use std::fmt;

use http::Method;

use crate::server::{HttpRequest, HttpResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsPolicy {
    /// Allowed origins. `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub allow_credentials: bool,
    /// Headers exposed to JavaScript
    pub expose_headers: Vec<String>,
    /// Preflight cache duration in seconds
    pub max_age: Option<u32>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".into()],
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_credentials: false,
            expose_headers: vec![],
            max_age: None,
        }
    }
}

impl CorsPolicy {
    /// Restrict to the given origins.
    #[must_use]
    pub fn with_origins(mut self, origins: &[&str]) -> Self {
        self.allowed_origins = origins.iter().map(|o| (*o).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: &[&str]) -> Self {
        self.allowed_headers = headers.iter().map(|h| (*h).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.allowed_methods = methods;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    #[must_use]
    pub fn with_expose_headers(mut self, headers: &[&str]) -> Self {
        self.expose_headers = headers.iter().map(|h| (*h).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    /// Check the origin/credentials combination.
    pub fn validate(&self) -> Result<(), CorsConfigError> {
        if self.allow_credentials {
            if self.allowed_origins.is_empty() {
                return Err(CorsConfigError::EmptyOriginsWithCredentials);
            }
            if self.is_wildcard() {
                return Err(CorsConfigError::WildcardWithCredentials);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsConfigError {
    /// Wildcard origin (`*`) cannot be used with credentials
    WildcardWithCredentials,
    /// When `allow_credentials` is `true`, at least one origin must be listed.
    EmptyOriginsWithCredentials,
}

impl fmt::Display for CorsConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorsConfigError::WildcardWithCredentials => write!(
                f,
                "CORS configuration error: cannot use wildcard origin (*) with credentials"
            ),
            CorsConfigError::EmptyOriginsWithCredentials => write!(
                f,
                "CORS configuration error: cannot use credentials with an empty origins list"
            ),
        }
    }
}

impl std::error::Error for CorsConfigError {}

/// Writes CORS headers for a policy onto a response.
pub trait CorsApplier: Send + Sync {
    fn apply(&self, resp: &mut HttpResponse, policy: &CorsPolicy, req: &HttpRequest);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCorsApplier;

impl DefaultCorsApplier {
    /// The configured origin to send back. Never a value taken from the request.
    fn allow_origin<'a>(policy: &'a CorsPolicy, req: &HttpRequest) -> Option<&'a str> {
        if policy.is_wildcard() {
            return Some("*");
        }
        let origin = req.get_header("origin");
        policy
            .allowed_origins
            .iter()
            .find(|a| Some(a.as_str()) == origin)
            .or_else(|| policy.allowed_origins.first())
            .map(String::as_str)
    }
}

impl CorsApplier for DefaultCorsApplier {
    fn apply(&self, resp: &mut HttpResponse, policy: &CorsPolicy, req: &HttpRequest) {
        if let Some(origin) = Self::allow_origin(policy, req) {
            resp.set_header("Access-Control-Allow-Origin", origin);
            if origin != "*" {
                resp.set_header("Vary", "Origin");
            }
        }
        let methods: Vec<&str> = policy.allowed_methods.iter().map(Method::as_str).collect();
        resp.set_header("Access-Control-Allow-Methods", methods.join(", "));
        if !policy.allowed_headers.is_empty() {
            resp.set_header("Access-Control-Allow-Headers", policy.allowed_headers.join(", "));
        }
        // a wildcard policy never sends credentials
        if policy.allow_credentials && !policy.is_wildcard() {
            resp.set_header("Access-Control-Allow-Credentials", "true");
        }
        if !policy.expose_headers.is_empty() {
            resp.set_header("Access-Control-Expose-Headers", policy.expose_headers.join(", "));
        }
        if let Some(max_age) = policy.max_age {
            resp.set_header("Access-Control-Max-Age", max_age.to_string());
        }
    }
}
