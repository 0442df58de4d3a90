//! # Aspect checks
//!
//! Actions declare policy checks when they are registered. The
//! [`RequestDispatcher`](crate::dispatcher::RequestDispatcher) runs them before
//! invoking the action, in a fixed order:
//!
//! 1. **Gateway** ([`GatewayCheck`]), for edge-level admission such as IP or tenant gates
//! 2. **Authentication** ([`RequiresAuthentication`])
//! 3. **Permissions** ([`RequiresPermissions`])
//!
//! Each check kind is served by an aspect trait object. The dispatcher looks
//! implementations up lazily through an [`AspectProvider`], either a
//! [`StaticAspectProvider`] built by hand or the component
//! [`Registry`] (any component providing `dyn AuthenticationAspect` and so on).
//!
//! A missing implementation is a valid state. Under [`FailPolicy::Open`] the
//! check passes and a warning is logged once. Under [`FailPolicy::Closed`] the
//! request is rejected with `403`.
//!
//! ```ignore
//! struct HeaderAuth;
//!
//! impl AuthenticationAspect for HeaderAuth {
//!     fn check(&self, req: &HttpRequest, _: &OwnerInfo, _: &ActionMeta, _: &RequiresAuthentication) -> CheckOutcome {
//!         match req.get_header("x-user") {
//!             Some(_) => CheckOutcome::Continue,
//!             None => CheckOutcome::reject(401, "Unauthorized"),
//!         }
//!     }
//! }
//!
//! let provider = StaticAspectProvider::new().with_authentication(Arc::new(HeaderAuth));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::container::Registry;
use crate::router::{ActionMeta, OwnerInfo};
use crate::server::{HttpRequest, HttpResponse};

/// Result of a pre-action check or an interceptor `before` hook.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Continue,
    /// Stop the pipeline and send this response
    ShortCircuit(HttpResponse),
}

impl CheckOutcome {
    /// Short-circuit with `{"error": message}`.
    #[must_use]
    pub fn reject(status: u16, message: &str) -> Self {
        CheckOutcome::ShortCircuit(HttpResponse::error(status, message))
    }

    #[must_use]
    pub fn is_continue(&self) -> bool {
        matches!(self, CheckOutcome::Continue)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayCheck {
    /// Free-form labels the gateway aspect can key on
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequiresAuthentication;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionMode {
    /// Every listed permission is required
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiresPermissions {
    pub permissions: Vec<String>,
    pub mode: PermissionMode,
}

impl RequiresPermissions {
    #[must_use]
    pub fn all(permissions: &[&str]) -> Self {
        Self {
            permissions: permissions.iter().map(|p| (*p).to_string()).collect(),
            mode: PermissionMode::All,
        }
    }

    #[must_use]
    pub fn any(permissions: &[&str]) -> Self {
        Self {
            permissions: permissions.iter().map(|p| (*p).to_string()).collect(),
            mode: PermissionMode::Any,
        }
    }

    /// Evaluate against a set of granted permissions.
    #[must_use]
    pub fn is_satisfied_by<S: AsRef<str>>(&self, granted: &[S]) -> bool {
        let has = |p: &String| granted.iter().any(|g| g.as_ref() == p);
        match self.mode {
            PermissionMode::All => self.permissions.iter().all(has),
            PermissionMode::Any => self.permissions.is_empty() || self.permissions.iter().any(has),
        }
    }
}

/// The check kinds, ordered as they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckKind {
    Gateway,
    Authentication,
    Permissions,
}

impl CheckKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Gateway => "gateway",
            CheckKind::Authentication => "authentication",
            CheckKind::Permissions => "permissions",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A check declared on an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDeclaration {
    Gateway(GatewayCheck),
    Authentication(RequiresAuthentication),
    Permissions(RequiresPermissions),
}

impl CheckDeclaration {
    #[must_use]
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckDeclaration::Gateway(_) => CheckKind::Gateway,
            CheckDeclaration::Authentication(_) => CheckKind::Authentication,
            CheckDeclaration::Permissions(_) => CheckKind::Permissions,
        }
    }
}

pub trait GatewayCheckAspect: Send + Sync {
    fn check(
        &self,
        req: &HttpRequest,
        owner: &OwnerInfo,
        action: &ActionMeta,
        decl: &GatewayCheck,
    ) -> CheckOutcome;
}

pub trait AuthenticationAspect: Send + Sync {
    fn check(
        &self,
        req: &HttpRequest,
        owner: &OwnerInfo,
        action: &ActionMeta,
        decl: &RequiresAuthentication,
    ) -> CheckOutcome;
}

pub trait PermissionsAspect: Send + Sync {
    fn check(
        &self,
        req: &HttpRequest,
        owner: &OwnerInfo,
        action: &ActionMeta,
        decl: &RequiresPermissions,
    ) -> CheckOutcome;
}

/// Source of aspect implementations. Every method may return `None`.
pub trait AspectProvider: Send + Sync {
    fn gateway(&self) -> Option<Arc<dyn GatewayCheckAspect>> {
        None
    }

    fn authentication(&self) -> Option<Arc<dyn AuthenticationAspect>> {
        None
    }

    fn permissions(&self) -> Option<Arc<dyn PermissionsAspect>> {
        None
    }
}

/// Aspects supplied directly to the application builder.
#[derive(Clone, Default)]
pub struct StaticAspectProvider {
    gateway: Option<Arc<dyn GatewayCheckAspect>>,
    authentication: Option<Arc<dyn AuthenticationAspect>>,
    permissions: Option<Arc<dyn PermissionsAspect>>,
}

impl StaticAspectProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_gateway(mut self, aspect: Arc<dyn GatewayCheckAspect>) -> Self {
        self.gateway = Some(aspect);
        self
    }

    #[must_use]
    pub fn with_authentication(mut self, aspect: Arc<dyn AuthenticationAspect>) -> Self {
        self.authentication = Some(aspect);
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, aspect: Arc<dyn PermissionsAspect>) -> Self {
        self.permissions = Some(aspect);
        self
    }
}

impl fmt::Debug for StaticAspectProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAspectProvider")
            .field("gateway", &self.gateway.is_some())
            .field("authentication", &self.authentication.is_some())
            .field("permissions", &self.permissions.is_some())
            .finish()
    }
}

impl AspectProvider for StaticAspectProvider {
    fn gateway(&self) -> Option<Arc<dyn GatewayCheckAspect>> {
        self.gateway.clone()
    }

    fn authentication(&self) -> Option<Arc<dyn AuthenticationAspect>> {
        self.authentication.clone()
    }

    fn permissions(&self) -> Option<Arc<dyn PermissionsAspect>> {
        self.permissions.clone()
    }
}

/// Components registered with `provides::<dyn AuthenticationAspect>()` etc.
impl AspectProvider for Registry {
    fn gateway(&self) -> Option<Arc<dyn GatewayCheckAspect>> {
        self.resolve::<dyn GatewayCheckAspect>()
    }

    fn authentication(&self) -> Option<Arc<dyn AuthenticationAspect>> {
        self.resolve::<dyn AuthenticationAspect>()
    }

    fn permissions(&self) -> Option<Arc<dyn PermissionsAspect>> {
        self.resolve::<dyn PermissionsAspect>()
    }
}

/// What happens when an action declares a check no aspect implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailPolicy {
    /// Let the request through and warn once per check kind
    #[default]
    Open,
    /// Reject with `403`
    Closed,
}
