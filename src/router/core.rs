use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use tracing::{debug, info, warn};

use super::action::{Action, ActionFn, ParamSpec};
use crate::aspect::CheckDeclaration;
use crate::container::{Component, ControllerHandle, Registry};
use crate::cors::CorsPolicy;
use crate::server::ParamVec;

/// A component that exposes HTTP actions.
///
/// ```ignore
/// impl Controller for PingController {
///     fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
///         routes.get("/ping", Action::bind(&self, "ping", |this, _| this.reply()));
///     }
/// }
/// ```
pub trait Controller: Component {
    fn routes(self: Arc<Self>, routes: &mut Routes<'_>);

    /// Policy for every action of this controller that sets none itself.
    fn cors(&self) -> Option<CorsPolicy> {
        None
    }
}

/// The component that owns an action.
pub struct OwnerInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
    pub instance: Arc<dyn Any + Send + Sync>,
    pub cors: Option<CorsPolicy>,
}

impl OwnerInfo {
    #[must_use]
    pub fn from_handle(handle: &ControllerHandle) -> Self {
        Self {
            type_name: handle.type_name,
            type_id: handle.type_id,
            instance: Arc::clone(&handle.instance),
            cors: handle.controller.cors(),
        }
    }

    /// Owner info for actions registered by hand, outside any controller.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            type_name: "detached",
            type_id: TypeId::of::<()>(),
            instance: Arc::new(()),
            cors: None,
        }
    }

    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.instance).downcast::<T>().ok()
    }

    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for OwnerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerInfo")
            .field("type_name", &self.type_name)
            .field("cors", &self.cors)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodFilter {
    Any,
    Only(Method),
}

impl MethodFilter {
    #[must_use]
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(m) => m == method,
        }
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodFilter::Any => f.write_str("*"),
            MethodFilter::Only(m) => f.write_str(m.as_str()),
        }
    }
}

/// Static description of an action, shared with aspects.
#[derive(Debug, Clone)]
pub struct ActionMeta {
    pub name: Arc<str>,
    pub path: String,
    pub method: MethodFilter,
    pub params: Vec<ParamSpec>,
}

/// One routable action. Read-only once the table is built.
pub struct RouteEntry {
    pub meta: ActionMeta,
    pub owner: Arc<OwnerInfo>,
    /// Sorted gateway, authentication, permissions
    pub checks: Vec<CheckDeclaration>,
    pub cors: Option<CorsPolicy>,
    pub(crate) action: ActionFn,
}

impl RouteEntry {
    /// Build an entry from an action. Checks are put in execution order.
    #[must_use]
    pub fn new(method: MethodFilter, path: &str, action: Action, owner: Arc<OwnerInfo>) -> Self {
        let Action {
            name,
            handler,
            params,
            mut checks,
            cors,
        } = action;
        checks.sort_by_key(CheckDeclaration::kind);
        Self {
            meta: ActionMeta {
                name,
                path: normalize_path(path),
                method,
                params,
            },
            owner,
            checks,
            cors,
            action: handler,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.meta.path
    }

    #[must_use]
    pub fn method(&self) -> &MethodFilter {
        &self.meta.method
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.meta.params
    }

    /// Action-level policy, else the owner's.
    #[must_use]
    pub fn effective_cors(&self) -> Option<&CorsPolicy> {
        self.cors.as_ref().or(self.owner.cors.as_ref())
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("meta", &self.meta)
            .field("owner", &self.owner.type_name)
            .field("checks", &self.checks)
            .field("cors", &self.cors)
            .finish_non_exhaustive()
    }
}

/// Collects a controller's actions.
pub struct Routes<'a> {
    owner: &'a Arc<OwnerInfo>,
    entries: &'a mut Vec<RouteEntry>,
}

impl<'a> Routes<'a> {
    pub fn route(&mut self, method: MethodFilter, path: &str, action: Action) -> &mut Self {
        self.entries
            .push(RouteEntry::new(method, path, action, Arc::clone(self.owner)));
        self
    }

    pub fn get(&mut self, path: &str, action: Action) -> &mut Self {
        self.route(MethodFilter::Only(Method::GET), path, action)
    }

    pub fn post(&mut self, path: &str, action: Action) -> &mut Self {
        self.route(MethodFilter::Only(Method::POST), path, action)
    }

    pub fn put(&mut self, path: &str, action: Action) -> &mut Self {
        self.route(MethodFilter::Only(Method::PUT), path, action)
    }

    pub fn delete(&mut self, path: &str, action: Action) -> &mut Self {
        self.route(MethodFilter::Only(Method::DELETE), path, action)
    }

    pub fn patch(&mut self, path: &str, action: Action) -> &mut Self {
        self.route(MethodFilter::Only(Method::PATCH), path, action)
    }

    /// Matches every method not claimed by an exact-method entry on the same path.
    pub fn any(&mut self, path: &str, action: Action) -> &mut Self {
        self.route(MethodFilter::Any, path, action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(Arc<str>),
}

struct TemplateRoute {
    method: MethodFilter,
    segments: Vec<Segment>,
    entry: Arc<RouteEntry>,
}

impl TemplateRoute {
    fn capture(&self, parts: &[&str]) -> Option<ParamVec> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = ParamVec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => params.push((Arc::clone(name), (*part).to_string())),
            }
        }
        Some(params)
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub entry: Arc<RouteEntry>,
    pub path_params: ParamVec,
}

/// (path, method) → action, built once at startup.
///
/// Literal paths are a hash lookup; templated paths (`/users/{id}`) are tried
/// in registration order after the literal lookup misses. An exact-method
/// entry always beats an `any` entry.
#[derive(Default)]
pub struct RouteTable {
    literal: HashMap<(MethodFilter, String), Arc<RouteEntry>>,
    templates: Vec<TemplateRoute>,
    order: Vec<(MethodFilter, String)>,
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let with_slash = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    if with_slash.len() > 1 {
        with_slash.trim_end_matches('/').to_string()
    } else {
        with_slash
    }
}

fn split_template(path: &str) -> Option<Vec<Segment>> {
    let segments: Vec<Segment> = path
        .trim_start_matches('/')
        .split('/')
        .map(|seg| match seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => Segment::Param(Arc::from(name)),
            None => Segment::Literal(seg.to_string()),
        })
        .collect();
    segments
        .iter()
        .any(|s| matches!(s, Segment::Param(_)))
        .then_some(segments)
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the routes of every registered controller, in registration order.
    #[must_use]
    pub fn build(registry: &Registry) -> Self {
        let mut table = Self::new();
        for handle in registry.controllers() {
            let owner = Arc::new(OwnerInfo::from_handle(handle));
            if let Some(Err(e)) = owner.cors.as_ref().map(CorsPolicy::validate) {
                warn!(controller = handle.type_name, error = %e, "Controller CORS policy is invalid, credentials will not be sent");
            }
            let mut entries = Vec::new();
            let mut routes = Routes {
                owner: &owner,
                entries: &mut entries,
            };
            Arc::clone(&handle.controller).routes(&mut routes);
            debug!(
                controller = handle.type_name,
                actions = entries.len(),
                "Controller routes collected"
            );
            for entry in entries {
                table.insert(entry);
            }
        }

        let routes_summary: Vec<String> = table
            .entries()
            .take(10)
            .map(|e| format!("{} {}", e.method(), e.path()))
            .collect();
        info!(
            routes_count = table.len(),
            templated = table.templates.len(),
            routes_summary = ?routes_summary,
            "Route table built"
        );
        table
    }

    /// Add one entry. An existing entry for the same (method, path) is replaced.
    pub fn insert(&mut self, entry: RouteEntry) {
        if let Some(Err(e)) = entry.cors.as_ref().map(CorsPolicy::validate) {
            warn!(handler = %entry.name(), error = %e, "Action CORS policy is invalid, credentials will not be sent");
        }
        let key = (entry.method().clone(), entry.path().to_string());
        let entry = Arc::new(entry);

        if let Some(segments) = split_template(&key.1) {
            if let Some(existing) = self
                .templates
                .iter_mut()
                .find(|t| t.method == key.0 && t.entry.path() == key.1)
            {
                warn!(
                    method = %key.0,
                    path = %key.1,
                    previous = %existing.entry.name(),
                    handler = %entry.name(),
                    "Route replaced, last registration wins"
                );
                existing.entry = entry;
                return;
            }
            self.templates.push(TemplateRoute {
                method: key.0.clone(),
                segments,
                entry,
            });
            self.order.push(key);
            return;
        }

        if let Some(previous) = self.literal.insert(key.clone(), Arc::clone(&entry)) {
            warn!(
                method = %key.0,
                path = %key.1,
                previous = %previous.name(),
                handler = %entry.name(),
                "Route replaced, last registration wins"
            );
        } else {
            self.order.push(key);
        }
    }

    /// Find the action for a request.
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let path = normalize_path(path);
        let exact = MethodFilter::Only(method.clone());

        for filter in [&exact, &MethodFilter::Any] {
            if let Some(entry) = self.literal.get(&(filter.clone(), path.clone())) {
                return Some(RouteMatch {
                    entry: Arc::clone(entry),
                    path_params: ParamVec::new(),
                });
            }
        }

        let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        for filter in [&exact, &MethodFilter::Any] {
            for template in self.templates.iter().filter(|t| &t.method == filter) {
                if let Some(path_params) = template.capture(&parts) {
                    return Some(RouteMatch {
                        entry: Arc::clone(&template.entry),
                        path_params,
                    });
                }
            }
        }
        None
    }

    /// Entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<RouteEntry>> + '_ {
        self.order.iter().filter_map(move |key| {
            self.literal.get(key).or_else(|| {
                self.templates
                    .iter()
                    .find(|t| t.method == key.0 && t.entry.path() == key.1)
                    .map(|t| &t.entry)
            })
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Log every route at info level.
    pub fn dump_routes(&self) {
        for entry in self.entries() {
            info!(
                method = %entry.method(),
                path = %entry.path(),
                handler = %entry.name(),
                owner = entry.owner.type_name,
                checks = entry.checks.len(),
                "Route"
            );
        }
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.order)
            .finish()
    }
}
