use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use crate::aspect::CheckOutcome;
use crate::dispatcher::panic_message;
use crate::server::{HttpRequest, HttpResponse};

/// A global, path-scoped before/after hook.
pub trait Interceptor: Send + Sync {
    /// Runs before routing. A short-circuit ends the request with its response.
    fn before(&self, _req: &mut HttpRequest) -> CheckOutcome {
        CheckOutcome::Continue
    }

    /// Runs after the response is produced, matched route or not.
    fn after(
        &self,
        _req: &HttpRequest,
        _resp: &mut HttpResponse,
        _elapsed: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Match a request path against one pattern.
///
/// `/x/**` and `/x/*` are plain prefix matches on `/x`, so `/x`, `/x/y` and
/// `/xy` all match. Anything else must be equal to the path.
#[must_use]
pub fn path_matches_pattern(path: &str, pattern: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/**") {
        path.starts_with(prefix)
    } else if let Some(prefix) = pattern.strip_suffix("/*") {
        path.starts_with(prefix)
    } else {
        path == pattern
    }
}

/// `true` iff `path` hits a blocked pattern and no allowed pattern.
#[must_use]
pub fn is_matched<B, A>(path: &str, blocked: &[B], allowed: &[A]) -> bool
where
    B: AsRef<str>,
    A: AsRef<str>,
{
    let is_blocked = blocked
        .iter()
        .any(|p| path_matches_pattern(path, p.as_ref()));
    let is_allowed = allowed
        .iter()
        .any(|p| path_matches_pattern(path, p.as_ref()));
    is_blocked && !is_allowed
}

/// An interceptor with its key and path scope.
#[derive(Clone)]
pub struct InterceptorEntry {
    pub key: String,
    pub blocked: Vec<String>,
    pub allowed: Vec<String>,
    pub interceptor: Arc<dyn Interceptor>,
}

impl InterceptorEntry {
    /// An entry with an empty scope. It intercepts nothing until `block` is called.
    #[must_use]
    pub fn new(key: impl Into<String>, interceptor: Arc<dyn Interceptor>) -> Self {
        Self {
            key: key.into(),
            blocked: Vec::new(),
            allowed: Vec::new(),
            interceptor,
        }
    }

    #[must_use]
    pub fn block(mut self, pattern: impl Into<String>) -> Self {
        self.blocked.push(pattern.into());
        self
    }

    /// Exempt a pattern from interception. Allow overrides block.
    #[must_use]
    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allowed.push(pattern.into());
        self
    }

    #[must_use]
    pub fn is_matched(&self, path: &str) -> bool {
        is_matched(path, &self.blocked, &self.allowed)
    }
}

impl fmt::Debug for InterceptorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorEntry")
            .field("key", &self.key)
            .field("blocked", &self.blocked)
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}

/// The ordered interceptor set.
///
/// Cloning shares the set. Readers take a lock-free snapshot per request;
/// `add` and `remove` swap in a new vector and may run while requests are
/// being served.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    entries: Arc<ArcSwap<Vec<Arc<InterceptorEntry>>>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. An entry with the same key is replaced in place.
    pub fn add(&self, entry: InterceptorEntry) {
        let entry = Arc::new(entry);
        let mut replaced = false;
        self.entries.rcu(|current| {
            let mut next: Vec<Arc<InterceptorEntry>> = (**current).clone();
            replaced = false;
            if let Some(slot) = next.iter_mut().find(|e| e.key == entry.key) {
                *slot = Arc::clone(&entry);
                replaced = true;
            } else {
                next.push(Arc::clone(&entry));
            }
            next
        });
        if replaced {
            warn!(interceptor = %entry.key, "Interceptor replaced");
        } else {
            info!(
                interceptor = %entry.key,
                blocked = ?entry.blocked,
                allowed = ?entry.allowed,
                "Interceptor added"
            );
        }
    }

    /// Remove an entry by key. Returns whether one was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut removed = false;
        self.entries.rcu(|current| {
            let next: Vec<Arc<InterceptorEntry>> = current
                .iter()
                .filter(|e| e.key != key)
                .cloned()
                .collect();
            removed = next.len() != current.len();
            next
        });
        if removed {
            info!(interceptor = %key, "Interceptor removed");
        }
        removed
    }

    /// Snapshot of the current entries, in order.
    #[must_use]
    pub fn entries(&self) -> Arc<Vec<Arc<InterceptorEntry>>> {
        self.entries.load_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Run one request through the chain around `handler`.
    ///
    /// Both phases see the same snapshot. When a `before` hook short-circuits,
    /// the `after` hooks still run on its response for every entry whose
    /// `before` completed, the short-circuiting entry included.
    pub fn wrap<F>(&self, req: &mut HttpRequest, started: Instant, handler: F) -> HttpResponse
    where
        F: FnOnce(&mut HttpRequest) -> HttpResponse,
    {
        let snapshot = self.entries.load_full();
        let matched = matching(&snapshot, &req.path);
        let (mut resp, ran) = match run_before(&matched, req) {
            Ok(()) => (handler(req), matched.len()),
            Err(stopped) => stopped,
        };
        run_after(&matched[..ran], req, &mut resp, started.elapsed());
        resp
    }

    /// Run matching `before` hooks in order. The first short-circuit wins.
    pub fn before(&self, req: &mut HttpRequest) -> CheckOutcome {
        let snapshot = self.entries.load();
        let matched = matching(&snapshot, &req.path);
        match run_before(&matched, req) {
            Ok(()) => CheckOutcome::Continue,
            Err((resp, _)) => CheckOutcome::ShortCircuit(resp),
        }
    }

    /// Run every matching `after` hook in order. Failures are logged and skipped.
    pub fn after(&self, req: &HttpRequest, resp: &mut HttpResponse, elapsed: Duration) {
        let snapshot = self.entries.load();
        run_after(&matching(&snapshot, &req.path), req, resp, elapsed);
    }
}

type Matched<'a> = SmallVec<[&'a Arc<InterceptorEntry>; 8]>;

fn matching<'a>(entries: &'a [Arc<InterceptorEntry>], path: &str) -> Matched<'a> {
    entries.iter().filter(|e| e.is_matched(path)).collect()
}

/// On a short-circuit, returns its response and how many entries completed `before`.
fn run_before(matched: &[&Arc<InterceptorEntry>], req: &mut HttpRequest) -> Result<(), (HttpResponse, usize)> {
    for (idx, entry) in matched.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| entry.interceptor.before(req))) {
            Ok(CheckOutcome::Continue) => {}
            Ok(CheckOutcome::ShortCircuit(resp)) => {
                info!(
                    request_id = %req.request_id,
                    interceptor = %entry.key,
                    path = %req.path,
                    status = resp.status,
                    "Request short-circuited by interceptor"
                );
                return Err((resp, idx + 1));
            }
            Err(panic) => {
                error!(
                    request_id = %req.request_id,
                    interceptor = %entry.key,
                    panic_message = %panic_message(panic.as_ref()),
                    "Interceptor before hook panicked"
                );
                let resp = HttpResponse::json(
                    500,
                    &serde_json::json!({
                        "error": "Internal Server Error",
                        "details": format!("interceptor '{}' failed", entry.key),
                    }),
                );
                return Err((resp, idx));
            }
        }
    }
    Ok(())
}

fn run_after(
    matched: &[&Arc<InterceptorEntry>],
    req: &HttpRequest,
    resp: &mut HttpResponse,
    elapsed: Duration,
) {
    for entry in matched {
        match catch_unwind(AssertUnwindSafe(|| entry.interceptor.after(req, resp, elapsed))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                request_id = %req.request_id,
                interceptor = %entry.key,
                error = %e,
                "Interceptor after hook failed"
            ),
            Err(panic) => error!(
                request_id = %req.request_id,
                interceptor = %entry.key,
                panic_message = %panic_message(panic.as_ref()),
                "Interceptor after hook panicked"
            ),
        }
    }
    debug!(request_id = %req.request_id, status = resp.status, "After chain complete");
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.entries.load().iter().map(|e| e.key.clone()).collect();
        f.debug_struct("InterceptorChain").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_star_covers_prefix_and_below() {
        assert!(path_matches_pattern("/admin/x/y", "/admin/**"));
        assert!(path_matches_pattern("/admin/", "/admin/**"));
        assert!(path_matches_pattern("/admin", "/admin/**"));
        assert!(path_matches_pattern("/administrator", "/admin/**"));
        assert!(!path_matches_pattern("/adm", "/admin/**"));
        assert!(!path_matches_pattern("/public/admin", "/admin/**"));
    }

    #[test]
    fn test_single_star_is_prefix_too() {
        assert!(path_matches_pattern("/admin/x", "/admin/*"));
        assert!(path_matches_pattern("/admin/x/y", "/admin/*"));
        assert!(path_matches_pattern("/admin", "/admin/*"));
        assert!(path_matches_pattern("/adminx", "/admin/*"));
        assert!(!path_matches_pattern("/adm", "/admin/*"));
    }

    #[test]
    fn test_exact_pattern() {
        assert!(path_matches_pattern("/health", "/health"));
        assert!(!path_matches_pattern("/health/live", "/health"));
    }

    #[test]
    fn test_root_wildcard_matches_everything() {
        assert!(path_matches_pattern("/", "/**"));
        assert!(path_matches_pattern("/a/b", "/**"));
    }

    #[test]
    fn test_allow_overrides_block() {
        assert!(is_matched("/api/users", &["/api/**"], &[] as &[&str]));
        assert!(!is_matched("/api/login", &["/api/**"], &["/api/login"]));
    }

    #[test]
    fn test_empty_blocked_never_matches() {
        assert!(!is_matched("/api/x", &[] as &[&str], &["/api/**"]));
        assert!(!is_matched("/api/x", &[] as &[&str], &[] as &[&str]));
    }
}
