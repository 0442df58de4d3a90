use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use http::Method;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::debug;

use crate::ids::RequestId;

/// Maximum inline headers/cookies before heap allocation.
/// Most requests carry ≤16 headers.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Maximum inline path/query parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated header/cookie storage for the hot path.
///
/// Names are `Arc<str>` so repeated names (Content-Type, Authorization, ...)
/// clone in O(1); values are per-request data.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Stack-allocated parameter storage for path and query parameters.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// A parsed inbound request as the core sees it.
///
/// The transport builds one per request and hands it to
/// [`AppService::handle`](crate::server::AppService::handle). Path parameters
/// are filled in after the route table lookup; attributes are a scratch map
/// interceptors and aspects use to pass data to actions.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Correlation id for logs (taken from `x-request-id` when valid)
    pub request_id: RequestId,
    /// HTTP method
    pub method: Method,
    /// Request path without query string and without the context path
    pub path: String,
    /// Decoded query string parameters
    pub query_params: ParamVec,
    /// Path parameters captured by a templated route
    pub path_params: ParamVec,
    /// Headers, names as received
    pub headers: HeaderVec,
    /// Cookies parsed from the `Cookie` header
    pub cookies: HeaderVec,
    /// Raw request body
    pub body: Vec<u8>,
    attributes: HashMap<String, Value>,
}

impl HttpRequest {
    /// Build a request from a method and a target (`/path?query`).
    #[must_use]
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query_params) = split_target(target);
        Self {
            request_id: RequestId::new(),
            method,
            path,
            query_params,
            path_params: ParamVec::new(),
            headers: HeaderVec::new(),
            cookies: HeaderVec::new(),
            body: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Shorthand for a `GET` request.
    #[must_use]
    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    /// Add a header. A `Cookie` header also populates [`HttpRequest::cookies`].
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push_header(name, value.into());
        self
    }

    /// Set a raw body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body and the matching content type.
    #[must_use]
    pub fn with_json(self, body: &Value) -> Self {
        let bytes = body.to_string().into_bytes();
        self.with_header("content-type", "application/json")
            .with_body(bytes)
    }

    fn push_header(&mut self, name: &str, value: String) {
        if name.eq_ignore_ascii_case("cookie") {
            self.cookies.extend(parse_cookies(&value));
        }
        if name.eq_ignore_ascii_case("x-request-id") {
            self.request_id = RequestId::from_header_or_new(Some(&value));
        }
        self.headers.push((Arc::from(name), value));
    }

    /// Get a header by name (case-insensitive per RFC 7230)
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name ("last write wins" for duplicates)
    #[inline]
    #[must_use]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a path parameter by name ("last write wins" for duplicates)
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a cookie by name
    #[inline]
    #[must_use]
    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// The body as UTF-8, if it is valid UTF-8.
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// The body parsed as JSON. Empty or malformed bodies yield `None`.
    #[must_use]
    pub fn body_json(&self) -> Option<Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }
}

/// Parse `a=b; c=d` cookie header values.
pub fn parse_cookies(header: &str) -> HeaderVec {
    header
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            let name = parts.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let value = parts.next().unwrap_or("").trim().to_string();
            Some((Arc::from(name), value))
        })
        .collect()
}

/// Parse query string parameters from a request target.
///
/// Everything after the first `?` is URL-decoded.
pub fn parse_query_params(target: &str) -> ParamVec {
    match target.split_once('?') {
        Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (Arc::from(k.as_ref()), v.into_owned()))
            .collect(),
        None => ParamVec::new(),
    }
}

fn split_target(target: &str) -> (String, ParamVec) {
    let path = target.split('?').next().unwrap_or("/");
    let path = if path.is_empty() { "/" } else { path };
    (path.to_string(), parse_query_params(target))
}

/// Strip the configured context path from a request path.
///
/// Returns `None` when the path lies outside the context path; such requests
/// are not served by this application.
#[must_use]
pub fn strip_context_path<'a>(path: &'a str, context_path: Option<&str>) -> Option<&'a str> {
    let ctx = match context_path.map(|c| c.trim_end_matches('/')) {
        None | Some("") => return Some(path),
        Some(ctx) => ctx,
    };
    let rest = path.strip_prefix(ctx)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Convert a `may_minihttp` request into an [`HttpRequest`].
///
/// Returns `None` when the method is not a valid token or the path is outside
/// `context_path`.
pub fn from_minihttp(req: may_minihttp::Request, context_path: Option<&str>) -> Option<HttpRequest> {
    let method: Method = req.method().parse().ok()?;
    let raw_target = req.path().to_string();
    let raw_path = raw_target.split('?').next().unwrap_or("/");
    let path = strip_context_path(raw_path, context_path)?.to_string();

    let mut parsed = HttpRequest {
        request_id: RequestId::new(),
        method,
        path,
        query_params: parse_query_params(&raw_target),
        path_params: ParamVec::new(),
        headers: HeaderVec::new(),
        cookies: HeaderVec::new(),
        body: Vec::new(),
        attributes: HashMap::new(),
    };
    for h in req.headers() {
        let value = String::from_utf8_lossy(h.value).into_owned();
        parsed.push_header(h.name, value);
    }

    let mut body = Vec::new();
    if let Err(e) = req.body().read_to_end(&mut body) {
        debug!(error = %e, "Request body read failed");
    }
    parsed.body = body;

    debug!(
        request_id = %parsed.request_id,
        method = %parsed.method,
        path = %parsed.path,
        header_count = parsed.headers.len(),
        body_size_bytes = parsed.body.len(),
        "HTTP request parsed"
    );
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookies() {
        let cookies = parse_cookies("a=b; c=d");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].1, "b");
        assert_eq!(cookies[1].0.as_ref(), "c");
    }

    #[test]
    fn test_parse_query_params() {
        let q = parse_query_params("/p?x=1&y=hello%20world");
        assert_eq!(q.len(), 2);
        assert_eq!(q[1].1, "hello world");
    }

    #[test]
    fn test_new_splits_target() {
        let req = HttpRequest::get("/users?limit=10&limit=20");
        assert_eq!(req.path, "/users");
        assert_eq!(req.get_query_param("limit"), Some("20"));
    }

    #[test]
    fn test_cookie_header_populates_cookies() {
        let req = HttpRequest::get("/").with_header("Cookie", "session=abc");
        assert_eq!(req.get_cookie("session"), Some("abc"));
        assert_eq!(req.get_header("cookie"), Some("session=abc"));
    }

    #[test]
    fn test_strip_context_path() {
        assert_eq!(strip_context_path("/api/ping", Some("/api")), Some("/ping"));
        assert_eq!(strip_context_path("/api", Some("/api/")), Some("/"));
        assert_eq!(strip_context_path("/apix/ping", Some("/api")), None);
        assert_eq!(strip_context_path("/ping", None), Some("/ping"));
        assert_eq!(strip_context_path("/ping", Some("")), Some("/ping"));
    }

    #[test]
    fn test_attributes() {
        let mut req = HttpRequest::get("/");
        req.set_attribute("user", serde_json::json!("alice"));
        assert_eq!(req.attribute("user"), Some(&serde_json::json!("alice")));
        assert!(req.remove_attribute("user").is_some());
        assert!(req.attribute("user").is_none());
    }
}
