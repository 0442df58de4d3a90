use std::collections::HashSet;
use std::sync::Mutex;

use may_minihttp::Response;
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::warn;

use super::request::HeaderVec;

/// Upper bound on distinct header lines kept in the intern table.
const MAX_INTERNED_HEADERS: usize = 4096;

/// `may_minihttp` stores at most this many headers per response and panics past it.
pub(crate) const MAX_WIRE_HEADERS: usize = 16;

/// `may_minihttp::Response::header` takes `&'static str`. Header lines are
/// interned so each distinct line is leaked at most once.
static INTERNED_HEADERS: Lazy<Mutex<HeaderInterner>> =
    Lazy::new(|| Mutex::new(HeaderInterner::new(MAX_INTERNED_HEADERS)));

/// An outbound response as the core builds it.
///
/// Transports translate it to the wire; the core never touches sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Vec::new(),
        }
    }

    /// `application/json` response from a JSON value.
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        let mut resp = Self::new(status);
        resp.set_header("Content-Type", "application/json");
        resp.body = body.to_string().into_bytes();
        resp
    }

    /// `text/plain; charset=utf-8` response.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut resp = Self::new(status);
        resp.set_header("Content-Type", "text/plain; charset=utf-8");
        resp.body = body.into().into_bytes();
        resp
    }

    #[must_use]
    pub fn bytes(status: u16, body: Vec<u8>, content_type: &str) -> Self {
        let mut resp = Self::new(status);
        resp.set_header("Content-Type", content_type);
        resp.body = body;
        resp
    }

    /// `{"error": message}` with the given status.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    /// Set a header, replacing any existing value (names compare case-insensitively).
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            slot.1 = value;
        } else {
            self.headers.push((name.into(), value));
        }
    }

    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    #[must_use]
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

pub(crate) fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Bounded set of leaked header lines.
///
/// Once `cap` lines are stored, new lines are still leaked per use and not kept,
/// so a response never loses a header to a full table.
pub(crate) struct HeaderInterner {
    lines: HashSet<&'static str>,
    cap: usize,
    overflow_warned: bool,
}

impl HeaderInterner {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            lines: HashSet::new(),
            cap,
            overflow_warned: false,
        }
    }

    pub(crate) fn intern(&mut self, line: String) -> &'static str {
        if let Some(existing) = self.lines.get(line.as_str()) {
            return existing;
        }
        let leaked: &'static str = Box::leak(line.into_boxed_str());
        if self.lines.len() < self.cap {
            self.lines.insert(leaked);
        } else if !self.overflow_warned {
            self.overflow_warned = true;
            warn!(
                cap = self.cap,
                "Header intern table full, further distinct header lines leak per response"
            );
        }
        leaked
    }
}

/// The `Name: value` lines written for `resp`, at most [`MAX_WIRE_HEADERS`].
pub(crate) fn wire_header_lines(
    resp: &HttpResponse,
    interner: &mut HeaderInterner,
) -> Vec<&'static str> {
    let mut lines = Vec::with_capacity(resp.headers.len().min(MAX_WIRE_HEADERS));
    for (name, value) in &resp.headers {
        // may_minihttp writes Content-Length itself
        if name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if lines.len() == MAX_WIRE_HEADERS {
            warn!(header = %name, limit = MAX_WIRE_HEADERS, "Too many response headers, header dropped");
            continue;
        }
        lines.push(interner.intern(format!("{name}: {value}")));
    }
    lines
}

/// Copy an [`HttpResponse`] into a `may_minihttp` response.
pub fn write_response(res: &mut Response, resp: HttpResponse) {
    res.status_code(resp.status as usize, status_reason(resp.status));
    let lines = {
        let mut interner = match INTERNED_HEADERS.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        wire_header_lines(&resp, &mut interner)
    };
    for line in lines {
        res.header(line);
    }
    res.body_vec(resp.body);
}
