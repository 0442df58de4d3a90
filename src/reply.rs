use std::fmt;

use serde_json::{json, Value};

use crate::server::{HttpRequest, HttpResponse};

/// What an action hands back before conversion to a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Passed through unchanged
    Response(HttpResponse),
    Json(Value),
    Text(String),
    Bytes(Vec<u8>, String),
    /// No content; rendered as `200` with an empty body
    Empty,
}

impl Reply {
    #[must_use]
    pub fn json(value: Value) -> Self {
        Reply::Json(value)
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    #[must_use]
    pub fn bytes(body: Vec<u8>, content_type: impl Into<String>) -> Self {
        Reply::Bytes(body, content_type.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The action returned `Err`
    Error,
    Panic,
}

/// A failed invocation, as seen by [`ReplyConverter::fault`].
#[derive(Debug, Clone)]
pub struct ActionFault {
    pub handler: String,
    pub kind: FaultKind,
    pub message: String,
}

impl fmt::Display for ActionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FaultKind::Error => write!(f, "{} failed: {}", self.handler, self.message),
            FaultKind::Panic => write!(f, "{} panicked: {}", self.handler, self.message),
        }
    }
}

/// Turns replies, faults and routing misses into responses.
pub trait ReplyConverter: Send + Sync {
    fn convert(&self, reply: Reply) -> HttpResponse;

    fn fault(&self, fault: &ActionFault) -> HttpResponse;

    fn not_found(&self, req: &HttpRequest) -> HttpResponse {
        HttpResponse::json(
            404,
            &json!({ "error": "Not Found", "method": req.method.as_str(), "path": req.path }),
        )
    }
}

/// JSON-first converter with optional fixed 404/500 pages.
#[derive(Debug, Clone, Default)]
pub struct DefaultReplyConverter {
    not_found_page: Option<String>,
    error_page: Option<String>,
}

impl DefaultReplyConverter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_not_found_page(mut self, page: impl Into<String>) -> Self {
        self.not_found_page = Some(page.into());
        self
    }

    #[must_use]
    pub fn with_error_page(mut self, page: impl Into<String>) -> Self {
        self.error_page = Some(page.into());
        self
    }
}

fn page(status: u16, body: &str) -> HttpResponse {
    HttpResponse::bytes(status, body.as_bytes().to_vec(), "text/html; charset=utf-8")
}

impl ReplyConverter for DefaultReplyConverter {
    fn convert(&self, reply: Reply) -> HttpResponse {
        match reply {
            Reply::Response(resp) => resp,
            Reply::Json(value) => HttpResponse::json(200, &value),
            Reply::Text(text) => HttpResponse::text(200, text),
            Reply::Bytes(body, content_type) => HttpResponse::bytes(200, body, &content_type),
            Reply::Empty => HttpResponse::new(200),
        }
    }

    fn fault(&self, fault: &ActionFault) -> HttpResponse {
        match &self.error_page {
            Some(body) => page(500, body),
            None => HttpResponse::json(
                500,
                &json!({ "error": "Internal Server Error", "details": fault.message }),
            ),
        }
    }

    fn not_found(&self, req: &HttpRequest) -> HttpResponse {
        match &self.not_found_page {
            Some(body) => page(404, body),
            None => HttpResponse::json(
                404,
                &json!({ "error": "Not Found", "method": req.method.as_str(), "path": req.path }),
            ),
        }
    }
}
