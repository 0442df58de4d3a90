use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use smallvec::SmallVec;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::Interceptor;
use crate::aspect::CheckOutcome;
use crate::server::{HttpRequest, HttpResponse};

/// Request attribute holding the accepted token.
pub const TOKEN_ATTRIBUTE: &str = "auth.token";

type TokenValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Token check on the `token` header or the `Authorization: <scheme> <token>` header.
///
/// Both headers are tried, `token` first, and the first candidate the
/// validator accepts wins. A request with no accepted candidate gets `401`.
/// The accepted token is stored as the [`TOKEN_ATTRIBUTE`] request attribute.
#[derive(Clone)]
pub struct TokenAuthInterceptor {
    validator: TokenValidator,
    rejection_body: Option<Value>,
}

impl TokenAuthInterceptor {
    pub fn new(validator: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            validator: Arc::new(validator),
            rejection_body: None,
        }
    }

    /// Accept exactly one static token, compared in constant time.
    #[must_use]
    pub fn with_static_token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self::new(move |candidate| bool::from(candidate.as_bytes().ct_eq(token.as_bytes())))
    }

    /// JSON body sent with the `401`. Without one the body is empty.
    #[must_use]
    pub fn with_rejection_body(mut self, body: Value) -> Self {
        self.rejection_body = Some(body);
        self
    }

    /// Tokens a request presents: the `token` header, then the second part
    /// of `Authorization`.
    #[must_use]
    pub fn candidate_tokens(req: &HttpRequest) -> SmallVec<[&str; 2]> {
        let mut candidates = SmallVec::new();
        if let Some(token) = req.get_header("token").filter(|t| !t.is_empty()) {
            candidates.push(token);
        }
        if let Some(authorization) = req.get_header("authorization") {
            let mut parts = authorization.split_whitespace();
            if let (Some(_scheme), Some(token)) = (parts.next(), parts.next()) {
                candidates.push(token);
            }
        }
        candidates
    }

    fn reject(&self) -> CheckOutcome {
        let resp = match &self.rejection_body {
            Some(body) => HttpResponse::json(401, body),
            None => HttpResponse::new(401),
        };
        CheckOutcome::ShortCircuit(resp)
    }
}

impl fmt::Debug for TokenAuthInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthInterceptor")
            .field("rejection_body", &self.rejection_body)
            .finish_non_exhaustive()
    }
}

impl Interceptor for TokenAuthInterceptor {
    fn before(&self, req: &mut HttpRequest) -> CheckOutcome {
        let accepted = {
            let candidates = Self::candidate_tokens(req);
            let found = candidates.iter().find(|t| (self.validator)(t)).map(|t| (*t).to_string());
            if found.is_none() {
                if candidates.is_empty() {
                    debug!(request_id = %req.request_id, path = %req.path, "No token presented");
                } else {
                    debug!(request_id = %req.request_id, path = %req.path, "Token rejected");
                }
            }
            found
        };
        let Some(token) = accepted else {
            return self.reject();
        };
        req.set_attribute(TOKEN_ATTRIBUTE, Value::String(token));
        CheckOutcome::Continue
    }
}
