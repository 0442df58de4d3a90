//! Request/response model, the per-request service, and transports.

mod http_server;
mod request;
mod response;
mod service;

pub use http_server::{Listener, LocalTransport, MiniHttpListener, MiniHttpTransport, Transport};
pub use request::{
    from_minihttp, parse_cookies, parse_query_params, strip_context_path, HeaderVec, HttpRequest,
    ParamVec, MAX_INLINE_HEADERS, MAX_INLINE_PARAMS,
};
pub use response::{write_response, HttpResponse};
pub use service::AppService;
