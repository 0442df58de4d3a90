//! Global interceptors scoped by path pattern.
//!
//! Every request passes through the [`InterceptorChain`] whether or not a
//! route matches. `before` hooks run ahead of routing and may short-circuit.
//! `after` hooks always run once a response exists.
//!
//! An entry intercepts a path iff the path hits one of its blocked patterns
//! and none of its allowed patterns:
//!
//! | pattern     | matches                                   |
//! |-------------|-------------------------------------------|
//! | `/admin/**` | any path starting with `/admin/`          |
//! | `/admin/*`  | any path starting with `/admin/` (prefix) |
//! | `/health`   | exactly `/health`                         |

mod core;
mod metrics;
mod token_auth;

pub use core::{is_matched, path_matches_pattern, Interceptor, InterceptorChain, InterceptorEntry};
pub use metrics::MetricsInterceptor;
pub use token_auth::{TokenAuthInterceptor, TOKEN_ATTRIBUTE};
