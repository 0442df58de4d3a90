//! # Dispatcher Module
//!
//! The [`RequestDispatcher`] runs one matched [`RouteEntry`](crate::router::RouteEntry)
//! through three stages:
//!
//! 1. **PreCheck**: the action's declared checks run in the order gateway,
//!    authentication, permissions. The first short-circuit ends the request
//!    with the aspect's response.
//! 2. **Invoke**: parameters are bound from the request and the action runs
//!    on its owning instance. A binding failure is a `400`. A returned `Err`
//!    or a panic becomes a `500` through the
//!    [`ReplyConverter`](crate::reply::ReplyConverter).
//! 3. **PostProcess**: the reply is converted to a response and CORS headers
//!    are applied.
//!
//! ## Error Handling
//!
//! - Panics in checks and actions are caught with `catch_unwind` and never reach the transport
//! - Missing aspects follow the configured [`FailPolicy`](crate::aspect::FailPolicy)

mod core;

pub use core::{DispatchStage, RequestDispatcher};
pub(crate) use core::panic_message;
