//! # Router Module
//!
//! Controllers register their actions through [`Controller::routes`]. At
//! startup [`RouteTable::build`] walks every registered controller and
//! produces an immutable (path, method) → [`RouteEntry`] table.
//!
//! ## Matching
//!
//! - Literal paths (`/ping`) are a single hash lookup.
//! - Templated paths (`/users/{id}`) are split into segments once at build
//!   time and tried in registration order when the literal lookup misses.
//! - An exact-method entry wins over an `any` entry for the same request.
//! - Trailing slashes are ignored (`/ping/` is `/ping`).
//!
//! ## Parameters
//!
//! Each action carries precomputed [`ParamSpec`]s. At request time
//! [`bind_params`] walks them and produces one JSON value per parameter,
//! which the action reads through [`ActionContext`].
//!
//! ```rust,ignore
//! routes.get(
//!     "/users/{id}",
//!     Action::bind(&self, "get_user", |this, ctx| this.find(ctx.int("id")))
//!         .param("id", ParamType::Integer)
//!         .requires_authentication(),
//! );
//! ```

mod action;
mod core;

pub use action::{
    bind_params, Action, ActionContext, ActionFn, BindError, IntoReply, ParamSource, ParamSpec,
    ParamType,
};
pub use core::{
    ActionMeta, Controller, MethodFilter, OwnerInfo, RouteEntry, RouteMatch, RouteTable, Routes,
};
