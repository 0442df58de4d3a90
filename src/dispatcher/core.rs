use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::aspect::{
    AspectProvider, AuthenticationAspect, CheckDeclaration, CheckKind, CheckOutcome, FailPolicy,
    GatewayCheckAspect, PermissionsAspect, StaticAspectProvider,
};
use crate::cors::{CorsApplier, DefaultCorsApplier};
use crate::reply::{ActionFault, DefaultReplyConverter, FaultKind, Reply, ReplyConverter};
use crate::router::{bind_params, ActionContext, RouteEntry};
use crate::server::{HttpRequest, HttpResponse};

/// Dispatch stages, in order. Used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    PreCheck,
    Invoke,
    PostProcess,
    Done,
}

impl DispatchStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStage::PreCheck => "pre_check",
            DispatchStage::Invoke => "invoke",
            DispatchStage::PostProcess => "post_process",
            DispatchStage::Done => "done",
        }
    }
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn cached<A: ?Sized>(
    cell: &OnceCell<Arc<A>>,
    resolve: impl FnOnce() -> Option<Arc<A>>,
) -> Option<Arc<A>> {
    if let Some(found) = cell.get() {
        return Some(Arc::clone(found));
    }
    let found = resolve()?;
    Some(Arc::clone(cell.get_or_init(|| found)))
}

/// Runs one matched action: pre-checks, invocation, post-processing.
///
/// Holds no per-request state; one dispatcher serves every request
/// concurrently. Aspect implementations are looked up on first use and
/// cached once found.
pub struct RequestDispatcher {
    aspects: Arc<dyn AspectProvider>,
    gateway: OnceCell<Arc<dyn GatewayCheckAspect>>,
    authentication: OnceCell<Arc<dyn AuthenticationAspect>>,
    permissions: OnceCell<Arc<dyn PermissionsAspect>>,
    warned: [AtomicBool; 3],
    fail_policy: FailPolicy,
    converter: Arc<dyn ReplyConverter>,
    cors: Arc<dyn CorsApplier>,
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(StaticAspectProvider::new()))
    }
}

impl RequestDispatcher {
    #[must_use]
    pub fn new(aspects: Arc<dyn AspectProvider>) -> Self {
        Self {
            aspects,
            gateway: OnceCell::new(),
            authentication: OnceCell::new(),
            permissions: OnceCell::new(),
            warned: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
            fail_policy: FailPolicy::Open,
            converter: Arc::new(DefaultReplyConverter::new()),
            cors: Arc::new(DefaultCorsApplier),
        }
    }

    #[must_use]
    pub fn with_fail_policy(mut self, policy: FailPolicy) -> Self {
        self.fail_policy = policy;
        self
    }

    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn ReplyConverter>) -> Self {
        self.converter = converter;
        self
    }

    #[must_use]
    pub fn with_cors_applier(mut self, cors: Arc<dyn CorsApplier>) -> Self {
        self.cors = cors;
        self
    }

    #[must_use]
    pub fn fail_policy(&self) -> FailPolicy {
        self.fail_policy
    }

    #[must_use]
    pub fn converter(&self) -> &Arc<dyn ReplyConverter> {
        &self.converter
    }

    /// Run the full pipeline for a matched entry.
    pub fn dispatch(&self, entry: &RouteEntry, req: &HttpRequest) -> HttpResponse {
        let started = Instant::now();

        match catch_unwind(AssertUnwindSafe(|| self.pre_check(entry, req))) {
            Ok(CheckOutcome::Continue) => {}
            Ok(CheckOutcome::ShortCircuit(resp)) => {
                info!(
                    request_id = %req.request_id,
                    handler_name = %entry.name(),
                    status = resp.status,
                    stage = %DispatchStage::PreCheck,
                    "Request short-circuited by pre-check"
                );
                return resp;
            }
            Err(panic) => {
                return self.fault(
                    entry,
                    req,
                    DispatchStage::PreCheck,
                    FaultKind::Panic,
                    panic_message(panic.as_ref()),
                );
            }
        }

        let reply = match self.invoke(entry, req) {
            Ok(reply) => reply,
            Err(resp) => return resp,
        };

        let resp = self.post_process(entry, req, reply);
        debug!(
            request_id = %req.request_id,
            handler_name = %entry.name(),
            status = resp.status,
            stage = %DispatchStage::Done,
            latency_us = started.elapsed().as_micros() as u64,
            "Dispatch complete"
        );
        resp
    }

    /// Run the entry's checks in order. The first short-circuit wins.
    pub fn pre_check(&self, entry: &RouteEntry, req: &HttpRequest) -> CheckOutcome {
        for decl in &entry.checks {
            debug!(
                request_id = %req.request_id,
                handler_name = %entry.name(),
                check = %decl.kind(),
                stage = %DispatchStage::PreCheck,
                "Running check"
            );
            let outcome = match decl {
                CheckDeclaration::Gateway(d) => {
                    match cached(&self.gateway, || self.aspects.gateway()) {
                        Some(aspect) => aspect.check(req, &entry.owner, &entry.meta, d),
                        None => self.missing(CheckKind::Gateway, entry),
                    }
                }
                CheckDeclaration::Authentication(d) => {
                    match cached(&self.authentication, || self.aspects.authentication()) {
                        Some(aspect) => aspect.check(req, &entry.owner, &entry.meta, d),
                        None => self.missing(CheckKind::Authentication, entry),
                    }
                }
                CheckDeclaration::Permissions(d) => {
                    match cached(&self.permissions, || self.aspects.permissions()) {
                        Some(aspect) => aspect.check(req, &entry.owner, &entry.meta, d),
                        None => self.missing(CheckKind::Permissions, entry),
                    }
                }
            };
            if !outcome.is_continue() {
                return outcome;
            }
        }
        CheckOutcome::Continue
    }

    fn missing(&self, kind: CheckKind, entry: &RouteEntry) -> CheckOutcome {
        match self.fail_policy {
            FailPolicy::Open => {
                let slot = &self.warned[kind as usize];
                if !slot.swap(true, Ordering::Relaxed) {
                    warn!(
                        check = %kind,
                        handler_name = %entry.name(),
                        "No aspect registered for declared check, allowing request"
                    );
                }
                CheckOutcome::Continue
            }
            FailPolicy::Closed => {
                info!(check = %kind, handler_name = %entry.name(), "No aspect registered, rejecting");
                CheckOutcome::reject(403, &format!("No {kind} aspect registered"))
            }
        }
    }

    /// Bind parameters and run the action.
    ///
    /// `Err` carries the response to send instead: `400` on a binding
    /// failure, the converter's fault response otherwise.
    pub fn invoke(&self, entry: &RouteEntry, req: &HttpRequest) -> Result<Reply, HttpResponse> {
        let args = if entry.params().is_empty() {
            Vec::new()
        } else {
            bind_params(req, entry.params()).map_err(|e| {
                warn!(
                    request_id = %req.request_id,
                    handler_name = %entry.name(),
                    param = %e.param(),
                    error = %e,
                    stage = %DispatchStage::Invoke,
                    "Parameter binding failed"
                );
                e.to_response()
            })?
        };

        let ctx = ActionContext::new(req, entry.params(), &args);
        let execution_start = Instant::now();
        match catch_unwind(AssertUnwindSafe(|| (entry.action)(&ctx))) {
            Ok(Ok(reply)) => {
                debug!(
                    request_id = %req.request_id,
                    handler_name = %entry.name(),
                    execution_time_us = execution_start.elapsed().as_micros() as u64,
                    stage = %DispatchStage::Invoke,
                    "Action complete"
                );
                Ok(reply)
            }
            Ok(Err(e)) => Err(self.fault(
                entry,
                req,
                DispatchStage::Invoke,
                FaultKind::Error,
                format!("{e:#}"),
            )),
            Err(panic) => Err(self.fault(
                entry,
                req,
                DispatchStage::Invoke,
                FaultKind::Panic,
                panic_message(panic.as_ref()),
            )),
        }
    }

    /// Convert the reply and apply CORS (action-level, else owner-level).
    pub fn post_process(&self, entry: &RouteEntry, req: &HttpRequest, reply: Reply) -> HttpResponse {
        let mut resp = self.converter.convert(reply);
        if let Some(policy) = entry.effective_cors() {
            self.cors.apply(&mut resp, policy, req);
            debug!(
                request_id = %req.request_id,
                handler_name = %entry.name(),
                action_level = entry.cors.is_some(),
                stage = %DispatchStage::PostProcess,
                "CORS applied"
            );
        }
        resp
    }

    fn fault(
        &self,
        entry: &RouteEntry,
        req: &HttpRequest,
        stage: DispatchStage,
        kind: FaultKind,
        message: String,
    ) -> HttpResponse {
        let fault = ActionFault {
            handler: entry.name().to_string(),
            kind,
            message,
        };
        error!(
            request_id = %req.request_id,
            handler_name = %entry.name(),
            stage = %stage,
            fault = %fault,
            "Action fault"
        );
        self.converter.fault(&fault)
    }
}

impl fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("fail_policy", &self.fail_policy)
            .field("gateway_cached", &self.gateway.get().is_some())
            .field("authentication_cached", &self.authentication.get().is_some())
            .field("permissions_cached", &self.permissions.get().is_some())
            .finish_non_exhaustive()
    }
}
