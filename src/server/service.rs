use std::io;
use std::sync::Arc;
use std::time::Instant;

use may_minihttp::{HttpService, Request, Response};
use tracing::{debug, info};

use super::request::from_minihttp;
use super::response::{write_response, HttpResponse};
use super::HttpRequest;
use crate::dispatcher::RequestDispatcher;
use crate::interceptor::InterceptorChain;
use crate::router::RouteTable;

struct ServiceInner {
    routes: RouteTable,
    dispatcher: RequestDispatcher,
    interceptors: InterceptorChain,
    context_path: Option<String>,
}

/// The per-request entry point handed to a transport.
///
/// Cheap to clone; every clone shares the same route table, dispatcher and
/// interceptor set.
#[derive(Clone)]
pub struct AppService {
    inner: Arc<ServiceInner>,
}

impl AppService {
    /// `context_path`, when set, is stripped from incoming paths; requests
    /// outside it get `404`.
    #[must_use]
    pub fn new(
        routes: RouteTable,
        dispatcher: RequestDispatcher,
        interceptors: InterceptorChain,
        context_path: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                routes,
                dispatcher,
                interceptors,
                context_path: context_path.filter(|c| !c.trim_matches('/').is_empty()),
            }),
        }
    }

    #[must_use]
    pub fn context_path(&self) -> Option<&str> {
        self.inner.context_path.as_deref()
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    #[must_use]
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.inner.dispatcher
    }

    #[must_use]
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.inner.interceptors
    }

    /// Interceptor `before` → route lookup → dispatch → interceptor `after`.
    ///
    /// A `before` short-circuit replaces lookup and dispatch. The `after`
    /// hooks of the entries that already ran still see its response.
    pub fn handle(&self, mut req: HttpRequest) -> HttpResponse {
        let started = Instant::now();
        let inner = &self.inner;

        let resp = inner.interceptors.wrap(&mut req, started, |req| {
            match inner.routes.lookup(&req.method, &req.path) {
                Some(route_match) => {
                    debug!(
                        request_id = %req.request_id,
                        method = %req.method,
                        path = %req.path,
                        handler_name = %route_match.entry.name(),
                        path_params = ?route_match.path_params,
                        "Route matched"
                    );
                    req.path_params = route_match.path_params;
                    inner.dispatcher.dispatch(&route_match.entry, req)
                }
                None => {
                    info!(
                        request_id = %req.request_id,
                        method = %req.method,
                        path = %req.path,
                        "No route matched"
                    );
                    inner.dispatcher.converter().not_found(req)
                }
            }
        });

        debug!(
            request_id = %req.request_id,
            status = resp.status,
            latency_us = started.elapsed().as_micros() as u64,
            "Request complete"
        );
        resp
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let resp = match from_minihttp(req, self.context_path()) {
            Some(parsed) => self.handle(parsed),
            None => HttpResponse::error(404, "Not Found"),
        };
        write_response(res, resp);
        Ok(())
    }
}
