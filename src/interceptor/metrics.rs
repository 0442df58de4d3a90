use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{json, Value};

use super::Interceptor;
use crate::aspect::CheckOutcome;
use crate::server::{HttpRequest, HttpResponse};

/// Request counters fed by the interceptor chain.
///
/// Counts are taken in `after`. Requests short-circuited by an entry ahead of
/// this one never reach it and are not counted. A short-circuit further down
/// the chain is counted with its status. All counters use relaxed atomics.
#[derive(Debug, Default)]
pub struct MetricsInterceptor {
    request_count: AtomicUsize,
    total_latency_ns: AtomicU64,
    client_errors: AtomicUsize,
    server_errors: AtomicUsize,
    in_flight: AtomicUsize,
}

impl MetricsInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Mean latency across all counted requests. Zero before the first one.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Responses with a 4xx status
    #[must_use]
    pub fn client_errors(&self) -> usize {
        self.client_errors.load(Ordering::Relaxed)
    }

    /// Responses with a 5xx status
    #[must_use]
    pub fn server_errors(&self) -> usize {
        self.server_errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> Value {
        json!({
            "requests": self.request_count(),
            "average_latency_us": self.average_latency().as_micros() as u64,
            "client_errors": self.client_errors(),
            "server_errors": self.server_errors(),
            "in_flight": self.in_flight(),
        })
    }
}

impl Interceptor for MetricsInterceptor {
    fn before(&self, _req: &mut HttpRequest) -> CheckOutcome {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        CheckOutcome::Continue
    }

    fn after(
        &self,
        _req: &HttpRequest,
        resp: &mut HttpResponse,
        elapsed: Duration,
    ) -> anyhow::Result<()> {
        // saturating: direct callers may run `after` without `before`
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        match resp.status {
            400..=499 => {
                self.client_errors.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.server_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        Ok(())
    }
}
