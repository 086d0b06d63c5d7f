use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, TimeoutPhase};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportMetricsSnapshot {
    pub transports_built: u64,
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub timers_armed: u64,
    pub timers_disarmed: u64,
    pub timers_fired: u64,
    /// Armed timers that have neither been disarmed nor fired yet.
    pub timers_active: u64,
    pub timeouts_connect: u64,
    pub timeouts_response_header: u64,
    pub timeouts_total: u64,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct TransportMetrics {
    inner: Arc<TransportMetricsInner>,
}

#[derive(Debug, Default)]
struct TransportMetricsInner {
    transports_built: AtomicU64,
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    timers_armed: AtomicU64,
    timers_disarmed: AtomicU64,
    timers_fired: AtomicU64,
    timeouts_connect: AtomicU64,
    timeouts_response_header: AtomicU64,
    timeouts_total: AtomicU64,
}

impl TransportMetrics {
    pub(crate) fn record_transport_built(&self) {
        self.inner.transports_built.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_completed<T>(&self, result: &Result<T, Error>) {
        match result {
            Ok(_) => {
                self.inner
                    .requests_succeeded
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => self.record_error(error),
        }
    }

    pub(crate) fn record_error(&self, error: &Error) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        if let Some(phase) = error.timeout_phase() {
            let counter = match phase {
                TimeoutPhase::Connect => &self.inner.timeouts_connect,
                TimeoutPhase::ResponseHeader => &self.inner.timeouts_response_header,
                TimeoutPhase::Total => &self.inner.timeouts_total,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_timer_armed(&self) {
        self.inner.timers_armed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timer_disarmed(&self) {
        self.inner.timers_disarmed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timer_fired(&self) {
        self.inner.timers_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransportMetricsSnapshot {
        let timers_armed = self.inner.timers_armed.load(Ordering::Relaxed);
        let timers_disarmed = self.inner.timers_disarmed.load(Ordering::Relaxed);
        let timers_fired = self.inner.timers_fired.load(Ordering::Relaxed);
        TransportMetricsSnapshot {
            transports_built: self.inner.transports_built.load(Ordering::Relaxed),
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            timers_armed,
            timers_disarmed,
            timers_fired,
            timers_active: timers_armed.saturating_sub(timers_disarmed + timers_fired),
            timeouts_connect: self.inner.timeouts_connect.load(Ordering::Relaxed),
            timeouts_response_header: self.inner.timeouts_response_header.load(Ordering::Relaxed),
            timeouts_total: self.inner.timeouts_total.load(Ordering::Relaxed),
        }
    }
}
