use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::metrics::TransportMetrics;
use crate::observe::TransportObserver;

const ARMED: u8 = 0;
const DISARMED: u8 = 1;
const FIRED: u8 = 2;

struct TimerShared {
    state: AtomicU8,
    token: CancellationToken,
    timeout: Duration,
    uri: String,
    metrics: TransportMetrics,
    observer: Option<Arc<dyn TransportObserver>>,
}

impl TimerShared {
    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(ARMED, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn fire(&self) {
        if !self.transition(FIRED) {
            return;
        }
        warn!(
            uri = %self.uri,
            timeout_ms = self.timeout.as_millis() as u64,
            "request timeout elapsed; cancelling in-flight request"
        );
        self.metrics.record_timer_fired();
        if let Some(observer) = &self.observer {
            observer.on_timer_fired(self.timeout);
        }
        self.token.cancel();
    }
}

/// One-shot deadline for a whole request.
///
/// Leaves `Armed` exactly once: either the sleep elapses and the request's
/// cancellation token is triggered, or [`RequestTimer::finish`] (or drop)
/// disarms it and aborts the sleeping task.
pub(crate) struct RequestTimer {
    shared: Arc<TimerShared>,
    task: JoinHandle<()>,
}

impl RequestTimer {
    pub(crate) fn arm(
        timeout: Duration,
        uri: String,
        metrics: TransportMetrics,
        observer: Option<Arc<dyn TransportObserver>>,
    ) -> Self {
        let shared = Arc::new(TimerShared {
            state: AtomicU8::new(ARMED),
            token: CancellationToken::new(),
            timeout,
            uri,
            metrics,
            observer,
        });
        shared.metrics.record_timer_armed();
        if let Some(observer) = &shared.observer {
            observer.on_timer_armed(timeout);
        }

        let task_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            tokio::time::sleep(task_shared.timeout).await;
            task_shared.fire();
        });
        Self { shared, task }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    pub(crate) fn metrics(&self) -> &TransportMetrics {
        &self.shared.metrics
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == FIRED
    }

    /// Stops the timer. Consuming `self` keeps the error path and the
    /// body-close path from both disarming the same timer.
    pub(crate) fn finish(self) {
        drop(self);
    }

    fn disarm(&self) {
        if !self.shared.transition(DISARMED) {
            return;
        }
        self.task.abort();
        self.shared.metrics.record_timer_disarmed();
        if let Some(observer) = &self.shared.observer {
            observer.on_timer_disarmed();
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl std::fmt::Debug for RequestTimer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.shared.state.load(Ordering::Acquire) {
            ARMED => "armed",
            DISARMED => "disarmed",
            _ => "fired",
        };
        formatter
            .debug_struct("RequestTimer")
            .field("timeout", &self.shared.timeout)
            .field("state", &state)
            .finish()
    }
}
