use std::time::Duration;

/// Lifecycle hooks for a [`Transport`](crate::Transport).
///
/// Callbacks run inline on the task that triggered them, so they should be
/// cheap and must not block.
pub trait TransportObserver: Send + Sync {
    /// The pooling client was built. Fires at most once per transport.
    fn on_transport_built(&self) {}

    fn on_timer_armed(&self, _timeout: Duration) {}

    /// The total-request deadline elapsed and the request was cancelled.
    fn on_timer_fired(&self, _timeout: Duration) {}

    fn on_timer_disarmed(&self) {}
}
