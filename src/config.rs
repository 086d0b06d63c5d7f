use std::sync::Arc;
use std::time::Duration;

use crate::observe::TransportObserver;
use crate::proxy::ProxySelector;
use crate::tls::TlsConfig;

pub const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 8;
pub const STANDARD_CONNECT_TIMEOUT: Duration = Duration::from_secs(25);
pub const STANDARD_RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(60);
pub const STANDARD_REQUEST_TIMEOUT: Duration = Duration::from_secs(85);

/// Settings recorded by a [`Transport`](crate::Transport) and applied when its
/// pooling client is first built.
///
/// A zero timeout disables that guard instead of falling back to a default.
/// When all three are set, `request_timeout` should be at least
/// `connect_timeout + response_header_timeout`; otherwise the total deadline
/// fires before the finer-grained ones can. This is not validated.
#[derive(Clone, Default)]
pub struct TransportConfig {
    pub(crate) proxy: Option<ProxySelector>,
    pub(crate) tls: TlsConfig,
    pub(crate) disable_keep_alives: bool,
    pub(crate) disable_compression: bool,
    pub(crate) max_idle_conns_per_host: usize,
    pub(crate) connect_timeout: Duration,
    pub(crate) response_header_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) observer: Option<Arc<dyn TransportObserver>>,
}

impl TransportConfig {
    /// Connect 25s, response headers 60s, whole request 85s.
    pub fn standard() -> Self {
        Self::default()
            .with_connect_timeout(STANDARD_CONNECT_TIMEOUT)
            .with_response_header_timeout(STANDARD_RESPONSE_HEADER_TIMEOUT)
            .with_request_timeout(STANDARD_REQUEST_TIMEOUT)
    }

    /// `None` connects directly.
    pub fn with_proxy_selector(mut self, proxy: impl Into<Option<ProxySelector>>) -> Self {
        self.proxy = proxy.into();
        self
    }

    pub fn with_tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_disable_keep_alives(mut self, disable_keep_alives: bool) -> Self {
        self.disable_keep_alives = disable_keep_alives;
        self
    }

    pub fn with_disable_compression(mut self, disable_compression: bool) -> Self {
        self.disable_compression = disable_compression;
        self
    }

    /// `0` selects [`DEFAULT_MAX_IDLE_CONNS_PER_HOST`].
    pub fn with_max_idle_conns_per_host(mut self, max_idle_conns_per_host: usize) -> Self {
        self.max_idle_conns_per_host = max_idle_conns_per_host;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_response_header_timeout(mut self, response_header_timeout: Duration) -> Self {
        self.response_header_timeout = response_header_timeout;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransportObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn proxy_selector(&self) -> Option<&ProxySelector> {
        self.proxy.as_ref()
    }

    pub fn tls_config(&self) -> &TlsConfig {
        &self.tls
    }

    pub fn disable_keep_alives(&self) -> bool {
        self.disable_keep_alives
    }

    pub fn disable_compression(&self) -> bool {
        self.disable_compression
    }

    pub fn max_idle_conns_per_host(&self) -> usize {
        self.max_idle_conns_per_host
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn response_header_timeout(&self) -> Duration {
        self.response_header_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub(crate) fn effective_max_idle_per_host(&self) -> usize {
        if self.disable_keep_alives {
            0
        } else if self.max_idle_conns_per_host == 0 {
            DEFAULT_MAX_IDLE_CONNS_PER_HOST
        } else {
            self.max_idle_conns_per_host
        }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportConfig")
            .field("proxy", &self.proxy)
            .field("tls", &self.tls)
            .field("disable_keep_alives", &self.disable_keep_alives)
            .field("disable_compression", &self.disable_compression)
            .field("max_idle_conns_per_host", &self.max_idle_conns_per_host)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_header_timeout", &self.response_header_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
