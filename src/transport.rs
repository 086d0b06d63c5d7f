use std::time::Duration;

use http::header::{
    ACCEPT_ENCODING, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue, PROXY_AUTHORIZATION,
    RANGE,
};
use http::request::Parts;
use http::{HeaderMap, Method, Request, Response};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::capture_connection;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::debug;

use crate::body::{RequestBody, ResponseBody};
use crate::config::TransportConfig;
use crate::error::{Error, TimeoutPhase};
use crate::metrics::{TransportMetrics, TransportMetricsSnapshot};
use crate::proxy::ProxyConnector;
use crate::timer::RequestTimer;
use crate::util::{map_transport_error, non_zero, redact_uri_for_logs, timeout_error};

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

type PoolClient = Client<HttpsConnector<ProxyConnector>, RequestBody>;

/// Outbound HTTP transport with connect, response-header and total-request
/// timeouts over a shared connection pool.
///
/// Construction only records the configuration. The pool, TLS setup and
/// connector are built on the first round trip; concurrent first callers wait
/// for that single build and then share it. Construct one per backend at
/// startup and share it by reference (`Arc<Transport>`).
pub struct Transport {
    config: TransportConfig,
    pool: OnceCell<PoolClient>,
    metrics: TransportMetrics,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
            metrics: TransportMetrics::default(),
        }
    }

    /// A transport using [`TransportConfig::standard`].
    pub fn standard() -> Self {
        Self::new(TransportConfig::standard())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether the pooling client has been built yet.
    pub fn is_started(&self) -> bool {
        self.pool.initialized()
    }

    pub fn metrics_snapshot(&self) -> TransportMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn pool(&self) -> Result<&PoolClient, Error> {
        self.pool
            .get_or_try_init(|| async { self.build_pool() })
            .await
    }

    fn build_pool(&self) -> Result<PoolClient, Error> {
        let tls_config = self.config.tls.build_client_config()?;
        let connector = ProxyConnector::new(
            self.config.proxy.clone(),
            non_zero(self.config.connect_timeout),
        );
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);
        let pool = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(self.config.effective_max_idle_per_host())
            .build(https);

        self.metrics.record_transport_built();
        if let Some(observer) = &self.config.observer {
            observer.on_transport_built();
        }
        debug!(
            max_idle_per_host = self.config.effective_max_idle_per_host(),
            connect_timeout_ms = self.config.connect_timeout.as_millis() as u64,
            response_header_timeout_ms = self.config.response_header_timeout.as_millis() as u64,
            request_timeout_ms = self.config.request_timeout.as_millis() as u64,
            proxied = self.config.proxy.is_some(),
            "built pooling http transport"
        );
        Ok(pool)
    }

    /// Sends one request and returns once response headers arrive.
    ///
    /// With a non-zero request timeout, a deadline is armed before sending.
    /// On failure it is stopped right away; on success it moves into the
    /// returned [`ResponseBody`] and keeps covering body reads until the body
    /// is closed or dropped. With a zero request timeout no timer exists at all.
    pub async fn round_trip(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, Error> {
        let (mut parts, body) = request.into_parts();
        if parts.uri.scheme().is_none() || parts.uri.host().is_none() {
            return Err(Error::InvalidUri {
                uri: parts.uri.to_string(),
            });
        }
        let method = parts.method.clone();
        let uri = redact_uri_for_logs(&parts.uri);
        let gzip_requested = self.prepare_headers(&mut parts);

        let pool = self.pool().await?;
        self.metrics.record_request_started();
        debug!(method = %method, uri = %uri, "sending request");

        let request = Request::from_parts(parts, body);
        let result = match non_zero(self.config.request_timeout) {
            None => self
                .send(pool, request, &method, &uri)
                .await
                .map(|response| wrap_response(response, gzip_requested)),
            Some(request_timeout) => {
                let timer = RequestTimer::arm(
                    request_timeout,
                    uri.clone(),
                    self.metrics.clone(),
                    self.config.observer.clone(),
                );
                let token = timer.token();
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        Err(timeout_error(TimeoutPhase::Total, request_timeout, &method, &uri))
                    }
                    result = self.send(pool, request, &method, &uri) => result,
                };
                match outcome {
                    Ok(_) if timer.has_fired() => {
                        timer.finish();
                        Err(timeout_error(
                            TimeoutPhase::Total,
                            request_timeout,
                            &method,
                            &uri,
                        ))
                    }
                    Ok(response) => Ok(wrap_response(response, gzip_requested)
                        .map(|body| body.guarded(timer, method.clone(), uri.clone()))),
                    Err(error) => {
                        timer.finish();
                        Err(error)
                    }
                }
            }
        };

        self.metrics.record_request_completed(&result);
        match &result {
            Ok(response) => debug!(
                method = %method,
                uri = %uri,
                status = response.status().as_u16(),
                "received response headers"
            ),
            Err(error) => debug!(
                method = %method,
                uri = %uri,
                code = error.code().as_str(),
                error = %error,
                "request failed"
            ),
        }
        result
    }

    /// The response-header budget starts once the pool hands back a
    /// connection, so time spent dialing never counts against it.
    async fn send(
        &self,
        pool: &PoolClient,
        mut request: Request<RequestBody>,
        method: &Method,
        uri: &str,
    ) -> Result<Response<Incoming>, Error> {
        let map_error = |error: hyper_util::client::legacy::Error| {
            map_transport_error(error, non_zero(self.config.connect_timeout), method, uri)
        };
        let Some(header_timeout) = non_zero(self.config.response_header_timeout) else {
            return pool.request(request).await.map_err(map_error);
        };

        let mut capture = capture_connection(&mut request);
        let sending = pool.request(request);
        tokio::pin!(sending);
        let connected = async {
            capture.wait_for_connection_metadata().await;
        };
        tokio::select! {
            biased;
            result = &mut sending => return result.map_err(map_error),
            () = connected => {}
        }

        match timeout(header_timeout, sending).await {
            Ok(result) => result.map_err(map_error),
            Err(_) => Err(timeout_error(
                TimeoutPhase::ResponseHeader,
                header_timeout,
                method,
                uri,
            )),
        }
    }

    /// Returns whether gzip was negotiated on the caller's behalf.
    fn prepare_headers(&self, parts: &mut Parts) -> bool {
        let headers = &mut parts.headers;
        if self.config.disable_keep_alives {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        if let Some(selector) = &self.config.proxy
            && let Some(authorization) = selector.authorization()
            && parts
                .uri
                .scheme_str()
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http"))
            && !headers.contains_key(PROXY_AUTHORIZATION)
            && selector.select(&parts.uri).is_some()
        {
            headers.insert(PROXY_AUTHORIZATION, authorization.clone());
        }
        should_request_gzip(&self.config, &parts.method, headers)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Transport")
            .field("config", &self.config)
            .field("started", &self.is_started())
            .finish()
    }
}

fn should_request_gzip(config: &TransportConfig, method: &Method, headers: &mut HeaderMap) -> bool {
    if config.disable_compression
        || *method == Method::HEAD
        || headers.contains_key(ACCEPT_ENCODING)
        || headers.contains_key(RANGE)
    {
        return false;
    }
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    true
}

fn wrap_response(response: Response<Incoming>, gzip_requested: bool) -> Response<ResponseBody> {
    let (mut parts, body) = response.into_parts();
    let decode_gzip = gzip_requested
        && parts
            .headers
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("gzip"));
    if decode_gzip {
        parts.headers.remove(CONTENT_ENCODING);
        parts.headers.remove(CONTENT_LENGTH);
    }
    Response::from_parts(parts, ResponseBody::new(body, decode_gzip))
}
