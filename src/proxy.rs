use std::error::Error as StdError;
use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http::Uri;
use http::header::HeaderValue;
use hyper::rt::{Read as HyperRead, ReadBufCursor, Write as HyperWrite};
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use tower_service::Service;
use tracing::warn;
use url::Url;

pub(crate) type BoxConnectError = Box<dyn StdError + Send + Sync>;

type SelectFn = dyn Fn(&Uri) -> Option<Uri> + Send + Sync;

#[derive(Clone)]
enum Selection {
    PerScheme {
        http: Option<Uri>,
        https: Option<Uri>,
    },
    Custom(Arc<SelectFn>),
}

/// Picks the proxy, if any, for each outbound request target.
#[derive(Clone)]
pub struct ProxySelector {
    selection: Selection,
    no_proxy_rules: Vec<NoProxyRule>,
    authorization: Option<HeaderValue>,
}

impl ProxySelector {
    /// Send every request through `proxy_uri`.
    pub fn fixed(proxy_uri: Uri) -> Self {
        Self::from_selection(Selection::PerScheme {
            http: Some(proxy_uri.clone()),
            https: Some(proxy_uri),
        })
    }

    /// Decide per target. The closure sees only the scheme and authority of
    /// the request target (path `/`). Returning `None` connects directly.
    pub fn custom<F>(select: F) -> Self
    where
        F: Fn(&Uri) -> Option<Uri> + Send + Sync + 'static,
    {
        Self::from_selection(Selection::Custom(Arc::new(select)))
    }

    /// Reads `HTTPS_PROXY`, `HTTP_PROXY` and `NO_PROXY` (either case).
    /// Returns `None` when neither proxy variable holds a usable URI.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<L>(lookup: L) -> Option<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let read = |upper: &str, lower: &str| {
            lookup(upper)
                .or_else(|| lookup(lower))
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let http = read("HTTP_PROXY", "http_proxy").and_then(|value| parse_proxy_uri(&value));
        let https = read("HTTPS_PROXY", "https_proxy").and_then(|value| parse_proxy_uri(&value));
        if http.is_none() && https.is_none() {
            return None;
        }

        let selector = Self::from_selection(Selection::PerScheme { http, https });
        Some(match read("NO_PROXY", "no_proxy") {
            Some(rules) => selector.no_proxy(rules.split(',')),
            None => selector,
        })
    }

    fn from_selection(selection: Selection) -> Self {
        Self {
            selection,
            no_proxy_rules: Vec::new(),
            authorization: None,
        }
    }

    /// Hosts matching any rule bypass the proxy. Accepts `*`, bare domains
    /// (matching subdomains too), and `host:port`. Unparsable rules are skipped.
    pub fn no_proxy<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.no_proxy_rules
            .extend(rules.into_iter().filter_map(|rule| NoProxyRule::parse(rule.as_ref())));
        self
    }

    /// Sent as `Proxy-Authorization` on CONNECT and on forwarded plain-http requests.
    pub fn proxy_authorization(mut self, mut authorization: HeaderValue) -> Self {
        authorization.set_sensitive(true);
        self.authorization = Some(authorization);
        self
    }

    pub fn select(&self, target: &Uri) -> Option<Uri> {
        if should_bypass_proxy_uri(&self.no_proxy_rules, target) {
            return None;
        }
        match &self.selection {
            Selection::PerScheme { http, https } => {
                let scheme = target.scheme_str().unwrap_or_default();
                if scheme.eq_ignore_ascii_case("https") {
                    https.clone()
                } else {
                    http.clone()
                }
            }
            Selection::Custom(select) => select(&request_origin(target)?),
        }
    }

    pub(crate) fn authorization(&self) -> Option<&HeaderValue> {
        self.authorization.as_ref()
    }
}

impl std::fmt::Debug for ProxySelector {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = formatter.debug_struct("ProxySelector");
        match &self.selection {
            Selection::PerScheme { http, https } => {
                debug.field("http", http).field("https", https);
            }
            Selection::Custom(_) => {
                debug.field("custom", &true);
            }
        }
        debug
            .field("no_proxy_rules", &self.no_proxy_rules)
            .field("authorization", &self.authorization.is_some())
            .finish()
    }
}

/// Pooled dials only know scheme and authority, so selection never sees more.
fn request_origin(target: &Uri) -> Option<Uri> {
    Uri::builder()
        .scheme(target.scheme()?.clone())
        .authority(target.authority()?.clone())
        .path_and_query("/")
        .build()
        .ok()
}

fn parse_proxy_uri(value: &str) -> Option<Uri> {
    let candidate = if value.contains("://") {
        value.to_owned()
    } else {
        format!("http://{value}")
    };
    match candidate.parse::<Uri>() {
        Ok(uri) if uri.host().is_some() => Some(uri),
        _ => {
            warn!(proxy = value, "ignoring unparsable proxy uri");
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum NoProxyRule {
    Any,
    Domain { host: String, port: Option<u16> },
}

impl NoProxyRule {
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let mut candidate = text.trim().to_owned();
        let mut port = None;
        if candidate.is_empty() {
            return None;
        }
        if candidate == "*" {
            return Some(Self::Any);
        }
        if let Ok(url) = Url::parse(&candidate)
            && let Some(host) = url.host_str()
        {
            candidate = host.to_owned();
            port = url.port();
        }
        candidate = candidate.trim_start_matches('.').to_owned();
        if let Some(stripped) = candidate.strip_prefix('[') {
            let end = stripped.find(']')?;
            let host = &stripped[..end];
            let suffix = &stripped[end + 1..];
            if let Some(raw_port) = suffix.strip_prefix(':') {
                port = Some(raw_port.parse::<u16>().ok()?);
            } else if !suffix.is_empty() {
                return None;
            }
            candidate = host.to_owned();
        } else if candidate.matches(':').count() == 1 {
            let (host, raw_port) = candidate.rsplit_once(':')?;
            port = Some(raw_port.parse::<u16>().ok()?);
            candidate = host.to_owned();
        }
        if candidate.is_empty() {
            return None;
        }
        Some(Self::Domain {
            host: candidate.to_ascii_lowercase(),
            port,
        })
    }

    pub(crate) fn matches(&self, host: &str, port: Option<u16>) -> bool {
        match self {
            Self::Any => true,
            Self::Domain {
                host: domain,
                port: rule_port,
            } => {
                let host_matches = host == domain || host.ends_with(&format!(".{domain}"));
                if !host_matches {
                    return false;
                }
                match rule_port {
                    Some(rule_port) => port == Some(*rule_port),
                    None => true,
                }
            }
        }
    }
}

fn default_port(uri: &Uri) -> Option<u16> {
    uri.port_u16().or_else(|| match uri.scheme_str() {
        Some(scheme) if scheme.eq_ignore_ascii_case("https") => Some(443),
        Some(scheme) if scheme.eq_ignore_ascii_case("http") => Some(80),
        _ => None,
    })
}

fn should_bypass_proxy_uri(no_proxy_rules: &[NoProxyRule], uri: &Uri) -> bool {
    let Some(host) = uri.host() else {
        return false;
    };
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    let port = default_port(uri);
    no_proxy_rules
        .iter()
        .any(|rule| rule.matches(&normalized, port))
}

#[derive(Debug)]
pub(crate) struct ProxyConnection<T> {
    inner: T,
    proxied: bool,
}

impl<T> ProxyConnection<T> {
    fn new(inner: T, proxied: bool) -> Self {
        Self { inner, proxied }
    }
}

impl<T> HyperRead for ProxyConnection<T>
where
    T: HyperRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_read(cx, buf)
    }
}

impl<T> HyperWrite for ProxyConnection<T>
where
    T: HyperWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<Result<usize, std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_write_vectored(cx, bufs)
    }
}

impl<T> Connection for ProxyConnection<T>
where
    T: Connection,
{
    fn connected(&self) -> Connected {
        self.inner.connected().proxy(self.proxied)
    }
}

/// TCP dialer for the pooling client. Applies the connect timeout to every
/// dial, including dials to a proxy, and routes each destination through the
/// configured [`ProxySelector`].
#[derive(Clone)]
pub(crate) struct ProxyConnector {
    direct: HttpConnector,
    selector: Option<ProxySelector>,
}

impl ProxyConnector {
    pub(crate) fn new(selector: Option<ProxySelector>, connect_timeout: Option<Duration>) -> Self {
        let mut direct = HttpConnector::new();
        direct.enforce_http(false);
        direct.set_nodelay(true);
        direct.set_connect_timeout(connect_timeout);
        Self { direct, selector }
    }
}

impl Service<Uri> for ProxyConnector {
    type Response = ProxyConnection<<HttpConnector as Service<Uri>>::Response>;
    type Error = BoxConnectError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.direct
            .poll_ready(cx)
            .map_err(|error| Box::new(error) as BoxConnectError)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let proxy = self.selector.as_ref().and_then(|selector| {
            selector
                .select(&dst)
                .map(|proxy_uri| (proxy_uri, selector.authorization().cloned()))
        });

        let Some((proxy_uri, authorization)) = proxy else {
            let connecting = self.direct.call(dst);
            return Box::pin(async move {
                connecting
                    .await
                    .map(|connection| ProxyConnection::new(connection, false))
                    .map_err(|error| Box::new(error) as BoxConnectError)
            });
        };

        let scheme = dst.scheme_str().unwrap_or_default();
        if scheme.eq_ignore_ascii_case("https") {
            let mut tunnel = Tunnel::new(proxy_uri, self.direct.clone());
            if let Some(authorization) = authorization {
                tunnel = tunnel.with_auth(authorization);
            }
            let tunnel_target = normalize_tunnel_target_uri(dst);
            return Box::pin(async move {
                poll_fn(|cx| tunnel.poll_ready(cx))
                    .await
                    .map_err(|error| Box::new(error) as BoxConnectError)?;
                tunnel
                    .call(tunnel_target)
                    .await
                    .map(|connection| ProxyConnection::new(connection, false))
                    .map_err(|error| Box::new(error) as BoxConnectError)
            });
        }

        let connecting = self.direct.call(proxy_uri);
        Box::pin(async move {
            connecting
                .await
                .map(|connection| ProxyConnection::new(connection, true))
                .map_err(|error| Box::new(error) as BoxConnectError)
        })
    }
}

pub(crate) fn normalize_tunnel_target_uri(dst: Uri) -> Uri {
    if dst.port().is_some() {
        return dst;
    }
    let Some(default_port) = default_port(&dst) else {
        return dst;
    };
    let Some(host) = dst.host() else {
        return dst;
    };
    let authority_text = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{default_port}")
    } else {
        format!("{host}:{default_port}")
    };

    let Ok(authority) = authority_text.parse() else {
        return dst;
    };
    let original = dst.clone();
    let mut parts = dst.into_parts();
    parts.authority = Some(authority);
    Uri::from_parts(parts).unwrap_or(original)
}
