use std::error::Error as StdError;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};

use crate::error::{Error, TimeoutPhase, TransportErrorKind};

const MAX_LOGGED_BODY_LEN: usize = 2048;

pub(crate) fn redact_uri_for_logs(uri: &Uri) -> String {
    let uri_text = uri.to_string();
    let Ok(mut parsed) = url::Url::parse(&uri_text) else {
        return uri_text.split('?').next().unwrap_or(&uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn parse_uri(uri: &str) -> Result<Uri, Error> {
    let parsed: Uri = uri.parse().map_err(|_| Error::InvalidUri {
        uri: uri.to_owned(),
    })?;
    let supported = parsed.scheme_str().is_some_and(|scheme| {
        scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
    });
    if !supported || parsed.host().is_none() {
        return Err(Error::InvalidUri {
            uri: uri.to_owned(),
        });
    }
    Ok(parsed)
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// Replaces, rather than appends, every header present in `overrides`.
pub(crate) fn apply_header_overrides(headers: &mut HeaderMap, overrides: &HeaderMap) {
    for name in overrides.keys() {
        headers.remove(name);
    }
    for (name, value) in overrides {
        headers.append(name.clone(), value.clone());
    }
}

pub(crate) fn truncate_for_log(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_LOGGED_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_LOGGED_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}

pub(crate) fn timeout_error(
    phase: TimeoutPhase,
    timeout: Duration,
    method: &Method,
    uri: &str,
) -> Error {
    Error::Timeout {
        phase,
        timeout_ms: timeout.as_millis(),
        method: method.clone(),
        uri: uri.to_owned(),
    }
}

fn has_timed_out_source(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(item) = current {
        if let Some(io_error) = item.downcast_ref::<std::io::Error>()
            && io_error.kind() == std::io::ErrorKind::TimedOut
        {
            return true;
        }
        current = item.source();
    }
    false
}

fn classify_transport_error(error: &hyper_util::client::legacy::Error) -> TransportErrorKind {
    if error.is_connect() {
        let text = format!("{error:?}").to_ascii_lowercase();
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    let text = format!("{error:?}").to_ascii_lowercase();
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
        || text.contains("incomplete")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

/// Maps a pooling-client failure into the crate taxonomy. A dial that hit the
/// connector's deadline becomes a connect-phase timeout.
pub(crate) fn map_transport_error(
    error: hyper_util::client::legacy::Error,
    connect_timeout: Option<Duration>,
    method: &Method,
    uri: &str,
) -> Error {
    if error.is_connect()
        && let Some(connect_timeout) = connect_timeout
        && has_timed_out_source(&error)
    {
        return timeout_error(TimeoutPhase::Connect, connect_timeout, method, uri);
    }

    Error::Transport {
        kind: classify_transport_error(&error),
        method: method.clone(),
        uri: uri.to_owned(),
        source: Box::new(error),
    }
}

pub(crate) fn non_zero(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}
