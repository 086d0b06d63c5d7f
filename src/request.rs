use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method, Request};
use tracing::debug;

use crate::body::{RequestBody, empty_body, full_body};
use crate::error::Error;
use crate::transport::Transport;
use crate::util::{
    apply_header_overrides, parse_header_name, parse_header_value, parse_uri, redact_uri_for_logs,
    truncate_for_log,
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Ordered form fields, encoded as `application/x-www-form-urlencoded`.
/// Repeated keys are kept and sent in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Form {
    pairs: Vec<(String, String)>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((name.into(), value.into()));
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn encode(&self) -> Result<String, Error> {
        serde_urlencoded::to_string(&self.pairs).map_err(|source| Error::SerializeForm { source })
    }
}

impl<K, V> FromIterator<(K, V)> for Form
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Builds a [`HeaderMap`] from string pairs, rejecting invalid names or values.
pub fn header_map<I, K, V>(pairs: I) -> Result<HeaderMap, Error>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = parse_header_name(name.as_ref())?;
        let value = parse_header_value(name.as_str(), value.as_ref())?;
        headers.append(name, value);
    }
    Ok(headers)
}

impl Transport {
    /// `GET uri`, returning the body of a 2xx response.
    pub async fn get(&self, uri: &str) -> Result<Bytes, Error> {
        self.get_with_headers(uri, &HeaderMap::new()).await
    }

    pub async fn get_with_headers(&self, uri: &str, headers: &HeaderMap) -> Result<Bytes, Error> {
        self.execute(Method::GET, uri, headers.clone(), empty_body())
            .await
    }

    /// Form-encoded `POST`, returning the body of a 2xx response.
    pub async fn post(&self, uri: &str, form: &Form) -> Result<Bytes, Error> {
        self.post_with_headers(uri, form, &HeaderMap::new()).await
    }

    /// Like [`Transport::post`]. The form content type is set first, so a
    /// `Content-Type` in `headers` replaces it.
    pub async fn post_with_headers(
        &self,
        uri: &str,
        form: &Form,
        headers: &HeaderMap,
    ) -> Result<Bytes, Error> {
        let mut merged = HeaderMap::new();
        merged.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        apply_header_overrides(&mut merged, headers);
        self.execute(Method::POST, uri, merged, full_body(form.encode()?))
            .await
    }

    async fn execute(
        &self,
        method: Method,
        uri: &str,
        headers: HeaderMap,
        body: RequestBody,
    ) -> Result<Bytes, Error> {
        let uri = parse_uri(uri)?;
        let redacted_uri = redact_uri_for_logs(&uri);
        let mut request = Request::builder()
            .method(method.clone())
            .uri(uri)
            .body(body)
            .map_err(|source| Error::RequestBuild { source })?;
        *request.headers_mut() = headers;

        let response = self.round_trip(request).await?;
        let (parts, body) = response.into_parts();
        let payload = body.bytes().await?;

        if !parts.status.is_success() {
            debug!(
                method = %method,
                uri = %redacted_uri,
                status = parts.status.as_u16(),
                body = %truncate_for_log(&payload),
                "non-success response status"
            );
            return Err(Error::Status {
                status: parts.status,
                body: String::from_utf8_lossy(&payload).into_owned(),
            });
        }

        debug!(
            method = %method,
            uri = %redacted_uri,
            status = parts.status.as_u16(),
            bytes = payload.len(),
            "request completed"
        );
        Ok(payload)
    }
}
