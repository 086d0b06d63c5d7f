use std::convert::Infallible;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use flate2::write::GzDecoder;
use http::Method;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use tokio_util::sync::WaitForCancellationFutureOwned;

use crate::error::{Error, TimeoutPhase};
use crate::timer::RequestTimer;
use crate::util::timeout_error;

/// Outbound request body accepted by [`Transport::round_trip`](crate::Transport::round_trip).
pub type RequestBody = BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

fn map_infallible(never: Infallible) -> Box<dyn std::error::Error + Send + Sync> {
    match never {}
}

pub fn empty_body() -> RequestBody {
    Empty::<Bytes>::new().map_err(map_infallible).boxed()
}

pub fn full_body(body: impl Into<Bytes>) -> RequestBody {
    Full::new(body.into()).map_err(map_infallible).boxed()
}

struct BodyGuard {
    timer: RequestTimer,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    method: Method,
    uri: String,
}

impl BodyGuard {
    fn timeout_error(&self) -> Error {
        timeout_error(TimeoutPhase::Total, self.timer.timeout(), &self.method, &self.uri)
    }
}

pub(crate) struct GzipStream {
    decoder: GzDecoder<Vec<u8>>,
}

impl GzipStream {
    pub(crate) fn new() -> Self {
        Self {
            decoder: GzDecoder::new(Vec::new()),
        }
    }

    pub(crate) fn decode(&mut self, chunk: &[u8]) -> Result<Bytes, Error> {
        self.decoder.write_all(chunk).map_err(gzip_error)?;
        Ok(Bytes::from(std::mem::take(self.decoder.get_mut())))
    }

    pub(crate) fn finish(self) -> Result<Bytes, Error> {
        self.decoder.finish().map(Bytes::from).map_err(gzip_error)
    }
}

fn gzip_error(error: std::io::Error) -> Error {
    Error::DecodeContentEncoding {
        encoding: "gzip".to_owned(),
        message: error.to_string(),
    }
}

/// Response body handed back by a round trip.
///
/// Frames pass through unchanged unless the transport negotiated gzip on the
/// caller's behalf, in which case they are decompressed as they stream.
///
/// When the transport has a request timeout, the body owns the request's
/// timer. The deadline keeps covering body reads until the body is closed,
/// either with [`ResponseBody::close`] or by dropping it. Reaching the end of
/// the stream does not stop the timer. If the deadline passes first, the next
/// read fails with a [`TimeoutPhase::Total`] timeout and the connection is
/// dropped.
pub struct ResponseBody {
    guard: Option<BodyGuard>,
    inner: Option<Incoming>,
    gzip: Option<GzipStream>,
}

impl ResponseBody {
    pub(crate) fn new(inner: Incoming, decode_gzip: bool) -> Self {
        Self {
            guard: None,
            inner: Some(inner),
            gzip: decode_gzip.then(GzipStream::new),
        }
    }

    pub(crate) fn guarded(mut self, timer: RequestTimer, method: Method, uri: String) -> Self {
        let cancelled = Box::pin(timer.token().cancelled_owned());
        self.guard = Some(BodyGuard {
            timer,
            cancelled,
            method,
            uri,
        });
        self
    }

    /// Whether a request timer is still attached to this body.
    pub fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }

    pub fn decodes_gzip(&self) -> bool {
        self.gzip.is_some()
    }

    /// Stops the request timer, then releases the underlying stream.
    pub fn close(mut self) {
        if let Some(guard) = self.guard.take() {
            guard.timer.finish();
        }
        self.inner = None;
    }

    /// Reads the remaining body and closes it.
    pub async fn bytes(self) -> Result<Bytes, Error> {
        let collected = BodyExt::collect(self).await?;
        Ok(collected.to_bytes())
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            if this.inner.is_none() {
                return Poll::Ready(None);
            }
            if let Some(guard) = this.guard.as_mut()
                && guard.cancelled.as_mut().poll(cx).is_ready()
            {
                this.inner = None;
                let error = guard.timeout_error();
                guard.timer.metrics().record_error(&error);
                return Poll::Ready(Some(Err(error)));
            }

            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            let frame = match ready!(Pin::new(inner).poll_frame(cx)) {
                Some(Ok(frame)) => frame,
                Some(Err(source)) => {
                    this.inner = None;
                    return Poll::Ready(Some(Err(Error::ReadBody {
                        source: Box::new(source),
                    })));
                }
                None => {
                    this.inner = None;
                    let Some(gzip) = this.gzip.take() else {
                        return Poll::Ready(None);
                    };
                    return match gzip.finish() {
                        Ok(rest) if rest.is_empty() => Poll::Ready(None),
                        Ok(rest) => Poll::Ready(Some(Ok(Frame::data(rest)))),
                        Err(error) => Poll::Ready(Some(Err(error))),
                    };
                }
            };

            let Some(gzip) = this.gzip.as_mut() else {
                return Poll::Ready(Some(Ok(frame)));
            };
            match frame.into_data() {
                Ok(data) => match gzip.decode(&data) {
                    Ok(decoded) if decoded.is_empty() => continue,
                    Ok(decoded) => return Poll::Ready(Some(Ok(Frame::data(decoded)))),
                    Err(error) => {
                        this.inner = None;
                        return Poll::Ready(Some(Err(error)));
                    }
                },
                Err(frame) => return Poll::Ready(Some(Ok(frame))),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Some(inner) => self.gzip.is_none() && inner.is_end_stream(),
            None => true,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Some(inner) if self.gzip.is_none() => inner.size_hint(),
            Some(_) => SizeHint::default(),
            None => SizeHint::with_exact(0),
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResponseBody")
            .field("timer", &self.guard.as_ref().map(|guard| &guard.timer))
            .field("open", &self.inner.is_some())
            .field("gzip", &self.gzip.is_some())
            .finish()
    }
}
