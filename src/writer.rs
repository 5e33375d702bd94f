//! Response sinks.
//!
//! Handlers never build a response value. They write into the context's
//! current [`ResponseWriter`], the same way a Go `http.ResponseWriter` or a
//! servlet output stream works: set headers, commit a status, write bytes.
//!
//! ```text
//! Context ── slot ──▶ Box<dyn ResponseWriter>
//!                        │
//!                        ├─ ResponseBuffer         root sink, becomes the hyper response
//!                        └─ CaptureWriter          installed by middleware::logging
//!                              └─ inner sink       (any ResponseWriter)
//! ```
//!
//! Nothing hits the wire until the whole chain has returned, so every sink
//! here is an in-memory buffer. The *semantics* are still those of a
//! streaming writer: the first status wins and a body write without a
//! status commits `200 OK`.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use parking_lot::Mutex;
use tracing::{debug, warn};

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// The response side of a [`Context`](crate::Context).
///
/// Implement this to decorate the sink (see [`CaptureWriter`]). Decorators
/// must forward every call to the sink they wrap.
pub trait ResponseWriter: Send {
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commits the status code. Only the first call has an effect.
    fn write_header(&mut self, status: StatusCode);

    /// Appends body bytes, committing `200 OK` if no status was set yet.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// The status that will be sent: the committed one, or `200 OK`.
    fn status(&self) -> StatusCode;

    /// Forgets the committed status and the body written so far. Headers
    /// are kept.
    fn reset(&mut self);

    /// Unwraps every decorator down to the root buffer.
    fn into_buffer(self: Box<Self>) -> ResponseBuffer;
}

// ── ResponseBuffer ────────────────────────────────────────────────────────────

/// The root sink. One per request (and one per [`timeout`] attempt).
///
/// [`timeout`]: crate::middleware::timeout
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty buffer that starts out with a copy of `headers`.
    pub(crate) fn with_headers(headers: HeaderMap) -> Self {
        Self { status: None, headers, body: BytesMut::new() }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Re-applies everything written here onto `target`: the header map is
    /// replaced, the status is committed if one was set, the body appended.
    pub(crate) fn replay(self, target: &mut dyn ResponseWriter) {
        *target.headers_mut() = self.headers;
        if let Some(status) = self.status {
            target.write_header(status);
        }
        if !self.body.is_empty() {
            if let Err(e) = target.write(&self.body) {
                warn!("failed to replay response body: {e}");
            }
        }
    }

    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body.freeze()));
        *res.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *res.headers_mut() = self.headers;
        res
    }
}

impl ResponseWriter for ResponseBuffer {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        match self.status {
            Some(current) => {
                debug!(%current, ignored = %status, "superfluous write_header call");
            }
            None => self.status = Some(status),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    fn reset(&mut self) {
        self.status = None;
        self.body.clear();
    }

    fn into_buffer(self: Box<Self>) -> ResponseBuffer {
        *self
    }
}

// ── CaptureWriter ─────────────────────────────────────────────────────────────

/// What a [`CaptureWriter`] observed: the status and a copy of every body
/// byte that went through it.
#[derive(Debug, Default)]
pub struct Captured {
    status: StatusCode,
    body: BytesMut,
}

impl Captured {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Records status and body while forwarding everything to the wrapped sink.
///
/// The recorded status is read back from the inner sink after each write, so
/// it is always the status the client will actually get, including the
/// implicit `200 OK` and ignoring superfluous `write_header` calls.
pub struct CaptureWriter {
    inner: Box<dyn ResponseWriter>,
    captured: Arc<Mutex<Captured>>,
}

impl CaptureWriter {
    /// Wraps `inner`, recording into `captured`. The recorded status starts
    /// out as whatever `inner` would send right now.
    pub fn new(inner: Box<dyn ResponseWriter>, captured: Arc<Mutex<Captured>>) -> Self {
        captured.lock().status = inner.status();
        Self { inner, captured }
    }
}

impl ResponseWriter for CaptureWriter {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.inner.write_header(status);
        self.captured.lock().status = self.inner.status();
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res = self.inner.write(buf);
        let mut captured = self.captured.lock();
        captured.body.extend_from_slice(buf);
        captured.status = self.inner.status();
        res
    }

    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn reset(&mut self) {
        self.inner.reset();
        let mut captured = self.captured.lock();
        captured.body.clear();
        captured.status = self.inner.status();
    }

    fn into_buffer(self: Box<Self>) -> ResponseBuffer {
        self.inner.into_buffer()
    }
}
