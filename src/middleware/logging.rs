//! Per-request log record.
//!
//! One `INFO` event per request, target `strata::middleware::logging`,
//! message `request handled`:
//!
//! | Field | When |
//! |---|---|
//! | `method`, `path`, `status`, `latency` | always |
//! | `request_id` | an `X-Request-ID` request header is present after the chain ran |
//! | `request_body` | `log_request_body` and the body is non-empty |
//! | `response_body` | `log_response_body` and the body is non-empty |
//!
//! Absent fields are omitted, not written empty.
//!
//! With `log_file` set the event goes to that file as one JSON line, through
//! a JSON subscriber built once per middleware and entered only for the
//! emission. The process-wide subscriber is never replaced, so concurrent
//! requests and tests do not interfere.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Method, StatusCode};
use parking_lot::Mutex;
use tracing::{Dispatch, error, info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::OptionalWriter;

use crate::context::Context;
use crate::handler::{BoxFuture, ErasedHandler, Next};
use crate::middleware::Middleware;
use crate::middleware::request_id::REQUEST_ID_HEADER;
use crate::writer::{CaptureWriter, Captured};

#[derive(Clone, Debug, Default)]
pub struct LoggingConfig {
    pub log_request_body: bool,
    pub log_response_body: bool,
    /// Append records to this file instead of the current subscriber.
    pub log_file: Option<PathBuf>,
}

/// Logging without bodies, to the current subscriber.
pub fn logging() -> Middleware {
    logging_with(LoggingConfig::default())
}

pub fn logging_with(config: LoggingConfig) -> Middleware {
    let file_dispatch = config.log_file.is_some().then(file_dispatch);
    let config = Arc::new(config);
    Middleware::new(move |next| {
        Next::new(Logging {
            config: Arc::clone(&config),
            file_dispatch: file_dispatch.clone(),
            next,
        })
    })
}

struct Logging {
    config: Arc<LoggingConfig>,
    /// JSON subscriber writing to whatever file [`StagedFile`] holds.
    file_dispatch: Option<Dispatch>,
    next: Next,
}

impl ErasedHandler for Logging {
    fn call(&self, ctx: Context) -> BoxFuture {
        let config = Arc::clone(&self.config);
        let file_dispatch = self.file_dispatch.clone();
        let next = self.next.clone();
        Box::pin(async move {
            let log_file = config.log_file.as_deref().and_then(|path| {
                open_log_file(path)
                    .inspect_err(|e| {
                        warn!(path = %path.display(), error = %e, "failed to open log file");
                    })
                    .ok()
            });

            let start = Instant::now();

            let request_body = if config.log_request_body {
                let bytes = ctx.body_bytes().await.unwrap_or_else(|e| {
                    error!(error = %e, "error reading request body");
                    Bytes::new()
                });
                ctx.set_body(bytes.clone());
                bytes
            } else {
                Bytes::new()
            };

            let captured = Arc::new(Mutex::new(Captured::default()));
            ctx.wrap_writer(|inner| Box::new(CaptureWriter::new(inner, Arc::clone(&captured))));

            next.run(ctx.clone()).await;

            let latency = start.elapsed();
            let captured = captured.lock();
            let record = Record {
                method: ctx.method(),
                path: ctx.path(),
                status: captured.status(),
                latency,
                request_id: ctx.header(REQUEST_ID_HEADER).filter(|id| !id.is_empty()),
                request_body: config
                    .log_request_body
                    .then(|| lossy(&request_body))
                    .flatten(),
                response_body: config
                    .log_response_body
                    .then(|| lossy(captured.body()))
                    .flatten(),
            };

            match (log_file, &file_dispatch) {
                (Some(file), Some(dispatch)) => record.emit_to(dispatch, file),
                _ => record.emit(),
            }
        })
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

thread_local! {
    static STAGED: RefCell<Option<File>> = const { RefCell::new(None) };
}

/// Hands the file staged on the current thread to the subscriber. Staging
/// and emission happen inside one synchronous call, so the handle cannot
/// leak to another request.
struct StagedFile;

impl<'a> MakeWriter<'a> for StagedFile {
    type Writer = OptionalWriter<File>;

    fn make_writer(&'a self) -> Self::Writer {
        STAGED.with(|slot| slot.borrow_mut().take()).into()
    }
}

fn file_dispatch() -> Dispatch {
    Dispatch::new(
        tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_writer(StagedFile)
            .finish(),
    )
}

fn lossy(bytes: &[u8]) -> Option<String> {
    (!bytes.is_empty()).then(|| String::from_utf8_lossy(bytes).into_owned())
}

struct Record {
    method: Method,
    path: String,
    status: StatusCode,
    latency: Duration,
    request_id: Option<String>,
    request_body: Option<String>,
    response_body: Option<String>,
}

impl Record {
    fn emit(&self) {
        info!(
            method = %self.method,
            path = %self.path,
            status = self.status.as_u16(),
            latency = ?self.latency,
            request_id = self.request_id.as_deref(),
            request_body = self.request_body.as_deref(),
            response_body = self.response_body.as_deref(),
            "request handled"
        );
    }

    fn emit_to(&self, dispatch: &Dispatch, file: File) {
        STAGED.with(|slot| *slot.borrow_mut() = Some(file));
        tracing::dispatcher::with_default(dispatch, || self.emit());
        STAGED.with(|slot| slot.borrow_mut().take());
    }
}
