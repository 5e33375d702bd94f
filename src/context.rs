//! The per-request context.
//!
//! A [`Context`] is a handle, not a value: cloning it is two `Arc` bumps and
//! every clone sees the same request and the same response sink. That is
//! what lets a middleware hand the context to `next` and still inspect the
//! outcome afterwards:
//!
//! ```rust,no_run
//! # use strata::{Context, Middleware};
//! Middleware::from_fn(|ctx: Context, next| async move {
//!     next.run(ctx.clone()).await;
//!     tracing::info!(status = %ctx.response_status(), "done");
//! });
//! ```
//!
//! Locks are only ever held for the duration of one accessor call, never
//! across an `.await`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, IntoHeaderName};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::error::{BoxError, Error};
use crate::writer::{ResponseBuffer, ResponseWriter};

/// A type-erased request body stream.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

pub(crate) fn empty_body() -> Body {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

pub(crate) fn full_body(bytes: Bytes) -> Body {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

/// A file part of a `multipart/form-data` body.
#[derive(Clone, Debug)]
pub struct FormFile {
    file_name: String,
    content_type: Option<String>,
    data: Bytes,
}

impl FormFile {
    /// The client-supplied file name, as sent.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

struct RequestState {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    params: HashMap<String, String>,
    body: Body,
}

/// The in-flight request and the response sink it is answered through.
#[derive(Clone)]
pub struct Context {
    request: Arc<Mutex<RequestState>>,
    response: Arc<Mutex<Box<dyn ResponseWriter>>>,
    deadline: Option<Instant>,
}

impl Context {
    /// Builds a context over a fresh [`ResponseBuffer`].
    pub fn new<B>(req: http::Request<B>) -> Self
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let state = RequestState {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            params: HashMap::new(),
            body: body.map_err(Into::into).boxed_unsync(),
        };
        Self {
            request: Arc::new(Mutex::new(state)),
            response: Arc::new(Mutex::new(Box::new(ResponseBuffer::new()))),
            deadline: None,
        }
    }

    pub(crate) fn set_params(&self, params: HashMap<String, String>) {
        self.request.lock().params = params;
    }

    /// A context sharing this request but writing into its own buffer, seeded
    /// with the headers written so far, and bound to `deadline` (or to the
    /// current deadline, whichever comes first).
    pub(crate) fn detached(&self, deadline: Instant) -> Self {
        let headers = self.response.lock().headers().clone();
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            request: Arc::clone(&self.request),
            response: Arc::new(Mutex::new(Box::new(ResponseBuffer::with_headers(headers)))),
            deadline: Some(deadline),
        }
    }

    /// Detaches the response sink, leaving an empty buffer in its place, and
    /// unwraps it down to the root buffer.
    pub fn take_response(&self) -> ResponseBuffer {
        let writer = std::mem::replace(
            &mut *self.response.lock(),
            Box::new(ResponseBuffer::new()),
        );
        writer.into_buffer()
    }

    /// Finishes the request and produces the response to send.
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        self.take_response().into_response()
    }

    // ── Deadline scope ────────────────────────────────────────────────────────

    /// The point after which work for this request is no longer wanted.
    /// `None` unless a [`timeout`](crate::middleware::timeout) is in the chain.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the deadline passes; never resolves without one.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    // ── Request ───────────────────────────────────────────────────────────────

    pub fn method(&self) -> Method {
        self.request.lock().method.clone()
    }

    pub fn path(&self) -> String {
        self.request.lock().uri.path().to_owned()
    }

    pub fn uri(&self) -> Uri {
        self.request.lock().uri.clone()
    }

    /// Request header lookup. Case-insensitive; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<String> {
        let req = self.request.lock();
        req.headers.get(name)?.to_str().ok().map(str::to_owned)
    }

    pub fn set_request_header<K: IntoHeaderName>(&self, name: K, value: HeaderValue) {
        self.request.lock().headers.insert(name, value);
    }

    /// First value of query parameter `key`, percent-decoded.
    pub fn query(&self, key: &str) -> Option<String> {
        let req = self.request.lock();
        let query = req.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// A named path parameter. For a route `/users/{id}`, `ctx.param("id")`
    /// on `/users/42` returns `Some("42")`.
    pub fn param(&self, name: &str) -> Option<String> {
        self.request.lock().params.get(name).cloned()
    }

    /// Value of the request cookie `name`.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let req = self.request.lock();
        req.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim_matches('"').to_owned())
    }

    /// Takes the body stream out of the request, leaving an empty one.
    pub fn take_body(&self) -> Body {
        std::mem::replace(&mut self.request.lock().body, empty_body())
    }

    /// Replaces the body with a buffered one holding exactly `bytes`.
    pub fn set_body(&self, bytes: impl Into<Bytes>) {
        self.request.lock().body = full_body(bytes.into());
    }

    /// Reads the whole body. The stream is consumed: a second call yields
    /// empty bytes unless something put a body back with [`set_body`](Self::set_body).
    pub async fn body_bytes(&self) -> Result<Bytes, Error> {
        let body = self.take_body();
        let collected = body.collect().await.map_err(Error::Body)?;
        Ok(collected.to_bytes())
    }

    /// Reads the body and decodes it as JSON.
    pub async fn bind_json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let bytes = self.body_bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The file uploaded in multipart form field `key`.
    ///
    /// The body is buffered and put back, so it stays readable and this can
    /// be called once per field of interest.
    pub async fn form_file(&self, key: &str) -> Result<FormFile, Error> {
        let content_type = self.header(header::CONTENT_TYPE.as_str()).unwrap_or_default();
        let boundary = multer::parse_boundary(&content_type)?;
        let bytes = self.body_bytes().await?;
        self.set_body(bytes.clone());

        let stream = futures::stream::once(async move { Ok::<_, Infallible>(bytes) });
        let mut multipart = multer::Multipart::new(stream, boundary);
        while let Some(field) = multipart.next_field().await? {
            if field.name() != Some(key) {
                continue;
            }
            let Some(file_name) = field.file_name().map(str::to_owned) else {
                continue;
            };
            let content_type = field.content_type().map(ToString::to_string);
            let data = field.bytes().await?;
            return Ok(FormFile { file_name, content_type, data });
        }
        Err(Error::MissingFile(key.to_owned()))
    }

    /// Writes the file uploaded in form field `key` to `dst`, creating
    /// missing parent directories. An existing file is truncated.
    pub async fn save_uploaded_file(&self, key: &str, dst: impl AsRef<Path>) -> Result<(), Error> {
        let file = self.form_file(key).await?;
        let dst = dst.as_ref();
        if let Some(dir) = dst.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| Error::CreateDir { path: dir.to_path_buf(), source })?;
        }
        tokio::fs::write(dst, file.data).await?;
        Ok(())
    }

    // ── Response ──────────────────────────────────────────────────────────────

    /// Runs `f` against the current response sink.
    pub fn with_writer<R>(&self, f: impl FnOnce(&mut dyn ResponseWriter) -> R) -> R {
        let mut writer = self.response.lock();
        f(&mut **writer)
    }

    /// Replaces the current sink with `f(current)`. Used to install decorators.
    pub fn wrap_writer(
        &self,
        f: impl FnOnce(Box<dyn ResponseWriter>) -> Box<dyn ResponseWriter>,
    ) {
        let mut slot = self.response.lock();
        let current = std::mem::replace(&mut *slot, Box::new(ResponseBuffer::new()));
        *slot = f(current);
    }

    /// Sets (replaces) a response header.
    pub fn set_header<K: IntoHeaderName>(&self, name: K, value: HeaderValue) {
        self.response.lock().headers_mut().insert(name, value);
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        let writer = self.response.lock();
        writer.headers().get(name)?.to_str().ok().map(str::to_owned)
    }

    /// The status the response will carry if nothing else is written.
    pub fn response_status(&self) -> StatusCode {
        self.response.lock().status()
    }

    pub fn write_header(&self, status: StatusCode) {
        self.response.lock().write_header(status);
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.response.lock().write(buf)
    }

    /// Writes `status` and a plain-text body.
    pub fn string(&self, status: StatusCode, body: impl AsRef<str>) {
        let mut writer = self.response.lock();
        writer
            .headers_mut()
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("text/plain; charset=utf-8"));
        writer.write_header(status);
        // Buffered sinks do not fail.
        let _ = writer.write(body.as_ref().as_bytes());
    }

    /// Serialises `value` and writes it with `status` as `application/json`.
    /// Nothing is written if serialisation fails.
    pub fn json<T: Serialize + ?Sized>(&self, status: StatusCode, value: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value)?;
        let mut writer = self.response.lock();
        writer
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        writer.write_header(status);
        writer.write(&bytes)?;
        Ok(())
    }

    /// `200 OK` with a plain-text body.
    pub fn ok(&self, body: impl AsRef<str>) {
        self.string(StatusCode::OK, body);
    }

    /// `200 OK` with a JSON body.
    pub fn ok_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), Error> {
        self.json(StatusCode::OK, value)
    }

    /// Writes `err` as the plain-text body of an error response.
    pub fn error(&self, err: &dyn fmt::Display, status: StatusCode) {
        self.set_header(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        self.string(status, format!("{err}\n"));
    }

    /// Redirects to `location`. Panics if `location` is not a valid header value.
    pub fn redirect(&self, location: &str, status: StatusCode) {
        let location = HeaderValue::from_str(location)
            .unwrap_or_else(|e| panic!("invalid redirect location `{location}`: {e}"));
        let mut writer = self.response.lock();
        writer.headers_mut().insert(header::LOCATION, location);
        writer.write_header(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(uri: &str) -> Context {
        Context::new(
            http::Request::builder()
                .uri(uri)
                .header("cookie", "theme=dark; session=\"abc\"")
                .header("x-test", "true")
                .body(Full::new(Bytes::from_static(br#"{"name":"test"}"#)))
                .unwrap(),
        )
    }

    #[test]
    fn request_accessors() {
        let ctx = ctx("/search?q=rust%20lang&page=2");
        assert_eq!(ctx.method(), Method::GET);
        assert_eq!(ctx.path(), "/search");
        assert_eq!(ctx.query("q").as_deref(), Some("rust lang"));
        assert_eq!(ctx.query("missing"), None);
        assert_eq!(ctx.header("X-Test").as_deref(), Some("true"));
        assert_eq!(ctx.cookie("session").as_deref(), Some("abc"));
        assert_eq!(ctx.cookie("theme").as_deref(), Some("dark"));
        assert_eq!(ctx.cookie("nope"), None);
    }

    #[tokio::test]
    async fn bind_json_consumes_body() {
        #[derive(serde::Deserialize)]
        struct Payload {
            name: String,
        }

        let ctx = ctx("/");
        let p: Payload = ctx.bind_json().await.unwrap();
        assert_eq!(p.name, "test");
        assert!(ctx.body_bytes().await.unwrap().is_empty());

        ctx.set_body("again");
        assert_eq!(ctx.body_bytes().await.unwrap(), "again");
    }

    #[test]
    fn string_and_json_responses() {
        let ctx = ctx("/");
        ctx.json(StatusCode::CREATED, &serde_json::json!({"msg": "ok"})).unwrap();
        let res = ctx.into_response();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers()["content-type"], "application/json");

        let ctx = self::ctx("/");
        ctx.ok("hello");
        assert_eq!(ctx.take_response().body(), b"hello");
    }

    #[test]
    fn redirect_sets_location() {
        let ctx = ctx("/");
        ctx.redirect("/new-url", StatusCode::FOUND);
        let res = ctx.into_response();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()["location"], "/new-url");
    }

    #[test]
    fn error_writes_message() {
        let ctx = ctx("/");
        ctx.error(&"test error", StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.response_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.take_response().body(), b"test error\n");
    }

    #[tokio::test]
    async fn detached_context_shares_request_not_response() {
        let ctx = ctx("/");
        ctx.set_header("x-before", HeaderValue::from_static("1"));
        let child = ctx.detached(Instant::now() + std::time::Duration::from_secs(5));

        child.set_request_header("x-child", HeaderValue::from_static("yes"));
        child.ok("from child");

        assert_eq!(ctx.header("x-child").as_deref(), Some("yes"));
        assert_eq!(child.response_header("x-before").as_deref(), Some("1"));
        assert!(ctx.take_response().body().is_empty());
        assert!(child.deadline().is_some());
        assert!(!child.is_expired());
    }

    const BOUNDARY: &str = "strata-test-boundary";

    fn upload_ctx() -> Context {
        let body = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"note\"\r\n\r\n\
             just text\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"upload\"; filename=\"report.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             quarterly numbers\r\n\
             --{b}--\r\n",
            b = BOUNDARY
        );
        Context::new(
            http::Request::builder()
                .method(Method::POST)
                .uri("/upload")
                .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
                .body(Full::new(Bytes::from(body)))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn form_file_finds_upload() {
        let ctx = upload_ctx();
        let file = ctx.form_file("upload").await.unwrap();
        assert_eq!(file.file_name(), "report.txt");
        assert_eq!(file.content_type(), Some("text/plain"));
        assert_eq!(file.data(), "quarterly numbers");

        // The body is still there for a second lookup.
        assert_eq!(ctx.form_file("upload").await.unwrap().data(), "quarterly numbers");
    }

    #[tokio::test]
    async fn form_file_missing_field() {
        let ctx = upload_ctx();
        let missing = ctx.form_file("absent").await;
        assert!(matches!(missing, Err(Error::MissingFile(k)) if k == "absent"));
        // A plain value is not a file.
        assert!(matches!(ctx.form_file("note").await, Err(Error::MissingFile(_))));
    }

    #[tokio::test]
    async fn form_file_rejects_non_multipart() {
        let ctx = ctx("/");
        assert!(matches!(ctx.form_file("upload").await, Err(Error::Multipart(_))));
        // The JSON body was not touched.
        assert_eq!(ctx.body_bytes().await.unwrap(), r#"{"name":"test"}"#);
    }

    #[tokio::test]
    async fn save_uploaded_file_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("nested/deeper/report.txt");
        let ctx = upload_ctx();
        ctx.save_uploaded_file("upload", &dst).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "quarterly numbers");
    }

    #[tokio::test]
    async fn save_uploaded_file_missing_field() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("report.txt");
        let ctx = upload_ctx();
        let err = ctx.save_uploaded_file("absent", &dst).await.unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn save_uploaded_file_reports_mkdir_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "a file, not a directory").unwrap();
        let ctx = upload_ctx();
        let err = ctx
            .save_uploaded_file("upload", blocker.join("sub/report.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CreateDir { ref path, .. } if path == &blocker.join("sub")));
    }
}
