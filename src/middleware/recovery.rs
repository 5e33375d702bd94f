//! Panic boundary.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use tracing::error;

use crate::context::Context;
use crate::handler::{BoxFuture, ErasedHandler, Next};
use crate::middleware::Middleware;

#[derive(Clone, Debug)]
pub struct RecoveryConfig {
    /// Emit an `error!` event with the panic payload.
    pub log_panic: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { log_panic: true }
    }
}

/// Recovery with panic logging on.
pub fn recovery() -> Middleware {
    recovery_with(RecoveryConfig::default())
}

/// Turns a panic anywhere *inside* this middleware into
/// `500 Internal Server Error`. Panics raised by middlewares registered
/// before it are not caught.
pub fn recovery_with(config: RecoveryConfig) -> Middleware {
    Middleware::new(move |next| Next::new(Recovery { log_panic: config.log_panic, next }))
}

struct Recovery {
    log_panic: bool,
    next: Next,
}

impl ErasedHandler for Recovery {
    fn call(&self, ctx: Context) -> BoxFuture {
        let next = self.next.clone();
        let log_panic = self.log_panic;
        Box::pin(async move {
            // `next.run` is called inside the guarded future so a panic while
            // building the inner future is caught as well.
            let guarded = AssertUnwindSafe(async { next.run(ctx.clone()).await });
            if let Err(payload) = guarded.catch_unwind().await {
                if log_panic {
                    error!(panic = panic_message(payload.as_ref()), "recovered from panic");
                }
                // Whatever the handler wrote before panicking is discarded.
                ctx.with_writer(|w| {
                    w.reset();
                    w.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; charset=utf-8"),
                    );
                });
                ctx.string(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::Full;

    use super::*;
    use crate::middleware::compose;

    fn ctx() -> Context {
        Context::new(http::Request::new(Full::new(Bytes::new())))
    }

    async fn boom(_ctx: Context) {
        panic!("boom");
    }

    #[tokio::test]
    async fn panic_becomes_500() {
        let chain = compose(boom, &[recovery()], &[]);
        let ctx = ctx();
        chain.run(ctx.clone()).await;

        let res = ctx.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = http_body_util::BodyExt::collect(res.into_body()).await.unwrap().to_bytes();
        assert_eq!(body, "Internal Server Error");
    }

    async fn writes_then_panics(ctx: Context) {
        ctx.json(StatusCode::OK, &serde_json::json!({"partial": true})).unwrap();
        panic!("after writing");
    }

    #[tokio::test]
    async fn partial_response_replaced_by_500() {
        let chain = compose(writes_then_panics, &[recovery()], &[]);
        let ctx = ctx();
        chain.run(ctx.clone()).await;

        let res = ctx.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
        let body = http_body_util::BodyExt::collect(res.into_body()).await.unwrap().to_bytes();
        assert_eq!(body, "Internal Server Error");
    }

    #[tokio::test]
    async fn quiet_recovery_still_responds() {
        let chain = compose(boom, &[recovery_with(RecoveryConfig { log_panic: false })], &[]);
        let ctx = ctx();
        chain.run(ctx.clone()).await;
        assert_eq!(ctx.response_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn no_panic_passes_through() {
        let chain = compose(|ctx: Context| async move { ctx.ok("fine") }, &[recovery()], &[]);
        let ctx = ctx();
        chain.run(ctx.clone()).await;
        assert_eq!(ctx.take_response().body(), b"fine");
    }

    #[test]
    fn panic_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }
}
