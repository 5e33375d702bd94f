//! Deadline enforcement.
//!
//! ```text
//!              spawn(next on attempt ctx)
//!   Running ──┬── task finished first ──▶ CompletedNormally   attempt replayed into ctx
//!             └── deadline passed first ─▶ CompletedByTimeout  504 written to ctx
//! ```
//!
//! The spawned work is never aborted. Cancellation is cooperative: handlers
//! that care can watch [`Context::expired`] or [`Context::is_expired`]. A
//! task that outlives its deadline keeps writing into its own attempt
//! buffer, which nobody reads, so a late write can never reach the client.

use std::panic;
use std::time::Duration;

use http::StatusCode;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::context::Context;
use crate::handler::{BoxFuture, ErasedHandler, Next};
use crate::middleware::Middleware;

#[derive(Clone, Debug)]
pub struct TimeoutConfig {
    pub timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30) }
    }
}

/// A 30 second timeout.
pub fn timeout() -> Middleware {
    timeout_with(TimeoutConfig::default())
}

/// Answers `504 Request timed out` if the rest of the chain has not finished
/// within `config.timeout`. The deadline is also capped by any enclosing
/// timeout's deadline.
pub fn timeout_with(config: TimeoutConfig) -> Middleware {
    Middleware::new(move |next| Next::new(Timeout { timeout: config.timeout, next }))
}

struct Timeout {
    timeout: Duration,
    next: Next,
}

impl ErasedHandler for Timeout {
    fn call(&self, ctx: Context) -> BoxFuture {
        let next = self.next.clone();
        let timeout = self.timeout;
        Box::pin(async move {
            let attempt = ctx.detached(deadline_after(timeout));
            let mut task = tokio::spawn(next.run(attempt.clone()));

            tokio::select! {
                biased;

                joined = &mut task => match joined {
                    Ok(()) => {
                        let buffer = attempt.take_response();
                        ctx.with_writer(|w| buffer.replay(w));
                    }
                    // Re-raised here so an enclosing recovery middleware sees it.
                    Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
                    Err(e) => warn!("request task did not complete: {e}"),
                },

                () = attempt.expired() => {
                    debug!(path = %ctx.path(), ?timeout, "request timed out");
                    ctx.string(StatusCode::GATEWAY_TIMEOUT, "Request timed out");
                }
            }
        })
    }
}

/// `now + timeout`, or a point roughly 30 years out when that overflows, so
/// `Duration::MAX` reads as "no effective limit".
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use bytes::Bytes;
    use http_body_util::Full;

    use super::*;
    use crate::middleware::{compose, recovery};

    fn ctx() -> Context {
        Context::new(http::Request::new(Full::new(Bytes::new())))
    }

    async fn slow(ctx: Context) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.string(StatusCode::ACCEPTED, "slow but done");
    }

    #[tokio::test]
    async fn deadline_first_writes_504() {
        let chain = compose(
            slow,
            &[timeout_with(TimeoutConfig { timeout: Duration::from_millis(50) })],
            &[],
        );
        let ctx = ctx();
        chain.run(ctx.clone()).await;

        assert_eq!(ctx.response_status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ctx.take_response().body(), b"Request timed out");
    }

    #[tokio::test]
    async fn completion_first_keeps_handler_response() {
        let chain = compose(slow, &[timeout()], &[]);
        let ctx = ctx();
        ctx.set_header("x-outer", http::HeaderValue::from_static("kept"));
        chain.run(ctx.clone()).await;

        assert_eq!(ctx.response_status(), StatusCode::ACCEPTED);
        assert_eq!(ctx.response_header("x-outer").as_deref(), Some("kept"));
        assert_eq!(ctx.take_response().body(), b"slow but done");
    }

    #[tokio::test]
    async fn late_writes_are_discarded() {
        let finished = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&finished);
        let chain = compose(
            move |ctx: Context| {
                let f = Arc::clone(&f);
                async move {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    ctx.string(StatusCode::OK, "too late");
                    f.store(true, Ordering::SeqCst);
                }
            },
            &[timeout_with(TimeoutConfig { timeout: Duration::from_millis(20) })],
            &[],
        );
        let ctx = ctx();
        chain.run(ctx.clone()).await;
        assert!(!finished.load(Ordering::SeqCst));

        // The abandoned task keeps running to completion in the background.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(finished.load(Ordering::SeqCst));

        let res = ctx.take_response();
        assert_eq!(res.body(), b"Request timed out");
    }

    #[tokio::test]
    async fn handler_sees_deadline() {
        let chain = compose(
            |ctx: Context| async move {
                let remaining = ctx
                    .deadline()
                    .map(|d| d.saturating_duration_since(Instant::now()));
                let far_off = remaining.is_some_and(|r| r > Duration::from_secs(29));
                ctx.ok(far_off.to_string());
            },
            &[timeout()],
            &[],
        );
        let ctx = ctx();
        assert!(ctx.deadline().is_none());
        chain.run(ctx.clone()).await;
        assert_eq!(ctx.take_response().body(), b"true");
    }

    #[tokio::test]
    async fn inner_deadline_capped_by_outer() {
        let chain = compose(
            slow,
            &[
                timeout_with(TimeoutConfig { timeout: Duration::from_millis(30) }),
                timeout_with(TimeoutConfig { timeout: Duration::from_secs(10) }),
            ],
            &[],
        );
        let ctx = ctx();
        let start = Instant::now();
        chain.run(ctx.clone()).await;
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(ctx.response_status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn unbounded_duration_completes_normally() {
        let chain = compose(
            |ctx: Context| async move { ctx.ok("done") },
            &[recovery(), timeout_with(TimeoutConfig { timeout: Duration::MAX })],
            &[],
        );
        let ctx = ctx();
        chain.run(ctx.clone()).await;
        assert_eq!(ctx.response_status(), StatusCode::OK);
        assert_eq!(ctx.take_response().body(), b"done");
    }

    #[test]
    fn overflowing_deadline_is_far_future() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now() + Duration::from_secs(86400 * 365));
    }

    async fn boom(_ctx: Context) {
        panic!("inside timeout");
    }

    #[tokio::test]
    async fn panic_in_task_reaches_outer_recovery() {
        let chain = compose(boom, &[recovery(), timeout()], &[]);
        let ctx = ctx();
        chain.run(ctx.clone()).await;
        assert_eq!(ctx.response_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
