//! Middleware layer.
//!
//! A [`Middleware`] is a decorator: it takes the rest of the chain (a
//! [`Next`]) and returns a new `Next` that wraps it. Everything a middleware
//! does per request lives in the returned handler; building the chain is
//! pure.
//!
//! Built-in middleware, each with a default and an explicit-config
//! constructor:
//!
//! | Middleware | Default | Configured |
//! |---|---|---|
//! | request/response log record | [`logging`] | [`logging_with`] |
//! | panic → `500` boundary | [`recovery`] | [`recovery_with`] |
//! | `X-Request-ID` propagation | [`request_id`] | [`request_id_with`] |
//! | CORS headers + preflight | [`cors`] | [`cors_with`] |
//! | security response headers | [`security_headers`] | [`security_headers_with`] |
//! | deadline → `504` | [`timeout`] | [`timeout_with`] |
//!
//! # Ordering
//!
//! For global middlewares `[g0, g1]` and route middlewares `[r0, r1]` a
//! request runs
//!
//! ```text
//! g0 → g1 → r0 → r1 → handler → r1 → r0 → g1 → g0
//! ```
//!
//! where the second half is each middleware's code after `next` returns.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::handler::{BoxFuture, ErasedHandler, Handler, Next};

mod cors;
mod logging;
mod recovery;
mod request_id;
mod security;
mod timeout;

pub use cors::{CorsConfig, cors, cors_with};
pub use logging::{LoggingConfig, logging, logging_with};
pub use recovery::{RecoveryConfig, recovery, recovery_with};
pub use request_id::{REQUEST_ID_HEADER, RequestIdConfig, request_id, request_id_with};
pub use security::{SecurityHeadersConfig, security_headers, security_headers_with};
pub use timeout::{TimeoutConfig, timeout, timeout_with};

/// A reusable transformation of a handler.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(Next) -> Next + Send + Sync>);

impl Middleware {
    /// A middleware from a raw decorator.
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(Next) -> Next + Send + Sync + 'static,
    {
        Self(Arc::new(wrap))
    }

    /// A middleware from an async function of the context and the rest of
    /// the chain.
    ///
    /// ```rust
    /// use strata::{Context, Middleware};
    ///
    /// let timing = Middleware::from_fn(|ctx: Context, next| async move {
    ///     let start = std::time::Instant::now();
    ///     next.run(ctx.clone()).await;
    ///     tracing::debug!(path = %ctx.path(), elapsed = ?start.elapsed());
    /// });
    /// ```
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |next| Next::new(FromFn { f: Arc::clone(&f), next }))
    }

    /// Wraps `next`.
    pub fn wrap(&self, next: Next) -> Next {
        (self.0)(next)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware(..)")
    }
}

struct FromFn<F> {
    f: Arc<F>,
    next: Next,
}

impl<F, Fut> ErasedHandler for FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        Box::pin((self.f)(ctx, self.next.clone()))
    }
}

// ── Composition ───────────────────────────────────────────────────────────────

/// Builds one chain from a terminal handler, the route's middlewares and
/// the global middlewares.
///
/// Each list is folded last-to-first so that its first element ends up
/// outermost. Route middlewares wrap the handler; global middlewares wrap
/// the result.
pub fn compose(handler: impl Handler, route: &[Middleware], global: &[Middleware]) -> Next {
    let inner = route
        .iter()
        .rev()
        .fold(handler.into_next(), |next, mw| mw.wrap(next));
    global.iter().rev().fold(inner, |next, mw| mw.wrap(next))
}
