//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! A route's chain mixes handlers and middlewares of *different* concrete
//! types, and the router stores chains for every route in one tree. Rust
//! collections hold one concrete type, so every stage is hidden behind a
//! trait object (`dyn ErasedHandler`) and shared as a [`Next`].
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn hello(ctx: Context) { … }              ← user writes this
//!        ↓ router.get("/", hello)
//! hello.into_next()                               ← Handler blanket impl
//!        ↓
//! Next(Arc::new(FnHandler(hello)))                ← heap-allocated wrapper
//!        ↓  wrapped by each middleware, innermost first
//! next.run(ctx)  at request time                  ← one vtable dispatch per stage
//!        ↓
//! Box::pin(async { hello(ctx).await })            ← BoxFuture
//! ```
//!
//! The runtime cost per stage is **one Arc clone** of the context plus
//! **one virtual call**.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future driving one stage of a chain.
///
/// `Send + 'static` lets tokio move it across threads, and lets
/// [`timeout`](crate::middleware::timeout) spawn the rest of a chain.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Dispatch interface for one stage of a chain.
///
/// Implement it to write a middleware as a struct instead of a closure;
/// wrap the value with [`Next::new`].
pub trait ErasedHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture;
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// A type-erased, shareable handler: the rest of a chain from some point on.
///
/// Middlewares receive the `Next` they wrap and decide whether, and when, to
/// [`run`](Next::run) it.
#[derive(Clone)]
pub struct Next(Arc<dyn ErasedHandler>);

impl Next {
    pub fn new(handler: impl ErasedHandler) -> Self {
        Self(Arc::new(handler))
    }

    /// Runs the rest of the chain against `ctx`.
    pub fn run(&self, ctx: Context) -> BoxFuture {
        self.0.call(ctx)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next(..)")
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` (or closure returning a future) with the signature:
///
/// ```text
/// async fn name(ctx: Context)
/// ```
///
/// The handler answers by writing to the context (`ctx.ok(..)`,
/// `ctx.json(..)`, `ctx.write_header(..)`), not by returning a value.
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impls below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_next(self) -> Next;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn into_next(self) -> Next {
        Next::new(FnHandler(self))
    }
}

/// An already-erased chain is a handler too, so composed chains nest.
impl private::Sealed for Next {}

impl Handler for Next {
    fn into_next(self) -> Next {
        self
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        Box::pin((self.0)(ctx))
    }
}
