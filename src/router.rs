//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Every route stores a
//! fully composed chain: global middlewares, route middlewares, handler.
//!
//! # Registration order matters
//!
//! A route's chain is built when the route is registered, from the global
//! middlewares registered *so far*. [`Router::wrap`] only affects routes
//! registered after it:
//!
//! ```rust
//! # use strata::{Context, Router, middleware};
//! # async fn health(_: Context) {}
//! # async fn users(_: Context) {}
//! let app = Router::new()
//!     .get("/healthz", health)        // no logging
//!     .wrap(middleware::logging())
//!     .get("/users", users);          // logged
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use http::header::ALLOW;
use http::{HeaderValue, Method, StatusCode};
use http_body_util::Full;
use matchit::Router as MatchitRouter;
use tracing::trace;

use crate::context::Context;
use crate::error::BoxError;
use crate::handler::{Handler, Next};
use crate::middleware::{Middleware, compose};

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Every builder method returns `self` so registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Next>>,
    global: Vec<Middleware>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), global: Vec::new() }
    }

    /// Appends a global middleware. It runs for every route registered
    /// after this call, before any route middleware, in registration order.
    pub fn wrap(mut self, middleware: Middleware) -> Self {
        self.global.push(middleware);
        self
    }

    /// Registers `handler` for `method` + `path`, wrapped in `middlewares`
    /// (outermost first) inside the current global middlewares.
    ///
    /// Path parameters use `{name}` syntax; `ctx.param("name")` retrieves them.
    ///
    /// ```rust
    /// # use strata::{Context, Router, middleware};
    /// # use http::Method;
    /// # async fn upload(_: Context) {}
    /// Router::new().route(
    ///     Method::POST,
    ///     "/files/{name}",
    ///     upload,
    ///     [middleware::timeout(), middleware::request_id()],
    /// );
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route pattern or conflicts with a
    /// route already registered for `method`.
    pub fn route(
        mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
        middlewares: impl IntoIterator<Item = Middleware>,
    ) -> Self {
        let route: Vec<Middleware> = middlewares.into_iter().collect();
        let chain = compose(handler, &route, &self.global);
        self.routes
            .entry(method)
            .or_default()
            .insert(path, chain)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Registers `handler` for any method, without route middlewares.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.route(method, path, handler, [])
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(Next, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((matched.value.clone(), params))
    }

    /// Methods with a route matching `path`, for the `Allow` header.
    fn allowed(&self, path: &str) -> Vec<&Method> {
        let mut allowed: Vec<&Method> = self
            .routes
            .iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method)
            .collect();
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed
    }

    /// Runs one request through the matching chain and returns the response.
    ///
    /// This is what [`Server`](crate::Server) calls per request; call it
    /// directly to exercise an application without a socket.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let ctx = Context::new(req);

        match self.lookup(&method, &path) {
            Some((chain, params)) => {
                ctx.set_params(params);
                chain.run(ctx.clone()).await;
            }
            None => {
                let allowed = self.allowed(&path);
                if allowed.is_empty() {
                    trace!(%method, %path, "no route");
                    ctx.string(StatusCode::NOT_FOUND, "404 page not found");
                } else {
                    let allow = allowed
                        .iter()
                        .map(|m| m.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    if let Ok(allow) = HeaderValue::from_str(&allow) {
                        ctx.set_header(ALLOW, allow);
                    }
                    ctx.string(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
                }
            }
        }

        ctx.into_response()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
