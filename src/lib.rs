//! # strata
//!
//! A minimal HTTP framework built around one idea: a request handler is an
//! `async fn(Context)`, and a middleware is a function from handler to
//! handler. Everything else (logging, panic recovery, request ids, CORS,
//! security headers, deadlines) is a middleware you stack around it.
//!
//! ## Pipeline
//!
//! Middlewares come in two layers. Global ones are added with
//! [`Router::wrap`] and apply to every route registered afterwards; route
//! ones are passed to [`Router::route`]. For globals `[g0, g1]` and route
//! middlewares `[r0]` a request runs `g0 → g1 → r0 → handler`, then unwinds
//! in reverse. Each route's chain is composed once, at registration.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use http::{Method, StatusCode};
//! use serde::Deserialize;
//! use strata::middleware::{self, TimeoutConfig};
//! use strata::{Context, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .wrap(middleware::recovery())
//!         .wrap(middleware::request_id())
//!         .wrap(middleware::logging())
//!         .get("/users/{id}", get_user)
//!         .route(
//!             Method::POST,
//!             "/users",
//!             create_user,
//!             [middleware::timeout_with(TimeoutConfig { timeout: Duration::from_secs(5) })],
//!         );
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn get_user(ctx: Context) {
//!     let id = ctx.param("id").unwrap_or_default();
//!     ctx.ok(format!("user {id}"));
//! }
//!
//! #[derive(Deserialize)]
//! struct NewUser { name: String }
//!
//! async fn create_user(ctx: Context) {
//!     match ctx.bind_json::<NewUser>().await {
//!         Ok(user) => ctx.string(StatusCode::CREATED, user.name),
//!         Err(e) => ctx.error(&e, StatusCode::BAD_REQUEST),
//!     }
//! }
//! ```

mod context;
mod error;
mod handler;
mod router;
mod server;
mod writer;

pub mod health;
pub mod middleware;

pub use context::{Body, Context, FormFile};
pub use error::{BoxError, Error};
pub use handler::{BoxFuture, ErasedHandler, Handler, Next};
pub use middleware::Middleware;
pub use router::Router;
pub use server::{Server, serve_listener};
pub use writer::{CaptureWriter, Captured, ResponseBuffer, ResponseWriter};
