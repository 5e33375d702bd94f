//! strata demo: a small JSON service behind the full middleware stack.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -i -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -i -X OPTIONS http://localhost:3000/users
//!   curl -i -F 'file=@Cargo.toml' http://localhost:3000/files/cargo.toml
//!   curl -i http://localhost:3000/slow        # 504 after 2s
//!   curl -i http://localhost:3000/panic       # 500, process keeps serving
//!   curl http://localhost:3000/healthz

use std::time::Duration;

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use strata::middleware::{self, LoggingConfig, TimeoutConfig};
use strata::{Context, Router, Server, health};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct User {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let app = Router::new()
        // Probes first: no logging, no request ids.
        .get("/healthz", health::liveness)
        .get("/readyz", health::readiness)
        .wrap(middleware::recovery())
        .wrap(middleware::request_id())
        .wrap(middleware::logging_with(LoggingConfig {
            log_request_body: true,
            log_response_body: true,
            ..LoggingConfig::default()
        }))
        .wrap(middleware::cors())
        .wrap(middleware::security_headers())
        .get("/users/{id}", get_user)
        .post("/users", create_user)
        .post("/files/{name}", upload)
        .route(
            Method::GET,
            "/slow",
            slow,
            [middleware::timeout_with(TimeoutConfig { timeout: Duration::from_secs(2) })],
        )
        .get("/panic", explode);

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

// GET /users/{id}
async fn get_user(ctx: Context) {
    let user = User {
        id: ctx.param("id").unwrap_or_default(),
        name: "alice".to_owned(),
    };
    if let Err(e) = ctx.ok_json(&user) {
        ctx.error(&e, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

// POST /users
async fn create_user(ctx: Context) {
    let input: NewUser = match ctx.bind_json().await {
        Ok(input) => input,
        Err(e) => return ctx.error(&e, StatusCode::BAD_REQUEST),
    };
    let user = User { id: "99".to_owned(), name: input.name };
    ctx.set_header(http::header::LOCATION, http::HeaderValue::from_static("/users/99"));
    if let Err(e) = ctx.json(StatusCode::CREATED, &user) {
        ctx.error(&e, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

// POST /files/{name}: multipart field `file`, saved under ./uploads/
async fn upload(ctx: Context) {
    let name = ctx.param("name").unwrap_or_default();
    if name.contains(['/', '\\']) || name.starts_with('.') {
        return ctx.string(StatusCode::BAD_REQUEST, "bad file name");
    }
    match ctx.save_uploaded_file("file", format!("uploads/{name}")).await {
        Ok(()) => ctx.string(StatusCode::CREATED, format!("saved {name}")),
        Err(e) => ctx.error(&e, StatusCode::BAD_REQUEST),
    }
}

// GET /slow: gives up early if the deadline passes.
async fn slow(ctx: Context) {
    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(5)) => ctx.ok("done"),
        () = ctx.expired() => tracing::debug!("slow handler abandoned"),
    }
}

// GET /panic
async fn explode(_ctx: Context) {
    panic!("something went badly wrong");
}
