//! Health-check handlers for orchestrator probes.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! Register them before any global middleware so probes stay out of the
//! request log:
//!
//! ```rust
//! use strata::{Router, health, middleware};
//!
//! let app = Router::new()
//!     .get("/healthz", health::liveness)
//!     .get("/readyz", health::readiness)
//!     .wrap(middleware::logging());
//! ```
//!
//! Gate readiness on dependencies with your own handler:
//!
//! ```rust
//! use http::StatusCode;
//! use strata::Context;
//!
//! async fn readiness(ctx: Context) {
//!     if dependencies_are_healthy().await {
//!         ctx.ok("ready");
//!     } else {
//!         ctx.string(StatusCode::SERVICE_UNAVAILABLE, "not ready");
//!     }
//! }
//!
//! async fn dependencies_are_healthy() -> bool { true }
//! ```

use crate::context::Context;

/// Always `200 ok`.
pub async fn liveness(ctx: Context) {
    ctx.ok("ok");
}

/// `200 ready`. Replace it when the service needs a warm-up period.
pub async fn readiness(ctx: Context) {
    ctx.ok("ready");
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use http_body_util::{BodyExt, Full};

    use crate::Router;

    use super::*;

    #[tokio::test]
    async fn probes_answer_200() {
        let app = Router::new()
            .get("/healthz", liveness)
            .get("/readyz", readiness);

        for (path, expected) in [("/healthz", "ok"), ("/readyz", "ready")] {
            let req = http::Request::builder()
                .method(Method::GET)
                .uri(path)
                .body(Full::new(Bytes::new()))
                .unwrap();
            let res = app.handle(req).await;
            assert_eq!(res.status(), StatusCode::OK);
            let body = res.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(body, expected);
        }
    }
}
