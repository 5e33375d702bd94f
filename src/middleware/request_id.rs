//! Request identification.

use http::{HeaderName, HeaderValue};
use rand::RngCore;

use crate::context::Context;
use crate::handler::{BoxFuture, ErasedHandler, Next};
use crate::middleware::Middleware;

/// The header [`request_id`] reads and writes by default, and the header
/// [`logging`](crate::middleware::logging) reports.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

#[derive(Clone, Debug)]
pub struct RequestIdConfig {
    pub header_name: String,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self { header_name: REQUEST_ID_HEADER.to_owned() }
    }
}

/// Request ids on `X-Request-ID`.
pub fn request_id() -> Middleware {
    request_id_with(RequestIdConfig::default())
}

/// Propagates the request id found in `config.header_name`, or mints one
/// (`req-` + 32 hex chars), and sets it on both the request and the response.
///
/// # Panics
///
/// Panics if `config.header_name` is not a valid header name.
pub fn request_id_with(config: RequestIdConfig) -> Middleware {
    let header = HeaderName::from_bytes(config.header_name.as_bytes())
        .unwrap_or_else(|e| panic!("invalid request id header `{}`: {e}", config.header_name));
    Middleware::new(move |next| Next::new(RequestId { header: header.clone(), next }))
}

struct RequestId {
    header: HeaderName,
    next: Next,
}

impl ErasedHandler for RequestId {
    fn call(&self, ctx: Context) -> BoxFuture {
        let id = ctx
            .header(self.header.as_str())
            .filter(|id| !id.is_empty())
            .and_then(|id| HeaderValue::from_str(&id).ok())
            .unwrap_or_else(generate_request_id);

        ctx.set_request_header(self.header.clone(), id.clone());
        ctx.set_header(self.header.clone(), id);
        self.next.run(ctx)
    }
}

/// `req-` followed by 16 random bytes, hex-encoded.
fn generate_request_id() -> HeaderValue {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    HeaderValue::try_from(format!("req-{}", hex::encode(bytes)))
        .expect("hex digits are a valid header value")
}
