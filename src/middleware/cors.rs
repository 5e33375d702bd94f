//! Cross-origin resource sharing.

use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
};
use http::{HeaderValue, Method, StatusCode};

use crate::context::Context;
use crate::handler::{BoxFuture, ErasedHandler, Next};
use crate::middleware::Middleware;

#[derive(Clone, Debug)]
pub struct CorsConfig {
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
    pub allow_credentials: bool,
    /// Seconds. `<= 0` omits `Access-Control-Max-Age`.
    pub max_age: i64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_owned(),
            allow_methods: "GET,POST,PUT,PATCH,DELETE,OPTIONS".to_owned(),
            allow_headers: "Content-Type,Authorization".to_owned(),
            allow_credentials: true,
            max_age: 3600,
        }
    }
}

/// CORS with a permissive default: any origin, the common verbs,
/// credentials allowed, one hour preflight cache.
pub fn cors() -> Middleware {
    cors_with(CorsConfig::default())
}

/// Sets the CORS headers on every response and answers `OPTIONS` with
/// `204 No Content` without running the rest of the chain.
///
/// # Panics
///
/// Panics if a configured value is not a valid header value.
pub fn cors_with(config: CorsConfig) -> Middleware {
    let headers = CorsHeaders::new(&config);
    Middleware::new(move |next| Next::new(Cors { headers: headers.clone(), next }))
}

#[derive(Clone)]
struct CorsHeaders {
    origin: HeaderValue,
    methods: HeaderValue,
    headers: HeaderValue,
    credentials: bool,
    max_age: Option<HeaderValue>,
}

impl CorsHeaders {
    fn new(config: &CorsConfig) -> Self {
        Self {
            origin: header_value("allow_origin", &config.allow_origin),
            methods: header_value("allow_methods", &config.allow_methods),
            headers: header_value("allow_headers", &config.allow_headers),
            credentials: config.allow_credentials,
            max_age: (config.max_age > 0).then(|| HeaderValue::from(config.max_age)),
        }
    }
}

fn header_value(field: &str, value: &str) -> HeaderValue {
    HeaderValue::from_str(value)
        .unwrap_or_else(|e| panic!("invalid CORS {field} `{value}`: {e}"))
}

struct Cors {
    headers: CorsHeaders,
    next: Next,
}

impl ErasedHandler for Cors {
    fn call(&self, ctx: Context) -> BoxFuture {
        let h = &self.headers;
        ctx.with_writer(|w| {
            let map = w.headers_mut();
            map.insert(ACCESS_CONTROL_ALLOW_ORIGIN, h.origin.clone());
            map.insert(ACCESS_CONTROL_ALLOW_METHODS, h.methods.clone());
            map.insert(ACCESS_CONTROL_ALLOW_HEADERS, h.headers.clone());
            if h.credentials {
                map.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
            }
            if let Some(max_age) = &h.max_age {
                map.insert(ACCESS_CONTROL_MAX_AGE, max_age.clone());
            }
        });

        if ctx.method() == Method::OPTIONS {
            ctx.write_header(StatusCode::NO_CONTENT);
            return Box::pin(async {});
        }
        self.next.run(ctx)
    }
}
