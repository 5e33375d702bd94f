//! Security response headers.

use http::header::{
    CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use http::{HeaderName, HeaderValue};

use crate::context::Context;
use crate::handler::{BoxFuture, ErasedHandler, Next};
use crate::middleware::Middleware;

/// One value per header. An empty string leaves that header unset.
#[derive(Clone, Debug)]
pub struct SecurityHeadersConfig {
    pub content_type_options: String,
    pub frame_options: String,
    pub xss_protection: String,
    pub strict_transport_security: String,
    pub content_security_policy: String,
    pub referrer_policy: String,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            content_type_options: "nosniff".to_owned(),
            frame_options: "DENY".to_owned(),
            xss_protection: "1; mode=block".to_owned(),
            strict_transport_security: "max-age=31536000; includeSubDomains".to_owned(),
            content_security_policy: "default-src 'self'".to_owned(),
            referrer_policy: "no-referrer".to_owned(),
        }
    }
}

pub fn security_headers() -> Middleware {
    security_headers_with(SecurityHeadersConfig::default())
}

/// Sets every non-empty configured header, then runs the rest of the chain.
///
/// # Panics
///
/// Panics if a configured value is not a valid header value.
pub fn security_headers_with(config: SecurityHeadersConfig) -> Middleware {
    let headers: Vec<(HeaderName, HeaderValue)> = [
        (X_CONTENT_TYPE_OPTIONS, &config.content_type_options),
        (X_FRAME_OPTIONS, &config.frame_options),
        (X_XSS_PROTECTION, &config.xss_protection),
        (STRICT_TRANSPORT_SECURITY, &config.strict_transport_security),
        (CONTENT_SECURITY_POLICY, &config.content_security_policy),
        (REFERRER_POLICY, &config.referrer_policy),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(name, value)| {
        let value = HeaderValue::from_str(value)
            .unwrap_or_else(|e| panic!("invalid {name} value `{value}`: {e}"));
        (name, value)
    })
    .collect();

    Middleware::new(move |next| Next::new(SecurityHeaders { headers: headers.clone(), next }))
}

struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
    next: Next,
}

impl ErasedHandler for SecurityHeaders {
    fn call(&self, ctx: Context) -> BoxFuture {
        ctx.with_writer(|w| {
            let map = w.headers_mut();
            for (name, value) in &self.headers {
                map.insert(name.clone(), value.clone());
            }
        });
        self.next.run(ctx)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::Full;

    use super::*;
    use crate::middleware::compose;

    fn run(global: &[Middleware]) -> http::Response<Full<Bytes>> {
        let chain = compose(|_ctx: Context| async {}, &[], global);
        let ctx = Context::new(http::Request::new(Full::new(Bytes::new())));
        futures::executor::block_on(chain.run(ctx.clone()));
        ctx.into_response()
    }

    #[test]
    fn defaults() {
        let res = run(&[security_headers()]);
        let h = res.headers();
        assert_eq!(h["x-content-type-options"], "nosniff");
        assert_eq!(h["x-frame-options"], "DENY");
        assert_eq!(h["x-xss-protection"], "1; mode=block");
        assert_eq!(h["strict-transport-security"], "max-age=31536000; includeSubDomains");
        assert_eq!(h["content-security-policy"], "default-src 'self'");
        assert_eq!(h["referrer-policy"], "no-referrer");
    }

    #[test]
    fn empty_values_are_skipped() {
        let config = SecurityHeadersConfig {
            strict_transport_security: String::new(),
            content_security_policy: String::new(),
            ..SecurityHeadersConfig::default()
        };
        let res = run(&[security_headers_with(config)]);
        assert!(!res.headers().contains_key("strict-transport-security"));
        assert!(!res.headers().contains_key("content-security-policy"));
        assert_eq!(res.headers()["x-frame-options"], "DENY");
    }

    #[test]
    fn applying_twice_equals_once() {
        let once = run(&[security_headers()]);
        let twice = run(&[security_headers(), security_headers()]);
        assert_eq!(once.headers(), twice.headers());
        assert_eq!(twice.headers().get_all("x-frame-options").iter().count(), 1);
    }
}
