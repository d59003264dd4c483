//! Security response headers.
//!
//! # Responsibilities
//! - Attach a fixed content-security policy to every response
//! - Disable risky browser behaviours (sniffing, framing, prefetch)
//! - Strip headers that advertise the server stack
//!
//! # Design Decisions
//! - Built once, applied unchanged to every response
//! - Cross-Origin-Embedder-Policy is never set; embedded resources served from
//!   other origins must keep loading

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Content-Security-Policy directives, in emission order.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self';\
base-uri 'self';\
font-src 'self' https: data:;\
form-action 'self';\
frame-ancestors 'self';\
img-src 'self' data: https:;\
object-src 'none';\
script-src 'self';\
script-src-attr 'none';\
style-src 'self' 'unsafe-inline';\
upgrade-insecure-requests";

const POLICY: [(&str, &str); 12] = [
    ("content-security-policy", CONTENT_SECURITY_POLICY),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

const STRIPPED: [&str; 1] = ["x-powered-by"];

/// The fixed set of security headers.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderPolicy {
    pub fn new() -> Self {
        let headers = POLICY
            .iter()
            .map(|&(name, value)| {
                (
                    HeaderName::from_static(name),
                    HeaderValue::from_static(value),
                )
            })
            .collect();
        Self { headers }
    }

    /// Headers this policy sets.
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Overwrite the policy headers on a response.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for name in STRIPPED {
            headers.remove(name);
        }
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn test_policy_is_deterministic() {
        let mut a = HeaderMap::new();
        let mut b = HeaderMap::new();
        HeaderPolicy::new().apply(&mut a);
        HeaderPolicy::new().apply(&mut b);
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn test_csp_directives() {
        let mut headers = HeaderMap::new();
        HeaderPolicy::new().apply(&mut headers);
        let csp = headers[header::CONTENT_SECURITY_POLICY].to_str().unwrap();

        assert!(csp.contains("default-src 'self'"));
        assert!(csp.contains("script-src 'self';"));
        assert!(csp.contains("style-src 'self' 'unsafe-inline'"));
        assert!(csp.contains("img-src 'self' data: https:"));
    }

    #[test]
    fn test_no_embedder_policy_and_powered_by_removed() {
        let mut headers = HeaderMap::new();
        headers.insert("x-powered-by", HeaderValue::from_static("Express"));
        let policy = HeaderPolicy::new();
        policy.apply(&mut headers);

        assert!(headers.get("x-powered-by").is_none());
        assert!(!policy
            .headers()
            .iter()
            .any(|(name, _)| name.as_str() == "cross-origin-embedder-policy"));
        assert_eq!(headers[header::X_FRAME_OPTIONS], "SAMEORIGIN");
    }
}
