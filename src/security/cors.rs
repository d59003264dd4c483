//! Credentialed CORS with a single exact-match origin.

use axum::http::{header, HeaderMap, HeaderValue, Method, Request};

/// Methods a cross-origin caller may use.
pub const ALLOWED_METHODS: &str = "GET,POST,PUT,DELETE,PATCH";

/// Request headers a cross-origin caller may send.
pub const ALLOWED_HEADERS: &str = "Content-Type,Authorization,X-Requested-With";

/// Per-request CORS outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsDecision {
    /// No `Origin` header; CORS does not apply.
    NotCrossOrigin,
    /// Origin matches; the value is echoed back.
    Allow(HeaderValue),
    Deny(String),
}

/// Decides whether a request's origin may talk to the API.
#[derive(Debug, Clone)]
pub struct CorsGate {
    allowed_origin: String,
}

impl CorsGate {
    pub fn new(allowed_origin: impl Into<String>) -> Self {
        Self {
            allowed_origin: allowed_origin.into(),
        }
    }

    pub fn allowed_origin(&self) -> &str {
        &self.allowed_origin
    }

    /// Strict string equality against the configured origin; no patterns, no `*`.
    pub fn decide(&self, origin: Option<&HeaderValue>) -> CorsDecision {
        let Some(origin) = origin else {
            return CorsDecision::NotCrossOrigin;
        };
        match origin.to_str() {
            Ok(value) if value == self.allowed_origin => CorsDecision::Allow(origin.clone()),
            Ok(value) => CorsDecision::Deny(value.to_string()),
            Err(_) => CorsDecision::Deny(String::from_utf8_lossy(origin.as_bytes()).into_owned()),
        }
    }

    /// A browser discovery request: `OPTIONS` carrying `Origin` and
    /// `Access-Control-Request-Method`.
    pub fn is_preflight<B>(request: &Request<B>) -> bool {
        request.method() == Method::OPTIONS
            && request.headers().contains_key(header::ORIGIN)
            && request
                .headers()
                .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
    }

    /// Headers granted to an allowed origin. Preflight responses also carry the
    /// method and header allow-lists.
    pub fn allow_headers(&self, headers: &mut HeaderMap, origin: &HeaderValue, preflight: bool) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        if preflight {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(ALLOWED_HEADERS),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    const ORIGIN: &str = "http://localhost:3000";

    #[test]
    fn test_exact_match_only() {
        let gate = CorsGate::new(ORIGIN);
        let allowed = HeaderValue::from_static(ORIGIN);
        assert_eq!(gate.decide(Some(&allowed)), CorsDecision::Allow(allowed.clone()));

        for other in [
            "http://localhost:3001",
            "https://localhost:3000",
            "http://localhost:3000.evil.example",
            "*",
            "null",
        ] {
            let value = HeaderValue::from_static(other);
            assert_eq!(gate.decide(Some(&value)), CorsDecision::Deny(other.to_string()));
        }

        assert_eq!(gate.decide(None), CorsDecision::NotCrossOrigin);
    }

    #[test]
    fn test_preflight_detection() {
        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .header(header::ORIGIN, ORIGIN)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        assert!(CorsGate::is_preflight(&preflight));

        let plain_options = Request::builder()
            .method(Method::OPTIONS)
            .header(header::ORIGIN, ORIGIN)
            .body(Body::empty())
            .unwrap();
        assert!(!CorsGate::is_preflight(&plain_options));
    }

    #[test]
    fn test_allow_headers() {
        let gate = CorsGate::new(ORIGIN);
        let origin = HeaderValue::from_static(ORIGIN);

        let mut simple = HeaderMap::new();
        gate.allow_headers(&mut simple, &origin, false);
        assert_eq!(simple[header::ACCESS_CONTROL_ALLOW_ORIGIN], ORIGIN);
        assert_eq!(simple[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert!(simple.get(header::ACCESS_CONTROL_ALLOW_METHODS).is_none());

        let mut preflight = HeaderMap::new();
        gate.allow_headers(&mut preflight, &origin, true);
        assert_eq!(preflight[header::ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
        assert_eq!(preflight[header::ACCESS_CONTROL_ALLOW_HEADERS], ALLOWED_HEADERS);
    }
}
