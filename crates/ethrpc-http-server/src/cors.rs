//! CORS (Cross-Origin Resource Sharing) support

use hyper::HeaderMap;
use hyper::header::{HeaderValue, VARY};

/// CORS layer for adding appropriate headers
pub struct CorsLayer;

impl CorsLayer {
    /// Apply CORS headers to a response
    pub fn apply_cors_headers(headers: &mut HeaderMap) {
        headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
        Self::apply_common(headers);
    }

    /// Apply restrictive CORS headers for a specific origin
    pub fn apply_cors_headers_for_origin(headers: &mut HeaderMap, origin: &str) {
        let Ok(origin) = HeaderValue::from_str(origin) else {
            return;
        };
        headers.insert("Access-Control-Allow-Origin", origin);
        headers.insert(VARY, HeaderValue::from_static("Origin"));
        Self::apply_common(headers);
    }

    /// Apply headers for `origin` given the configured allow-list. An empty
    /// list or `"*"` allows any origin; otherwise unknown origins get no CORS
    /// headers and the browser blocks the response.
    pub fn apply_for_request(headers: &mut HeaderMap, allowed: &[String], origin: Option<&str>) {
        if allowed.is_empty() || allowed.iter().any(|o| o == "*") {
            Self::apply_cors_headers(headers);
            return;
        }
        if let Some(origin) = origin {
            if allowed.iter().any(|o| o.eq_ignore_ascii_case(origin)) {
                Self::apply_cors_headers_for_origin(headers, origin);
            }
        }
    }

    fn apply_common(headers: &mut HeaderMap) {
        headers.insert(
            "Access-Control-Allow-Methods",
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            "Access-Control-Allow-Headers",
            HeaderValue::from_static("Content-Type, Accept, Authorization"),
        );
        headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_cors_headers() {
        let mut headers = HeaderMap::new();
        CorsLayer::apply_cors_headers(&mut headers);

        assert_eq!(headers.get("Access-Control-Allow-Origin").unwrap(), "*");
        assert!(headers.contains_key("Access-Control-Allow-Methods"));
        assert!(headers.contains_key("Access-Control-Allow-Headers"));
        assert!(headers.contains_key("Access-Control-Max-Age"));
    }

    #[test]
    fn test_apply_cors_headers_for_origin() {
        let mut headers = HeaderMap::new();
        CorsLayer::apply_cors_headers_for_origin(&mut headers, "https://example.com");

        assert_eq!(
            headers.get("Access-Control-Allow-Origin").unwrap(),
            "https://example.com"
        );
        assert_eq!(headers.get(VARY).unwrap(), "Origin");
    }

    #[test]
    fn test_apply_for_request() {
        let allowed = vec!["https://wallet.example".to_string()];

        let mut headers = HeaderMap::new();
        CorsLayer::apply_for_request(&mut headers, &allowed, Some("https://wallet.example"));
        assert_eq!(
            headers.get("Access-Control-Allow-Origin").unwrap(),
            "https://wallet.example"
        );

        let mut headers = HeaderMap::new();
        CorsLayer::apply_for_request(&mut headers, &allowed, Some("https://evil.example"));
        assert!(headers.is_empty());

        let mut headers = HeaderMap::new();
        CorsLayer::apply_for_request(&mut headers, &[], None);
        assert_eq!(headers.get("Access-Control-Allow-Origin").unwrap(), "*");
    }
}
