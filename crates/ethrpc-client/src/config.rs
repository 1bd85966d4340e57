//! Configuration types for the client

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Called on every outgoing HTTP request and WebSocket dial; typically sets
/// an `authorization` header. Must be safe for concurrent use.
pub type HttpAuth = Arc<dyn Fn(&mut HeaderMap) -> anyhow::Result<()> + Send + Sync>;

/// Client configuration
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Extra headers sent with every HTTP request and WebSocket dial
    pub headers: HeaderMap,
    /// Applied to calls that don't carry their own deadline
    pub request_timeout: Option<Duration>,
    /// `Origin` header for WebSocket dials
    pub ws_origin: Option<String>,
    pub http_auth: Option<HttpAuth>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_ws_origin(mut self, origin: impl Into<String>) -> Self {
        self.ws_origin = Some(origin.into());
        self
    }

    pub fn with_http_auth<F>(mut self, auth: F) -> Self
    where
        F: Fn(&mut HeaderMap) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.http_auth = Some(Arc::new(auth));
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("headers", &self.headers)
            .field("request_timeout", &self.request_timeout)
            .field("ws_origin", &self.ws_origin)
            .field("http_auth", &self.http_auth.is_some())
            .finish()
    }
}
