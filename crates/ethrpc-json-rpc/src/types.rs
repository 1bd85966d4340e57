use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a live subscription, e.g. `"0x9cef478923ff08bf67fde6c64013158d"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex-encode `bytes` with leading zeros trimmed; an all-zero input encodes as `0x0`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        let trimmed = hex.trim_start_matches('0');
        if trimmed.is_empty() {
            Self("0x0".to_string())
        } else {
            Self(format!("0x{trimmed}"))
        }
    }

    /// A fresh id drawn from the thread-local CSPRNG
    pub fn random() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Source of subscription ids for a connection
pub type IdGenerator = Arc<dyn Fn() -> SubscriptionId + Send + Sync>;

pub fn random_id_generator() -> IdGenerator {
    Arc::new(SubscriptionId::random)
}

/// Information about the remote end of a connection, visible to method handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// `"http"`, `"ws"`, `"ipc"` or `"inproc"`
    pub transport: String,
    pub remote_addr: String,
    pub http: HttpInfo,
}

/// HTTP request details; only populated for HTTP and WebSocket connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpInfo {
    /// Protocol version, e.g. `"HTTP/1.1"`
    pub version: String,
    pub user_agent: String,
    pub origin: String,
    pub host: String,
}

impl PeerInfo {
    pub fn new(transport: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            remote_addr: remote_addr.into(),
            http: HttpInfo::default(),
        }
    }

    pub fn with_http(mut self, http: HttpInfo) -> Self {
        self.http = http;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_encoding_trims_leading_zeros() {
        assert_eq!(SubscriptionId::from_bytes(&[0x00, 0x01]).as_str(), "0x1");
        assert_eq!(SubscriptionId::from_bytes(&[0x0a, 0xbc]).as_str(), "0xabc");
        assert_eq!(SubscriptionId::from_bytes(&[0xff]).as_str(), "0xff");
    }

    #[test]
    fn test_id_encoding_empty_is_zero() {
        assert_eq!(SubscriptionId::from_bytes(&[]).as_str(), "0x0");
        assert_eq!(SubscriptionId::from_bytes(&[0, 0, 0]).as_str(), "0x0");
    }

    #[test]
    fn test_random_ids_are_distinct() {
        let generate = random_id_generator();
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("0x"));
    }

    #[test]
    fn test_subscription_id_serializes_as_string() {
        let id = SubscriptionId::new("0x1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"0x1\"");
        let back: SubscriptionId = serde_json::from_str("\"0x1\"").unwrap();
        assert_eq!(back, id);
    }
}
