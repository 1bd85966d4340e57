use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// JSON-RPC error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const NOTIFICATIONS_UNSUPPORTED: i64 = -32001;

    /// Code used when a failure carries no code of its own
    pub const DEFAULT_ERROR: i64 = -32000;
}

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    NotificationsUnsupported,
    ServerError(i64),
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::NotificationsUnsupported => error_codes::NOTIFICATIONS_UNSUPPORTED,
            JsonRpcErrorCode::ServerError(code) => *code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            error_codes::PARSE_ERROR => JsonRpcErrorCode::ParseError,
            error_codes::INVALID_REQUEST => JsonRpcErrorCode::InvalidRequest,
            error_codes::METHOD_NOT_FOUND => JsonRpcErrorCode::MethodNotFound,
            error_codes::INVALID_PARAMS => JsonRpcErrorCode::InvalidParams,
            error_codes::INTERNAL_ERROR => JsonRpcErrorCode::InternalError,
            error_codes::NOTIFICATIONS_UNSUPPORTED => JsonRpcErrorCode::NotificationsUnsupported,
            other => JsonRpcErrorCode::ServerError(other),
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// Builds the wire object for any failure value, taking its code and data when it has them.
    pub fn from_error<E: ToJsonRpcError + ?Sized>(err: &E) -> Self {
        Self {
            code: err.error_code(),
            message: err.to_string(),
            data: err.error_data(),
        }
    }

    pub fn kind(&self) -> JsonRpcErrorCode {
        JsonRpcErrorCode::from_code(self.code)
    }
}

impl fmt::Display for JsonRpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "json-rpc error {}", self.code)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for JsonRpcErrorObject {}

/// Capability a failure value can implement to control the code and data of its error response.
///
/// Anything displayable can be returned from a method; values that don't override
/// `error_code` are reported with [`error_codes::DEFAULT_ERROR`].
pub trait ToJsonRpcError: fmt::Display {
    fn error_code(&self) -> i64 {
        error_codes::DEFAULT_ERROR
    }

    fn error_data(&self) -> Option<Value> {
        None
    }

    fn to_error_object(&self) -> JsonRpcErrorObject {
        JsonRpcErrorObject::from_error(self)
    }
}

/// Protocol-level failures produced while dispatching a message
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    InvalidMessage(String),

    #[error("the method {0} does not exist/is not available")]
    MethodNotFound(String),

    #[error("no {subscription:?} subscription in {namespace} namespace")]
    SubscriptionNotFound {
        namespace: String,
        subscription: String,
    },

    #[error("{0}")]
    InvalidParams(String),

    #[error("{message}")]
    InternalServer { code: i64, message: String },

    #[error("notifications not supported")]
    NotificationsUnsupported,

    #[error("subscription not found")]
    UnknownSubscription,
}

impl RpcError {
    pub fn invalid_request() -> Self {
        RpcError::InvalidRequest("invalid request".to_string())
    }

    pub fn empty_batch() -> Self {
        RpcError::InvalidRequest("empty batch".to_string())
    }

    pub fn method_crashed() -> Self {
        RpcError::InternalServer {
            code: error_codes::INTERNAL_ERROR,
            message: "method handler crashed".to_string(),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) | RpcError::InvalidMessage(_) => error_codes::PARSE_ERROR,
            RpcError::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            RpcError::MethodNotFound(_) | RpcError::SubscriptionNotFound { .. } => {
                error_codes::METHOD_NOT_FOUND
            }
            RpcError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            RpcError::InternalServer { code, .. } => *code,
            RpcError::NotificationsUnsupported => error_codes::NOTIFICATIONS_UNSUPPORTED,
            RpcError::UnknownSubscription => error_codes::DEFAULT_ERROR,
        }
    }
}

impl ToJsonRpcError for RpcError {
    fn error_code(&self) -> i64 {
        self.code()
    }
}

impl ToJsonRpcError for JsonRpcErrorObject {
    fn error_code(&self) -> i64 {
        self.code
    }

    fn error_data(&self) -> Option<Value> {
        self.data.clone()
    }

    fn to_error_object(&self) -> JsonRpcErrorObject {
        self.clone()
    }
}

impl ToJsonRpcError for anyhow::Error {
    fn error_code(&self) -> i64 {
        if let Some(rpc) = self.downcast_ref::<RpcError>() {
            rpc.code()
        } else if let Some(obj) = self.downcast_ref::<JsonRpcErrorObject>() {
            obj.code
        } else {
            error_codes::DEFAULT_ERROR
        }
    }

    fn error_data(&self) -> Option<Value> {
        self.downcast_ref::<JsonRpcErrorObject>()
            .and_then(|obj| obj.data.clone())
    }
}

impl ToJsonRpcError for String {}
impl ToJsonRpcError for &'static str {}
impl ToJsonRpcError for serde_json::Error {}
impl ToJsonRpcError for std::io::Error {}

/// Failures of the byte-level transport underneath a connection
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("EOF")]
    Eof,

    #[error("connection closed")]
    Closed,

    #[error("{0} deadline exceeded")]
    DeadlineExceeded(&'static str),

    #[error("message too large ({size}>{limit})")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("{0} not supported by this transport")]
    Unsupported(&'static str),
}

impl CodecError {
    /// True when the peer went away cleanly rather than the transport failing
    pub fn is_eof(&self) -> bool {
        matches!(self, CodecError::Eof | CodecError::Closed)
    }
}

/// Why a connection (and everything attached to it) was torn down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseReason {
    #[error("client is closed")]
    ClientQuit,

    #[error("EOF")]
    Eof,

    #[error("server is shutting down")]
    ServerStopped,

    #[error("{0}")]
    Transport(String),
}

impl From<&CodecError> for CloseReason {
    fn from(err: &CodecError) -> Self {
        if err.is_eof() {
            CloseReason::Eof
        } else {
            CloseReason::Transport(err.to_string())
        }
    }
}

/// Misuse of a subscription notifier
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("subscription already created for this call")]
    AlreadyCreated,

    #[error("can't create subscription after the call has returned")]
    CallReturned,

    #[error("can't notify before the subscription is created")]
    NoSubscription,

    #[error("notify with wrong subscription id {got} (expected {expected})")]
    WrongSubscription { expected: String, got: String },

    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Service registration failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no service name for type")]
    EmptyName,

    #[error("service {0} doesn't have any suitable methods/subscriptions to expose")]
    NoMethods(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct CustomError;

    impl fmt::Display for CustomError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("custom failure")
        }
    }

    impl ToJsonRpcError for CustomError {
        fn error_code(&self) -> i64 {
            -32042
        }

        fn error_data(&self) -> Option<Value> {
            Some(json!({"reason": "testing"}))
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RpcError::Parse("bad".into()).code(), -32700);
        assert_eq!(RpcError::empty_batch().code(), -32600);
        assert_eq!(RpcError::MethodNotFound("x_y".into()).code(), -32601);
        assert_eq!(RpcError::InvalidParams("bad".into()).code(), -32602);
        assert_eq!(RpcError::method_crashed().code(), -32603);
        assert_eq!(RpcError::NotificationsUnsupported.code(), -32001);
        assert_eq!(RpcError::UnknownSubscription.code(), -32000);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RpcError::MethodNotFound("eth_foo".into()).to_string(),
            "the method eth_foo does not exist/is not available"
        );
        assert_eq!(
            RpcError::SubscriptionNotFound {
                namespace: "eth".into(),
                subscription: "newHeads".into()
            }
            .to_string(),
            "no \"newHeads\" subscription in eth namespace"
        );
        assert_eq!(RpcError::method_crashed().to_string(), "method handler crashed");
    }

    #[test]
    fn test_default_code_for_plain_errors() {
        let obj = "boom".to_error_object();
        assert_eq!(obj.code, -32000);
        assert_eq!(obj.message, "boom");
        assert!(obj.data.is_none());

        let obj = anyhow::anyhow!("plain").to_error_object();
        assert_eq!(obj.code, -32000);
    }

    #[test]
    fn test_custom_code_and_data() {
        let obj = CustomError.to_error_object();
        assert_eq!(obj.code, -32042);
        assert_eq!(obj.message, "custom failure");
        assert_eq!(obj.data, Some(json!({"reason": "testing"})));
    }

    #[test]
    fn test_anyhow_preserves_rpc_error_code() {
        let err = anyhow::Error::new(RpcError::InvalidParams("nope".into()));
        assert_eq!(err.error_code(), -32602);
    }

    #[test]
    fn test_error_object_serialization() {
        let obj = JsonRpcErrorObject::new(-32601, "missing", None);
        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json, json!({"code": -32601, "message": "missing"}));
        assert_eq!(obj.kind(), JsonRpcErrorCode::MethodNotFound);
    }
}
