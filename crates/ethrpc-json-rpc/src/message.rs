//! The JSON-RPC wire unit and its structural classification.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use std::fmt;

use crate::constants::{
    JSONRPC_VERSION, NOTIFICATION_METHOD_SUFFIX, SERVICE_METHOD_SEPARATOR,
    SUBSCRIBE_METHOD_SUFFIX, UNSUBSCRIBE_METHOD_SUFFIX,
};
use crate::error::{JsonRpcErrorObject, ToJsonRpcError};
use crate::types::SubscriptionId;

/// One JSON-RPC message: a call, a notification or a response.
///
/// `id`, `params` and `result` are kept as undecoded JSON. An explicit `null`
/// is preserved as `Some("null")` so that `"id": null` and `"result": null`
/// can be told apart from absent members.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(rename = "jsonrpc", default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub id: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub params: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub result: Option<Box<RawValue>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

fn null_raw() -> Option<Box<RawValue>> {
    RawValue::from_string("null".to_string()).ok()
}

impl JsonRpcMessage {
    /// A call expecting a response
    pub fn call(id: Box<RawValue>, method: impl Into<String>, params: Option<Box<RawValue>>) -> Self {
        Self {
            version: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
            ..Default::default()
        }
    }

    /// A call without id; the peer sends no response
    pub fn notification(method: impl Into<String>, params: Option<Box<RawValue>>) -> Self {
        Self {
            version: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            ..Default::default()
        }
    }

    pub fn has_valid_version(&self) -> bool {
        self.version == JSONRPC_VERSION
    }

    /// Any id other than `null`, an object or an array
    pub fn has_valid_id(&self) -> bool {
        match &self.id {
            Some(id) => {
                let raw = id.get();
                !raw.is_empty() && raw != "null" && !raw.starts_with('{') && !raw.starts_with('[')
            }
            None => false,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.has_valid_version() && self.id.is_none() && !self.method.is_empty()
    }

    pub fn is_call(&self) -> bool {
        self.has_valid_version() && self.has_valid_id() && !self.method.is_empty()
    }

    pub fn is_response(&self) -> bool {
        self.has_valid_version()
            && self.has_valid_id()
            && self.method.is_empty()
            && self.params.is_none()
            && (self.result.is_some() || self.error.is_some())
    }

    pub fn is_subscribe(&self) -> bool {
        self.method.ends_with(SUBSCRIBE_METHOD_SUFFIX)
    }

    pub fn is_unsubscribe(&self) -> bool {
        self.method.ends_with(UNSUBSCRIBE_METHOD_SUFFIX)
    }

    /// A `<namespace>_subscription` push
    pub fn is_subscription_notification(&self) -> bool {
        self.is_notification() && self.method.ends_with(NOTIFICATION_METHOD_SUFFIX)
    }

    /// The part of the method name before the first separator
    pub fn namespace(&self) -> &str {
        match self.method.split_once(SERVICE_METHOD_SEPARATOR) {
            Some((namespace, _)) => namespace,
            None => "",
        }
    }

    /// The id in a form suitable for logging; string ids lose their quotes.
    pub fn id_for_log(&self) -> String {
        match &self.id {
            Some(id) => match serde_json::from_str::<String>(id.get()) {
                Ok(unquoted) => unquoted,
                Err(_) => id.get().to_string(),
            },
            None => String::new(),
        }
    }

    /// The id as it appears on the wire, used to correlate responses with calls
    pub fn id_key(&self) -> Option<&str> {
        self.id.as_deref().map(RawValue::get)
    }

    pub fn response(&self, result: Box<RawValue>) -> JsonRpcMessage {
        JsonRpcMessage {
            version: JSONRPC_VERSION.to_string(),
            id: self.id.clone(),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn error_response(&self, err: &dyn ToJsonRpcError) -> JsonRpcMessage {
        let mut msg = error_message(err);
        msg.id = self.id.clone();
        msg
    }
}

impl fmt::Display for JsonRpcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<invalid message>"),
        }
    }
}

/// An error response with a `null` id, used when the request id is unknown.
pub fn error_message(err: &dyn ToJsonRpcError) -> JsonRpcMessage {
    JsonRpcMessage {
        version: JSONRPC_VERSION.to_string(),
        id: null_raw(),
        error: Some(err.to_error_object()),
        ..Default::default()
    }
}

/// The `params` of a `<namespace>_subscription` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionResult {
    #[serde(rename = "subscription")]
    pub id: SubscriptionId,
    pub result: Box<RawValue>,
}

/// Unit handed to a codec for writing: one message or a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonPayload {
    Single(JsonRpcMessage),
    Batch(Vec<JsonRpcMessage>),
}

impl From<JsonRpcMessage> for JsonPayload {
    fn from(msg: JsonRpcMessage) -> Self {
        JsonPayload::Single(msg)
    }
}

impl From<Vec<JsonRpcMessage>> for JsonPayload {
    fn from(msgs: Vec<JsonRpcMessage>) -> Self {
        JsonPayload::Batch(msgs)
    }
}

/// True if the first non-whitespace byte opens an array.
pub fn is_batch(raw: &[u8]) -> bool {
    raw.iter()
        .find(|c| !matches!(c, b' ' | b'\t' | b'\n' | b'\r'))
        .is_some_and(|c| *c == b'[')
}

/// Split a raw JSON value into messages.
///
/// Elements that don't decode as a message object (including `null`) become
/// zero-value messages, which the dispatcher later rejects as invalid.
pub fn parse_message(raw: &[u8]) -> (Vec<JsonRpcMessage>, bool) {
    if !is_batch(raw) {
        let msg = serde_json::from_slice(raw).unwrap_or_default();
        return (vec![msg], false);
    }
    let elems: Vec<Box<RawValue>> = serde_json::from_slice(raw).unwrap_or_default();
    let msgs = elems
        .iter()
        .map(|elem| serde_json::from_str(elem.get()).unwrap_or_default())
        .collect();
    (msgs, true)
}
