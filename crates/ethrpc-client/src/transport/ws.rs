//! WebSocket transport

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ethrpc_json_rpc::codec::WebSocketCodec;
use ethrpc_json_rpc::constants::{WS_MESSAGE_SIZE_LIMIT, WS_READ_BUFFER_SIZE, WS_WRITE_BUFFER_SIZE};
use ethrpc_json_rpc::{HttpInfo, PeerInfo, SharedCodec};
use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderValue, ORIGIN};
use std::sync::Arc;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;
use url::Url;

use super::Connector;
use crate::config::{ClientConfig, HttpAuth};
use crate::error::{ClientError, ClientResult, WsHandshakeError};

/// Strip user info from `endpoint`, turning it into a `Basic` authorization
/// header, and add `origin` when given.
pub fn ws_client_headers(endpoint: &str, origin: Option<&str>) -> ClientResult<(String, HeaderMap)> {
    let mut url = Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    let mut headers = HeaderMap::new();
    if let Some(origin) = origin.filter(|o| !o.is_empty()) {
        let value = HeaderValue::from_str(origin).map_err(|e| ClientError::InvalidEndpoint(e.to_string()))?;
        headers.insert(ORIGIN, value);
    }
    if !url.username().is_empty() {
        let user_info = match url.password() {
            Some(password) => format!("{}:{}", url.username(), password),
            None => url.username().to_string(),
        };
        let value = HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(user_info)))
            .map_err(|e| ClientError::InvalidEndpoint(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);
        // Both setters only fail for URLs that cannot carry credentials.
        let _ = url.set_username("");
        let _ = url.set_password(None);
    }
    Ok((url.to_string(), headers))
}

fn handshake_error(err: WsError) -> ClientError {
    match err {
        WsError::Http(resp) => WsHandshakeError {
            message: "websocket: bad handshake".to_string(),
            status: Some(resp.status().as_u16()),
        }
        .into(),
        other => WsHandshakeError {
            message: other.to_string(),
            status: None,
        }
        .into(),
    }
}

/// Dials WebSocket connections to one endpoint
pub struct WsConnector {
    url: String,
    headers: HeaderMap,
    auth: Option<HttpAuth>,
}

impl WsConnector {
    pub fn new(endpoint: &str, config: &ClientConfig) -> ClientResult<Self> {
        let (url, mut headers) = ws_client_headers(endpoint, config.ws_origin.as_deref())?;
        headers.extend(config.headers.clone());
        Ok(Self {
            url,
            headers,
            auth: config.http_auth.clone(),
        })
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> ClientResult<SharedCodec> {
        let mut request = self.url.as_str().into_client_request().map_err(handshake_error)?;
        request.headers_mut().extend(self.headers.clone());
        if let Some(auth) = &self.auth {
            auth(request.headers_mut()).map_err(|e| ClientError::Auth(e.to_string()))?;
        }
        let origin = request
            .headers()
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let config = WebSocketConfig::default()
            .read_buffer_size(WS_READ_BUFFER_SIZE)
            .write_buffer_size(WS_WRITE_BUFFER_SIZE)
            .max_message_size(Some(WS_MESSAGE_SIZE_LIMIT));
        let (ws, _response) = connect_async_with_config(request, Some(config), false)
            .await
            .map_err(handshake_error)?;
        debug!(url = %self.url, "WebSocket connection established");

        let peer = PeerInfo::new("ws", self.url.clone()).with_http(HttpInfo {
            version: "HTTP/1.1".to_string(),
            origin,
            ..HttpInfo::default()
        });
        Ok(Arc::new(WebSocketCodec::new(ws, peer)))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
