//! WebSocket upgrade and origin validation.

use bytes::Bytes;
use ethrpc_json_rpc::codec::WebSocketCodec;
use ethrpc_json_rpc::{PeerInfo, Server};
use http_body_util::Full;
use hyper::header::{
    CONNECTION, HeaderMap, HeaderValue, ORIGIN, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tracing::{debug, warn};
use url::Url;

use crate::handler::{http_info, text_response};
use crate::server::ServerConfig;

/// Decides whether a browser `Origin` may open a WebSocket connection.
#[derive(Debug, Clone)]
pub struct OriginValidator {
    allow_all: bool,
    origins: Vec<String>,
}

impl OriginValidator {
    /// `"*"` allows every origin. An empty list allows `http://localhost` and
    /// `http://<hostname>`.
    pub fn new(allowed: &[String]) -> Self {
        let allow_all = allowed.iter().any(|o| o == "*");
        let mut origins: Vec<String> = allowed.iter().filter(|o| !o.is_empty()).cloned().collect();
        if origins.is_empty() {
            origins.push("http://localhost".to_string());
            if let Some(host) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
                origins.push(format!("http://{host}"));
            }
        }
        debug!(origins = ?origins, "Allowed origin(s) for WebSocket RPC");
        Self { allow_all, origins }
    }

    /// Requests without an `Origin` header always pass: only browsers set it,
    /// and other clients can put anything there.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        if self.allow_all {
            return true;
        }
        let origin = origin.to_lowercase();
        if self.origins.iter().any(|rule| rule_allows_origin(rule, &origin)) {
            return true;
        }
        warn!(origin = %origin, "Rejected WebSocket connection");
        false
    }
}

#[derive(Debug, PartialEq, Eq)]
struct OriginParts {
    scheme: String,
    host: String,
    port: String,
}

fn parse_origin(origin: &str) -> Option<OriginParts> {
    let origin = origin.to_lowercase();
    if origin.contains("://") {
        let url = Url::parse(&origin).ok()?;
        return Some(OriginParts {
            scheme: url.scheme().to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port().map(|p| p.to_string()).unwrap_or_default(),
        });
    }
    // Bare "host" or "host:port"
    let (host, port) = origin.split_once(':').unwrap_or((origin.as_str(), ""));
    Some(OriginParts {
        scheme: String::new(),
        host: host.to_string(),
        port: port.to_string(),
    })
}

/// Every part the rule specifies must match; unspecified parts match anything.
fn rule_allows_origin(rule: &str, origin: &str) -> bool {
    let Some(allowed) = parse_origin(rule) else {
        warn!(spec = %rule, "Error parsing allowed origin specification");
        return false;
    };
    let Some(browser) = parse_origin(origin) else {
        warn!(origin = %origin, "Error parsing browser 'Origin' field");
        return false;
    };
    (allowed.scheme.is_empty() || allowed.scheme == browser.scheme)
        && (allowed.host.is_empty() || allowed.host == browser.host)
        && (allowed.port.is_empty() || allowed.port == browser.port)
}

fn header_contains(headers: &HeaderMap, name: impl hyper::header::AsHeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case(token))
}

/// Whether the request asks to switch to the WebSocket protocol
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    header_contains(headers, CONNECTION, "upgrade") && header_contains(headers, UPGRADE, "websocket")
}

/// Answer a WebSocket handshake and serve the upgraded connection on a new task.
pub(crate) fn upgrade<B>(
    mut req: Request<B>,
    server: Arc<Server>,
    config: &ServerConfig,
    validator: &OriginValidator,
    remote: SocketAddr,
) -> Response<Full<Bytes>>
where
    B: Send + 'static,
{
    let headers = req.headers();
    if !header_contains(headers, SEC_WEBSOCKET_VERSION, "13") {
        return text_response(
            StatusCode::BAD_REQUEST,
            "websocket: unsupported version: 13 not found in 'Sec-Websocket-Version' header",
        );
    }
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    if !validator.is_allowed(origin) {
        return text_response(
            StatusCode::FORBIDDEN,
            "websocket: request origin not allowed by Upgrader.CheckOrigin",
        );
    }
    let Some(key) = headers.get(SEC_WEBSOCKET_KEY) else {
        return text_response(
            StatusCode::BAD_REQUEST,
            "websocket: not a websocket handshake: 'Sec-WebSocket-Key' header is missing or blank",
        );
    };
    let accept = derive_accept_key(key.as_bytes());
    let Ok(accept) = HeaderValue::from_str(&accept) else {
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "websocket: handshake failed");
    };

    let peer = PeerInfo::new("ws", remote.to_string()).with_http(http_info(&req));
    let ws_config = WebSocketConfig::default()
        .read_buffer_size(config.ws_read_buffer_size)
        .write_buffer_size(config.ws_write_buffer_size)
        .max_message_size(Some(config.ws_message_size_limit));
    let read_limit = config.ws_message_size_limit;
    let on_upgrade = hyper::upgrade::on(&mut req);

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, Some(ws_config))
                        .await;
                let codec = WebSocketCodec::with_read_limit(ws, peer, read_limit);
                server.serve_codec(Arc::new(codec)).await;
            }
            Err(err) => debug!(remote = %remote, error = %err, "WebSocket upgrade failed"),
        }
    });

    let mut resp = Response::new(Full::new(Bytes::new()));
    *resp.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = resp.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    resp
}
