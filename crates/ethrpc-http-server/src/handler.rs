//! HTTP request handling: routing, validation and single-request serving

use bytes::Bytes;
use ethrpc_json_rpc::constants::{ACCEPTED_CONTENT_TYPES, CONTENT_TYPE};
use ethrpc_json_rpc::{HttpInfo, PeerInfo, ServerCodec, Server};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::codec::HttpServerCodec;
use crate::cors::CorsLayer;
use crate::server::ServerConfig;
use crate::websocket::{self, OriginValidator};

pub(crate) fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

pub(crate) fn http_info<B>(req: &Request<B>) -> HttpInfo {
    let header = |name: header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let host = match header(header::HOST) {
        host if host.is_empty() => req.uri().authority().map(|a| a.to_string()).unwrap_or_default(),
        host => host,
    };
    HttpInfo {
        version: format!("{:?}", req.version()),
        user_agent: header(header::USER_AGENT),
        origin: header(header::ORIGIN),
        host,
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Returns the status and message to reject the request with, if any.
pub fn validate_request<B>(req: &Request<B>, max_body_size: usize) -> Option<(StatusCode, String)> {
    if req.method() == Method::PUT || req.method() == Method::DELETE {
        return Some((StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string()));
    }
    if let Some(len) = content_length(req.headers()) {
        if len > max_body_size as u64 {
            return Some((
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("content length too large ({len}>{max_body_size})"),
            ));
        }
    }
    if req.method() == Method::OPTIONS {
        return None;
    }
    let media_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase());
    match media_type {
        Some(mt) if ACCEPTED_CONTENT_TYPES.contains(&mt.as_str()) => None,
        _ => Some((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("invalid content type, only {CONTENT_TYPE} is supported"),
        )),
    }
}

/// A bodiless `GET` without a query string, as sent by load-balancer health checks
fn is_health_check<B>(req: &Request<B>) -> bool {
    req.method() == Method::GET
        && req.uri().query().is_none()
        && content_length(req.headers()).unwrap_or(0) == 0
        && !req.headers().contains_key(header::TRANSFER_ENCODING)
}

/// Routes requests on an HTTP endpoint to the JSON-RPC server
pub struct RpcHttpHandler {
    config: Arc<ServerConfig>,
    server: Arc<Server>,
    origins: OriginValidator,
}

impl RpcHttpHandler {
    pub fn new(config: Arc<ServerConfig>, server: Arc<Server>) -> Self {
        let origins = OriginValidator::new(&config.ws_origins);
        Self {
            config,
            server,
            origins,
        }
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Handle one HTTP request from `remote`
    pub async fn handle_request<B>(&self, req: Request<B>, remote: SocketAddr) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path().to_string();
        if self.config.enable_websocket
            && path == self.config.ws_endpoint()
            && websocket::is_upgrade_request(req.headers())
        {
            return websocket::upgrade(req, self.server.clone(), &self.config, &self.origins, remote);
        }
        if path != self.config.rpc_path {
            return text_response(StatusCode::NOT_FOUND, "404 page not found");
        }

        let origin = req
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut resp = if req.method() == Method::OPTIONS && validate_request(&req, self.config.max_body_size).is_none() {
            self.handle_preflight()
        } else {
            self.handle_json_rpc_request(req, remote).await
        };
        if self.config.enable_cors {
            CorsLayer::apply_for_request(resp.headers_mut(), &self.config.cors_origins, origin.as_deref());
        }
        resp
    }

    async fn handle_json_rpc_request<B>(&self, req: Request<B>, remote: SocketAddr) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if is_health_check(&req) {
            return text_response(StatusCode::OK, Bytes::new());
        }
        if let Some((status, message)) = validate_request(&req, self.config.max_body_size) {
            debug!(status = %status, error = %message, "Rejected HTTP request");
            return text_response(status, message);
        }

        let peer = PeerInfo::new("http", remote.to_string()).with_http(http_info(&req));
        let body = match Limited::new(req.into_body(), self.config.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(remote = %remote, error = %err, "Failed to read request body");
                return text_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("content length too large (>{})", self.config.max_body_size),
                );
            }
        };

        let codec = Arc::new(HttpServerCodec::new(body, peer));
        let started = Instant::now();
        let serving = tokio::spawn({
            let server = self.server.clone();
            let codec = codec.clone();
            async move { server.serve_single_request(codec).await }
        });
        match tokio::time::timeout(self.config.write_timeout, serving).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(remote = %remote, error = %err, "HTTP request task failed"),
            Err(_) => {
                warn!(remote = %remote, timeout_ms = self.config.write_timeout.as_millis() as u64, "HTTP request timed out");
                codec.close().await;
                return text_response(StatusCode::SERVICE_UNAVAILABLE, "request timed out");
            }
        }
        codec.close().await;
        debug!(remote = %remote, duration_ms = started.elapsed().as_millis() as u64, "Served HTTP request");

        let mut resp = Response::new(Full::new(codec.take_response()));
        resp.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
        resp
    }

    fn handle_preflight(&self) -> Response<Full<Bytes>> {
        let mut resp = Response::new(Full::new(Bytes::new()));
        resp.headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, POST, OPTIONS"));
        resp
    }
}
