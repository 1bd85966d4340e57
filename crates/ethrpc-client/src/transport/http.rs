//! HTTP transport: one POST per call or batch

use async_trait::async_trait;
use bytes::Bytes;
use ethrpc_json_rpc::constants::CONTENT_TYPE;
use ethrpc_json_rpc::{CodecError, JsonPayload, JsonRpcMessage, PeerInfo, ServerCodec};
use http::HeaderMap;
use http::header::{ACCEPT, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::config::{ClientConfig, HttpAuth};
use crate::error::{ClientError, ClientResult, HttpError};

/// Client side of an HTTP endpoint.
///
/// It implements [`ServerCodec`] so it can stand in for a connection, but it
/// never reads and refuses writes: requests go through [`HttpConn::post`].
pub struct HttpConn {
    client: Client,
    url: Url,
    headers: parking_lot::Mutex<HeaderMap>,
    auth: Option<HttpAuth>,
    closed: CancellationToken,
}

impl HttpConn {
    pub fn new(endpoint: &str, config: &ClientConfig) -> ClientResult<Self> {
        let url = Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(CONTENT_TYPE));
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
        headers.extend(config.headers.clone());

        let client = Client::builder().build()?;
        Ok(Self {
            client,
            url,
            headers: parking_lot::Mutex::new(headers),
            auth: config.http_auth.clone(),
            closed: CancellationToken::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Set a header sent with every subsequent request
    pub fn set_header(&self, name: http::header::HeaderName, value: HeaderValue) {
        self.headers.lock().insert(name, value);
    }

    /// POST `payload` and return the response body. Non-2xx responses become [`HttpError`].
    pub async fn post(&self, payload: &JsonPayload, timeout: Option<Duration>) -> ClientResult<Bytes> {
        let body = serde_json::to_vec(payload)?;
        let mut headers = self.headers.lock().clone();
        if let Some(auth) = &self.auth {
            auth(&mut headers).map_err(|e| ClientError::Auth(e.to_string()))?;
        }

        let mut request = self.client.post(self.url.clone()).headers(headers).body(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::Connection(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(url = %self.url, status = status.as_u16(), "HTTP request failed");
            return Err(HttpError {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            }
            .into());
        }
        let body = response.bytes().await?;
        trace!(
            url = %self.url,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            bytes = body.len(),
            "HTTP request completed"
        );
        Ok(body)
    }
}

#[async_trait]
impl ServerCodec for HttpConn {
    async fn read_batch(&self) -> Result<(Vec<JsonRpcMessage>, bool), CodecError> {
        self.closed.cancelled().await;
        Err(CodecError::Eof)
    }

    async fn write_json(&self, _payload: &JsonPayload, _deadline: Option<Instant>) -> Result<(), CodecError> {
        Err(CodecError::Unsupported("write_json"))
    }

    fn peer_info(&self) -> PeerInfo {
        PeerInfo::new("http", self.url.as_str())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
