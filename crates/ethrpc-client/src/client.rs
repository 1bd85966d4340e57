//! The RPC client.
//!
//! A [`Client`] talks to one endpoint. Over HTTP every call is its own POST.
//! Over WebSocket, IPC and in-process pipes the client keeps one persistent
//! connection, served by a core [`Handler`] whose [`ResponseRouter`] is the
//! connection's [`ClientRouter`]. Server-to-client calls on that connection
//! are dispatched to the services registered with [`Client::register_name`].

use async_trait::async_trait;
use ethrpc_json_rpc::constants::SUBSCRIBE_METHOD_SUFFIX;
use ethrpc_json_rpc::types::random_id_generator;
use ethrpc_json_rpc::{
    CloseReason, Handler, JsonPayload, JsonRpcMessage, NoopMetrics, RegistryError,
    ResponseRouter, ServerCodec, ServiceBuilder, ServiceRegistry, SharedCodec, SubscriptionId,
    SubscriptionResult,
};
use http::header::{HeaderName, HeaderValue};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::subscription::{ClientSubscription, SubShared};
use crate::transport::{Connector, HttpConn, InProcConnector, WsConnector};

type OpResult = Result<JsonRpcMessage, CloseReason>;

/// An outgoing call or batch waiting for its responses
struct RequestOp {
    ids: Vec<String>,
    resp: mpsc::UnboundedSender<OpResult>,
    /// Set for `<namespace>_subscribe` calls
    sub: Option<Arc<SubShared>>,
}

/// Routes the responses and subscription notifications arriving on one
/// persistent connection to the calls and subscriptions waiting for them.
pub(crate) struct ClientRouter {
    resp_wait: Mutex<HashMap<String, Arc<RequestOp>>>,
    client_subs: Mutex<HashMap<SubscriptionId, Arc<SubShared>>>,
    closed: Mutex<Option<CloseReason>>,
}

impl ClientRouter {
    fn new() -> Self {
        Self {
            resp_wait: Mutex::new(HashMap::new()),
            client_subs: Mutex::new(HashMap::new()),
            closed: Mutex::new(None),
        }
    }

    fn register(self: &Arc<Self>, op: Arc<RequestOp>) -> ClientResult<Pending> {
        if let Some(reason) = self.closed.lock().clone() {
            return Err(reason.into());
        }
        let mut wait = self.resp_wait.lock();
        for id in &op.ids {
            wait.insert(id.clone(), op.clone());
        }
        Ok(Pending {
            router: self.clone(),
            ids: op.ids.clone(),
        })
    }

    fn remove(&self, ids: &[String]) {
        let mut wait = self.resp_wait.lock();
        for id in ids {
            wait.remove(id);
        }
    }
}

#[async_trait]
impl ResponseRouter for ClientRouter {
    async fn handle_response(&self, msg: JsonRpcMessage) {
        let op = msg.id_key().and_then(|id| self.resp_wait.lock().remove(id));
        let Some(op) = op else {
            debug!(reqid = %msg.id_for_log(), "Unsolicited RPC response");
            return;
        };

        // A subscription starts forwarding before its id is handed to the
        // caller, so notifications following the response are never lost.
        if let Some(sub) = &op.sub
            && msg.error.is_none()
            && let Some(result) = &msg.result
        {
            match serde_json::from_str::<SubscriptionId>(result.get()) {
                Ok(id) => {
                    self.client_subs.lock().insert(id.clone(), sub.clone());
                    sub.start(id);
                }
                Err(e) => debug!(err = %e, "Invalid subscription id in response"),
            }
        }
        let _ = op.resp.send(Ok(msg));
    }

    async fn handle_subscription_result(&self, msg: JsonRpcMessage) {
        let Some(params) = &msg.params else {
            return;
        };
        let result: SubscriptionResult = match serde_json::from_str(params.get()) {
            Ok(result) => result,
            Err(e) => {
                debug!(method = %msg.method, err = %e, "Dropping invalid subscription message");
                return;
            }
        };
        let sub = self.client_subs.lock().get(&result.id).cloned();
        match sub {
            Some(sub) => {
                if !sub.deliver(result.result).await {
                    self.client_subs.lock().remove(&result.id);
                }
            }
            None => trace!(id = %result.id, "Notification for unknown subscription"),
        }
    }

    async fn cancel_all(&self, reason: &CloseReason, inflight: Option<&str>) {
        *self.closed.lock() = Some(reason.clone());
        let ops: Vec<(String, Arc<RequestOp>)> = self.resp_wait.lock().drain().collect();
        for (id, op) in ops {
            if inflight != Some(id.as_str()) {
                let _ = op.resp.send(Err(reason.clone()));
            }
        }
        let subs: Vec<Arc<SubShared>> = self.client_subs.lock().drain().map(|(_, sub)| sub).collect();
        for sub in subs {
            sub.close(reason.clone()).await;
        }
    }
}

/// Removes a request's ids from its router when the caller stops waiting
struct Pending {
    router: Arc<ClientRouter>,
    ids: Vec<String>,
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.router.remove(&self.ids);
    }
}

/// The live persistent connection
struct Conn {
    codec: SharedCodec,
    router: Arc<ClientRouter>,
    reader: JoinHandle<()>,
}

enum Transport {
    Http(Arc<HttpConn>),
    Duplex(Arc<dyn Connector>),
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    transport: Transport,
    services: Arc<ServiceRegistry>,
    next_id: AtomicU64,
    conn: tokio::sync::Mutex<Option<Conn>>,
    closed: CancellationToken,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// One element of a [`Client::batch_call`].
#[derive(Debug)]
pub struct BatchElem {
    pub method: String,
    pub args: Option<Box<RawValue>>,
    /// The raw result, once a successful response arrived
    pub result: Option<Box<RawValue>>,
    /// Set if the server returned an error for this element, or no response at all
    pub error: Option<ClientError>,
}

impl BatchElem {
    pub fn new(method: impl Into<String>, args: impl Serialize) -> ClientResult<Self> {
        Ok(Self {
            method: method.into(),
            args: encode_params(&args)?,
            result: None,
            error: None,
        })
    }

    /// Decode the element's result, or return its error.
    pub fn decode<R: DeserializeOwned>(self) -> ClientResult<R> {
        if let Some(err) = self.error {
            return Err(err);
        }
        match self.result {
            Some(raw) => Ok(serde_json::from_str(raw.get())?),
            None => Err(ClientError::NoResult),
        }
    }
}

/// Positional arguments are any value serializing to a JSON array (tuples,
/// `Vec`s, `json!([..])`); `()` sends no `params` member.
fn encode_params(args: &impl Serialize) -> ClientResult<Option<Box<RawValue>>> {
    let raw = serde_json::value::to_raw_value(args)?;
    Ok((raw.get() != "null").then_some(raw))
}

fn decode_result<R: DeserializeOwned>(msg: JsonRpcMessage) -> ClientResult<R> {
    if let Some(err) = msg.error {
        return Err(ClientError::Rpc(err));
    }
    match msg.result {
        Some(raw) => Ok(serde_json::from_str(raw.get())?),
        None => Err(ClientError::NoResult),
    }
}

fn answer(elem: &mut BatchElem, msg: JsonRpcMessage) {
    match msg.error {
        Some(err) => elem.error = Some(ClientError::Rpc(err)),
        None => match msg.result {
            Some(result) => elem.result = Some(result),
            None => elem.error = Some(ClientError::NoResult),
        },
    }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<OpResult>) -> ClientResult<JsonRpcMessage> {
    match rx.recv().await {
        Some(Ok(msg)) => Ok(msg),
        Some(Err(reason)) => Err(reason.into()),
        None => Err(ClientError::ClientQuit),
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = ClientResult<T>>,
) -> ClientResult<T> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ClientError::Timeout)?,
        None => fut.await,
    }
}

impl ClientInner {
    fn next_id(&self) -> Box<RawValue> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Integers always encode.
        serde_json::value::to_raw_value(&id).unwrap_or_else(|_| RawValue::NULL.to_owned())
    }

    fn check_open(&self) -> ClientResult<()> {
        if self.closed.is_cancelled() {
            Err(ClientError::ClientQuit)
        } else {
            Ok(())
        }
    }

    /// Open a persistent connection and start serving its read side.
    async fn connect(&self, connector: &Arc<dyn Connector>) -> ClientResult<Conn> {
        let codec = connector.connect().await?;
        let router = Arc::new(ClientRouter::new());
        let handler = Arc::new(
            Handler::new(
                codec.clone(),
                self.services.clone(),
                random_id_generator(),
                Arc::new(NoopMetrics),
            )
            .allow_subscribe(false)
            .with_router(router.clone()),
        );
        debug!(endpoint = %connector.endpoint(), "RPC client connected");

        let closed = self.closed.clone();
        let reader = tokio::spawn(async move {
            let reason = tokio::select! {
                reason = handler.serve() => reason,
                _ = closed.cancelled() => CloseReason::ClientQuit,
            };
            handler.conn().close().await;
            handler.close(reason, None).await;
        });
        Ok(Conn { codec, router, reader })
    }

    /// Write `payload` on the persistent connection, redialing first if the
    /// previous connection was lost. `op` is registered before the write.
    async fn send(
        &self,
        connector: &Arc<dyn Connector>,
        payload: &JsonPayload,
        op: Option<Arc<RequestOp>>,
        timeout: Option<Duration>,
    ) -> ClientResult<Option<Pending>> {
        let mut slot = self.conn.lock().await;
        self.check_open()?;
        if slot.as_ref().is_none_or(|conn| conn.codec.closed().is_cancelled()) {
            *slot = Some(self.connect(connector).await?);
        }
        let Some(conn) = slot.as_ref() else {
            return Err(ClientError::ClientQuit);
        };

        let pending = op.map(|op| conn.router.register(op)).transpose()?;
        let deadline = timeout.map(|t| Instant::now() + t);
        if let Err(e) = conn.codec.write_json(payload, deadline).await {
            debug!(endpoint = %connector.endpoint(), err = %e, "RPC client write failed");
            // The read loop winds the connection down; the next send redials.
            conn.codec.close().await;
            return Err(e.into());
        }
        Ok(pending)
    }

    async fn round_trip(
        &self,
        msg: JsonRpcMessage,
        sub: Option<Arc<SubShared>>,
        timeout: Option<Duration>,
    ) -> ClientResult<JsonRpcMessage> {
        self.check_open()?;
        let timeout = timeout.or(self.config.request_timeout);
        match &self.transport {
            Transport::Http(http) => {
                let body = http.post(&msg.into(), timeout).await?;
                Ok(serde_json::from_slice(&body)?)
            }
            Transport::Duplex(connector) => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let op = Arc::new(RequestOp {
                    ids: msg.id_key().map(str::to_string).into_iter().collect(),
                    resp: tx,
                    sub,
                });
                with_timeout(timeout, async {
                    let _pending = self.send(connector, &msg.into(), Some(op), timeout).await?;
                    recv(&mut rx).await
                })
                .await
            }
        }
    }

    pub(crate) async fn call_raw<R: DeserializeOwned>(
        &self,
        method: &str,
        args: impl Serialize,
        timeout: Option<Duration>,
    ) -> ClientResult<R> {
        let msg = JsonRpcMessage::call(self.next_id(), method, encode_params(&args)?);
        let start = Instant::now();
        let resp = self.round_trip(msg, None, timeout).await;
        trace!(
            method,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            ok = resp.is_ok(),
            "RPC client call finished"
        );
        decode_result(resp?)
    }
}

/// A JSON-RPC client bound to one endpoint. Cloning is cheap; clones share
/// the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    fn from_transport(transport: Transport, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                services: Arc::new(ServiceRegistry::new()),
                next_id: AtomicU64::new(1),
                conn: tokio::sync::Mutex::new(None),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Dial `endpoint`, choosing the transport from its URL scheme:
    /// `http`/`https`, `ws`/`wss`, or a filesystem path for IPC.
    pub async fn dial(endpoint: &str) -> ClientResult<Self> {
        Self::dial_with_config(endpoint, ClientConfig::default()).await
    }

    pub async fn dial_with_config(endpoint: &str, config: ClientConfig) -> ClientResult<Self> {
        match Url::parse(endpoint) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Self::dial_http(endpoint, config),
                "ws" | "wss" => Self::dial_websocket(endpoint, config).await,
                scheme => Err(ClientError::InvalidEndpoint(format!(
                    "no known transport for URL scheme {scheme:?}"
                ))),
            },
            #[cfg(unix)]
            Err(url::ParseError::RelativeUrlWithoutBase) => Self::dial_ipc(endpoint, config).await,
            Err(e) => Err(ClientError::InvalidEndpoint(format!("{endpoint}: {e}"))),
        }
    }

    /// An HTTP client. No connection is made until the first call.
    pub fn dial_http(endpoint: &str, config: ClientConfig) -> ClientResult<Self> {
        let conn = HttpConn::new(endpoint, &config)?;
        Ok(Self::from_transport(Transport::Http(Arc::new(conn)), config))
    }

    pub async fn dial_websocket(endpoint: &str, config: ClientConfig) -> ClientResult<Self> {
        let connector = WsConnector::new(endpoint, &config)?;
        Self::with_connector(Arc::new(connector), config).await
    }

    #[cfg(unix)]
    pub async fn dial_ipc(path: impl Into<std::path::PathBuf>, config: ClientConfig) -> ClientResult<Self> {
        let connector = crate::transport::IpcConnector::new(path);
        Self::with_connector(Arc::new(connector), config).await
    }

    /// A client served directly by `server` over an in-memory pipe
    pub async fn dial_in_proc(server: &Arc<ethrpc_json_rpc::Server>) -> ClientResult<Self> {
        let connector = InProcConnector::new(server.clone());
        Self::with_connector(Arc::new(connector), ClientConfig::default()).await
    }

    /// A client over persistent connections opened by `connector`. The first
    /// connection is made right away.
    pub async fn with_connector(connector: Arc<dyn Connector>, config: ClientConfig) -> ClientResult<Self> {
        let client = Self::from_transport(Transport::Duplex(connector.clone()), config);
        let conn = client.inner.connect(&connector).await?;
        *client.inner.conn.lock().await = Some(conn);
        Ok(client)
    }

    /// Whether the transport can carry subscriptions and server-to-client calls
    pub fn supports_subscriptions(&self) -> bool {
        matches!(self.inner.transport, Transport::Duplex(_))
    }

    /// Register a service answering calls the server makes on this
    /// client's connection.
    pub fn register_name(&self, name: &str, service: ServiceBuilder) -> Result<(), RegistryError> {
        self.inner.services.register_name(name, service)
    }

    /// Set a header sent with every subsequent HTTP request. No effect on
    /// other transports.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        if let Transport::Http(http) = &self.inner.transport {
            http.set_header(name, value);
        }
    }

    /// Call `method` with positional `args` and decode the result.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, args: impl Serialize) -> ClientResult<R> {
        self.inner.call_raw(method, args, None).await
    }

    /// Like [`Client::call`], failing with [`ClientError::Timeout`] after `timeout`.
    pub async fn call_with_timeout<R: DeserializeOwned>(
        &self,
        method: &str,
        args: impl Serialize,
        timeout: Duration,
    ) -> ClientResult<R> {
        self.inner.call_raw(method, args, Some(timeout)).await
    }

    /// Send all of `elems` as one batch. Per-element failures land in each
    /// element's `error`; the returned error is for the batch as a whole.
    pub async fn batch_call(&self, elems: &mut [BatchElem]) -> ClientResult<()> {
        self.inner.check_open()?;
        if elems.is_empty() {
            return Ok(());
        }
        let msgs: Vec<JsonRpcMessage> = elems
            .iter()
            .map(|elem| JsonRpcMessage::call(self.inner.next_id(), elem.method.clone(), elem.args.clone()))
            .collect();
        let ids: Vec<String> = msgs
            .iter()
            .map(|msg| msg.id_key().unwrap_or_default().to_string())
            .collect();
        let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        let mut answered = vec![false; elems.len()];
        let timeout = self.inner.config.request_timeout;

        let mut apply = |msg: JsonRpcMessage| {
            if let Some(&i) = msg.id_key().and_then(|id| index.get(id))
                && !answered[i]
            {
                answered[i] = true;
                answer(&mut elems[i], msg);
            }
        };

        match &self.inner.transport {
            Transport::Http(http) => {
                let body = http.post(&JsonPayload::Batch(msgs), timeout).await?;
                let resps: Vec<JsonRpcMessage> = serde_json::from_slice(&body)?;
                resps.into_iter().for_each(&mut apply);
            }
            Transport::Duplex(connector) => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let op = Arc::new(RequestOp {
                    ids: ids.clone(),
                    resp: tx,
                    sub: None,
                });
                let total = ids.len();
                with_timeout(timeout, async {
                    let _pending = self.inner.send(connector, &JsonPayload::Batch(msgs), Some(op), timeout).await?;
                    for _ in 0..total {
                        apply(recv(&mut rx).await?);
                    }
                    Ok::<_, ClientError>(())
                })
                .await?;
            }
        }

        for (elem, answered) in elems.iter_mut().zip(answered) {
            if !answered {
                elem.error = Some(ClientError::MissingResponse);
            }
        }
        Ok(())
    }

    /// Send a notification: no id, no response.
    pub async fn notify(&self, method: &str, args: impl Serialize) -> ClientResult<()> {
        self.inner.check_open()?;
        let msg = JsonRpcMessage::notification(method, encode_params(&args)?);
        match &self.inner.transport {
            Transport::Http(http) => {
                http.post(&msg.into(), self.inner.config.request_timeout).await?;
            }
            Transport::Duplex(connector) => {
                self.inner.send(connector, &msg.into(), None, self.inner.config.request_timeout).await?;
            }
        }
        Ok(())
    }

    /// Subscribe through `<namespace>_subscribe`. The first positional
    /// argument is the subscription `name`, followed by the elements of
    /// `args`. Notifications are decoded as `T` and sent to `sink`.
    pub async fn subscribe<T>(
        &self,
        namespace: &str,
        sink: mpsc::Sender<T>,
        name: &str,
        args: impl Serialize,
    ) -> ClientResult<ClientSubscription>
    where
        T: DeserializeOwned + Send + 'static,
    {
        if !self.supports_subscriptions() {
            return Err(ClientError::NotificationsUnsupported);
        }
        let mut params = vec![Value::String(name.to_string())];
        match serde_json::to_value(&args)? {
            Value::Null => {}
            Value::Array(rest) => params.extend(rest),
            other => params.push(other),
        }

        let method = format!("{namespace}{SUBSCRIBE_METHOD_SUFFIX}");
        let msg = JsonRpcMessage::call(self.inner.next_id(), method, encode_params(&params)?);
        let shared = SubShared::new(namespace, sink, Arc::downgrade(&self.inner));
        let resp = self.inner.round_trip(msg, Some(shared.clone()), None).await?;
        let id: SubscriptionId = decode_result(resp)?;
        debug!(namespace, id = %id, "Subscribed");
        Ok(ClientSubscription::new(id, shared))
    }

    /// Subscribe to an `eth` namespace subscription such as `newHeads`.
    pub async fn eth_subscribe<T>(
        &self,
        sink: mpsc::Sender<T>,
        name: &str,
        args: impl Serialize,
    ) -> ClientResult<ClientSubscription>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.subscribe("eth", sink, name, args).await
    }

    /// Close the client. Pending calls fail with [`ClientError::ClientQuit`];
    /// subscriptions end without an error. Later calls fail immediately.
    pub async fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();
        let conn = self.inner.conn.lock().await.take();
        if let Some(conn) = conn
            && let Err(e) = conn.reader.await
        {
            debug!(err = %e, "RPC client read task failed");
        }
        if let Transport::Http(http) = &self.inner.transport {
            http.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoint = match &self.inner.transport {
            Transport::Http(http) => http.url().to_string(),
            Transport::Duplex(connector) => connector.endpoint(),
        };
        f.debug_struct("Client")
            .field("endpoint", &endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethrpc_json_rpc::prelude::*;
    use ethrpc_json_rpc::error_codes;
    use serde_json::json;

    fn test_server() -> Arc<Server> {
        let server = Arc::new(Server::new());
        server
            .register_name(
                "test",
                ServiceBuilder::new()
                    .method("echo", |_ctx, (s, n): (String, u64)| async move {
                        Ok::<_, RpcError>(json!({ "string": s, "int": n }))
                    })
                    .method("sleep", |ctx: CallContext, (ms,): (u64,)| async move {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok::<_, RpcError>(true),
                            _ = ctx.cancelled() => Ok(false),
                        }
                    })
                    .subscription("count", |ctx: CallContext, (n,): (u64,)| async move {
                        let notifier = ctx.notifier().cloned().ok_or(RpcError::NotificationsUnsupported)?;
                        let sub = notifier
                            .create_subscription()
                            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
                        for i in 0..n {
                            notifier
                                .notify(&sub.id, &i)
                                .await
                                .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
                        }
                        Ok::<Subscription, RpcError>(sub)
                    }),
            )
            .unwrap();
        server
    }

    #[test]
    fn test_encode_params() {
        assert!(encode_params(&()).unwrap().is_none());
        assert_eq!(encode_params(&("a", 1)).unwrap().unwrap().get(), r#"["a",1]"#);
    }

    #[test]
    fn test_batch_elem_decode() {
        let elem = BatchElem::new("test_echo", ("x", 1)).unwrap();
        assert!(matches!(elem.decode::<Value>(), Err(ClientError::NoResult)));

        let mut elem = BatchElem::new("test_echo", ("x", 1)).unwrap();
        elem.result = Some(serde_json::value::to_raw_value(&json!(5)).unwrap());
        assert_eq!(elem.decode::<u64>().unwrap(), 5);

        let mut elem = BatchElem::new("test_echo", ("x", 1)).unwrap();
        elem.error = Some(ClientError::MissingResponse);
        assert!(matches!(elem.decode::<u64>(), Err(ClientError::MissingResponse)));
    }

    #[tokio::test]
    async fn test_in_proc_call() {
        let server = test_server();
        let client = Client::dial_in_proc(&server).await.unwrap();

        let result: Value = client.call("test_echo", ("hello", 10)).await.unwrap();
        assert_eq!(result, json!({ "string": "hello", "int": 10 }));

        let err = client.call::<Value>("test_missing", ()).await.unwrap_err();
        assert_eq!(err.error_code(), Some(error_codes::METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_in_proc_batch() {
        let server = test_server();
        let client = Client::dial_in_proc(&server).await.unwrap();

        let mut batch = vec![
            BatchElem::new("test_echo", ("a", 1)).unwrap(),
            BatchElem::new("test_echo", ("b",)).unwrap(),
            BatchElem::new("no_such_method", ()).unwrap(),
        ];
        client.batch_call(&mut batch).await.unwrap();

        let mut batch = batch.into_iter();
        let first = batch.next().unwrap().decode::<Value>().unwrap();
        assert_eq!(first["string"], "a");
        let second = batch.next().unwrap().decode::<Value>().unwrap_err();
        assert_eq!(second.error_code(), Some(error_codes::INVALID_PARAMS));
        let third = batch.next().unwrap().decode::<Value>().unwrap_err();
        assert_eq!(third.error_code(), Some(error_codes::METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_subscription_delivers_in_order() {
        let server = test_server();
        let client = Client::dial_in_proc(&server).await.unwrap();

        let (tx, mut rx) = mpsc::channel::<u64>(4);
        let sub = client.subscribe("test", tx, "count", (100,)).await.unwrap();
        for i in 0..100 {
            assert_eq!(rx.recv().await, Some(i));
        }
        sub.unsubscribe().await;
        assert!(sub.err().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_error_never_starts_forwarding() {
        let server = test_server();
        let client = Client::dial_in_proc(&server).await.unwrap();

        let (tx, _rx) = mpsc::channel::<u64>(1);
        let err = client.subscribe("test", tx, "nope", ()).await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc(_)));
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let server = test_server();
        let client = Client::dial_in_proc(&server).await.unwrap();

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.call::<bool>("test_sleep", (60_000,)).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close().await;

        assert!(matches!(pending.await.unwrap(), Err(ClientError::ClientQuit)));
        assert!(matches!(
            client.call::<Value>("test_echo", ("x", 1)).await,
            Err(ClientError::ClientQuit)
        ));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let server = test_server();
        let client = Client::dial_in_proc(&server).await.unwrap();

        let err = client
            .call_with_timeout::<bool>("test_sleep", (60_000,), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));

        // The connection stays usable.
        let result: Value = client.call("test_echo", ("y", 2)).await.unwrap();
        assert_eq!(result["int"], 2);
    }

    /// Hands out one pre-made pipe end, so the test plays the server.
    struct PipeConnector(Mutex<Option<ethrpc_json_rpc::codec::inproc::InProcCodec>>);

    #[async_trait]
    impl Connector for PipeConnector {
        async fn connect(&self) -> ClientResult<SharedCodec> {
            match self.0.lock().take() {
                Some(codec) => Ok(Arc::new(codec)),
                None => Err(ClientError::ConnectionClosed(CloseReason::Eof)),
            }
        }

        fn endpoint(&self) -> String {
            "pipe".to_string()
        }
    }

    #[tokio::test]
    async fn test_reverse_call() {
        let (server_end, client_end) = ethrpc_json_rpc::codec::inproc::pipe();
        let connector = Arc::new(PipeConnector(Mutex::new(Some(client_end))));
        let client = Client::with_connector(connector, ClientConfig::default()).await.unwrap();
        client
            .register_name(
                "peer",
                ServiceBuilder::new().infallible("name", |_ctx, ()| async { "light-client" }),
            )
            .unwrap();

        let raw = r#"{"jsonrpc":"2.0","id":"srv-1","method":"peer_name"}"#;
        let (msgs, _) = ethrpc_json_rpc::message::parse_message(raw.as_bytes());
        server_end.write_json(&msgs.into_iter().next().unwrap().into(), None).await.unwrap();

        let (resp, _) = server_end.read_batch().await.unwrap();
        assert_eq!(resp[0].id_key(), Some(r#""srv-1""#));
        assert_eq!(resp[0].result.as_ref().unwrap().get(), r#""light-client""#);
    }

    #[tokio::test]
    async fn test_reconnect_after_connection_loss() {
        let server = test_server();
        let client = Client::dial_in_proc(&server).await.unwrap();
        let first = client.inner.conn.lock().await.as_ref().unwrap().codec.clone();
        first.close().await;

        let result: Value = tokio_test::assert_ok!(client.call("test_echo", ("again", 3)).await);
        assert_eq!(result["int"], 3);
        let second = client.inner.conn.lock().await.as_ref().unwrap().codec.clone();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_connection_loss_ends_subscription_with_error() {
        let server = test_server();
        let client = Client::dial_in_proc(&server).await.unwrap();

        let (tx, _rx) = mpsc::channel::<u64>(1);
        let sub = client.subscribe("test", tx, "count", (0,)).await.unwrap();
        server.stop().await;

        let err = sub.err().await.unwrap();
        assert!(matches!(*err, ClientError::ConnectionClosed(CloseReason::Eof)));
    }

    #[tokio::test]
    async fn test_http_subscribe_unsupported() {
        let client = Client::dial_http("http://127.0.0.1:1", ClientConfig::default()).unwrap();
        let (tx, _rx) = mpsc::channel::<u64>(1);
        assert!(matches!(
            client.subscribe("eth", tx, "newHeads", ()).await,
            Err(ClientError::NotificationsUnsupported)
        ));
        assert!(!client.supports_subscriptions());
    }

    #[tokio::test]
    async fn test_dial_unknown_scheme() {
        assert!(matches!(
            Client::dial("ftp://example.com").await,
            Err(ClientError::InvalidEndpoint(_))
        ));
    }
}
