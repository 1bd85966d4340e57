//! Per-connection message dispatch.
//!
//! A [`Handler`] serves the calls arriving on one connection. Every call (or
//! whole batch) runs on its own task tracked by the handler; all of them are
//! children of the connection's root cancellation token.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::callback::{Args, CallContext, Callback};
use crate::codec::SharedCodec;
use crate::error::{CloseReason, CodecError, RpcError};
use crate::message::{JsonPayload, JsonRpcMessage, error_message};
use crate::metrics::MetricsSink;
use crate::notifier::{ActiveSubscription, Notifier};
use crate::params::parse_subscription_name;
use crate::registry::ServiceRegistry;
use crate::types::{IdGenerator, PeerInfo, SubscriptionId};

/// Receives the traffic that answers this side's own outgoing calls.
///
/// Only connections on which the local side also acts as a caller (clients)
/// install a router; without one, responses are logged and dropped.
#[async_trait]
pub trait ResponseRouter: Send + Sync {
    async fn handle_response(&self, msg: JsonRpcMessage);

    async fn handle_subscription_result(&self, msg: JsonRpcMessage);

    /// Fail every pending outgoing request with `reason`. `inflight` is the
    /// id of a request whose sender is already reporting the failure.
    async fn cancel_all(&self, reason: &CloseReason, inflight: Option<&str>);
}

type ServerSubscriptions = Arc<Mutex<HashMap<SubscriptionId, ActiveSubscription>>>;

/// State of one call task
struct CallProc {
    ctx: CancellationToken,
    notifiers: Vec<Notifier>,
}

pub struct Handler {
    registry: Arc<ServiceRegistry>,
    unsubscribe_cb: Arc<Callback>,
    id_gen: IdGenerator,
    conn: SharedCodec,
    peer: Arc<PeerInfo>,
    remote: String,
    root: CancellationToken,
    calls: TaskTracker,
    allow_subscribe: bool,
    server_subs: ServerSubscriptions,
    metrics: Arc<dyn MetricsSink>,
    router: Option<Arc<dyn ResponseRouter>>,
}

fn unsubscribe_callback(subs: ServerSubscriptions) -> Callback {
    Callback::method(move |_ctx, (id,): (SubscriptionId,)| {
        let removed = subs.lock().remove(&id);
        async move {
            match removed {
                Some(active) => {
                    active.close(None);
                    Ok(true)
                }
                None => Err(RpcError::UnknownSubscription),
            }
        }
    })
}

impl Handler {
    pub fn new(
        conn: SharedCodec,
        registry: Arc<ServiceRegistry>,
        id_gen: IdGenerator,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let server_subs: ServerSubscriptions = Arc::new(Mutex::new(HashMap::new()));
        let peer = conn.peer_info();
        Self {
            registry,
            unsubscribe_cb: Arc::new(unsubscribe_callback(server_subs.clone())),
            id_gen,
            remote: peer.remote_addr.clone(),
            peer: Arc::new(peer),
            conn,
            root: CancellationToken::new(),
            calls: TaskTracker::new(),
            allow_subscribe: true,
            server_subs,
            metrics,
            router: None,
        }
    }

    /// Whether `<namespace>_subscribe` calls are served. Off for single-shot transports.
    pub fn allow_subscribe(mut self, allow: bool) -> Self {
        self.allow_subscribe = allow;
        self
    }

    pub fn with_router(mut self, router: Arc<dyn ResponseRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn conn(&self) -> &SharedCodec {
        &self.conn
    }

    /// Number of live server-side subscriptions on this connection
    pub fn subscription_count(&self) -> usize {
        self.server_subs.lock().len()
    }

    /// Read from the connection and dispatch until it fails or closes.
    pub async fn serve(self: &Arc<Self>) -> CloseReason {
        loop {
            match self.conn.read_batch().await {
                Ok((msgs, true)) => self.handle_batch(msgs).await,
                Ok((mut msgs, false)) => {
                    if let Some(msg) = msgs.pop() {
                        self.handle_msg(msg).await;
                    }
                }
                Err(err) => {
                    if let CodecError::Json(e) = &err {
                        let resp = error_message(&RpcError::Parse(e.to_string()));
                        let _ = self.conn.write_json(&resp.into(), None).await;
                    }
                    if !err.is_eof() {
                        debug!(conn = %self.remote, err = %err, "RPC connection read error");
                    }
                    return CloseReason::from(&err);
                }
            }
        }
    }

    /// Handle a single non-batch message.
    pub async fn handle_msg(self: &Arc<Self>, msg: JsonRpcMessage) {
        if self.handle_immediate(&msg).await {
            return;
        }
        let this = Arc::clone(self);
        self.calls.spawn(async move {
            let mut cp = CallProc {
                ctx: this.root.child_token(),
                notifiers: Vec::new(),
            };
            let answer = this.handle_call_msg(&mut cp, msg).await;
            this.add_subscriptions(&cp.notifiers);
            if let Some(answer) = answer {
                this.write(answer.into()).await;
            }
            this.activate(&cp.notifiers).await;
            cp.ctx.cancel();
        });
    }

    /// Handle a batch. Responses and notifications addressed to this side are
    /// dispatched right away; the remaining calls run together on one task.
    pub async fn handle_batch(self: &Arc<Self>, msgs: Vec<JsonRpcMessage>) {
        if msgs.is_empty() {
            let this = Arc::clone(self);
            self.calls.spawn(async move {
                this.write(error_message(&RpcError::empty_batch()).into()).await;
            });
            return;
        }

        let mut calls = Vec::with_capacity(msgs.len());
        for msg in msgs {
            if !self.handle_immediate(&msg).await {
                calls.push(msg);
            }
        }
        if calls.is_empty() {
            return;
        }

        let this = Arc::clone(self);
        self.calls.spawn(async move {
            let mut cp = CallProc {
                ctx: this.root.child_token(),
                notifiers: Vec::new(),
            };
            let mut answers = Vec::with_capacity(calls.len());
            for msg in calls {
                if let Some(answer) = this.handle_call_msg(&mut cp, msg).await {
                    answers.push(answer);
                }
            }
            this.add_subscriptions(&cp.notifiers);
            if !answers.is_empty() {
                this.write(JsonPayload::Batch(answers)).await;
            }
            this.activate(&cp.notifiers).await;
            cp.ctx.cancel();
        });
    }

    /// Wait until every call task started so far has finished.
    pub async fn drain(&self) {
        self.calls.close();
        self.calls.wait().await;
        self.calls.reopen();
    }

    /// Tear the connection's dispatch state down: fail pending outgoing
    /// requests, cancel running calls and wait for them, then end every live
    /// subscription with `reason`.
    pub async fn close(&self, reason: CloseReason, inflight: Option<&str>) {
        if let Some(router) = &self.router {
            router.cancel_all(&reason, inflight).await;
        }
        self.root.cancel();
        self.calls.close();
        self.calls.wait().await;
        self.cancel_server_subscriptions(&reason);
    }

    async fn write(&self, payload: JsonPayload) {
        if let Err(e) = self.conn.write_json(&payload, None).await {
            debug!(conn = %self.remote, err = %e, "Failed to write RPC response");
        }
    }

    async fn activate(&self, notifiers: &[Notifier]) {
        for notifier in notifiers {
            if let Err(e) = notifier.activate().await {
                debug!(conn = %self.remote, err = %e, "Failed to flush subscription notifications");
            }
        }
    }

    /// Dispatch responses and subscription pushes; returns false for anything that needs a call task.
    async fn handle_immediate(&self, msg: &JsonRpcMessage) -> bool {
        let start = Instant::now();
        if msg.is_subscription_notification() {
            if let Some(router) = &self.router {
                router.handle_subscription_result(msg.clone()).await;
            }
            return true;
        }
        if msg.is_response() {
            match &self.router {
                Some(router) => router.handle_response(msg.clone()).await,
                None => debug!(conn = %self.remote, reqid = %msg.id_for_log(), "Unsolicited RPC response"),
            }
            trace!(
                conn = %self.remote,
                reqid = %msg.id_for_log(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Handled RPC response"
            );
            return true;
        }
        false
    }

    async fn handle_call_msg(&self, cp: &mut CallProc, msg: JsonRpcMessage) -> Option<JsonRpcMessage> {
        let start = Instant::now();
        if msg.is_notification() {
            self.handle_call(cp, &msg).await;
            debug!(
                conn = %self.remote,
                method = %msg.method,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Served notification"
            );
            None
        } else if msg.is_call() {
            let resp = self.handle_call(cp, &msg).await;
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            match &resp.error {
                Some(err) => warn!(
                    conn = %self.remote,
                    method = %msg.method,
                    reqid = %msg.id_for_log(),
                    duration_ms,
                    err = %err.message,
                    errdata = ?err.data,
                    "Served call failed"
                ),
                None => debug!(
                    conn = %self.remote,
                    method = %msg.method,
                    reqid = %msg.id_for_log(),
                    duration_ms,
                    "Served call"
                ),
            }
            Some(resp)
        } else if msg.has_valid_id() {
            Some(msg.error_response(&RpcError::invalid_request()))
        } else {
            Some(error_message(&RpcError::invalid_request()))
        }
    }

    async fn handle_call(&self, cp: &mut CallProc, msg: &JsonRpcMessage) -> JsonRpcMessage {
        if msg.is_subscribe() {
            return self.handle_subscribe(cp, msg).await;
        }
        let callback = if msg.is_unsubscribe() {
            Some(self.unsubscribe_cb.clone())
        } else {
            self.registry.callback(&msg.method)
        };
        let Some(callback) = callback else {
            return msg.error_response(&RpcError::MethodNotFound(msg.method.clone()));
        };
        let args = match callback.parse_args(msg.params.as_deref()) {
            Ok(args) => args,
            Err(err) => return msg.error_response(&err),
        };

        let start = Instant::now();
        let ctx = CallContext::new(cp.ctx.clone(), self.peer.clone());
        let answer = self.run_method(ctx, msg, &callback, args).await;
        if !msg.is_unsubscribe() {
            self.metrics
                .record_request(&msg.method, answer.error.is_none(), start.elapsed());
        }
        answer
    }

    async fn handle_subscribe(&self, cp: &mut CallProc, msg: &JsonRpcMessage) -> JsonRpcMessage {
        if !self.allow_subscribe {
            return msg.error_response(&RpcError::NotificationsUnsupported);
        }
        let (name, rest) = match parse_subscription_name(msg.params.as_deref()) {
            Ok(parsed) => parsed,
            Err(err) => return msg.error_response(&err),
        };
        let namespace = msg.namespace();
        let Some(callback) = self.registry.subscription(namespace, &name) else {
            return msg.error_response(&RpcError::SubscriptionNotFound {
                namespace: namespace.to_string(),
                subscription: name,
            });
        };
        let args = match callback.decode_args(&rest) {
            Ok(args) => args,
            Err(err) => return msg.error_response(&err),
        };

        let notifier = Notifier::new(self.conn.clone(), namespace, self.id_gen.clone());
        cp.notifiers.push(notifier.clone());
        let ctx = CallContext::new(cp.ctx.clone(), self.peer.clone()).with_notifier(notifier);
        self.run_method(ctx, msg, &callback, args).await
    }

    async fn run_method(
        &self,
        ctx: CallContext,
        msg: &JsonRpcMessage,
        callback: &Callback,
        args: Args,
    ) -> JsonRpcMessage {
        match callback.call(ctx, &msg.method, args).await {
            Ok(result) => msg.response(result),
            Err(err) => msg.error_response(&err),
        }
    }

    fn add_subscriptions(&self, notifiers: &[Notifier]) {
        let mut subs = self.server_subs.lock();
        for notifier in notifiers {
            if let Some((id, active)) = notifier.take_subscription() {
                subs.insert(id, active);
            }
        }
    }

    fn cancel_server_subscriptions(&self, reason: &CloseReason) {
        let subs: Vec<_> = self.server_subs.lock().drain().collect();
        for (id, active) in subs {
            trace!(conn = %self.remote, sub = %id, namespace = %active.namespace, "Closing subscription");
            active.close(Some(reason));
        }
    }
}
