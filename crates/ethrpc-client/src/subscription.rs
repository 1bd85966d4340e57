//! Client-side subscriptions.
//!
//! Notifications for a subscription arrive on the connection's read loop and
//! are handed to a forwarding task, which decodes them and feeds the
//! application's channel. Undelivered values queue up in the task (at most
//! [`MAX_CLIENT_SUBSCRIPTION_BUFFER`] of them) so a slow consumer never
//! blocks the connection.

use ethrpc_json_rpc::constants::{MAX_CLIENT_SUBSCRIPTION_BUFFER, UNSUBSCRIBE_METHOD_SUFFIX};
use ethrpc_json_rpc::{CloseReason, SubscriptionId};
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::value::RawValue;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::client::ClientInner;
use crate::error::ClientError;

enum Quit {
    Unsubscribed,
    Closed(CloseReason),
}

#[derive(Clone)]
enum SubState {
    Active,
    Ended(Option<Arc<ClientError>>),
}

type Starter = Box<dyn FnOnce(SubscriptionId) + Send>;

/// State shared between a [`ClientSubscription`], its forwarding task and the
/// connection that delivers its notifications.
pub(crate) struct SubShared {
    namespace: String,
    intake: mpsc::Sender<Box<RawValue>>,
    quit: mpsc::Sender<Quit>,
    forward_done: CancellationToken,
    unsub_done: CancellationToken,
    state: watch::Sender<SubState>,
    starter: Mutex<Option<Starter>>,
}

impl SubShared {
    /// Prepare a subscription forwarding into `sink`. Nothing runs until
    /// [`SubShared::start`] is called with the id the server assigned.
    pub(crate) fn new<T>(namespace: &str, sink: mpsc::Sender<T>, client: Weak<ClientInner>) -> Arc<Self>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (intake, intake_rx) = mpsc::channel(1);
        let (quit, quit_rx) = mpsc::channel(1);
        let shared = Arc::new(Self {
            namespace: namespace.to_string(),
            intake,
            quit,
            forward_done: CancellationToken::new(),
            unsub_done: CancellationToken::new(),
            state: watch::channel(SubState::Active).0,
            starter: Mutex::new(None),
        });
        let weak = Arc::downgrade(&shared);
        let starter: Starter = Box::new(move |id| {
            if let Some(shared) = weak.upgrade() {
                tokio::spawn(run(shared, id, client, intake_rx, quit_rx, sink));
            }
        });
        *shared.starter.lock() = Some(starter);
        shared
    }

    pub(crate) fn start(&self, id: SubscriptionId) {
        if let Some(starter) = self.starter.lock().take() {
            starter(id);
        }
    }

    /// Hand a notification to the forwarding task. False once it has stopped.
    pub(crate) async fn deliver(&self, result: Box<RawValue>) -> bool {
        tokio::select! {
            sent = self.intake.send(result) => sent.is_ok(),
            _ = self.forward_done.cancelled() => false,
        }
    }

    /// Called when the connection goes away.
    pub(crate) async fn close(&self, reason: CloseReason) {
        tokio::select! {
            _ = self.quit.send(Quit::Closed(reason)) => {}
            _ = self.forward_done.cancelled() => {}
        }
    }
}

async fn run<T>(
    shared: Arc<SubShared>,
    id: SubscriptionId,
    client: Weak<ClientInner>,
    intake: mpsc::Receiver<Box<RawValue>>,
    quit: mpsc::Receiver<Quit>,
    sink: mpsc::Sender<T>,
) where
    T: DeserializeOwned + Send + 'static,
{
    let (unsubscribe, err) = forward(intake, quit, sink).await;
    shared.forward_done.cancel();

    if unsubscribe && let Some(client) = client.upgrade() {
        let method = format!("{}{}", shared.namespace, UNSUBSCRIBE_METHOD_SUFFIX);
        if let Err(e) = client.call_raw::<IgnoredAny>(&method, (&id,), None).await {
            trace!(id = %id, err = %e, "Client request unsubscribe failed");
        }
    }

    // A client shutdown ends subscriptions cleanly.
    let err = match err {
        Some(ClientError::ClientQuit) | None => None,
        Some(e) => Some(Arc::new(e)),
    };
    shared.state.send_replace(SubState::Ended(err));
    shared.unsub_done.cancel();
}

/// Returns whether the server side should be unsubscribed, and the error
/// that ended forwarding, if any.
async fn forward<T>(
    mut intake: mpsc::Receiver<Box<RawValue>>,
    mut quit: mpsc::Receiver<Quit>,
    sink: mpsc::Sender<T>,
) -> (bool, Option<ClientError>)
where
    T: DeserializeOwned,
{
    let mut buffer: VecDeque<T> = VecDeque::new();
    loop {
        tokio::select! {
            q = quit.recv() => {
                return match q {
                    Some(Quit::Unsubscribed) => (true, None),
                    Some(Quit::Closed(reason)) => (false, Some(reason.into())),
                    None => (false, None),
                };
            }
            raw = intake.recv() => {
                let Some(raw) = raw else {
                    return (false, None);
                };
                let value = match serde_json::from_str::<T>(raw.get()) {
                    Ok(value) => value,
                    Err(e) => return (true, Some(e.into())),
                };
                if buffer.len() == MAX_CLIENT_SUBSCRIPTION_BUFFER {
                    return (true, Some(ClientError::QueueOverflow));
                }
                buffer.push_back(value);
            }
            permit = sink.reserve(), if !buffer.is_empty() => {
                match permit {
                    Ok(permit) => {
                        if let Some(value) = buffer.pop_front() {
                            permit.send(value);
                        }
                    }
                    // The application dropped its receiver.
                    Err(_) => return (true, None),
                }
            }
            _ = sink.closed(), if buffer.is_empty() => return (true, None),
        }
    }
}

/// A subscription established through [`crate::Client::subscribe`].
///
/// Values are delivered on the channel given at subscription time. The
/// subscription ends when [`ClientSubscription::unsubscribe`] is called, when
/// the application drops its receiver, or when the connection fails.
pub struct ClientSubscription {
    id: SubscriptionId,
    shared: Arc<SubShared>,
}

impl ClientSubscription {
    pub(crate) fn new(id: SubscriptionId, shared: Arc<SubShared>) -> Self {
        Self { id, shared }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    /// Stop forwarding and unsubscribe on the server. Safe to call more than
    /// once; every call returns after the server-side unsubscribe finished.
    pub async fn unsubscribe(&self) {
        tokio::select! {
            sent = self.shared.quit.send(Quit::Unsubscribed) => {
                if sent.is_ok() {
                    self.shared.unsub_done.cancelled().await;
                }
            }
            _ = self.shared.unsub_done.cancelled() => {}
        }
        self.shared.unsub_done.cancelled().await;
    }

    /// Wait for the subscription to end. Resolves to the error that ended it,
    /// or `None` after an unsubscribe or a client shutdown.
    pub async fn err(&self) -> Option<Arc<ClientError>> {
        let mut state = self.shared.state.subscribe();
        loop {
            if let SubState::Ended(err) = &*state.borrow_and_update() {
                return err.clone();
            }
            if state.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Whether forwarding has stopped
    pub fn is_done(&self) -> bool {
        self.shared.forward_done.is_cancelled()
    }
}

impl std::fmt::Debug for ClientSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSubscription")
            .field("id", &self.id)
            .field("namespace", &self.shared.namespace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn raw(v: u64) -> Box<RawValue> {
        serde_json::value::to_raw_value(&v).unwrap()
    }

    fn started(sink: mpsc::Sender<u64>) -> Arc<SubShared> {
        let shared = SubShared::new("eth", sink, Weak::new());
        shared.start(SubscriptionId::new("0x1"));
        shared
    }

    #[tokio::test]
    async fn test_forwarding_preserves_order() {
        let (tx, mut rx) = mpsc::channel(1);
        let shared = started(tx);
        for i in 0..50 {
            assert!(shared.deliver(raw(i)).await);
        }
        for i in 0..50 {
            assert_eq!(rx.recv().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (tx, _rx) = mpsc::channel(1);
        let shared = started(tx);
        let sub = ClientSubscription::new(SubscriptionId::new("0x1"), shared.clone());

        sub.unsubscribe().await;
        sub.unsubscribe().await;
        assert!(sub.is_done());
        assert!(sub.err().await.is_none());
        assert!(!shared.deliver(raw(1)).await);
    }

    #[tokio::test]
    async fn test_client_quit_is_not_an_error() {
        let (tx, _rx) = mpsc::channel(1);
        let shared = started(tx);
        let sub = ClientSubscription::new(SubscriptionId::new("0x1"), shared.clone());

        shared.close(CloseReason::ClientQuit).await;
        assert!(sub.err().await.is_none());
    }

    #[tokio::test]
    async fn test_connection_loss_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let shared = started(tx);
        let sub = ClientSubscription::new(SubscriptionId::new("0x1"), shared.clone());

        shared.close(CloseReason::Eof).await;
        let err = sub.err().await.unwrap();
        assert!(matches!(*err, ClientError::ConnectionClosed(CloseReason::Eof)));
    }

    #[tokio::test]
    async fn test_decode_failure_ends_subscription() {
        let (tx, _rx) = mpsc::channel::<u64>(1);
        let shared = started(tx);
        let sub = ClientSubscription::new(SubscriptionId::new("0x1"), shared.clone());

        shared.deliver(serde_json::value::to_raw_value("not a number").unwrap()).await;
        let err = sub.err().await.unwrap();
        assert!(matches!(*err, ClientError::Json(_)));
    }

    #[tokio::test]
    async fn test_overflow() {
        // Nobody reads: everything beyond the first value queues up.
        let (tx, _rx) = mpsc::channel(1);
        let shared = started(tx);
        let sub = ClientSubscription::new(SubscriptionId::new("0x1"), shared.clone());

        let mut delivered = 0u64;
        while shared.deliver(raw(delivered)).await {
            delivered += 1;
        }
        let err = tokio::time::timeout(Duration::from_secs(5), sub.err()).await.unwrap().unwrap();
        assert!(matches!(*err, ClientError::QueueOverflow));
        assert_eq!(delivered as usize, MAX_CLIENT_SUBSCRIPTION_BUFFER + 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_ends_forwarding() {
        let (tx, rx) = mpsc::channel::<u64>(1);
        let shared = started(tx);
        let sub = ClientSubscription::new(SubscriptionId::new("0x1"), shared.clone());
        drop(rx);
        assert!(sub.err().await.is_none());
        assert!(sub.is_done());
    }
}
