//! Server-side subscriptions.
//!
//! A subscription method receives a [`Notifier`] through its [`CallContext`](crate::CallContext),
//! creates a [`Subscription`] and returns it. Notifications sent before the
//! subscription id has reached the client are buffered and flushed, in order,
//! right after the response carrying the id is written.

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::value::{RawValue, to_raw_value};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::codec::SharedCodec;
use crate::constants::NOTIFICATION_METHOD_SUFFIX;
use crate::error::{CloseReason, NotifierError};
use crate::message::{JsonRpcMessage, SubscriptionResult};
use crate::types::{IdGenerator, SubscriptionId};

/// A live subscription as seen by the method that created it.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub namespace: String,
    err: watch::Receiver<Option<CloseReason>>,
}

impl Subscription {
    /// Resolves when the subscription ends: `None` after the client unsubscribed,
    /// the close reason when the connection went away.
    pub async fn err(&self) -> Option<CloseReason> {
        let mut rx = self.err.clone();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return Some(reason);
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

impl Serialize for Subscription {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

/// Connection-side handle of a subscription; dropping it ends the subscription.
#[derive(Debug)]
pub(crate) struct ActiveSubscription {
    pub namespace: String,
    closer: watch::Sender<Option<CloseReason>>,
}

impl ActiveSubscription {
    /// End the subscription, reporting `reason` to its owner first if there is one
    pub fn close(self, reason: Option<&CloseReason>) {
        if let Some(reason) = reason {
            let _ = self.closer.send(Some(reason.clone()));
        }
    }
}

#[derive(Default)]
struct NotifierState {
    sub: Option<SubscriptionId>,
    pending: Option<ActiveSubscription>,
    call_returned: bool,
}

#[derive(Default)]
struct Delivery {
    buffer: Vec<Box<RawValue>>,
    activated: bool,
}

struct NotifierInner {
    conn: SharedCodec,
    namespace: String,
    id_gen: IdGenerator,
    state: Mutex<NotifierState>,
    delivery: AsyncMutex<Delivery>,
}

/// Per-call handle used by subscription methods to push values to the caller.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("namespace", &self.inner.namespace)
            .field("sub", &self.inner.state.lock().sub)
            .finish()
    }
}

impl Notifier {
    pub(crate) fn new(conn: SharedCodec, namespace: impl Into<String>, id_gen: IdGenerator) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                conn,
                namespace: namespace.into(),
                id_gen,
                state: Mutex::new(NotifierState::default()),
                delivery: AsyncMutex::new(Delivery::default()),
            }),
        }
    }

    /// Create the subscription for this call. Only one subscription can be
    /// created per call, and only before the method returns.
    pub fn create_subscription(&self) -> Result<Subscription, NotifierError> {
        let mut state = self.inner.state.lock();
        if state.sub.is_some() {
            return Err(NotifierError::AlreadyCreated);
        }
        if state.call_returned {
            return Err(NotifierError::CallReturned);
        }
        let id = (self.inner.id_gen)();
        let (closer, err) = watch::channel(None);
        state.sub = Some(id.clone());
        state.pending = Some(ActiveSubscription {
            namespace: self.inner.namespace.clone(),
            closer,
        });
        Ok(Subscription {
            id,
            namespace: self.inner.namespace.clone(),
            err,
        })
    }

    /// Send `data` to the subscriber, or buffer it until the subscription id has been delivered.
    pub async fn notify<T: Serialize>(&self, id: &SubscriptionId, data: &T) -> Result<(), NotifierError> {
        let payload = to_raw_value(data)?;
        {
            let state = self.inner.state.lock();
            match &state.sub {
                None => return Err(NotifierError::NoSubscription),
                Some(sub) if sub != id => {
                    return Err(NotifierError::WrongSubscription {
                        expected: sub.to_string(),
                        got: id.to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        let mut delivery = self.inner.delivery.lock().await;
        if delivery.activated {
            self.send(id, payload).await
        } else {
            delivery.buffer.push(payload);
            Ok(())
        }
    }

    /// Token cancelled when the underlying connection closes
    pub fn closed(&self) -> CancellationToken {
        self.inner.conn.closed()
    }

    /// Mark the call as returned and hand out the created subscription, if any.
    pub(crate) fn take_subscription(&self) -> Option<(SubscriptionId, ActiveSubscription)> {
        let mut state = self.inner.state.lock();
        state.call_returned = true;
        let pending = state.pending.take()?;
        let id = state.sub.clone()?;
        Some((id, pending))
    }

    /// Flush buffered notifications; later ones are sent directly.
    pub(crate) async fn activate(&self) -> Result<(), NotifierError> {
        let mut delivery = self.inner.delivery.lock().await;
        let sub = self.inner.state.lock().sub.clone();
        if let Some(id) = sub {
            let buffered = std::mem::take(&mut delivery.buffer);
            trace!(sub = %id, count = buffered.len(), "Flushing buffered notifications");
            for payload in buffered {
                self.send(&id, payload).await?;
            }
        }
        delivery.activated = true;
        Ok(())
    }

    async fn send(&self, id: &SubscriptionId, result: Box<RawValue>) -> Result<(), NotifierError> {
        let params = to_raw_value(&SubscriptionResult {
            id: id.clone(),
            result,
        })?;
        let method = format!("{}{}", self.inner.namespace, NOTIFICATION_METHOD_SUFFIX);
        let msg = JsonRpcMessage::notification(method, Some(params));
        self.inner.conn.write_json(&msg.into(), None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::inproc;
    use crate::codec::ServerCodec;
    use crate::types::random_id_generator;
    use serde_json::{Value, json};

    fn fixed_id() -> IdGenerator {
        Arc::new(|| SubscriptionId::new("0x1"))
    }

    #[tokio::test]
    async fn test_create_twice_is_an_error() {
        let (server, _client) = inproc::pipe();
        let notifier = Notifier::new(Arc::new(server), "eth", random_id_generator());
        notifier.create_subscription().unwrap();
        assert!(matches!(
            notifier.create_subscription(),
            Err(NotifierError::AlreadyCreated)
        ));
    }

    #[tokio::test]
    async fn test_create_after_return_is_an_error() {
        let (server, _client) = inproc::pipe();
        let notifier = Notifier::new(Arc::new(server), "eth", random_id_generator());
        assert!(notifier.take_subscription().is_none());
        assert!(matches!(
            notifier.create_subscription(),
            Err(NotifierError::CallReturned)
        ));
    }

    #[tokio::test]
    async fn test_notify_requires_matching_subscription() {
        let (server, _client) = inproc::pipe();
        let notifier = Notifier::new(Arc::new(server), "eth", fixed_id());
        let id = SubscriptionId::new("0x1");
        assert!(matches!(
            notifier.notify(&id, &1).await,
            Err(NotifierError::NoSubscription)
        ));
        notifier.create_subscription().unwrap();
        assert!(matches!(
            notifier.notify(&SubscriptionId::new("0x2"), &1).await,
            Err(NotifierError::WrongSubscription { .. })
        ));
    }

    #[tokio::test]
    async fn test_buffered_notifications_flush_in_order() {
        let (server, client) = inproc::pipe();
        let notifier = Notifier::new(Arc::new(server), "eth", fixed_id());
        let sub = notifier.create_subscription().unwrap();
        assert_eq!(sub.id.as_str(), "0x1");

        notifier.notify(&sub.id, &"a").await.unwrap();
        notifier.notify(&sub.id, &"b").await.unwrap();
        let (id, active) = notifier.take_subscription().unwrap();
        assert_eq!(id, sub.id);
        assert_eq!(active.namespace, "eth");

        notifier.activate().await.unwrap();
        notifier.notify(&sub.id, &"c").await.unwrap();

        for expected in ["a", "b", "c"] {
            let (msgs, batch) = client.read_batch().await.unwrap();
            assert!(!batch);
            assert_eq!(msgs[0].method, "eth_subscription");
            let params: Value = serde_json::from_str(msgs[0].params.as_ref().unwrap().get()).unwrap();
            assert_eq!(params, json!({"subscription": "0x1", "result": expected}));
        }
    }

    #[tokio::test]
    async fn test_subscription_err_reports_close_reason() {
        let (server, _client) = inproc::pipe();
        let notifier = Notifier::new(Arc::new(server), "eth", random_id_generator());
        let sub = notifier.create_subscription().unwrap();
        let (_, active) = notifier.take_subscription().unwrap();
        active.close(Some(&CloseReason::Eof));
        assert_eq!(sub.err().await, Some(CloseReason::Eof));
    }

    #[tokio::test]
    async fn test_subscription_err_on_unsubscribe_is_none() {
        let (server, _client) = inproc::pipe();
        let notifier = Notifier::new(Arc::new(server), "eth", random_id_generator());
        let sub = notifier.create_subscription().unwrap();
        let (_, active) = notifier.take_subscription().unwrap();
        active.close(None);
        assert_eq!(sub.err().await, None);
    }
}
