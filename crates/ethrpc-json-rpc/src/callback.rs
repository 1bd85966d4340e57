//! Method descriptors.
//!
//! A [`Callback`] is built once at registration time from a typed async
//! function. It owns a decoder for the positional parameters and an invoker
//! that runs the function and encodes its result, so dispatch never has to
//! know the concrete types involved.

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde::Serialize;
use serde_json::value::{RawValue, to_raw_value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::WaitForCancellationFuture;
use tracing::error;

use crate::error::{JsonRpcErrorObject, RpcError, ToJsonRpcError, error_codes};
use crate::notifier::{Notifier, Subscription};
use crate::params::{FromParams, split_positional};
use crate::types::PeerInfo;

/// Context handed to every method invocation.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    peer: Arc<PeerInfo>,
    notifier: Option<Notifier>,
}

impl CallContext {
    pub fn new(token: CancellationToken, peer: Arc<PeerInfo>) -> Self {
        Self {
            token,
            peer,
            notifier: None,
        }
    }

    /// A context that is never cancelled, for invoking callbacks outside a connection
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), Arc::new(PeerInfo::default()))
    }

    pub(crate) fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// True once the connection closed or the call was abandoned
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn peer_info(&self) -> &PeerInfo {
        &self.peer
    }

    /// The notifier of a subscription call; `None` for ordinary calls
    pub fn notifier(&self) -> Option<&Notifier> {
        self.notifier.as_ref()
    }
}

/// Type-erased decoded parameters
pub type Args = Box<dyn Any + Send>;

pub type CallResult = Result<Box<RawValue>, JsonRpcErrorObject>;

type Decoder = dyn Fn(&[Box<RawValue>]) -> Result<Args, RpcError> + Send + Sync;
type Invoker = dyn Fn(CallContext, Args) -> BoxFuture<'static, CallResult> + Send + Sync;

/// Return shape of a registered function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// Returns a value and cannot fail
    Value,
    /// Returns `Result<value, error>`
    ValueOrError,
    /// Returns `Result<Subscription, error>`
    Subscription,
}

#[derive(Clone)]
pub struct Callback {
    decode: Arc<Decoder>,
    invoke: Arc<Invoker>,
    arity: usize,
    has_ctx: bool,
    kind: ReturnKind,
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("arity", &self.arity)
            .field("has_ctx", &self.has_ctx)
            .field("kind", &self.kind)
            .finish()
    }
}

fn encode<R: Serialize>(value: &R) -> CallResult {
    to_raw_value(value).map_err(|e| {
        RpcError::InternalServer {
            code: error_codes::INTERNAL_ERROR,
            message: e.to_string(),
        }
        .to_error_object()
    })
}

fn decoder<P: FromParams>() -> Arc<Decoder> {
    Arc::new(|args: &[Box<RawValue>]| P::from_params(args).map(|p| Box::new(p) as Args))
}

fn mismatch() -> BoxFuture<'static, CallResult> {
    future::ready(Err(RpcError::InternalServer {
        code: error_codes::INTERNAL_ERROR,
        message: "argument type mismatch".to_string(),
    }
    .to_error_object()))
    .boxed()
}

impl Callback {
    fn build<P, F, Fut>(
        f: F,
        kind: ReturnKind,
        has_ctx: bool,
        finish: fn(Fut::Output) -> CallResult,
    ) -> Self
    where
        P: FromParams,
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
    {
        let invoke = move |ctx: CallContext, args: Args| -> BoxFuture<'static, CallResult> {
            match args.downcast::<P>() {
                Ok(params) => f(ctx, *params).map(finish).boxed(),
                Err(_) => mismatch(),
            }
        };
        Self {
            decode: decoder::<P>(),
            invoke: Arc::new(invoke),
            arity: P::ARITY,
            has_ctx,
            kind,
        }
    }

    /// A method returning `Result<R, E>`
    pub fn method<P, R, E, F, Fut>(f: F) -> Self
    where
        P: FromParams,
        R: Serialize + 'static,
        E: ToJsonRpcError + 'static,
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Self::build(f, ReturnKind::ValueOrError, true, |out| match out {
            Ok(value) => encode(&value),
            Err(err) => Err(err.to_error_object()),
        })
    }

    /// A method that cannot fail
    pub fn infallible<P, R, F, Fut>(f: F) -> Self
    where
        P: FromParams,
        R: Serialize + 'static,
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::build(f, ReturnKind::Value, true, |value| encode(&value))
    }

    /// A method that doesn't look at its call context
    pub fn function<P, R, E, F, Fut>(f: F) -> Self
    where
        P: FromParams,
        R: Serialize + 'static,
        E: ToJsonRpcError + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let mut cb = Self::method(move |_ctx: CallContext, params: P| f(params));
        cb.has_ctx = false;
        cb
    }

    /// A subscription method; it must create its subscription through the context's notifier.
    pub fn subscription<P, E, F, Fut>(f: F) -> Self
    where
        P: FromParams,
        E: ToJsonRpcError + 'static,
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Subscription, E>> + Send + 'static,
    {
        Self::build(f, ReturnKind::Subscription, true, |out| match out {
            Ok(sub) => encode(&sub),
            Err(err) => Err(err.to_error_object()),
        })
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn has_ctx(&self) -> bool {
        self.has_ctx
    }

    pub fn kind(&self) -> ReturnKind {
        self.kind
    }

    pub fn is_subscription(&self) -> bool {
        self.kind == ReturnKind::Subscription
    }

    /// Whether a failure return exists
    pub fn can_fail(&self) -> bool {
        self.kind != ReturnKind::Value
    }

    pub fn decode_args(&self, args: &[Box<RawValue>]) -> Result<Args, RpcError> {
        (self.decode)(args)
    }

    /// Decode a message's `params` for this callback
    pub fn parse_args(&self, params: Option<&RawValue>) -> Result<Args, RpcError> {
        self.decode_args(&split_positional(params)?)
    }

    /// Invoke the function. A panic inside it becomes a "method handler crashed" error.
    pub async fn call(&self, ctx: CallContext, method: &str, args: Args) -> CallResult {
        let invoke = Arc::clone(&self.invoke);
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(move || invoke(ctx, args))) {
            Ok(fut) => fut,
            Err(panic) => return Err(crashed(method, panic)),
        };
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(crashed(method, panic)),
        }
    }
}

fn crashed(method: &str, panic: Box<dyn Any + Send>) -> JsonRpcErrorObject {
    let reason = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    error!(method = %method, panic = %reason, "RPC method crashed");
    RpcError::method_crashed().to_error_object()
}
