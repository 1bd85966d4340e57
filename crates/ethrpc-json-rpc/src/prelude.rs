//! Commonly used types for implementing RPC services.

pub use crate::callback::{CallContext, Callback};
pub use crate::error::{JsonRpcErrorObject, RpcError, ToJsonRpcError};
pub use crate::notifier::{Notifier, Subscription};
pub use crate::registry::{RpcService, ServiceBuilder, ServiceRegistry};
pub use crate::server::Server;
pub use crate::types::{PeerInfo, SubscriptionId};
