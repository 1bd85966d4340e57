//! Commonly used client types.
//!
//! ```rust
//! use ethrpc_client::prelude::*;
//! ```

pub use crate::client::{BatchElem, Client};
pub use crate::config::ClientConfig;
pub use crate::error::{ClientError, ClientResult};
pub use crate::subscription::ClientSubscription;

pub use ethrpc_json_rpc::{JsonRpcErrorObject, SubscriptionId};

pub use std::time::Duration;
