//! Protocol constants shared by every transport.

use std::time::Duration;

/// JSON-RPC 2.0 version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Separator between a service namespace and a method name (`eth_blockNumber`)
pub const SERVICE_METHOD_SEPARATOR: &str = "_";
pub const SUBSCRIBE_METHOD_SUFFIX: &str = "_subscribe";
pub const UNSUBSCRIBE_METHOD_SUFFIX: &str = "_unsubscribe";
pub const NOTIFICATION_METHOD_SUFFIX: &str = "_subscription";

/// Name and version of the self-registered metadata service
pub const METADATA_API: &str = "rpc";
pub const SERVICE_VERSION: &str = "1.0";

/// Deadline applied to writes that carry no explicit deadline
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub const WS_PING_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const WS_PONG_TIMEOUT: Duration = Duration::from_secs(30);
pub const WS_MESSAGE_SIZE_LIMIT: usize = 15 * 1024 * 1024;
pub const WS_READ_BUFFER_SIZE: usize = 1024;
pub const WS_WRITE_BUFFER_SIZE: usize = 1024;

/// Maximum number of undelivered notifications a client subscription may hold
pub const MAX_CLIENT_SUBSCRIPTION_BUFFER: usize = 20000;

/// Maximum accepted HTTP request body
pub const MAX_REQUEST_CONTENT_LENGTH: usize = 5 * 1024 * 1024;

pub const CONTENT_TYPE: &str = "application/json";

/// Content types accepted on HTTP requests
pub const ACCEPTED_CONTENT_TYPES: [&str; 3] = [
    CONTENT_TYPE,
    "application/json-rpc",
    "application/jsonrequest",
];
