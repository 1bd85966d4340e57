//! In-process connections.

use tokio::io::DuplexStream;

use super::JsonCodec;
use crate::types::PeerInfo;

const PIPE_CAPACITY: usize = 64 * 1024;

pub type InProcCodec = JsonCodec<DuplexStream>;

/// Two connected codecs backed by an in-memory pipe; whatever one side writes the other reads.
pub fn pipe() -> (InProcCodec, InProcCodec) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    (
        JsonCodec::new(a, PeerInfo::new("inproc", "inproc")),
        JsonCodec::new(b, PeerInfo::new("inproc", "inproc")),
    )
}
