//! Unix-domain socket endpoints.

use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::{debug, info};

use crate::codec::JsonCodec;
use crate::server::Server;
use crate::types::PeerInfo;

/// Bind a listening socket at `path`: parent directories are created, a stale
/// socket file is removed, and the socket is made accessible to its owner only.
pub fn ipc_listen(path: impl AsRef<Path>) -> io::Result<UnixListener> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::DirBuilder::new().recursive(true).mode(0o751).create(parent)?;
        }
    }
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale IPC socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let listener = UnixListener::bind(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    info!(path = %path.display(), "IPC endpoint opened");
    Ok(listener)
}

impl Server {
    /// Accept connections on `listener` and serve each on its own task until the server stops.
    pub async fn serve_listener(self: &Arc<Self>, listener: UnixListener) -> io::Result<()> {
        let shutdown = self.shutdown_token();
        let endpoint = listener
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_default();
        loop {
            let (stream, _) = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            debug!(endpoint = %endpoint, "Accepted IPC connection");
            let server = Arc::clone(self);
            let codec = JsonCodec::new(stream, PeerInfo::new("ipc", endpoint.clone()));
            tokio::spawn(async move { server.serve_codec(Arc::new(codec)).await });
        }
    }
}
