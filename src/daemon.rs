//! Server side of the connection lifecycle
//!
//! The server owns the socket file: it refuses to start while another
//! server is listening on it, replaces a stale one, and removes it again
//! on exit. Exactly one peer is accepted per run.

use std::fs::{self, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clipboard::SelectionDisplay;
use crate::sync::engine::shutdown_requested;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::transport::{self, TransportError};

/// Make sure `path` is free for a new listener.
///
/// A socket nobody accepts on is left over from a crashed server and is
/// removed. A socket that accepts belongs to a running server.
pub fn check_socket_state(path: &Path) -> transport::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !metadata.file_type().is_socket() {
        return Err(TransportError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )));
    }

    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => Err(TransportError::SocketInUse {
            path: path.display().to_string(),
        }),
        Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
            info!("Removing stale socket {}", path.display());
            fs::remove_file(path)?;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Removes the socket file when dropped.
#[derive(Debug)]
pub struct SocketFileGuard {
    path: PathBuf,
}

impl SocketFileGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketFileGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed socket {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove socket {}: {}", self.path.display(), e),
        }
    }
}

/// Bind the server socket, readable and writable by the owner only.
pub fn bind_listener(path: &Path) -> transport::Result<(UnixListener, SocketFileGuard)> {
    check_socket_state(path)?;
    let listener = UnixListener::bind(path)?;
    let guard = SocketFileGuard {
        path: path.to_path_buf(),
    };
    fs::set_permissions(path, Permissions::from_mode(0o600))?;
    Ok((listener, guard))
}

/// The lines printed to stderr once the server listens.
pub fn startup_message(path: &Path) -> String {
    format!(
        "Listening on {path}\nExample SSH forward: ssh -R REMOTE_SOCKET_PATH:{path} user@host",
        path = path.display()
    )
}

/// Accept one peer on `socket_path` and synchronize with it.
pub async fn run_server<D>(
    engine: &mut SyncEngine<D>,
    socket_path: &Path,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SyncOutcome>
where
    D: SelectionDisplay,
{
    let (listener, _socket_file) = bind_listener(socket_path)
        .with_context(|| format!("Failed to listen on {}", socket_path.display()))?;
    eprintln!("{}", startup_message(socket_path));

    let stream = tokio::select! {
        accepted = listener.accept() => {
            accepted
                .with_context(|| format!("Failed to accept on {}", socket_path.display()))?
                .0
        }
        _ = shutdown_requested(&mut shutdown) => {
            info!("Shutdown requested before a client connected");
            return Ok(SyncOutcome::Shutdown);
        }
    };
    // One peer per run: later connection attempts are refused.
    drop(listener);
    info!("Client connected");

    let outcome = engine.run(stream, shutdown).await?;
    Ok(outcome)
}

/// Setup signal handlers for graceful shutdown
pub fn setup_signal_handlers(shutdown_tx: watch::Sender<bool>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        }
        let _ = shutdown_tx.send(true);
    });

    Ok(())
}
