//! Stream transport between the two tunclip peers
//!
//! The link is a single Unix stream socket carrying netstring frames
//! (see [`protocol`]). The server side accepts exactly one peer (see
//! [`crate::daemon`]); the client side connects with exponential backoff
//! (see [`reconnect`]).

use std::path::Path;

use thiserror::Error;
use tokio::net::UnixStream;

pub mod outbox;
pub mod protocol;
pub mod reconnect;

pub use outbox::Outbox;
pub use protocol::FramingError;
pub use reconnect::{ReconnectionConfig, ReconnectionManager};

/// Transport layer errors with user-friendly messages
#[derive(Debug, Error)]
pub enum TransportError {
    /// Malformed frame from the peer
    #[error("TC001: Protocol error: {0}. The peer sent a malformed message.")]
    Framing(#[from] FramingError),

    /// Connection closed at a frame boundary
    #[error("TC002: Connection closed by peer. The tunnel may have been torn down.")]
    ConnectionClosed,

    /// Connection could not be established
    #[error("TC003: Connection failed: {message}. Check that the tunnel is up and the server is running.")]
    Connection { message: String },

    /// Another server already listens on the socket path
    #[error("TC004: Socket {path} is in use by another server. Stop it or choose another --socket path.")]
    SocketInUse { path: String },

    /// IO error
    #[error("TC005: System error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error
    #[error("TC006: Operation timed out")]
    Timeout,
}

impl TransportError {
    /// Whether a client should reconnect after this error.
    ///
    /// Network-level failures are retried; protocol violations are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::ConnectionClosed
            | TransportError::Connection { .. }
            | TransportError::Timeout => true,
            TransportError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::InvalidInput
            ),
            TransportError::Framing(_) | TransportError::SocketInUse { .. } => false,
        }
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Connect to the peer's socket.
pub async fn connect(path: &Path) -> Result<UnixStream> {
    UnixStream::connect(path)
        .await
        .map_err(|e| TransportError::Connection {
            message: format!("{}: {}", path.display(), e),
        })
}
