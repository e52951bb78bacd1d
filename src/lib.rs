//! # tunclip
//!
//! Keeps the X11 clipboard of two machines in sync over one stream socket,
//! usually a Unix socket forwarded through SSH.
//!
//! One side listens (server), the other connects (client). Both run the
//! same [`sync::SyncEngine`]: it serves the local CLIPBOARD and PRIMARY
//! selections with content received from the peer, and forwards content
//! that other local applications put on them.

pub mod cli;
pub mod clipboard;
pub mod config;
pub mod daemon;
pub mod sync;
pub mod transport;

pub use config::Config;

/// Result type alias for tunclip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tunclip operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Clipboard (X11) operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the client should reconnect after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_retryable(),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

impl From<transport::protocol::FramingError> for Error {
    fn from(e: transport::protocol::FramingError) -> Self {
        Error::Transport(e.into())
    }
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum clipboard payload size (10 MiB), on the wire and in
/// incremental reads.
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;
