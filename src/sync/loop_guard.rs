//! Duplicate and echo suppression
//!
//! Applying content from the peer makes us the selection owner, which is
//! reported back to us as an ownership change. Remembering the hashes of
//! what was last sent and received keeps such echoes off the wire.

use sha2::{Digest, Sha256};

/// SHA-256 of `content` as lowercase hex.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopGuard {
    last_sent_hash: Option<String>,
    last_received_hash: Option<String>,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// False if `hash` was the last thing sent or received.
    pub fn should_send(&self, hash: &str) -> bool {
        self.last_sent_hash.as_deref() != Some(hash)
            && self.last_received_hash.as_deref() != Some(hash)
    }

    pub fn record_sent(&mut self, hash: String) {
        self.last_sent_hash = Some(hash);
    }

    /// Must be called before the content is applied locally.
    pub fn record_received(&mut self, hash: String) {
        self.last_received_hash = Some(hash);
    }

    pub fn clear_sent_hash(&mut self) {
        self.last_sent_hash = None;
    }

    pub fn clear_received_hash(&mut self) {
        self.last_received_hash = None;
    }

    pub fn clear_all(&mut self) {
        self.clear_sent_hash();
        self.clear_received_hash();
    }

    pub fn last_sent_hash(&self) -> Option<&str> {
        self.last_sent_hash.as_deref()
    }

    pub fn last_received_hash(&self) -> Option<&str> {
        self.last_received_hash.as_deref()
    }
}
