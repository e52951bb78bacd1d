//! Clipboard synchronization between the local X server and one peer

pub mod engine;
pub mod loop_guard;
pub mod state;


pub use engine::{SyncEngine, SyncOutcome};
pub use loop_guard::{content_hash, LoopGuard};
pub use state::SessionState;
