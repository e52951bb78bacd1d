//! X11 selection handling
//!
//! This module speaks the ICCCM selection protocol in both directions:
//! the [`reader`] asks another client for the content of a selection
//! (including incremental transfers), the [`responder`] serves content
//! this process owns, and [`incr`] tracks outbound incremental sends.
//!
//! All of it runs against the [`SelectionDisplay`] trait, implemented for
//! a real X server in [`x11`].

use async_trait::async_trait;
use thiserror::Error;

pub mod events;
pub mod incr;
pub mod reader;
pub mod responder;
pub mod x11;

#[cfg(test)]
pub(crate) mod fake;

pub use events::{
    OwnershipChange, PropertyChange, PropertyState, SelectionNotify, SelectionRequest, XEvent,
};
pub use incr::{IncrSendState, IncrSendTable};
pub use reader::{PropertyRead, ReadLimits};

/// X11 resource id of a window.
pub type WindowId = u32;

/// X11 atom.
pub type Atom = u32;

/// X11 server timestamp in milliseconds.
pub type Timestamp = u32;

/// The `None` resource / atom.
pub const NONE: u32 = 0;

/// The `CurrentTime` timestamp.
pub const CURRENT_TIME: Timestamp = 0;

/// Atoms used by the selection protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atoms {
    pub clipboard: Atom,
    pub primary: Atom,
    pub targets: Atom,
    pub utf8_string: Atom,
    pub string: Atom,
    pub timestamp: Atom,
    pub incr: Atom,
    pub atom: Atom,
    pub integer: Atom,
    /// Property on our own window that conversions are delivered to
    pub transfer_property: Atom,
}

impl Atoms {
    /// Targets advertised in answer to a TARGETS request.
    pub fn supported_targets(&self) -> [Atom; 4] {
        [self.targets, self.utf8_string, self.string, self.timestamp]
    }

    /// Whether `target` names a text format we serve.
    pub fn is_text_target(&self, target: Atom) -> bool {
        target == self.utf8_string || target == self.string
    }
}

/// Clipboard selection type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipboardSelection {
    /// Primary selection (middle-click on Linux)
    Primary,
    /// Clipboard selection (Ctrl+C/V)
    Clipboard,
}

impl ClipboardSelection {
    /// The selections tracked for a given configuration.
    pub fn tracked(sync_primary: bool) -> Vec<ClipboardSelection> {
        if sync_primary {
            vec![ClipboardSelection::Clipboard, ClipboardSelection::Primary]
        } else {
            vec![ClipboardSelection::Clipboard]
        }
    }

    pub fn atom(self, atoms: &Atoms) -> Atom {
        match self {
            ClipboardSelection::Primary => atoms.primary,
            ClipboardSelection::Clipboard => atoms.clipboard,
        }
    }

    pub fn from_atom(atoms: &Atoms, atom: Atom) -> Option<Self> {
        if atom == atoms.clipboard {
            Some(ClipboardSelection::Clipboard)
        } else if atom == atoms.primary {
            Some(ClipboardSelection::Primary)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ClipboardSelection::Primary => "PRIMARY",
            ClipboardSelection::Clipboard => "CLIPBOARD",
        }
    }
}

/// Raw property contents.
///
/// Format 32 data is stored as native-endian `u32`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub type_: Atom,
    pub format: u8,
    pub data: Vec<u8>,
}

impl PropertyValue {
    /// First 32-bit item of a format 32 property.
    pub fn first_u32(&self) -> Option<u32> {
        if self.format != 32 {
            return None;
        }
        let bytes: [u8; 4] = self.data.get(..4)?.try_into().ok()?;
        Some(u32::from_ne_bytes(bytes))
    }
}

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform-specific error
    #[error("X11 error: {0}")]
    Platform(String),

    /// No usable X display
    #[error("Cannot open X display: {0}. Is DISPLAY set and the X server running?")]
    DisplayUnavailable(String),

    /// A bounded wait for a selection event expired
    #[error("Timed out waiting for {0}")]
    TransferTimeout(&'static str),

    /// Content too large
    #[error("Content too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: usize, max: usize },

    /// No content available
    #[error("No clipboard content available")]
    NoContent,

    /// Selection ownership could not be acquired or verified
    #[error("Failed to own {selection}: {message}")]
    Ownership {
        selection: &'static str,
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClipboardError {
    /// Whether the error ends only the current transfer.
    ///
    /// Everything else means the display connection is unusable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClipboardError::TransferTimeout(_)
                | ClipboardError::TooLarge { .. }
                | ClipboardError::NoContent
                | ClipboardError::Ownership { .. }
        )
    }
}

/// Result type for clipboard operations
pub type Result<T> = std::result::Result<T, ClipboardError>;

/// The X server operations the selection protocol needs.
///
/// Requests are buffered until [`flush`](SelectionDisplay::flush); calls
/// that need a reply flush implicitly.
#[async_trait]
pub trait SelectionDisplay: Send {
    /// Interned protocol atoms
    fn atoms(&self) -> &Atoms;

    /// Our ownership window
    fn window(&self) -> WindowId;

    /// Largest property, in bytes, that fits in a single request
    fn max_property_bytes(&self) -> usize;

    /// Current owner of `selection`, or [`NONE`]
    fn selection_owner(&mut self, selection: Atom) -> Result<WindowId>;

    /// Make our window the owner of `selection`
    fn set_selection_owner(&mut self, selection: Atom, time: Timestamp) -> Result<()>;

    /// Ask the owner of `selection` to convert it to `target` into `property` on our window
    fn convert_selection(
        &mut self,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<()>;

    /// Read a property without deleting it; `None` if it does not exist
    fn read_property(&mut self, window: WindowId, property: Atom)
        -> Result<Option<PropertyValue>>;

    /// Replace a property with 8-bit data
    fn write_property8(
        &mut self,
        window: WindowId,
        property: Atom,
        type_: Atom,
        data: &[u8],
    ) -> Result<()>;

    /// Replace a property with 32-bit data
    fn write_property32(
        &mut self,
        window: WindowId,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<()>;

    fn delete_property(&mut self, window: WindowId, property: Atom) -> Result<()>;

    /// Select property-change and destroy events on a foreign window
    fn subscribe_transfer_events(&mut self, window: WindowId) -> Result<()>;

    /// Stop selecting events on a foreign window
    fn unsubscribe_transfer_events(&mut self, window: WindowId) -> Result<()>;

    /// Send a SelectionNotify event to its requestor
    fn send_selection_notify(&mut self, notify: &SelectionNotify) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Next event that is already available, without blocking
    fn poll_event(&mut self) -> Result<Option<XEvent>>;

    /// Wait until [`poll_event`](SelectionDisplay::poll_event) has something to return.
    ///
    /// Cancel safe.
    async fn readable(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atoms() -> Atoms {
        fake::test_atoms()
    }

    #[test]
    fn test_selection_atom_mapping() {
        let atoms = atoms();
        for selection in ClipboardSelection::tracked(true) {
            assert_eq!(
                ClipboardSelection::from_atom(&atoms, selection.atom(&atoms)),
                Some(selection)
            );
        }
        assert_eq!(ClipboardSelection::from_atom(&atoms, atoms.targets), None);
        assert_eq!(
            ClipboardSelection::tracked(false),
            vec![ClipboardSelection::Clipboard]
        );
    }

    #[test]
    fn test_first_u32_requires_format_32() {
        let value = PropertyValue {
            type_: 1,
            format: 32,
            data: 70000u32.to_ne_bytes().to_vec(),
        };
        assert_eq!(value.first_u32(), Some(70000));

        let bytes = PropertyValue {
            format: 8,
            ..value.clone()
        };
        assert_eq!(bytes.first_u32(), None);

        let short = PropertyValue {
            data: vec![1, 2],
            ..value
        };
        assert_eq!(short.first_u32(), None);
    }

    #[test]
    fn test_transient_errors() {
        assert!(ClipboardError::TransferTimeout("SelectionNotify").is_transient());
        assert!(ClipboardError::NoContent.is_transient());
        assert!(!ClipboardError::Platform("connection lost".into()).is_transient());
    }
}
