//! Selection-related X events, decoded once at the display boundary.

use super::{Atom, Timestamp, WindowId, NONE};

/// Another client asks the selection owner for a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    pub time: Timestamp,
    pub owner: WindowId,
    pub requestor: WindowId,
    pub selection: Atom,
    pub target: Atom,
    pub property: Atom,
}

impl SelectionRequest {
    /// Property the answer goes to; obsolete clients send `None` and
    /// expect the target atom to be used instead.
    pub fn reply_property(&self) -> Atom {
        if self.property == NONE {
            self.target
        } else {
            self.property
        }
    }
}

/// Answer to a conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionNotify {
    pub time: Timestamp,
    pub requestor: WindowId,
    pub selection: Atom,
    pub target: Atom,
    /// `None` when the conversion was refused
    pub property: Atom,
}

impl SelectionNotify {
    /// Success reply: the data was stored in `property`.
    pub fn success(request: &SelectionRequest, property: Atom) -> Self {
        Self {
            time: request.time,
            requestor: request.requestor,
            selection: request.selection,
            target: request.target,
            property,
        }
    }

    pub fn refusal(request: &SelectionRequest) -> Self {
        Self::success(request, NONE)
    }

    pub fn is_refusal(&self) -> bool {
        self.property == NONE
    }
}

/// XFixes selection owner change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipChange {
    pub selection: Atom,
    /// New owner, `None` if the selection was cleared
    pub owner: WindowId,
    pub timestamp: Timestamp,
    /// Time the new owner claimed the selection with
    pub selection_timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyState {
    NewValue,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyChange {
    pub window: WindowId,
    pub atom: Atom,
    pub time: Timestamp,
    pub state: PropertyState,
}

/// The X events the sync engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XEvent {
    SelectionRequest(SelectionRequest),
    SelectionNotify(SelectionNotify),
    OwnershipChanged(OwnershipChange),
    PropertyChanged(PropertyChange),
    /// A window we selected events on was destroyed
    PeerDestroyed(WindowId),
    Other,
}

impl XEvent {
    /// Whether the event must be kept for the main loop when it shows up
    /// during a nested wait.
    ///
    /// Stray conversion replies and unrelated events are dropped.
    pub fn must_defer(&self) -> bool {
        matches!(
            self,
            XEvent::SelectionRequest(_)
                | XEvent::OwnershipChanged(_)
                | XEvent::PropertyChanged(_)
                | XEvent::PeerDestroyed(_)
        )
    }
}
