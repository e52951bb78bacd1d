//! Per-process selection bookkeeping shared by the sync loop handlers.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use crate::clipboard::{Atom, IncrSendTable, Timestamp, XEvent};

#[derive(Debug, Default)]
pub struct SessionState {
    /// Selections our window currently owns
    owned: BTreeSet<Atom>,
    /// What we serve to local requestors
    content: Option<Arc<[u8]>>,
    /// Server time of our last ownership claim
    acquisition_time: Option<Timestamp>,
    /// Events put aside during nested waits, oldest first
    pub deferred: VecDeque<XEvent>,
    pub incr: IncrSendTable,
}

impl SessionState {
    pub fn new(incr: IncrSendTable) -> Self {
        Self {
            incr,
            ..Self::default()
        }
    }

    pub fn owns(&self, selection: Atom) -> bool {
        self.owned.contains(&selection)
    }

    pub fn owns_any(&self) -> bool {
        !self.owned.is_empty()
    }

    pub fn mark_owned(&mut self, selection: Atom, time: Timestamp) {
        self.owned.insert(selection);
        self.acquisition_time = Some(time);
    }

    /// Returns whether the selection had been ours.
    ///
    /// The acquisition time is kept while any selection is still owned.
    pub fn mark_lost(&mut self, selection: Atom) -> bool {
        let was_owned = self.owned.remove(&selection);
        if self.owned.is_empty() {
            self.acquisition_time = None;
        }
        was_owned
    }

    pub fn content(&self) -> Option<&Arc<[u8]>> {
        self.content.as_ref()
    }

    pub fn set_content(&mut self, content: Vec<u8>) {
        self.content = Some(Arc::from(content));
    }

    pub fn acquisition_time(&self) -> Option<Timestamp> {
        self.acquisition_time
    }
}
