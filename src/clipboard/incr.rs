//! Outbound INCR transfers
//!
//! When content is too large for one property write, the owner announces
//! an INCR transfer by writing a property of type `INCR` holding the total
//! size. The requestor deletes the property to ask for each chunk; the
//! owner answers with the next chunk and finally with a zero-length one.
//! The transfer ends when the requestor deletes that last, empty chunk.
//!
//! ```text
//! owner                       requestor
//!   INCR(total)          ->
//!                        <-   delete
//!   chunk 1              ->
//!                        <-   delete
//!   ...
//!   ""                   ->
//!                        <-   delete    (entry removed)
//! ```

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Atom, PropertyChange, PropertyState, Result, SelectionDisplay, WindowId};

/// Default chunk size for INCR sends (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default age after which an unfinished INCR send is dropped
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest content written in a single property.
///
/// Keeps a 10% margin below the request size limit for request overhead.
pub fn incremental_threshold(max_property_bytes: usize) -> usize {
    max_property_bytes * 9 / 10
}

pub fn needs_incremental_transfer(len: usize, max_property_bytes: usize) -> bool {
    len > incremental_threshold(max_property_bytes)
}

/// One outbound INCR transfer.
#[derive(Debug, Clone)]
pub struct IncrSendState {
    pub requestor: WindowId,
    pub property: Atom,
    /// Type the chunks are written with
    pub target: Atom,
    pub selection: Atom,
    pub content: Arc<[u8]>,
    /// Bytes already written; never exceeds `content.len()`
    pub offset: usize,
    pub start_time: Instant,
    /// The zero-length terminator has been written
    pub completion_sent: bool,
}

impl IncrSendState {
    /// Range of the next chunk to write, advancing the offset.
    ///
    /// An empty range is the terminator and marks the transfer complete.
    fn next_chunk(&mut self, chunk_size: usize) -> Range<usize> {
        let start = self.offset;
        let end = (start + chunk_size).min(self.content.len());
        self.offset = end;
        if start == end {
            self.completion_sent = true;
        }
        start..end
    }
}

/// Active INCR sends keyed by (requestor, property).
#[derive(Debug)]
pub struct IncrSendTable {
    transfers: HashMap<(WindowId, Atom), IncrSendState>,
    chunk_size: usize,
    timeout: Duration,
}

impl Default for IncrSendTable {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_SEND_TIMEOUT)
    }
}

impl IncrSendTable {
    pub fn new(chunk_size: usize, timeout: Duration) -> Self {
        Self {
            transfers: HashMap::new(),
            chunk_size: chunk_size.max(1),
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn get(&self, requestor: WindowId, property: Atom) -> Option<&IncrSendState> {
        self.transfers.get(&(requestor, property))
    }

    /// Announce an INCR transfer of `content` to `requestor`.
    ///
    /// The caller still has to send the SelectionNotify.
    pub fn start<D>(
        &mut self,
        display: &mut D,
        requestor: WindowId,
        property: Atom,
        target: Atom,
        selection: Atom,
        content: Arc<[u8]>,
    ) -> Result<()>
    where
        D: SelectionDisplay + ?Sized,
    {
        let incr = display.atoms().incr;
        display.subscribe_transfer_events(requestor)?;
        let total = u32::try_from(content.len()).unwrap_or(u32::MAX);
        display.write_property32(requestor, property, incr, &[total])?;

        debug!(
            "INCR send to window {:#x}: {} bytes in chunks of {}",
            requestor,
            content.len(),
            self.chunk_size
        );
        self.transfers.insert(
            (requestor, property),
            IncrSendState {
                requestor,
                property,
                target,
                selection,
                content,
                offset: 0,
                start_time: Instant::now(),
                completion_sent: false,
            },
        );
        Ok(())
    }

    /// Advance the transfer a property deletion belongs to.
    ///
    /// Returns `false` if the event is not part of any tracked transfer.
    pub fn handle_property_change<D>(
        &mut self,
        display: &mut D,
        change: &PropertyChange,
    ) -> Result<bool>
    where
        D: SelectionDisplay + ?Sized,
    {
        if change.state != PropertyState::Deleted {
            return Ok(false);
        }
        let key = (change.window, change.atom);
        let chunk_size = self.chunk_size;
        let Some(state) = self.transfers.get_mut(&key) else {
            return Ok(false);
        };

        if state.completion_sent {
            debug!("INCR send to window {:#x} acknowledged", change.window);
            self.remove(display, change.window, change.atom)?;
            display.flush()?;
            return Ok(true);
        }

        let range = state.next_chunk(chunk_size);
        let content = Arc::clone(&state.content);
        let (requestor, property, target) = (state.requestor, state.property, state.target);
        display.write_property8(requestor, property, target, &content[range])?;
        display.flush()?;
        Ok(true)
    }

    /// Drop one transfer, unsubscribing from the requestor once it has no
    /// other transfers. Removing an unknown key does nothing.
    pub fn remove<D>(&mut self, display: &mut D, requestor: WindowId, property: Atom) -> Result<bool>
    where
        D: SelectionDisplay + ?Sized,
    {
        if self.transfers.remove(&(requestor, property)).is_none() {
            return Ok(false);
        }
        if !self.transfers.keys().any(|(window, _)| *window == requestor) {
            display.unsubscribe_transfer_events(requestor)?;
        }
        Ok(true)
    }

    /// Drop every transfer matching `predicate`.
    fn remove_where<D, F>(&mut self, display: &mut D, mut predicate: F) -> Result<Vec<IncrSendState>>
    where
        D: SelectionDisplay + ?Sized,
        F: FnMut(&IncrSendState) -> bool,
    {
        let matching: Vec<IncrSendState> = self
            .transfers
            .values()
            .filter(|state| predicate(state))
            .cloned()
            .collect();
        for state in &matching {
            self.remove(display, state.requestor, state.property)?;
        }
        Ok(matching)
    }

    /// The requestor window was destroyed.
    pub fn remove_requestor<D>(&mut self, display: &mut D, window: WindowId) -> Result<usize>
    where
        D: SelectionDisplay + ?Sized,
    {
        let removed = self.remove_where(display, |state| state.requestor == window)?;
        if !removed.is_empty() {
            debug!(
                "Requestor {:#x} destroyed, dropped {} INCR send(s)",
                window,
                removed.len()
            );
        }
        Ok(removed.len())
    }

    /// We no longer own `selection`; its content may be stale.
    pub fn remove_selection<D>(&mut self, display: &mut D, selection: Atom) -> Result<usize>
    where
        D: SelectionDisplay + ?Sized,
    {
        let removed = self.remove_where(display, |state| state.selection == selection)?;
        Ok(removed.len())
    }

    /// Drop transfers older than the send timeout.
    pub fn sweep_stale<D>(&mut self, display: &mut D, now: Instant) -> Result<usize>
    where
        D: SelectionDisplay + ?Sized,
    {
        let timeout = self.timeout;
        let removed = self.remove_where(display, |state| {
            now.saturating_duration_since(state.start_time) > timeout
        })?;
        for state in &removed {
            warn!(
                "Abandoning INCR send to window {:#x} after {:?} ({} of {} bytes sent)",
                state.requestor,
                timeout,
                state.offset,
                state.content.len()
            );
        }
        Ok(removed.len())
    }
}
