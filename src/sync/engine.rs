//! The synchronization loop
//!
//! One future races five things: a shutdown request, the next frame from
//! the peer, the next write of queued outbound frames, pending X events
//! and the stale-transfer sweep timer. The frame read owns the socket's
//! read half and is never dropped before it completes, so a partially
//! received frame is never lost; the X wait holds no state and is
//! recreated every iteration. Outbound frames only ever leave through the
//! same race, so the peer is read while our own frame is being written.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clipboard::responder::{self, Served};
use crate::clipboard::{
    self, reader, ClipboardError, ClipboardSelection, IncrSendTable, OwnershipChange,
    ReadLimits, SelectionDisplay, SelectionRequest, XEvent, CURRENT_TIME,
};
use crate::config::SyncConfig;
use crate::sync::loop_guard::{content_hash, LoopGuard};
use crate::sync::state::SessionState;
use crate::transport::{self, protocol, Outbox};

/// Why [`SyncEngine::run`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The peer said goodbye
    PeerGoodbye,
    /// Local shutdown was requested and the goodbye sent
    Shutdown,
}

enum LoopEvent {
    Shutdown,
    Frame(transport::Result<Vec<u8>>),
    Written(transport::Result<()>),
    Display(clipboard::Result<()>),
    Sweep,
}

/// Reads one frame and hands the reader back for the next one.
async fn next_frame<R>(mut reader: R) -> (R, transport::Result<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let result = protocol::read_frame(&mut reader).await;
    (reader, result)
}

/// Resolves once shutdown has been requested; never if the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Best effort: the process is exiting either way. Frames already queued
/// go out first so the goodbye lands on a frame boundary.
async fn say_goodbye<W>(outbox: &mut Outbox, writer: &mut W, limit: Duration)
where
    W: AsyncWrite + Unpin,
{
    outbox.push_goodbye();
    match timeout(limit, outbox.drain(writer)).await {
        Ok(Ok(())) => debug!("Goodbye sent"),
        Ok(Err(e)) => debug!("Failed to send goodbye: {}", e),
        Err(_) => debug!("Timed out sending goodbye"),
    }
}

/// Bidirectional sync between the local selections and one peer.
///
/// The engine outlives individual connections: the client reuses it
/// across reconnects, keeping the X window and any owned selections.
pub struct SyncEngine<D> {
    display: D,
    state: SessionState,
    guard: LoopGuard,
    selections: Vec<ClipboardSelection>,
    limits: ReadLimits,
    outbox: Outbox,
    sweep_interval: Duration,
    goodbye_timeout: Duration,
}

impl<D: SelectionDisplay> SyncEngine<D> {
    pub fn new(display: D, config: &SyncConfig) -> Self {
        let incr = IncrSendTable::new(config.incr_chunk_size, config.incr_send_timeout());
        Self {
            display,
            state: SessionState::new(incr),
            guard: LoopGuard::new(),
            selections: ClipboardSelection::tracked(config.sync_primary),
            limits: ReadLimits {
                convert_timeout: config.convert_timeout(),
                chunk_timeout: config.chunk_timeout(),
                max_size: crate::MAX_PAYLOAD_SIZE,
            },
            outbox: Outbox::new(),
            sweep_interval: config.sweep_interval(),
            goodbye_timeout: config.goodbye_timeout(),
        }
    }

    pub fn guard(&self) -> &LoopGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut LoopGuard {
        &mut self.guard
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Synchronize over `stream` until goodbye, shutdown or failure.
    ///
    /// Framing violations and lost connections are returned as errors;
    /// failures of a single clipboard read or ownership claim are logged
    /// and skipped.
    pub async fn run<S>(
        &mut self,
        stream: S,
        mut shutdown: watch::Receiver<bool>,
    ) -> crate::Result<SyncOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut writer) = tokio::io::split(stream);
        // Frames left over from a previous connection may be half written.
        self.outbox = Outbox::new();
        let read = next_frame(BufReader::new(read_half));
        tokio::pin!(read);

        let mut sweep = interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if !self.state.deferred.is_empty() {
                self.process_events().await?;
                continue;
            }

            let event = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => LoopEvent::Shutdown,
                (reader, result) = &mut read => {
                    read.set(next_frame(reader));
                    LoopEvent::Frame(result)
                }
                written = self.outbox.drive(&mut writer), if !self.outbox.is_idle() => {
                    LoopEvent::Written(written)
                }
                ready = self.display.readable() => LoopEvent::Display(ready),
                _ = sweep.tick() => LoopEvent::Sweep,
            };

            match event {
                LoopEvent::Shutdown => {
                    info!("Shutdown requested");
                    say_goodbye(&mut self.outbox, &mut writer, self.goodbye_timeout).await;
                    return Ok(SyncOutcome::Shutdown);
                }
                LoopEvent::Frame(Ok(payload)) if protocol::is_goodbye(&payload) => {
                    info!("Peer said goodbye");
                    if self.outbox.pending_frames() > 0 {
                        debug!("Dropping {} unsent frame(s)", self.outbox.pending_frames());
                    }
                    return Ok(SyncOutcome::PeerGoodbye);
                }
                LoopEvent::Frame(Ok(payload)) => self.apply_remote_content(payload)?,
                LoopEvent::Frame(Err(e)) => return Err(e.into()),
                LoopEvent::Written(written) => written?,
                LoopEvent::Display(ready) => {
                    ready?;
                    self.process_events().await?;
                }
                LoopEvent::Sweep => self.sweep_stale_transfers()?,
            }
        }
    }

    /// Drain deferred events, then whatever the display has queued.
    async fn process_events(&mut self) -> crate::Result<()> {
        self.sweep_stale_transfers()?;
        loop {
            let event = match self.state.deferred.pop_front() {
                Some(event) => event,
                None => match self.display.poll_event()? {
                    Some(event) => event,
                    None => return Ok(()),
                },
            };
            self.dispatch(event).await?;
        }
    }

    async fn dispatch(&mut self, event: XEvent) -> crate::Result<()> {
        match event {
            XEvent::PropertyChanged(change) => {
                self.state
                    .incr
                    .handle_property_change(&mut self.display, &change)?;
            }
            XEvent::PeerDestroyed(window) => {
                self.state.incr.remove_requestor(&mut self.display, window)?;
                self.display.flush()?;
            }
            XEvent::SelectionRequest(request) => self.serve_request(&request)?,
            XEvent::OwnershipChanged(change) => {
                self.handle_ownership_change(change).await?
            }
            XEvent::SelectionNotify(_) | XEvent::Other => {}
        }
        Ok(())
    }

    fn serve_request(&mut self, request: &SelectionRequest) -> clipboard::Result<()> {
        if !self.state.owns(request.selection) {
            debug!(
                "Refusing request for selection {} we do not own",
                request.selection
            );
            return responder::refuse(&mut self.display, request);
        }
        let content = self.state.content().cloned();
        let served = Served {
            content: content.as_ref(),
            acquisition_time: self.state.acquisition_time(),
        };
        responder::handle_selection_request(&mut self.display, &mut self.state.incr, served, request)?;
        Ok(())
    }

    async fn handle_ownership_change(&mut self, change: OwnershipChange) -> crate::Result<()> {
        let atoms = *self.display.atoms();
        let Some(selection) = ClipboardSelection::from_atom(&atoms, change.selection)
            .filter(|s| self.selections.contains(s))
        else {
            return Ok(());
        };

        if change.owner == self.display.window() {
            self.state
                .mark_owned(change.selection, change.selection_timestamp);
            debug!("Now own {}", selection.name());
            return Ok(());
        }

        if self.state.mark_lost(change.selection) {
            let dropped = self
                .state
                .incr
                .remove_selection(&mut self.display, change.selection)?;
            self.display.flush()?;
            debug!(
                "Lost {} to {:#x}, dropped {} INCR send(s)",
                selection.name(),
                change.owner,
                dropped
            );
        }

        // A different owner's content is new even if its bytes match.
        self.guard.clear_all();
        self.handle_clipboard_change(selection).await
    }

    /// Read a selection another client owns and queue it for the peer.
    async fn handle_clipboard_change(&mut self, selection: ClipboardSelection) -> crate::Result<()> {
        let atom = selection.atom(self.display.atoms());
        if self.display.selection_owner(atom)? == self.display.window() {
            debug!("We own {}, skipping read", selection.name());
            return Ok(());
        }

        let content = match reader::read_selection(
            &mut self.display,
            &mut self.state.deferred,
            atom,
            &self.limits,
        )
        .await
        {
            Ok(content) => content,
            Err(ClipboardError::NoContent) => {
                debug!("{} has no text content", selection.name());
                return Ok(());
            }
            Err(e) if e.is_transient() => {
                warn!("Skipping {} change: {}", selection.name(), e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !protocol::validate_content_size(&content) {
            warn!(
                "{} content of {} bytes exceeds the 10MB limit, not sending",
                selection.name(),
                content.len()
            );
            return Ok(());
        }

        let hash = content_hash(&content);
        if !self.guard.should_send(&hash) {
            debug!("Skipping duplicate or echo of {}", selection.name());
            return Ok(());
        }

        self.outbox.push(&content);
        self.guard.record_sent(hash);
        debug!("Queued {} bytes from {}", content.len(), selection.name());
        Ok(())
    }

    /// Take ownership of the tracked selections with content from the peer.
    fn apply_remote_content(&mut self, content: Vec<u8>) -> crate::Result<()> {
        // Recorded first: claiming ownership echoes back as an owner change.
        self.guard.record_received(content_hash(&content));
        debug!("Received {} bytes from peer", content.len());
        self.state.set_content(content);

        let selections = self.selections.clone();
        for selection in selections {
            match self.claim(selection) {
                Ok(()) => {}
                Err(e) if e.is_transient() => error!("{}", e),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn claim(&mut self, selection: ClipboardSelection) -> clipboard::Result<()> {
        let atom = selection.atom(self.display.atoms());
        self.display.set_selection_owner(atom, CURRENT_TIME)?;
        self.display.flush()?;

        let owner = self.display.selection_owner(atom)?;
        if owner != self.display.window() {
            return Err(ClipboardError::Ownership {
                selection: selection.name(),
                message: format!("owner is still {:#x}", owner),
            });
        }
        Ok(())
    }

    fn sweep_stale_transfers(&mut self) -> clipboard::Result<()> {
        if self.state.incr.is_empty() {
            return Ok(());
        }
        let removed = self
            .state
            .incr
            .sweep_stale(&mut self.display, Instant::now())?;
        if removed > 0 {
            self.display.flush()?;
        }
        Ok(())
    }
}
