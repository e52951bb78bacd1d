//! X11 implementation of [`SelectionDisplay`] on top of x11rb.
//!
//! The connection's socket is registered with tokio so the sync loop can
//! wait for X events alongside the network socket.

use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use async_trait::async_trait;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    self, AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, CreateWindowAux, EventMask,
    PropMode, Property, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::{
    Atom, Atoms, ClipboardError, OwnershipChange, PropertyChange, PropertyState, PropertyValue,
    Result, SelectionDisplay, SelectionNotify, SelectionRequest, Timestamp, WindowId, XEvent,
    NONE,
};

// Atoms that have to be interned; the rest are predefined.
x11rb::atom_manager! {
    InternedAtoms: InternedAtomsCookie {
        CLIPBOARD,
        TARGETS,
        UTF8_STRING,
        TIMESTAMP,
        INCR,
        TUNCLIP_SELECTION,
    }
}

impl From<ConnectError> for ClipboardError {
    fn from(e: ConnectError) -> Self {
        ClipboardError::DisplayUnavailable(e.to_string())
    }
}

impl From<ConnectionError> for ClipboardError {
    fn from(e: ConnectionError) -> Self {
        ClipboardError::Platform(e.to_string())
    }
}

impl From<ReplyError> for ClipboardError {
    fn from(e: ReplyError) -> Self {
        ClipboardError::Platform(e.to_string())
    }
}

impl From<ReplyOrIdError> for ClipboardError {
    fn from(e: ReplyOrIdError) -> Self {
        ClipboardError::Platform(e.to_string())
    }
}

/// Register a duplicate of `fd` with the tokio reactor for readability.
///
/// The duplicate shares the open socket, so readiness follows it, and it is
/// owned: dropping the `AsyncFd` closes only the duplicate.
fn register_readable(fd: BorrowedFd<'_>) -> std::io::Result<AsyncFd<OwnedFd>> {
    AsyncFd::with_interest(fd.try_clone_to_owned()?, Interest::READABLE)
}

/// A live X connection with our ownership window.
pub struct X11Display {
    fd: AsyncFd<OwnedFd>,
    conn: RustConnection,
    window: WindowId,
    atoms: Atoms,
    max_property_bytes: usize,
    /// Events read off the socket while checking readiness
    pending: VecDeque<Event>,
}

/// Fail early when there is no display to connect to.
pub fn validate_display_available() -> Result<()> {
    match std::env::var_os("DISPLAY") {
        Some(display) if !display.is_empty() => Ok(()),
        _ => Err(ClipboardError::DisplayUnavailable(
            "DISPLAY is not set".to_string(),
        )),
    }
}

/// Create the 1x1 unmapped window that owns our selections.
pub fn create_ownership_window(conn: &RustConnection, screen_num: usize) -> Result<WindowId> {
    let screen = conn.setup().roots.get(screen_num).ok_or_else(|| {
        ClipboardError::DisplayUnavailable(format!("screen {} does not exist", screen_num))
    })?;
    let window = conn.generate_id()?;
    conn.create_window(
        x11rb::COPY_DEPTH_FROM_PARENT,
        window,
        screen.root,
        0,
        0,
        1,
        1,
        0,
        WindowClass::INPUT_OUTPUT,
        x11rb::COPY_FROM_PARENT,
        &CreateWindowAux::new().event_mask(EventMask::PROPERTY_CHANGE),
    )?;
    Ok(window)
}

/// Ask XFixes to report every owner change of `selections`.
pub fn register_for_ownership_notifications(
    conn: &RustConnection,
    window: WindowId,
    selections: &[Atom],
) -> Result<()> {
    let version = conn.xfixes_query_version(5, 0)?.reply()?;
    debug!(
        "XFixes version {}.{}",
        version.major_version, version.minor_version
    );
    for &selection in selections {
        conn.xfixes_select_selection_input(
            window,
            selection,
            xfixes::SelectionEventMask::SET_SELECTION_OWNER,
        )?;
    }
    Ok(())
}

fn intern_atoms(conn: &RustConnection) -> Result<Atoms> {
    let interned = InternedAtoms::new(conn)?.reply()?;
    Ok(Atoms {
        clipboard: interned.CLIPBOARD,
        primary: AtomEnum::PRIMARY.into(),
        targets: interned.TARGETS,
        utf8_string: interned.UTF8_STRING,
        string: AtomEnum::STRING.into(),
        timestamp: interned.TIMESTAMP,
        incr: interned.INCR,
        atom: AtomEnum::ATOM.into(),
        integer: AtomEnum::INTEGER.into(),
        transfer_property: interned.TUNCLIP_SELECTION,
    })
}

impl X11Display {
    /// Connect to `$DISPLAY` and watch `selections` for owner changes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(selections: &[super::ClipboardSelection]) -> Result<Self> {
        validate_display_available()?;
        let (conn, screen_num) = x11rb::connect(None)?;

        let atoms = intern_atoms(&conn)?;
        let window = create_ownership_window(&conn, screen_num)?;
        let watched: Vec<Atom> = selections.iter().map(|s| s.atom(&atoms)).collect();
        register_for_ownership_notifications(&conn, window, &watched)?;
        conn.flush()?;

        let max_property_bytes = conn.setup().maximum_request_length as usize * 4;
        let fd = register_readable(conn.stream().as_fd())?;

        info!(
            "Connected to X display, window {:#x}, max request {} bytes",
            window, max_property_bytes
        );
        Ok(Self {
            fd,
            conn,
            window,
            atoms,
            max_property_bytes,
            pending: VecDeque::new(),
        })
    }
}

/// Decode the events the sync engine acts on.
pub fn translate_event(event: Event) -> XEvent {
    match event {
        Event::SelectionRequest(e) => XEvent::SelectionRequest(SelectionRequest {
            time: e.time,
            owner: e.owner,
            requestor: e.requestor,
            selection: e.selection,
            target: e.target,
            property: e.property,
        }),
        Event::SelectionNotify(e) => XEvent::SelectionNotify(SelectionNotify {
            time: e.time,
            requestor: e.requestor,
            selection: e.selection,
            target: e.target,
            property: e.property,
        }),
        Event::XfixesSelectionNotify(e) => XEvent::OwnershipChanged(OwnershipChange {
            selection: e.selection,
            owner: e.owner,
            timestamp: e.timestamp,
            selection_timestamp: e.selection_timestamp,
        }),
        Event::PropertyNotify(e) => XEvent::PropertyChanged(PropertyChange {
            window: e.window,
            atom: e.atom,
            time: e.time,
            state: if e.state == Property::DELETE {
                PropertyState::Deleted
            } else {
                PropertyState::NewValue
            },
        }),
        Event::DestroyNotify(e) => XEvent::PeerDestroyed(e.window),
        Event::Error(e) => {
            debug!("X11 error event: {:?}", e);
            XEvent::Other
        }
        _ => XEvent::Other,
    }
}

#[async_trait]
impl SelectionDisplay for X11Display {
    fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    fn window(&self) -> WindowId {
        self.window
    }

    fn max_property_bytes(&self) -> usize {
        self.max_property_bytes
    }

    fn selection_owner(&mut self, selection: Atom) -> Result<WindowId> {
        Ok(self.conn.get_selection_owner(selection)?.reply()?.owner)
    }

    fn set_selection_owner(&mut self, selection: Atom, time: Timestamp) -> Result<()> {
        self.conn.set_selection_owner(self.window, selection, time)?;
        Ok(())
    }

    fn convert_selection(
        &mut self,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<()> {
        self.conn
            .convert_selection(self.window, selection, target, property, time)?;
        Ok(())
    }

    fn read_property(
        &mut self,
        window: WindowId,
        property: Atom,
    ) -> Result<Option<PropertyValue>> {
        let reply = self
            .conn
            .get_property(false, window, property, AtomEnum::ANY, 0, u32::MAX / 4)?
            .reply()?;
        if reply.type_ == NONE {
            return Ok(None);
        }
        let data = if reply.format == 32 {
            reply
                .value32()
                .into_iter()
                .flatten()
                .flat_map(u32::to_ne_bytes)
                .collect()
        } else {
            reply.value
        };
        Ok(Some(PropertyValue {
            type_: reply.type_,
            format: reply.format,
            data,
        }))
    }

    fn write_property8(
        &mut self,
        window: WindowId,
        property: Atom,
        type_: Atom,
        data: &[u8],
    ) -> Result<()> {
        self.conn
            .change_property8(PropMode::REPLACE, window, property, type_, data)?;
        Ok(())
    }

    fn write_property32(
        &mut self,
        window: WindowId,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<()> {
        self.conn
            .change_property32(PropMode::REPLACE, window, property, type_, data)?;
        Ok(())
    }

    fn delete_property(&mut self, window: WindowId, property: Atom) -> Result<()> {
        self.conn.delete_property(window, property)?;
        Ok(())
    }

    fn subscribe_transfer_events(&mut self, window: WindowId) -> Result<()> {
        let aux = ChangeWindowAttributesAux::new()
            .event_mask(EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY);
        self.conn.change_window_attributes(window, &aux)?;
        Ok(())
    }

    fn unsubscribe_transfer_events(&mut self, window: WindowId) -> Result<()> {
        // Fails with BadWindow if the requestor is gone; that error comes
        // back as an event and is ignored.
        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::NO_EVENT);
        self.conn.change_window_attributes(window, &aux)?;
        Ok(())
    }

    fn send_selection_notify(&mut self, notify: &SelectionNotify) -> Result<()> {
        let event = xproto::SelectionNotifyEvent {
            response_type: xproto::SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: notify.time,
            requestor: notify.requestor,
            selection: notify.selection,
            target: notify.target,
            property: notify.property,
        };
        self.conn
            .send_event(false, notify.requestor, EventMask::NO_EVENT, event)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<XEvent>> {
        let event = match self.pending.pop_front() {
            Some(event) => event,
            None => match self.conn.poll_for_event()? {
                Some(event) => event,
                None => return Ok(None),
            },
        };
        Ok(Some(translate_event(event)))
    }

    async fn readable(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            return Ok(());
        }
        loop {
            // x11rb may already hold events read while waiting for replies.
            if let Some(event) = self.conn.poll_for_event()? {
                self.pending.push_back(event);
                return Ok(());
            }
            let mut guard = self.fd.readable().await?;
            guard.clear_ready();
        }
    }
}

impl Drop for X11Display {
    fn drop(&mut self) {
        let _ = self.conn.destroy_window(self.window);
        let _ = self.conn.flush();
    }
}
