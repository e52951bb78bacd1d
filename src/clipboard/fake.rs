//! Scripted in-memory X server used by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{
    Atom, Atoms, OwnershipChange, PropertyChange, PropertyState, PropertyValue,
    Result, SelectionDisplay, SelectionNotify, Timestamp, WindowId, XEvent, NONE,
};

pub const OUR_WINDOW: WindowId = 0x0040_0001;
pub const FOREIGN_OWNER: WindowId = 0x0060_0001;
pub const DEFAULT_MAX_PROPERTY_BYTES: usize = 1000;

pub fn test_atoms() -> Atoms {
    Atoms {
        clipboard: 100,
        primary: 1,
        targets: 101,
        utf8_string: 102,
        string: 31,
        timestamp: 103,
        incr: 104,
        atom: 4,
        integer: 19,
        transfer_property: 105,
    }
}

/// How the foreign owner answers the next conversion request.
#[derive(Debug, Clone)]
pub enum ConversionReply {
    Direct(Vec<u8>),
    /// Chunks are delivered one per property deletion; `complete` appends
    /// the zero-length terminator.
    Incremental { chunks: Vec<Vec<u8>>, complete: bool },
    Refuse,
    Silent,
}

#[derive(Default)]
struct FakeServer {
    events: VecDeque<XEvent>,
    owners: HashMap<Atom, WindowId>,
    properties: HashMap<(WindowId, Atom), PropertyValue>,
    writes: Vec<(WindowId, Atom, PropertyValue)>,
    notifies: Vec<SelectionNotify>,
    claims: Vec<Atom>,
    subscriptions: HashSet<WindowId>,
    unsubscribes: Vec<WindowId>,
    conversions: VecDeque<ConversionReply>,
    conversions_requested: usize,
    incoming: Option<VecDeque<Vec<u8>>>,
    // Raised just ahead of each incoming chunk, one per chunk.
    chunk_interleaved: VecDeque<XEvent>,
    refuse_ownership: bool,
    flushes: usize,
}

pub struct FakeDisplay {
    atoms: Atoms,
    max_property_bytes: usize,
    server: Arc<Mutex<FakeServer>>,
    wakeup: Arc<Notify>,
}

/// Test-side view of the same fake server.
#[derive(Clone)]
pub struct FakeHandle {
    atoms: Atoms,
    server: Arc<Mutex<FakeServer>>,
    wakeup: Arc<Notify>,
}

impl FakeDisplay {
    pub fn new() -> (FakeDisplay, FakeHandle) {
        Self::with_max_property_bytes(DEFAULT_MAX_PROPERTY_BYTES)
    }

    pub fn with_max_property_bytes(max_property_bytes: usize) -> (FakeDisplay, FakeHandle) {
        let server = Arc::new(Mutex::new(FakeServer::default()));
        let wakeup = Arc::new(Notify::new());
        let atoms = test_atoms();
        let display = FakeDisplay {
            atoms,
            max_property_bytes,
            server: server.clone(),
            wakeup: wakeup.clone(),
        };
        let handle = FakeHandle {
            atoms,
            server,
            wakeup,
        };
        (display, handle)
    }

    fn server(&self) -> MutexGuard<'_, FakeServer> {
        self.server.lock().unwrap()
    }

    fn push(&self, server: &mut FakeServer, event: XEvent) {
        server.events.push_back(event);
        self.wakeup.notify_one();
    }

    fn write(&self, window: WindowId, property: Atom, value: PropertyValue) {
        let mut server = self.server();
        server.properties.insert((window, property), value.clone());
        server.writes.push((window, property, value));
    }

    fn deliver_next_chunk(&self, server: &mut FakeServer) {
        let property = self.atoms.transfer_property;
        let Some(queue) = server.incoming.as_mut() else {
            return;
        };
        let Some(chunk) = queue.pop_front() else {
            return;
        };
        if queue.is_empty() && chunk.is_empty() {
            server.incoming = None;
        }
        if let Some(event) = server.chunk_interleaved.pop_front() {
            self.push(server, event);
        }
        server.properties.insert(
            (OUR_WINDOW, property),
            PropertyValue {
                type_: self.atoms.utf8_string,
                format: 8,
                data: chunk,
            },
        );
        self.push(
            server,
            XEvent::PropertyChanged(PropertyChange {
                window: OUR_WINDOW,
                atom: property,
                time: 0,
                state: PropertyState::NewValue,
            }),
        );
    }
}

#[async_trait]
impl SelectionDisplay for FakeDisplay {
    fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    fn window(&self) -> WindowId {
        OUR_WINDOW
    }

    fn max_property_bytes(&self) -> usize {
        self.max_property_bytes
    }

    fn selection_owner(&mut self, selection: Atom) -> Result<WindowId> {
        Ok(self.server().owners.get(&selection).copied().unwrap_or(NONE))
    }

    fn set_selection_owner(&mut self, selection: Atom, time: Timestamp) -> Result<()> {
        let mut server = self.server();
        server.claims.push(selection);
        if server.refuse_ownership {
            return Ok(());
        }
        server.owners.insert(selection, OUR_WINDOW);
        self.push(
            &mut server,
            XEvent::OwnershipChanged(OwnershipChange {
                selection,
                owner: OUR_WINDOW,
                timestamp: time,
                selection_timestamp: time,
            }),
        );
        Ok(())
    }

    fn convert_selection(
        &mut self,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<()> {
        let mut server = self.server();
        server.conversions_requested += 1;
        let reply = server
            .conversions
            .pop_front()
            .unwrap_or(ConversionReply::Silent);

        let mut notify = SelectionNotify {
            time,
            requestor: OUR_WINDOW,
            selection,
            target,
            property,
        };
        match reply {
            ConversionReply::Silent => return Ok(()),
            ConversionReply::Refuse => notify.property = NONE,
            ConversionReply::Direct(data) => {
                server.properties.insert(
                    (OUR_WINDOW, property),
                    PropertyValue {
                        type_: target,
                        format: 8,
                        data,
                    },
                );
            }
            ConversionReply::Incremental { chunks, complete } => {
                let total: usize = chunks.iter().map(Vec::len).sum();
                let mut queue: VecDeque<Vec<u8>> = chunks.into();
                if complete {
                    queue.push_back(Vec::new());
                }
                server.incoming = Some(queue);
                server.properties.insert(
                    (OUR_WINDOW, property),
                    PropertyValue {
                        type_: self.atoms.incr,
                        format: 32,
                        data: (total as u32).to_ne_bytes().to_vec(),
                    },
                );
            }
        }
        self.push(&mut server, XEvent::SelectionNotify(notify));
        Ok(())
    }

    fn read_property(
        &mut self,
        window: WindowId,
        property: Atom,
    ) -> Result<Option<PropertyValue>> {
        Ok(self.server().properties.get(&(window, property)).cloned())
    }

    fn write_property8(
        &mut self,
        window: WindowId,
        property: Atom,
        type_: Atom,
        data: &[u8],
    ) -> Result<()> {
        self.write(
            window,
            property,
            PropertyValue {
                type_,
                format: 8,
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    fn write_property32(
        &mut self,
        window: WindowId,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<()> {
        self.write(
            window,
            property,
            PropertyValue {
                type_,
                format: 32,
                data: data.iter().flat_map(|v| v.to_ne_bytes()).collect(),
            },
        );
        Ok(())
    }

    fn delete_property(&mut self, window: WindowId, property: Atom) -> Result<()> {
        let mut server = self.server();
        server.properties.remove(&(window, property));
        if window == OUR_WINDOW && property == self.atoms.transfer_property {
            self.deliver_next_chunk(&mut server);
        }
        Ok(())
    }

    fn subscribe_transfer_events(&mut self, window: WindowId) -> Result<()> {
        self.server().subscriptions.insert(window);
        Ok(())
    }

    fn unsubscribe_transfer_events(&mut self, window: WindowId) -> Result<()> {
        let mut server = self.server();
        server.subscriptions.remove(&window);
        server.unsubscribes.push(window);
        Ok(())
    }

    fn send_selection_notify(&mut self, notify: &SelectionNotify) -> Result<()> {
        self.server().notifies.push(*notify);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.server().flushes += 1;
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<XEvent>> {
        Ok(self.server().events.pop_front())
    }

    async fn readable(&mut self) -> Result<()> {
        loop {
            if !self.server().events.is_empty() {
                return Ok(());
            }
            self.wakeup.notified().await;
        }
    }
}

impl FakeHandle {
    fn server(&self) -> MutexGuard<'_, FakeServer> {
        self.server.lock().unwrap()
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    pub fn push_event(&self, event: XEvent) {
        self.server().events.push_back(event);
        self.wakeup.notify_one();
    }

    pub fn push_conversion(&self, reply: ConversionReply) {
        self.server().conversions.push_back(reply);
    }

    /// Raise `event` right before the next not-yet-interleaved INCR chunk.
    pub fn push_event_before_chunk(&self, event: XEvent) {
        self.server().chunk_interleaved.push_back(event);
    }

    pub fn set_foreign_owner(&self, selection: Atom) {
        self.server().owners.insert(selection, FOREIGN_OWNER);
    }

    /// Another client copies `data` into `selection`.
    pub fn foreign_copy(&self, selection: Atom, data: &[u8]) {
        self.set_foreign_owner(selection);
        self.push_conversion(ConversionReply::Direct(data.to_vec()));
        self.push_event(XEvent::OwnershipChanged(OwnershipChange {
            selection,
            owner: FOREIGN_OWNER,
            timestamp: 500,
            selection_timestamp: 500,
        }));
    }

    /// A requestor acknowledges an INCR chunk by deleting the property.
    pub fn requestor_deletes(&self, window: WindowId, property: Atom) {
        self.server().properties.remove(&(window, property));
        self.push_event(XEvent::PropertyChanged(PropertyChange {
            window,
            atom: property,
            time: 0,
            state: PropertyState::Deleted,
        }));
    }

    pub fn refuse_ownership(&self, refuse: bool) {
        self.server().refuse_ownership = refuse;
    }

    pub fn owner(&self, selection: Atom) -> WindowId {
        self.server().owners.get(&selection).copied().unwrap_or(NONE)
    }

    pub fn property(&self, window: WindowId, property: Atom) -> Option<PropertyValue> {
        self.server().properties.get(&(window, property)).cloned()
    }

    pub fn writes(&self) -> Vec<(WindowId, Atom, PropertyValue)> {
        self.server().writes.clone()
    }

    pub fn notifies(&self) -> Vec<SelectionNotify> {
        self.server().notifies.clone()
    }

    pub fn claims(&self) -> Vec<Atom> {
        self.server().claims.clone()
    }

    pub fn is_subscribed(&self, window: WindowId) -> bool {
        self.server().subscriptions.contains(&window)
    }

    pub fn unsubscribes(&self) -> Vec<WindowId> {
        self.server().unsubscribes.clone()
    }

    pub fn conversions_requested(&self) -> usize {
        self.server().conversions_requested
    }

    pub fn flushes(&self) -> usize {
        self.server().flushes
    }

    pub fn pending_events(&self) -> usize {
        self.server().events.len()
    }
}

