//! Requester side of the selection protocol: reading a selection owned by
//! another client, including the INCR chunk handshake.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use super::{
    Atom, Atoms, ClipboardError, PropertyState, PropertyValue, Result, SelectionDisplay, XEvent,
    CURRENT_TIME, NONE,
};

/// Bounds applied to a single selection read.
#[derive(Debug, Clone, Copy)]
pub struct ReadLimits {
    /// Wait for the owner's SelectionNotify
    pub convert_timeout: Duration,
    /// Wait for each INCR chunk
    pub chunk_timeout: Duration,
    /// Largest accepted content
    pub max_size: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            convert_timeout: Duration::from_secs(2),
            chunk_timeout: Duration::from_secs(5),
            max_size: crate::MAX_PAYLOAD_SIZE,
        }
    }
}

/// What a converted property turned out to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyRead {
    /// The complete content
    Data(Vec<u8>),
    /// The owner started an INCR transfer
    Incremental { estimated_size: usize },
    /// The property does not exist
    Missing,
}

impl PropertyRead {
    pub fn from_value(atoms: &Atoms, value: Option<PropertyValue>) -> Self {
        match value {
            None => PropertyRead::Missing,
            Some(value) if value.type_ == atoms.incr => PropertyRead::Incremental {
                estimated_size: value.first_u32().unwrap_or(0) as usize,
            },
            Some(value) => PropertyRead::Data(value.data),
        }
    }
}

/// Poll the display until `accept` picks an event or `limit` expires.
///
/// Events that are not accepted but still matter to the main loop are
/// appended to `deferred` in arrival order.
pub async fn wait_for_event<D, T, F>(
    display: &mut D,
    deferred: &mut VecDeque<XEvent>,
    limit: Duration,
    what: &'static str,
    mut accept: F,
) -> Result<T>
where
    D: SelectionDisplay + ?Sized,
    F: FnMut(&XEvent) -> Option<T>,
{
    let deadline = Instant::now() + limit;
    loop {
        while let Some(event) = display.poll_event()? {
            if let Some(found) = accept(&event) {
                return Ok(found);
            }
            if event.must_defer() {
                trace!("Deferring {:?} while waiting for {}", event, what);
                deferred.push_back(event);
            }
        }

        if Instant::now() >= deadline {
            return Err(ClipboardError::TransferTimeout(what));
        }
        match timeout_at(deadline, display.readable()).await {
            Ok(ready) => ready?,
            Err(_) => return Err(ClipboardError::TransferTimeout(what)),
        }
    }
}

/// Read the UTF-8 text content of `selection` from its current owner.
///
/// Returns [`ClipboardError::NoContent`] when there is no owner, the owner
/// refuses, or the result is empty. Timeouts and oversized transfers yield
/// no partial content.
pub async fn read_selection<D>(
    display: &mut D,
    deferred: &mut VecDeque<XEvent>,
    selection: Atom,
    limits: &ReadLimits,
) -> Result<Vec<u8>>
where
    D: SelectionDisplay + ?Sized,
{
    let atoms = *display.atoms();
    let window = display.window();
    let property = atoms.transfer_property;

    if display.selection_owner(selection)? == NONE {
        debug!("No owner for selection {}", selection);
        return Err(ClipboardError::NoContent);
    }

    // Leftovers from an aborted transfer would be misread as the answer.
    display.delete_property(window, property)?;
    display.convert_selection(selection, atoms.utf8_string, property, CURRENT_TIME)?;
    display.flush()?;

    let notify = wait_for_event(
        display,
        deferred,
        limits.convert_timeout,
        "SelectionNotify",
        |event| match event {
            XEvent::SelectionNotify(n) if n.requestor == window && n.selection == selection => {
                Some(*n)
            }
            _ => None,
        },
    )
    .await?;

    if notify.is_refusal() {
        debug!("Owner refused conversion of selection {}", selection);
        return Err(ClipboardError::NoContent);
    }

    let value = display.read_property(window, notify.property)?;
    match PropertyRead::from_value(&atoms, value) {
        PropertyRead::Missing => Err(ClipboardError::NoContent),
        PropertyRead::Data(data) => {
            display.delete_property(window, notify.property)?;
            display.flush()?;
            if data.is_empty() {
                Err(ClipboardError::NoContent)
            } else if data.len() > limits.max_size {
                Err(ClipboardError::TooLarge {
                    size: data.len(),
                    max: limits.max_size,
                })
            } else {
                Ok(data)
            }
        }
        PropertyRead::Incremental { estimated_size } => {
            debug!("Owner started INCR transfer of ~{} bytes", estimated_size);
            receive_incremental(display, deferred, notify.property, estimated_size, limits).await
        }
    }
}

/// Accumulate INCR chunks written to `property` on our window.
async fn receive_incremental<D>(
    display: &mut D,
    deferred: &mut VecDeque<XEvent>,
    property: Atom,
    estimated_size: usize,
    limits: &ReadLimits,
) -> Result<Vec<u8>>
where
    D: SelectionDisplay + ?Sized,
{
    let window = display.window();
    let mut buffer = Vec::with_capacity(estimated_size.min(limits.max_size));

    // Deleting the INCR marker tells the owner to write the first chunk.
    display.delete_property(window, property)?;
    display.flush()?;

    loop {
        wait_for_event(
            display,
            deferred,
            limits.chunk_timeout,
            "INCR chunk",
            |event| match event {
                XEvent::PropertyChanged(change)
                    if change.window == window
                        && change.atom == property
                        && change.state == PropertyState::NewValue =>
                {
                    Some(())
                }
                _ => None,
            },
        )
        .await?;

        let Some(chunk) = display.read_property(window, property)? else {
            continue;
        };
        display.delete_property(window, property)?;
        display.flush()?;

        if chunk.data.is_empty() {
            break;
        }
        let size = buffer.len() + chunk.data.len();
        if size > limits.max_size {
            return Err(ClipboardError::TooLarge {
                size,
                max: limits.max_size,
            });
        }
        trace!("INCR chunk of {} bytes ({} total)", chunk.data.len(), size);
        buffer.extend_from_slice(&chunk.data);
    }

    if buffer.is_empty() {
        return Err(ClipboardError::NoContent);
    }
    debug!("INCR transfer complete: {} bytes", buffer.len());
    Ok(buffer)
}
