//! Owner side of the selection protocol: answering SelectionRequests for
//! content this process holds.

use std::sync::Arc;

use tracing::{debug, warn};

use super::incr::{needs_incremental_transfer, IncrSendTable};
use super::{Result, SelectionDisplay, SelectionNotify, SelectionRequest, Timestamp};

/// Content and metadata of the selection being served.
#[derive(Debug, Clone, Copy)]
pub struct Served<'a> {
    pub content: Option<&'a Arc<[u8]>>,
    pub acquisition_time: Option<Timestamp>,
}

/// Answer a SelectionRequest and send the SelectionNotify.
///
/// Supported targets are TARGETS, UTF8_STRING, STRING and TIMESTAMP;
/// everything else is refused.
pub fn handle_selection_request<D>(
    display: &mut D,
    incr: &mut IncrSendTable,
    served: Served<'_>,
    request: &SelectionRequest,
) -> Result<SelectionNotify>
where
    D: SelectionDisplay + ?Sized,
{
    let atoms = *display.atoms();
    let property = request.reply_property();
    let requestor = request.requestor;

    let reply = if request.target == atoms.targets {
        display.write_property32(requestor, property, atoms.atom, &atoms.supported_targets())?;
        SelectionNotify::success(request, property)
    } else if atoms.is_text_target(request.target) {
        match served.content {
            None => SelectionNotify::refusal(request),
            Some(content)
                if needs_incremental_transfer(content.len(), display.max_property_bytes()) =>
            {
                match incr.start(
                    display,
                    requestor,
                    property,
                    request.target,
                    request.selection,
                    Arc::clone(content),
                ) {
                    Ok(()) => SelectionNotify::success(request, property),
                    Err(e) => {
                        warn!("Failed to start INCR send to {:#x}: {}", requestor, e);
                        incr.remove(display, requestor, property)?;
                        SelectionNotify::refusal(request)
                    }
                }
            }
            Some(content) => {
                display.write_property8(requestor, property, request.target, content)?;
                SelectionNotify::success(request, property)
            }
        }
    } else if request.target == atoms.timestamp {
        match served.acquisition_time {
            Some(time) => {
                display.write_property32(requestor, property, atoms.integer, &[time])?;
                SelectionNotify::success(request, property)
            }
            None => SelectionNotify::refusal(request),
        }
    } else {
        SelectionNotify::refusal(request)
    };

    if reply.is_refusal() {
        debug!(
            "Refusing target {} requested by {:#x}",
            request.target, requestor
        );
    }
    display.send_selection_notify(&reply)?;
    display.flush()?;
    Ok(reply)
}

/// Refuse a request for a selection we do not own.
pub fn refuse<D>(display: &mut D, request: &SelectionRequest) -> Result<()>
where
    D: SelectionDisplay + ?Sized,
{
    display.send_selection_notify(&SelectionNotify::refusal(request))?;
    display.flush()
}
