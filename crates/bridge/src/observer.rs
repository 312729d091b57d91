//! Session status notifications
//!
//! The session reports what it does as [`SessionEvent`]s to an injected
//! [`SessionObserver`]. The default observer writes them to `tracing`;
//! [`ChannelObserver`] hands them to an async consumer such as a UI.

use crate::error::TransferFault;
use crate::state::Trigger;
use async_channel::{Receiver, Sender, unbounded};
use common::{ConnectionState, PermissionRequest};
use tracing::{info, warn};

/// Structured status notification from the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A state transition was committed
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
        trigger: Trigger,
    },

    /// Consent was requested from the host
    PermissionRequested(PermissionRequest),

    /// An outstanding request was dropped by a detach
    PermissionDiscarded(PermissionRequest),

    /// A transfer failed; the session stays connected
    TransferFailed(TransferFault),
}

/// Receives session events
///
/// Called after the session lock is released, possibly from the host
/// callback thread, and always in the order transitions were committed.
/// Implementations must not call back into the session from `on_event`.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Writes session events to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to, trigger } => {
                info!(%from, %to, %trigger, "Session state changed");
            }
            SessionEvent::PermissionRequested(request) => {
                info!(
                    request_id = request.id.0,
                    device = %request.device,
                    "Requested USB permission"
                );
            }
            SessionEvent::PermissionDiscarded(request) => {
                info!(
                    request_id = request.id.0,
                    device = %request.device,
                    "Discarded pending permission request"
                );
            }
            SessionEvent::TransferFailed(fault) => {
                warn!(%fault, "Transfer failed");
            }
        }
    }
}

/// Forwards session events into an async channel
#[derive(Clone)]
pub struct ChannelObserver {
    event_tx: Sender<SessionEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiver its events arrive on
    pub fn channel() -> (Self, Receiver<SessionEvent>) {
        let (event_tx, event_rx) = unbounded();
        (Self { event_tx }, event_rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn on_event(&self, event: &SessionEvent) {
        // Nobody listening any more is not the session's problem
        let _ = self.event_tx.try_send(event.clone());
    }
}
