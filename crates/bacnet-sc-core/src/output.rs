//! Protocol output capabilities.
//!
//! Each sub-component (Hub Connector, Hub Function, Node Switch) is handed its own
//! [`Outbox`] to push connection requests, sends, timers and events onto, without holding
//! a reference back to the Supervisor. The Supervisor drains every sub-component's outbox
//! on each tick, so a sub-component never calls back into its owner directly: a shared
//! queue stands in for the callback.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::NodeError;
use crate::ids::WsUrl;
use crate::time::LocalDuration;

/// Identifies a socket slot within a context (its index in the preallocated pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

/// Why a socket was disconnected, either by the transport or by this state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport reported a connect failure, TLS error, or unexpected close.
    Transport(String),
    /// A peer asserted a VMAC already assigned to another connection.
    DuplicatedVmac,
    /// The local state machine requested the disconnect, e.g. during `stop`.
    Requested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::DuplicatedVmac => write!(f, "duplicated vmac"),
            Self::Requested => write!(f, "requested"),
        }
    }
}

impl From<DisconnectReason> for NodeError {
    fn from(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::Transport(msg) => NodeError::TransportError(msg),
            DisconnectReason::DuplicatedVmac => NodeError::DuplicatedVmac,
            DisconnectReason::Requested => {
                NodeError::TransportError("local disconnect".to_string())
            }
        }
    }
}

/// Output of a state transition of any of the core's state machines.
#[derive(Debug, Clone)]
pub enum Io<E> {
    /// Send a raw BVLC-SC PDU on a socket.
    Write(SlotId, Vec<u8>),
    /// Open a connection on a socket slot.
    Connect(SlotId, WsUrl),
    /// Close a connection on a socket slot.
    Disconnect(SlotId, DisconnectReason),
    /// Ask to be ticked again in the given duration (used to fast-forward tests; the
    /// real run loop ticks on its own schedule regardless).
    SetTimer(LocalDuration),
    /// Emit an event up to the owner.
    Event(E),
}

/// Ability to open connections.
pub trait Connect {
    fn connect(&self, slot: SlotId, url: WsUrl);
}

/// Ability to close connections.
pub trait Disconnect {
    fn disconnect(&self, slot: SlotId, reason: DisconnectReason);
}

/// Ability to request a future wakeup.
pub trait SetTimer {
    fn set_timer(&self, duration: LocalDuration);
}

/// Ability to send a BVLC-SC PDU on a socket.
pub trait Wire {
    fn send(&self, slot: SlotId, pdu: Vec<u8>);
}

/// Holds a sub-component's pending outputs until the Supervisor drains them.
#[derive(Debug, Clone)]
pub struct Outbox<E> {
    queue: Arc<Mutex<VecDeque<Io<E>>>>,
}

impl<E> Default for Outbox<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Outbox<E> {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn push(&self, io: Io<E>) {
        self.queue.lock().unwrap().push_back(io);
    }

    pub fn event(&self, event: E) {
        self.push(Io::Event(event));
    }
}

impl<E> Iterator for Outbox<E> {
    type Item = Io<E>;

    fn next(&mut self) -> Option<Io<E>> {
        self.queue.lock().unwrap().pop_front()
    }
}

impl<E> Connect for Outbox<E> {
    fn connect(&self, slot: SlotId, url: WsUrl) {
        tracing::debug!(target: "datalink", slot = slot.0, %url, "connect");
        self.push(Io::Connect(slot, url));
    }
}

impl<E> Disconnect for Outbox<E> {
    fn disconnect(&self, slot: SlotId, reason: DisconnectReason) {
        tracing::debug!(target: "datalink", slot = slot.0, %reason, "disconnect");
        self.push(Io::Disconnect(slot, reason));
    }
}

impl<E> SetTimer for Outbox<E> {
    fn set_timer(&self, duration: LocalDuration) {
        self.push(Io::SetTimer(duration));
    }
}

impl<E> Wire for Outbox<E> {
    fn send(&self, slot: SlotId, pdu: Vec<u8>) {
        self.push(Io::Write(slot, pdu));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Ping,
    }

    #[test]
    fn outbox_drains_in_order() {
        let outbox: Outbox<TestEvent> = Outbox::new();
        outbox.push(Io::SetTimer(LocalDuration::from_millis(10)));
        outbox.event(TestEvent::Ping);

        let mut drained = outbox;
        assert!(matches!(drained.next(), Some(Io::SetTimer(_))));
        assert!(matches!(drained.next(), Some(Io::Event(TestEvent::Ping))));
        assert!(drained.next().is_none());
    }
}
