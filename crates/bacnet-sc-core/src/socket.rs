//! A single abstract WSS socket slot.
//!
//! The actual TLS/WebSocket transport is external; this models only the
//! lifecycle a caller drives through [`crate::output::Io::Connect`] /
//! [`crate::output::Io::Disconnect`] / [`crate::output::Io::Write`] and the events it
//! reports back via [`SocketEvent`].
use crate::bvlc::InboundFrame;
use crate::output::DisconnectReason;

/// Lifecycle state of one socket slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// An event the transport reports for a socket slot.
///
/// `Received` carries both the raw PDU and its decoded form: decoding into a structured
/// BVLC-SC message happens upstream of the core, which never parses wire bytes itself.
/// `decoded` is `None` when the transport could not parse the frame, in which case the
/// core logs and drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Connected,
    Disconnected(DisconnectReason),
    Received { pdu: Vec<u8>, decoded: Option<InboundFrame> },
}

/// One slot in a [`crate::socket_context::SocketContext`] pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct Socket {
    state: Option<SocketState>,
}

impl Socket {
    pub fn new() -> Self {
        Self {
            state: Some(SocketState::Idle),
        }
    }

    pub fn state(&self) -> SocketState {
        self.state.unwrap_or(SocketState::Idle)
    }

    pub fn is_idle(&self) -> bool {
        self.state() == SocketState::Idle
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SocketState::Connected
    }

    /// `IDLE -> CONNECTING`. Caller must check [`Socket::is_idle`] first.
    pub fn begin_connect(&mut self) {
        self.state = Some(SocketState::Connecting);
    }

    /// Apply a transport event, returning the resulting lifecycle state.
    pub fn apply(&mut self, event: &SocketEvent) {
        match event {
            SocketEvent::Connected => self.state = Some(SocketState::Connected),
            SocketEvent::Disconnected(_) => self.state = Some(SocketState::Idle),
            SocketEvent::Received { .. } => {}
        }
    }

    /// `CONNECTED -> DISCONNECTING`, the start of a locally-initiated close.
    pub fn begin_disconnect(&mut self) {
        if self.state() != SocketState::Idle {
            self.state = Some(SocketState::Disconnecting);
        }
    }
}
