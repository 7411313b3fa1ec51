//! Bounded pool of sockets sharing one connection role and one set of credentials.
//!
//! Backed by a fixed-capacity preallocated array rather than an unbounded map, so the
//! number of live sockets of a given role can never exceed its configured limit.
use crate::error::NodeError;
use crate::output::SlotId;
use crate::socket::{Socket, SocketEvent, SocketState};

/// Which side of the WSS handshake this context's sockets play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Initiator,
    Acceptor,
}

/// Lifecycle of the context as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninit,
    Initialized,
    Deinitializing,
}

/// A fixed-size pool of sockets, e.g. the Hub Connector's two slots (primary, failover)
/// or the Hub Function's inbound-connection pool.
#[derive(Debug)]
pub struct SocketContext {
    role: ConnectionRole,
    sockets: Vec<Socket>,
    state: ContextState,
}

impl SocketContext {
    /// Preallocate `n` socket slots. Fails with `BAD_PARAM` if `n` is zero.
    pub fn init(role: ConnectionRole, n: usize) -> Result<Self, NodeError> {
        if n == 0 {
            return Err(NodeError::BadParam("socket context capacity must be nonzero"));
        }
        Ok(Self {
            role,
            sockets: vec![Socket::new(); n],
            state: ContextState::Initialized,
        })
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn capacity(&self) -> usize {
        self.sockets.len()
    }

    /// `IDLE -> CONNECTING` for `slot`. Invalid if the slot is not `IDLE`.
    pub fn connect(&mut self, slot: SlotId) -> Result<(), NodeError> {
        let socket = self
            .sockets
            .get_mut(slot.0)
            .ok_or(NodeError::BadParam("socket slot out of range"))?;
        if !socket.is_idle() {
            return Err(NodeError::InvalidOperation("socket slot is not idle"));
        }
        socket.begin_connect();
        Ok(())
    }

    /// Valid only when `slot` is `CONNECTED`.
    pub fn can_send(&self, slot: SlotId) -> Result<(), NodeError> {
        let socket = self
            .sockets
            .get(slot.0)
            .ok_or(NodeError::BadParam("socket slot out of range"))?;
        if !socket.is_connected() {
            return Err(NodeError::InvalidOperation("socket slot is not connected"));
        }
        Ok(())
    }

    /// First slot currently `CONNECTED`, if any (used to enforce "at most one connected
    /// socket" invariants on single-uplink contexts).
    pub fn connected_slot(&self) -> Option<SlotId> {
        self.sockets
            .iter()
            .position(|s| s.is_connected())
            .map(SlotId)
    }

    /// Apply a transport event to one slot.
    pub fn apply_event(&mut self, slot: SlotId, event: &SocketEvent) -> Result<(), NodeError> {
        let socket = self
            .sockets
            .get_mut(slot.0)
            .ok_or(NodeError::BadParam("socket slot out of range"))?;
        socket.apply(event);
        Ok(())
    }

    /// Begin tearing down every socket. Returns immediately if every socket was already
    /// idle (the context is then already deinitialized).
    pub fn begin_deinit(&mut self) -> bool {
        self.state = ContextState::Deinitializing;
        for socket in &mut self.sockets {
            socket.begin_disconnect();
        }
        self.is_fully_idle()
    }

    /// Whether every socket has returned to `IDLE`; when true during `Deinitializing`,
    /// the owner should emit `DEINITIALIZED` and transition to `Uninit`.
    pub fn is_fully_idle(&self) -> bool {
        self.sockets.iter().all(|s| s.state() == SocketState::Idle)
    }

    pub fn finish_deinit(&mut self) {
        self.state = ContextState::Uninit;
    }
}
