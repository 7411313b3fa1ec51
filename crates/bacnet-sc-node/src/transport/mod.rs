//! Bridges the core's abstract [`bacnet_sc_core::output::Io`] commands to a concrete
//! transport. The core never opens a socket itself; everything in this module does.
pub mod tungstenite;

use bacnet_sc_core::output::SlotId;
use bacnet_sc_core::{DeviceUuid, SocketEvent, Vmac};

/// Which sub-component's socket pool a slot belongs to, mirroring
/// [`bacnet_sc_core::SupervisorIo`]'s tagging on the way back down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    HubConnector,
    HubFunction,
    NodeSwitch,
}

/// Something a live connection task reports to the driver that owns the Supervisor.
#[derive(Debug)]
pub enum InboundEvent {
    Socket {
        pool: Pool,
        slot: SlotId,
        event: SocketEvent,
    },
    /// The peer on `slot` identified itself via the hello frame sent right after connecting.
    PeerIdentified {
        pool: Pool,
        slot: SlotId,
        vmac: Vmac,
        uuid: Option<DeviceUuid>,
    },
}
