//! BACnet/SC datalink node core: the connection-management and message-dispatch state
//! machines a BACnet device needs to participate on a BACnet/SC network over secure
//! WebSockets.
//!
//! The four pieces, composed by [`supervisor::NodeSupervisor`]:
//!
//! - [`hub_connector::HubConnector`] — primary/failover uplink with reconnect backoff.
//! - [`hub_function::HubFunction`] — optional inbound relay.
//! - [`node_switch::NodeSwitch`] — direct peer connections and VMAC address resolution.
//! - [`supervisor::NodeSupervisor`] — lifecycle and BVLC-SC control dispatch.
//!
//! The transport itself, the BACnet object model, and wire-level BVLC-SC encoding/decoding
//! are deliberately out of scope; every state machine here is sans-io, driven by socket
//! events and ticks supplied by the caller. All logging goes through the `tracing` target
//! `"datalink"`.
pub mod bvlc;
pub mod config;
pub mod error;
pub mod hub_connector;
pub mod hub_function;
pub mod ids;
pub mod node_switch;
pub mod output;
pub mod resolution;
pub mod socket;
pub mod socket_context;
pub mod supervisor;
pub mod time;

pub use bvlc::{BvlcEncoder, BvlcFunction, BvlcMessage, InboundFrame};
pub use config::{EventSink, NodeConfig, NodeEvent, TlsMaterial};
pub use error::NodeError;
pub use hub_connector::{HubConnector, HubConnectorConfig, HubConnectorEvent, HubConnectorState};
pub use hub_function::{HubFunction, HubFunctionEvent, HubFunctionState};
pub use ids::{DeviceUuid, Vmac, WsUrl};
pub use node_switch::{NodeSwitch, NodeSwitchConfig, NodeSwitchEvent, NodeSwitchState, SendOutcome};
pub use output::{Connect, Disconnect, DisconnectReason, Io, Outbox, SetTimer, SlotId, Wire};
pub use resolution::{AddressResolutionEntry, AddressResolutionTable};
pub use socket::{Socket, SocketEvent, SocketState};
pub use socket_context::{ConnectionRole, ContextState, SocketContext};
pub use supervisor::{NodeSupervisor, NodeSupervisorState, SupervisorIo};
pub use time::{LocalDuration, LocalTime, MsTimer};
