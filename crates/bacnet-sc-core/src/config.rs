//! Node configuration and the upward event surface.
use crate::error::NodeError;
use crate::ids::{DeviceUuid, Vmac, WsUrl};
use crate::time::LocalDuration;

/// TLS material the node's transport needs; opaque to the core beyond length checks
///.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca_chain: Vec<u8>,
    pub cert_chain: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// Immutable-after-`init` node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub tls: TlsMaterial,
    pub uuid: DeviceUuid,
    pub initial_vmac: Vmac,
    pub max_local_bvlc_len: u16,
    pub max_local_npdu_len: u16,

    pub connect_timeout: LocalDuration,
    pub heartbeat_timeout: LocalDuration,
    pub disconnect_timeout: LocalDuration,
    pub reconnect_timeout: LocalDuration,
    pub resolution_timeout: LocalDuration,
    pub resolution_freshness_ttl: LocalDuration,

    pub primary_hub_url: WsUrl,
    pub failover_hub_url: WsUrl,

    pub hub_function_enabled: bool,
    pub hub_function_listen_port: Option<u16>,
    pub max_inbound_connections: usize,

    pub node_switch_enabled: bool,
    pub direct_connect_listen_port: Option<u16>,
    pub direct_connect_initiate_enable: bool,
    pub direct_connect_accept_enable: bool,
    pub max_direct_connections: usize,

    /// URIs this node accepts direct connections on, advertised in
    /// `ADDRESS_RESOLUTION_ACK`.
    pub accept_uris: Vec<String>,
}

impl NodeConfig {
    /// Validate every field: non-zero timeouts and lengths, and
    /// internally consistent enable flags.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.max_local_bvlc_len == 0 || self.max_local_npdu_len == 0 {
            return Err(NodeError::BadParam("max buffer lengths must be nonzero"));
        }
        for (name, d) in [
            ("connect_timeout", self.connect_timeout),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("disconnect_timeout", self.disconnect_timeout),
            ("reconnect_timeout", self.reconnect_timeout),
            ("resolution_timeout", self.resolution_timeout),
            ("resolution_freshness_ttl", self.resolution_freshness_ttl),
        ] {
            if d.as_millis() == 0 {
                tracing::warn!(target: "datalink", %name, "zero timeout rejected");
                return Err(NodeError::BadParam("all timeouts must be positive"));
            }
        }
        if self.hub_function_enabled && self.max_inbound_connections == 0 {
            return Err(NodeError::BadParam(
                "hub function enabled but max_inbound_connections is zero",
            ));
        }
        if self.node_switch_enabled
            && (self.direct_connect_initiate_enable || self.direct_connect_accept_enable)
            && self.max_direct_connections == 0
        {
            return Err(NodeError::BadParam(
                "node switch enabled but max_direct_connections is zero",
            ));
        }
        Ok(())
    }
}

/// Events delivered to the application once per significant transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Started,
    Restarted,
    Stopped,
    /// Raw NPDU payload of an `ENCAPSULATED_NPDU` frame.
    Received { pdu: Vec<u8> },
}

/// The single callback surface the core reports events through.
///
/// A trait object rather than a raw function-pointer-plus-context pair, so a closure or a
/// struct can both serve as the sink without an extra `user_arg` field to thread through.
pub trait EventSink: Send {
    fn on_event(&mut self, event: NodeEvent);
}

impl<F: FnMut(NodeEvent) + Send> EventSink for F {
    fn on_event(&mut self, event: NodeEvent) {
        self(event)
    }
}
