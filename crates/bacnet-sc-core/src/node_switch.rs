//! Node Switch: direct peer-to-peer connections plus VMAC address resolution.
//!
//! Initiate-if-known-else-resolve connection maintenance combined with connect/accept slot
//! bookkeeping, split across an optional initiator context and an optional acceptor
//! context depending on which direct-connection roles are enabled.
use std::collections::HashMap;

use crate::bvlc::InboundFrame;
use crate::error::NodeError;
use crate::ids::Vmac;
use crate::output::{DisconnectReason, Io, Outbox, SlotId};
use crate::resolution::AddressResolutionEntry;
use crate::socket::SocketEvent;
use crate::socket_context::{ConnectionRole, SocketContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSwitchState {
    Idle,
    Started,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSwitchEvent {
    Started,
    Stopped(Option<NodeError>),
    /// A decoded frame arrived on a direct connection in `slot`. `slot` is
    /// the raw, possibly-offset value callers use elsewhere in this API.
    Received(SlotId, InboundFrame),
}

/// Which socket context a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CtxRole {
    Initiator,
    Acceptor,
}

/// Outcome of [`NodeSwitch::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// No direct connection and no resolved route (or initiation disabled): caller should
    /// route via the Hub Connector instead. Carries the PDU back so the caller doesn't
    /// need to clone it up front.
    FallbackToUplink(Vec<u8>),
}

pub struct NodeSwitchConfig {
    pub direct_connect_initiate_enable: bool,
    pub direct_connect_accept_enable: bool,
    pub max_direct_connections: usize,
}

pub struct NodeSwitch {
    config: NodeSwitchConfig,
    state: NodeSwitchState,
    initiator_ctx: Option<SocketContext>,
    acceptor_ctx: Option<SocketContext>,
    connections: HashMap<Vmac, (CtxRole, SlotId)>,
    outbox: Outbox<NodeSwitchEvent>,
}

impl NodeSwitch {
    pub fn new(config: NodeSwitchConfig) -> Result<Self, NodeError> {
        if config.max_direct_connections == 0 {
            return Err(NodeError::BadParam("max_direct_connections must be nonzero"));
        }
        Ok(Self {
            initiator_ctx: None,
            acceptor_ctx: None,
            connections: HashMap::new(),
            outbox: Outbox::new(),
            state: NodeSwitchState::Idle,
            config,
        })
    }

    pub fn state(&self) -> NodeSwitchState {
        self.state
    }

    pub fn outbox(&mut self) -> &mut Outbox<NodeSwitchEvent> {
        &mut self.outbox
    }

    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.state != NodeSwitchState::Idle {
            return Err(NodeError::InvalidOperation("node switch already started"));
        }
        if self.config.direct_connect_initiate_enable {
            self.initiator_ctx = Some(SocketContext::init(
                ConnectionRole::Initiator,
                self.config.max_direct_connections,
            )?);
        }
        if self.config.direct_connect_accept_enable {
            self.acceptor_ctx = Some(SocketContext::init(
                ConnectionRole::Acceptor,
                self.config.max_direct_connections,
            )?);
        }
        self.state = NodeSwitchState::Started;
        self.outbox.event(NodeSwitchEvent::Started);
        Ok(())
    }

    /// Acceptor-context slots are offset by the configured capacity so a single [`SlotId`]
    /// unambiguously identifies both which context and which slot within it, without a
    /// separate role tag traveling alongside every [`Io`].
    fn acceptor_offset(&self) -> usize {
        self.config.max_direct_connections
    }

    pub fn stop(&mut self) {
        if self.state != NodeSwitchState::Started {
            return;
        }
        self.state = NodeSwitchState::Stopping;
        let offset = self.acceptor_offset();

        let mut fully_idle = true;
        for (base, ctx) in [
            (0, &mut self.initiator_ctx),
            (offset, &mut self.acceptor_ctx),
        ] {
            if let Some(ctx) = ctx {
                let idle = ctx.begin_deinit();
                fully_idle &= idle;
                if !idle {
                    for slot in 0..ctx.capacity() {
                        self.outbox
                            .push(Io::Disconnect(SlotId(base + slot), DisconnectReason::Requested));
                    }
                }
            }
        }
        if fully_idle {
            self.finish_stop();
        }
    }

    fn finish_stop(&mut self) {
        self.initiator_ctx = None;
        self.acceptor_ctx = None;
        self.connections.clear();
        self.state = NodeSwitchState::Idle;
        self.outbox.event(NodeSwitchEvent::Stopped(None));
    }

    /// Route a PDU to `dest_vmac` if a live direct connection exists.
    pub fn send(&mut self, dest_vmac: Vmac, pdu: Vec<u8>) -> SendOutcome {
        if let Some((_, slot)) = self.connections.get(&dest_vmac) {
            self.outbox.push(Io::Write(*slot, pdu));
            return SendOutcome::Sent;
        }
        SendOutcome::FallbackToUplink(pdu)
    }

    /// Handle a resolved route from the Supervisor: initiate a connection if configured
    /// and no connection to this peer already exists.
    pub fn process_address_resolution(&mut self, entry: &AddressResolutionEntry) {
        if !self.config.direct_connect_initiate_enable {
            return;
        }
        if self.connections.contains_key(&entry.vmac) {
            return;
        }
        let Some(url) = entry.urls.first() else {
            return;
        };
        let Ok(url) = crate::ids::WsUrl::parse(url) else {
            return;
        };
        let Some(ctx) = self.initiator_ctx.as_mut() else {
            return;
        };
        for slot_idx in 0..ctx.capacity() {
            let slot = SlotId(slot_idx);
            if ctx.connect(slot).is_ok() {
                self.outbox.push(Io::Connect(slot, url));
                return;
            }
        }
    }

    /// Resolve a raw [`SlotId`] into the context that owns it, applying the acceptor
    /// offset from [`NodeSwitch::acceptor_offset`].
    fn ctx_for_mut(&mut self, slot: SlotId) -> (CtxRole, SlotId, Option<&mut SocketContext>) {
        let offset = self.acceptor_offset();
        if slot.0 < offset {
            (CtxRole::Initiator, slot, self.initiator_ctx.as_mut())
        } else {
            (
                CtxRole::Acceptor,
                SlotId(slot.0 - offset),
                self.acceptor_ctx.as_mut(),
            )
        }
    }

    pub fn on_socket_event(&mut self, slot: SlotId, event: SocketEvent) {
        let (role, local_slot, ctx) = self.ctx_for_mut(slot);
        if let Some(ctx) = ctx {
            let _ = ctx.apply_event(local_slot, &event);
        }

        match &event {
            SocketEvent::Disconnected(_) => {
                self.connections.retain(|_, (r, s)| !(*r == role && *s == slot));
            }
            SocketEvent::Received { decoded, .. } => match decoded {
                Some(frame) => self
                    .outbox
                    .event(NodeSwitchEvent::Received(slot, frame.clone())),
                None => tracing::debug!(target: "datalink", "node switch: undecodable pdu dropped"),
            },
            SocketEvent::Connected => {}
        }

        if self.state == NodeSwitchState::Stopping {
            let initiator_idle = self.initiator_ctx.as_ref().map_or(true, |c| c.is_fully_idle());
            let acceptor_idle = self.acceptor_ctx.as_ref().map_or(true, |c| c.is_fully_idle());
            if initiator_idle && acceptor_idle {
                self.finish_stop();
            }
        }
    }

    /// Register a newly identified direct peer (advertised VMAC on a connected socket).
    /// `slot` is the raw, possibly-offset [`SlotId`] as seen by callers.
    pub fn register_peer(&mut self, slot: SlotId, vmac: Vmac) {
        let offset = self.acceptor_offset();
        let role = if slot.0 < offset {
            CtxRole::Initiator
        } else {
            CtxRole::Acceptor
        };
        self.connections.insert(vmac, (role, slot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch() -> NodeSwitch {
        NodeSwitch::new(NodeSwitchConfig {
            direct_connect_initiate_enable: true,
            direct_connect_accept_enable: true,
            max_direct_connections: 4,
        })
        .unwrap()
    }

    #[test]
    fn send_without_connection_falls_back() {
        let mut ns = switch();
        ns.start().unwrap();
        let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
        assert_eq!(
            ns.send(vmac, vec![1]),
            SendOutcome::FallbackToUplink(vec![1])
        );
    }

    #[test]
    fn send_with_connection_routes_direct() {
        let mut ns = switch();
        ns.start().unwrap();
        let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
        ns.register_peer(SlotId(0), vmac);

        assert_eq!(ns.send(vmac, vec![7]), SendOutcome::Sent);
    }

    #[test]
    fn resolution_triggers_initiate_when_no_connection() {
        let mut ns = switch();
        ns.start().unwrap();
        while ns.outbox().next().is_some() {}

        let entry = AddressResolutionEntry {
            vmac: Vmac::new([1, 2, 3, 4, 5, 6]),
            urls: vec!["wss://peer:9999".to_string()],
            fresh_timer: Default::default(),
        };
        ns.process_address_resolution(&entry);

        let io = ns.outbox().next().unwrap();
        assert!(matches!(io, Io::Connect(_, _)));
    }
}
