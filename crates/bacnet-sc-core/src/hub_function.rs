//! Hub Function: optional inbound relay. Accepts many WSS clients and forwards BVLC-SC
//! frames between them by destination VMAC.
//!
//! Same shape as the Hub Connector but with an acceptor-role, multi-slot socket context.
//! New inbound connections are rejected on VMAC/UUID collision with an already-registered
//! peer rather than merely on a raw connection-count cap.
use std::collections::HashMap;

use crate::bvlc::InboundFrame;
use crate::error::NodeError;
use crate::ids::{DeviceUuid, Vmac};
use crate::output::{DisconnectReason, Io, Outbox, SlotId};
use crate::socket::SocketEvent;
use crate::socket_context::{ConnectionRole, SocketContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubFunctionState {
    Idle,
    Started,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubFunctionEvent {
    Started,
    Stopped(Option<NodeError>),
    ErrorDuplicatedVmac(Vmac),
    /// A decoded frame arrived from an accepted peer on `slot`.
    Received(SlotId, InboundFrame),
}

#[derive(Debug, Default)]
struct Peer {
    vmac: Option<Vmac>,
    uuid: Option<DeviceUuid>,
}

pub struct HubFunction {
    state: HubFunctionState,
    ctx: SocketContext,
    peers: HashMap<SlotId, Peer>,
    by_vmac: HashMap<Vmac, SlotId>,
    by_uuid: HashMap<DeviceUuid, SlotId>,
    outbox: Outbox<HubFunctionEvent>,
}

impl HubFunction {
    pub fn new(max_inbound_connections: usize) -> Result<Self, NodeError> {
        Ok(Self {
            state: HubFunctionState::Idle,
            ctx: SocketContext::init(ConnectionRole::Acceptor, max_inbound_connections)?,
            peers: HashMap::new(),
            by_vmac: HashMap::new(),
            by_uuid: HashMap::new(),
            outbox: Outbox::new(),
        })
    }

    pub fn state(&self) -> HubFunctionState {
        self.state
    }

    pub fn outbox(&mut self) -> &mut Outbox<HubFunctionEvent> {
        &mut self.outbox
    }

    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.state != HubFunctionState::Idle {
            return Err(NodeError::InvalidOperation("hub function already started"));
        }
        self.state = HubFunctionState::Started;
        self.outbox.event(HubFunctionEvent::Started);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.state != HubFunctionState::Started {
            return;
        }
        self.state = HubFunctionState::Stopping;
        if self.ctx.begin_deinit() {
            self.finish_stop();
            return;
        }
        for slot in 0..self.ctx.capacity() {
            self.outbox
                .push(Io::Disconnect(SlotId(slot), DisconnectReason::Requested));
        }
    }

    fn finish_stop(&mut self) {
        self.ctx.finish_deinit();
        self.peers.clear();
        self.by_vmac.clear();
        self.by_uuid.clear();
        self.state = HubFunctionState::Idle;
        self.outbox.event(HubFunctionEvent::Stopped(None));
    }

    pub fn find_connection_for_vmac(&self, vmac: Vmac) -> Option<SlotId> {
        self.by_vmac.get(&vmac).copied()
    }

    pub fn find_connection_for_uuid(&self, uuid: DeviceUuid) -> Option<SlotId> {
        self.by_uuid.get(&uuid).copied()
    }

    /// Associate a newly-accepted connection with its advertised VMAC/UUID.
    ///
    /// On collision (a VMAC already bound to a different slot) the *new* connection is
    /// rejected,
    pub fn register_peer(&mut self, slot: SlotId, vmac: Vmac, uuid: DeviceUuid) {
        if let Some(existing) = self.by_vmac.get(&vmac) {
            if *existing != slot {
                self.outbox
                    .push(Io::Disconnect(slot, DisconnectReason::DuplicatedVmac));
                self.outbox
                    .event(HubFunctionEvent::ErrorDuplicatedVmac(vmac));
                return;
            }
        }
        self.by_vmac.insert(vmac, slot);
        self.by_uuid.insert(uuid, slot);
        self.peers.insert(
            slot,
            Peer {
                vmac: Some(vmac),
                uuid: Some(uuid),
            },
        );
    }

    pub fn on_socket_event(&mut self, slot: SlotId, event: SocketEvent) {
        let _ = self.ctx.apply_event(slot, &event);

        match &event {
            SocketEvent::Disconnected(_) => self.unregister(slot),
            SocketEvent::Received { decoded, .. } => match decoded {
                Some(frame) => self
                    .outbox
                    .event(HubFunctionEvent::Received(slot, frame.clone())),
                None => tracing::debug!(target: "datalink", "hub function: undecodable pdu dropped"),
            },
            SocketEvent::Connected => {}
        }

        if self.state == HubFunctionState::Stopping && self.ctx.is_fully_idle() {
            self.finish_stop();
        }
    }

    fn unregister(&mut self, slot: SlotId) {
        if let Some(peer) = self.peers.remove(&slot) {
            if let Some(vmac) = peer.vmac {
                self.by_vmac.remove(&vmac);
            }
            if let Some(uuid) = peer.uuid {
                self.by_uuid.remove(&uuid);
            }
        }
    }

    /// Forward a PDU to the peer owning `dest_vmac`. Drops (logging) if unknown.
    pub fn forward(&mut self, dest_vmac: Vmac, pdu: Vec<u8>) {
        match self.find_connection_for_vmac(dest_vmac) {
            Some(slot) => self.outbox.push(Io::Write(slot, pdu)),
            None => tracing::debug!(target: "datalink", %dest_vmac, "hub function: no route, dropping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_rejects_newer_connection() {
        let mut hf = HubFunction::new(4).unwrap();
        hf.start().unwrap();
        let vmac = Vmac::new([1, 2, 3, 4, 5, 6]);

        hf.register_peer(SlotId(0), vmac, DeviceUuid::new([0; 16]));
        hf.register_peer(SlotId(1), vmac, DeviceUuid::new([1; 16]));

        let mut saw_disconnect = false;
        let mut saw_event = false;
        while let Some(io) = hf.outbox().next() {
            match io {
                Io::Disconnect(SlotId(1), DisconnectReason::DuplicatedVmac) => saw_disconnect = true,
                Io::Event(HubFunctionEvent::ErrorDuplicatedVmac(v)) if v == vmac => saw_event = true,
                _ => {}
            }
        }
        assert!(saw_disconnect && saw_event);
        assert_eq!(hf.find_connection_for_vmac(vmac), Some(SlotId(0)));
    }

    #[test]
    fn forward_routes_to_known_peer() {
        let mut hf = HubFunction::new(4).unwrap();
        hf.start().unwrap();
        let vmac = Vmac::new([9, 9, 9, 9, 9, 9]);
        hf.register_peer(SlotId(2), vmac, DeviceUuid::new([2; 16]));
        while hf.outbox().next().is_some() {}

        hf.forward(vmac, vec![1, 2, 3]);
        let io = hf.outbox().next().unwrap();
        assert!(matches!(io, Io::Write(SlotId(2), pdu) if pdu == vec![1, 2, 3]));
    }
}
