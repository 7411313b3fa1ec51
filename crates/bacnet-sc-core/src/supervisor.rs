//! Node Supervisor: composes Hub Connector, Hub Function and Node Switch, dispatches
//! decoded BVLC-SC control frames, and owns node lifecycle.
//!
//! One object owns three independently-driven state machines, drains their outboxes on a
//! shared tick, and translates their events into the single upward event surface.
use crate::bvlc::{BvlcEncoder, BvlcFunction, BvlcMessage, ErrorClass, ErrorCode, HubConnectionStatus};
use crate::config::{EventSink, NodeConfig, NodeEvent};
use crate::error::NodeError;
use crate::hub_connector::{HubConnector, HubConnectorConfig, HubConnectorEvent, HubConnectorState};
use crate::hub_function::{HubFunction, HubFunctionEvent};
use crate::ids::{DeviceUuid, Vmac};
use crate::node_switch::{NodeSwitch, NodeSwitchConfig, NodeSwitchEvent, SendOutcome};
use crate::output::{DisconnectReason, Io, SlotId};
use crate::resolution::{AddressResolutionEntry, AddressResolutionTable};
use crate::socket::SocketEvent;
use crate::time::LocalTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSupervisorState {
    Idle,
    Starting,
    Started,
    Restarting,
    Stopping,
}

/// One [`Io`] drained from a sub-component's outbox, tagged with its origin so the caller
/// can route `Write`/`Connect`/`Disconnect` to the right transport socket pool.
#[derive(Debug, Clone)]
pub enum SupervisorIo {
    HubConnector(Io<HubConnectorEvent>),
    HubFunction(Io<HubFunctionEvent>),
    NodeSwitch(Io<NodeSwitchEvent>),
}

/// Which sub-components the Supervisor is still waiting to hear back from during a
/// start, stop or restart sequence. The Hub Connector never gates `start` completion
/// but does gate `stop`/`restart` completion.
#[derive(Debug, Clone, Copy, Default)]
struct PendingSet {
    hub_connector: bool,
    hub_function: bool,
    node_switch: bool,
}

impl PendingSet {
    fn all_clear(&self) -> bool {
        !self.hub_connector && !self.hub_function && !self.node_switch
    }
}

/// Where a synthesized control-message reply should be sent back out.
#[derive(Debug, Clone, Copy)]
enum ReplyRoute {
    HubConnector(Vmac),
    HubFunction(Vmac),
    NodeSwitch(Vmac),
}

impl ReplyRoute {
    fn vmac(&self) -> Vmac {
        match self {
            Self::HubConnector(v) | Self::HubFunction(v) | Self::NodeSwitch(v) => *v,
        }
    }
}

pub struct NodeSupervisor<S: EventSink> {
    config: NodeConfig,
    state: NodeSupervisorState,
    vmac: Vmac,
    hub_connector: HubConnector,
    hub_function: Option<HubFunction>,
    node_switch: Option<NodeSwitch>,
    resolution: AddressResolutionTable,
    encoder: Box<dyn BvlcEncoder>,
    sink: S,
    pending: PendingSet,
    /// Set while a stop-then-start sequence triggered by a duplicate-VMAC collision is in
    /// flight, so the eventual start completion emits `RESTARTED` instead of `STARTED`.
    restarting: bool,
    pending_io: Vec<SupervisorIo>,
}

impl<S: EventSink> NodeSupervisor<S> {
    /// Validate `config` and allocate the sub-components it enables.
    pub fn init(config: NodeConfig, sink: S, encoder: Box<dyn BvlcEncoder>) -> Result<Self, NodeError> {
        config.validate()?;

        let hub_connector = HubConnector::new(HubConnectorConfig {
            primary_url: config.primary_hub_url.clone(),
            failover_url: config.failover_hub_url.clone(),
            reconnect_timeout: config.reconnect_timeout,
        })?;
        let hub_function = config
            .hub_function_enabled
            .then(|| HubFunction::new(config.max_inbound_connections))
            .transpose()?;
        let node_switch = config
            .node_switch_enabled
            .then(|| {
                NodeSwitch::new(NodeSwitchConfig {
                    direct_connect_initiate_enable: config.direct_connect_initiate_enable,
                    direct_connect_accept_enable: config.direct_connect_accept_enable,
                    max_direct_connections: config.max_direct_connections,
                })
            })
            .transpose()?;
        let resolution =
            AddressResolutionTable::new(config.max_direct_connections, config.resolution_freshness_ttl);
        let vmac = config.initial_vmac;

        Ok(Self {
            config,
            state: NodeSupervisorState::Idle,
            vmac,
            hub_connector,
            hub_function,
            node_switch,
            resolution,
            encoder,
            sink,
            pending: PendingSet::default(),
            restarting: false,
            pending_io: Vec::new(),
        })
    }

    pub fn state(&self) -> NodeSupervisorState {
        self.state
    }

    pub fn vmac(&self) -> Vmac {
        self.vmac
    }

    /// Drain the transport-facing output accumulated since the last call.
    pub fn drain_transport_io(&mut self) -> Vec<SupervisorIo> {
        std::mem::take(&mut self.pending_io)
    }

    /// `IDLE -> STARTING`. Rolls back to `IDLE` and returns the error if any sub-component
    /// fails to arm; see [`Self::begin_start`].
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.state != NodeSupervisorState::Idle {
            return Err(NodeError::InvalidOperation("supervisor already started"));
        }
        self.begin_start()
    }

    fn begin_start(&mut self) -> Result<(), NodeError> {
        self.state = NodeSupervisorState::Starting;
        self.pending = PendingSet {
            hub_connector: false,
            hub_function: self.hub_function.is_some(),
            node_switch: self.node_switch.is_some(),
        };

        if let Err(err) = self.hub_connector.start() {
            self.state = NodeSupervisorState::Idle;
            return Err(err);
        }
        if let Some(hf) = self.hub_function.as_mut() {
            if let Err(err) = hf.start() {
                self.hub_connector.stop();
                self.state = NodeSupervisorState::Idle;
                return Err(err);
            }
        }
        if let Some(ns) = self.node_switch.as_mut() {
            if let Err(err) = ns.start() {
                self.hub_connector.stop();
                if let Some(hf) = self.hub_function.as_mut() {
                    hf.stop();
                }
                self.state = NodeSupervisorState::Idle;
                return Err(err);
            }
        }

        self.pump();
        Ok(())
    }

    fn maybe_finish_start(&mut self) {
        if self.state != NodeSupervisorState::Starting {
            return;
        }
        if self.pending.hub_function || self.pending.node_switch {
            return;
        }
        self.state = NodeSupervisorState::Started;
        if self.restarting {
            self.restarting = false;
            self.sink.on_event(NodeEvent::Restarted);
        } else {
            self.sink.on_event(NodeEvent::Started);
        }
    }

    /// Idempotent; safe in any state.
    pub fn stop(&mut self) {
        if matches!(
            self.state,
            NodeSupervisorState::Stopping | NodeSupervisorState::Idle
        ) {
            return;
        }
        self.state = NodeSupervisorState::Stopping;
        self.pending = PendingSet {
            hub_connector: true,
            hub_function: self.hub_function.is_some(),
            node_switch: self.node_switch.is_some(),
        };
        self.hub_connector.stop();
        if let Some(hf) = self.hub_function.as_mut() {
            hf.stop();
        }
        if let Some(ns) = self.node_switch.as_mut() {
            ns.stop();
        }
        self.pump();
    }

    /// Triggered by any sub-component reporting a duplicate-VMAC collision. Ignored while
    /// already restarting or stopping.
    fn trigger_restart(&mut self) {
        if matches!(
            self.state,
            NodeSupervisorState::Restarting | NodeSupervisorState::Stopping
        ) {
            return;
        }
        self.state = NodeSupervisorState::Restarting;
        self.pending = PendingSet {
            hub_connector: true,
            hub_function: self.hub_function.is_some(),
            node_switch: self.node_switch.is_some(),
        };
        self.hub_connector.stop();
        if let Some(hf) = self.hub_function.as_mut() {
            hf.stop();
        }
        if let Some(ns) = self.node_switch.as_mut() {
            ns.stop();
        }
        self.pump();
    }

    fn maybe_finish_stop_or_restart(&mut self) {
        if !self.pending.all_clear() {
            return;
        }
        match self.state {
            NodeSupervisorState::Stopping => {
                self.state = NodeSupervisorState::Idle;
                self.sink.on_event(NodeEvent::Stopped);
            }
            NodeSupervisorState::Restarting => {
                self.vmac = Vmac::random();
                self.restarting = true;
                if self.begin_start().is_err() {
                    tracing::warn!(target: "datalink", "restart failed to re-arm sub-components");
                    self.restarting = false;
                    self.state = NodeSupervisorState::Idle;
                }
            }
            _ => {}
        }
    }

    /// Drain every sub-component's outbox, handling events internally and buffering the
    /// rest as transport-facing [`SupervisorIo`]. Loops until a pass makes no progress, so
    /// that an event handled in one component (e.g. a restart trigger) can itself produce
    /// outbox entries on another that are drained in the same call.
    fn pump(&mut self) {
        loop {
            let mut progressed = false;

            while let Some(io) = self.hub_connector.outbox().next() {
                progressed = true;
                match io {
                    Io::Event(e) => self.handle_hub_connector_event(e),
                    other => self.pending_io.push(SupervisorIo::HubConnector(other)),
                }
            }

            while let Some(io) = self.hub_function.as_mut().and_then(|hf| hf.outbox().next()) {
                progressed = true;
                match io {
                    Io::Event(e) => self.handle_hub_function_event(e),
                    other => self.pending_io.push(SupervisorIo::HubFunction(other)),
                }
            }

            while let Some(io) = self.node_switch.as_mut().and_then(|ns| ns.outbox().next()) {
                progressed = true;
                match io {
                    Io::Event(e) => self.handle_node_switch_event(e),
                    other => self.pending_io.push(SupervisorIo::NodeSwitch(other)),
                }
            }

            if !progressed {
                break;
            }
        }
    }

    fn handle_hub_connector_event(&mut self, event: HubConnectorEvent) {
        match event {
            HubConnectorEvent::ConnectedPrimary | HubConnectorEvent::ConnectedFailover => {}
            HubConnectorEvent::Disconnected(reason) => {
                if reason == DisconnectReason::DuplicatedVmac {
                    self.trigger_restart();
                }
            }
            HubConnectorEvent::Stopped(err) => {
                if let Some(err) = err {
                    tracing::warn!(target: "datalink", %err, "hub connector stopped with error");
                }
                self.pending.hub_connector = false;
                self.maybe_finish_stop_or_restart();
            }
            HubConnectorEvent::Received(frame) => {
                let origin = frame.origin;
                self.dispatch_inbound(frame, ReplyRoute::HubConnector(origin));
            }
        }
    }

    fn handle_hub_function_event(&mut self, event: HubFunctionEvent) {
        match event {
            HubFunctionEvent::Started => {
                self.pending.hub_function = false;
                self.maybe_finish_start();
            }
            HubFunctionEvent::Stopped(err) => {
                if let Some(err) = err {
                    tracing::warn!(target: "datalink", %err, "hub function stopped with error");
                }
                self.pending.hub_function = false;
                self.maybe_finish_stop_or_restart();
            }
            HubFunctionEvent::ErrorDuplicatedVmac(_) => self.trigger_restart(),
            HubFunctionEvent::Received(_slot, frame) => {
                let origin = frame.origin;
                self.dispatch_inbound(frame, ReplyRoute::HubFunction(origin));
            }
        }
    }

    fn handle_node_switch_event(&mut self, event: NodeSwitchEvent) {
        match event {
            NodeSwitchEvent::Started => {
                self.pending.node_switch = false;
                self.maybe_finish_start();
            }
            NodeSwitchEvent::Stopped(err) => {
                if let Some(err) = err {
                    tracing::warn!(target: "datalink", %err, "node switch stopped with error");
                }
                self.pending.node_switch = false;
                self.maybe_finish_stop_or_restart();
            }
            NodeSwitchEvent::Received(_slot, frame) => {
                let origin = frame.origin;
                self.dispatch_inbound(frame, ReplyRoute::NodeSwitch(origin));
            }
        }
    }

    /// Feed a socket event for the Hub Connector's uplink sockets into the Supervisor.
    pub fn on_hub_connector_socket_event(&mut self, slot: SlotId, event: SocketEvent) {
        self.hub_connector.on_socket_event(slot, event);
        self.pump();
    }

    /// Feed a socket event for one of the Hub Function's accepted sockets, if enabled.
    pub fn on_hub_function_socket_event(&mut self, slot: SlotId, event: SocketEvent) {
        if let Some(hf) = self.hub_function.as_mut() {
            hf.on_socket_event(slot, event);
        }
        self.pump();
    }

    /// Feed a socket event for one of the Node Switch's direct sockets, if enabled.
    pub fn on_node_switch_socket_event(&mut self, slot: SlotId, event: SocketEvent) {
        if let Some(ns) = self.node_switch.as_mut() {
            ns.on_socket_event(slot, event);
        }
        self.pump();
    }

    /// Associate an accepted Hub Function connection with its advertised VMAC/UUID.
    pub fn register_hub_function_peer(&mut self, slot: SlotId, vmac: Vmac, uuid: DeviceUuid) {
        if let Some(hf) = self.hub_function.as_mut() {
            hf.register_peer(slot, vmac, uuid);
        }
        self.pump();
    }

    /// Associate a connected Node Switch direct connection with its advertised VMAC.
    pub fn register_node_switch_peer(&mut self, slot: SlotId, vmac: Vmac) {
        if let Some(ns) = self.node_switch.as_mut() {
            ns.register_peer(slot, vmac);
        }
    }

    /// Sampled on every tick; drives the Hub Connector's reconnect timer and expires stale
    /// address-resolution entries.
    pub fn tick(&mut self, now: LocalTime) {
        self.hub_connector.tick(now);
        self.pump();
        self.resolution.expire(now);
    }

    pub fn get_address_resolution(&self, vmac: Vmac) -> Option<&AddressResolutionEntry> {
        self.resolution.get(vmac, LocalTime::now())
    }

    /// Send an `ADDRESS_RESOLUTION` request for `dest_vmac` on the uplink.
    /// Unlike synthesized replies, a transmission failure here is returned, not swallowed.
    pub fn send_address_resolution(&mut self, dest_vmac: Vmac) -> Result<(), NodeError> {
        if self.state != NodeSupervisorState::Started {
            return Err(NodeError::InvalidOperation("supervisor is not started"));
        }
        let pdu = self.encoder.encode(dest_vmac, &BvlcMessage::AddressResolution);
        let result = self.hub_connector.send(pdu);
        self.pump();
        result
    }

    /// Route an outbound NPDU: via the Node Switch when `dest_vmac` has a known direct
    /// connection, else via the Hub Connector.
    ///
    /// A miss on the live connection map is not final: if a fresh resolved URL list for
    /// `dest_vmac` is sitting in the resolution table, this re-initiates a direct
    /// connection before falling back, so a dropped connection whose address is still
    /// fresh gets re-established instead of pinning traffic to the uplink forever.
    pub fn node_send(&mut self, dest_vmac: Option<Vmac>, pdu: Vec<u8>) -> Result<(), NodeError> {
        if self.state != NodeSupervisorState::Started {
            return Err(NodeError::InvalidOperation("supervisor is not started"));
        }
        let pdu = match (self.node_switch.as_mut(), dest_vmac) {
            (Some(ns), Some(vmac)) => match ns.send(vmac, pdu) {
                SendOutcome::Sent => {
                    self.pump();
                    return Ok(());
                }
                SendOutcome::FallbackToUplink(pdu) => {
                    if let Some(entry) = self.resolution.get(vmac, LocalTime::now()).cloned() {
                        ns.process_address_resolution(&entry);
                    }
                    pdu
                }
            },
            (_, _) => pdu,
        };
        self.pump();
        self.hub_connector.send(pdu)
    }

    fn send_reply(&mut self, route: ReplyRoute, message: BvlcMessage) {
        let dest = route.vmac();
        let pdu = self.encoder.encode(dest, &message);
        match route {
            ReplyRoute::HubConnector(_) => {
                if let Err(err) = self.hub_connector.send(pdu) {
                    tracing::warn!(target: "datalink", %dest, %err, "reply transmission failed");
                }
            }
            ReplyRoute::HubFunction(_) => {
                if let Some(hf) = self.hub_function.as_mut() {
                    hf.forward(dest, pdu);
                }
            }
            ReplyRoute::NodeSwitch(_) => {
                if let Some(ns) = self.node_switch.as_mut() {
                    let _ = ns.send(dest, pdu);
                }
            }
        }
        self.pump();
    }

    /// A `RESULT` is mandated for every frame kind except `RESULT` itself.
    fn result_mandated(function: BvlcFunction) -> bool {
        function != BvlcFunction::Result
    }

    /// Inbound BVLC-SC dispatch: check destination options, route by function code, then
    /// hand the payload to the event sink or reply on the originating socket.
    fn dispatch_inbound(&mut self, frame: crate::bvlc::InboundFrame, route: ReplyRoute) {
        if let Some(opt) = frame.unknown_must_understand_option() {
            let marker = opt.marker;
            tracing::debug!(target: "datalink", origin = %frame.origin, marker, "unknown must-understand option");
            if Self::result_mandated(frame.message.function()) {
                self.send_reply(
                    route,
                    BvlcMessage::Result {
                        nak_function: None,
                        error_class: ErrorClass::Communication,
                        error_code: ErrorCode::HeaderNotUnderstood,
                        marker: Some(marker),
                    },
                );
            }
            return;
        }

        match frame.message {
            BvlcMessage::Result { nak_function, .. } => {
                if nak_function == Some(BvlcFunction::AddressResolution) {
                    self.resolution.apply_nak(frame.origin, LocalTime::now());
                } else {
                    tracing::debug!(target: "datalink", origin = %frame.origin, "result dropped");
                }
            }
            BvlcMessage::Advertisement { .. } => {}
            BvlcMessage::AdvertisementSolicitation => {
                let hub_connection_status = match self.hub_connector.state() {
                    HubConnectorState::ConnectedPrimary => HubConnectionStatus::ConnectedPrimary,
                    HubConnectorState::ConnectedFailover => HubConnectionStatus::ConnectedFailover,
                    _ => HubConnectionStatus::NotConnected,
                };
                self.send_reply(
                    route,
                    BvlcMessage::Advertisement {
                        hub_connection_status,
                        accept_direct_connections: self.node_switch.is_some(),
                        max_bvlc_len: self.config.max_local_bvlc_len,
                        max_npdu_len: self.config.max_local_npdu_len,
                    },
                );
            }
            BvlcMessage::AddressResolution => {
                if self.node_switch.is_some() {
                    let payload = self.config.accept_uris.join(" ").into_bytes();
                    self.send_reply(route, BvlcMessage::AddressResolutionAck { payload });
                } else {
                    self.send_reply(
                        route,
                        BvlcMessage::Result {
                            nak_function: Some(BvlcFunction::AddressResolution),
                            error_class: ErrorClass::Communication,
                            error_code: ErrorCode::OptionalFunctionalityNotSupported,
                            marker: None,
                        },
                    );
                }
            }
            BvlcMessage::AddressResolutionAck { payload } => {
                let now = LocalTime::now();
                self.resolution.apply_ack(frame.origin, &payload, now);
                if let Some(entry) = self.resolution.get(frame.origin, now).cloned() {
                    if let Some(ns) = self.node_switch.as_mut() {
                        ns.process_address_resolution(&entry);
                        self.pump();
                    }
                }
            }
            BvlcMessage::EncapsulatedNpdu { npdu } => {
                self.sink.on_event(NodeEvent::Received { pdu: npdu });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvlc::{BvlcMessage, DestinationOption, InboundFrame};
    use crate::config::TlsMaterial;
    use crate::ids::WsUrl;
    use crate::time::LocalDuration;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingSink(Arc<Mutex<Vec<NodeEvent>>>);

    impl EventSink for RecordingSink {
        fn on_event(&mut self, event: NodeEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    struct RecordingEncoder(Arc<Mutex<Vec<(Vmac, BvlcMessage)>>>);

    impl BvlcEncoder for RecordingEncoder {
        fn encode(&self, dest: Vmac, message: &BvlcMessage) -> Vec<u8> {
            self.0.lock().unwrap().push((dest, message.clone()));
            vec![0xAA]
        }
    }

    fn base_config(node_switch_enabled: bool) -> NodeConfig {
        NodeConfig {
            tls: TlsMaterial {
                ca_chain: vec![],
                cert_chain: vec![],
                private_key: vec![],
            },
            uuid: DeviceUuid::new([0; 16]),
            initial_vmac: Vmac::new([1, 1, 1, 1, 1, 1]),
            max_local_bvlc_len: 1500,
            max_local_npdu_len: 1500,
            connect_timeout: LocalDuration::from_secs(10),
            heartbeat_timeout: LocalDuration::from_secs(10),
            disconnect_timeout: LocalDuration::from_secs(10),
            reconnect_timeout: LocalDuration::from_secs(5),
            resolution_timeout: LocalDuration::from_secs(10),
            resolution_freshness_ttl: LocalDuration::from_secs(60),
            primary_hub_url: WsUrl::parse("wss://h1:9999").unwrap(),
            failover_hub_url: WsUrl::parse("wss://h2:9999").unwrap(),
            hub_function_enabled: false,
            hub_function_listen_port: None,
            max_inbound_connections: 4,
            node_switch_enabled,
            direct_connect_listen_port: None,
            direct_connect_initiate_enable: true,
            direct_connect_accept_enable: true,
            max_direct_connections: 4,
            accept_uris: vec!["wss://me:9999/a".to_string(), "wss://me:9999/b".to_string()],
        }
    }

    fn supervisor(
        node_switch_enabled: bool,
    ) -> (
        NodeSupervisor<RecordingSink>,
        Arc<Mutex<Vec<NodeEvent>>>,
        Arc<Mutex<Vec<(Vmac, BvlcMessage)>>>,
    ) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sup = NodeSupervisor::init(
            base_config(node_switch_enabled),
            RecordingSink(events.clone()),
            Box::new(RecordingEncoder(sent.clone())),
        )
        .unwrap();
        (sup, events, sent)
    }

    const PRIMARY_SLOT: SlotId = SlotId(0);

    #[test]
    fn start_without_optional_components_emits_started_immediately() {
        let (mut sup, events, _sent) = supervisor(false);
        sup.start().unwrap();
        assert_eq!(sup.state(), NodeSupervisorState::Started);
        assert_eq!(events.lock().unwrap().as_slice(), [NodeEvent::Started]);
    }

    #[test]
    fn send_before_started_is_invalid_operation() {
        let (mut sup, _events, _sent) = supervisor(false);
        assert_eq!(
            sup.node_send(None, vec![1]),
            Err(NodeError::InvalidOperation("supervisor is not started"))
        );
    }

    #[test]
    fn duplicated_vmac_triggers_restart_with_fresh_vmac() {
        let (mut sup, events, _sent) = supervisor(false);
        sup.start().unwrap();
        let original_vmac = sup.vmac();

        sup.on_hub_connector_socket_event(PRIMARY_SLOT, SocketEvent::Connected);
        sup.on_hub_connector_socket_event(
            PRIMARY_SLOT,
            SocketEvent::Disconnected(DisconnectReason::DuplicatedVmac),
        );

        assert_eq!(sup.state(), NodeSupervisorState::Started);
        assert_ne!(sup.vmac(), original_vmac);
        assert!(events.lock().unwrap().contains(&NodeEvent::Restarted));
    }

    #[test]
    fn address_resolution_request_replies_with_configured_uris() {
        let (mut sup, _events, sent) = supervisor(true);
        sup.start().unwrap();
        sup.on_hub_connector_socket_event(PRIMARY_SLOT, SocketEvent::Connected);

        let origin = Vmac::new([1, 2, 3, 4, 5, 6]);
        let frame = InboundFrame {
            origin,
            destination_options: vec![],
            message: BvlcMessage::AddressResolution,
        };
        sup.on_hub_connector_socket_event(
            PRIMARY_SLOT,
            SocketEvent::Received {
                pdu: vec![],
                decoded: Some(frame),
            },
        );

        let sent = sent.lock().unwrap();
        let (dest, message) = sent.last().expect("a reply was encoded");
        assert_eq!(*dest, origin);
        assert!(matches!(message, BvlcMessage::AddressResolutionAck { payload } if payload == b"wss://me:9999/a wss://me:9999/b"));
    }

    #[test]
    fn unknown_must_understand_option_nak_suppresses_delivery() {
        let (mut sup, events, sent) = supervisor(false);
        sup.start().unwrap();
        sup.on_hub_connector_socket_event(PRIMARY_SLOT, SocketEvent::Connected);

        let origin = Vmac::new([9, 9, 9, 9, 9, 9]);
        let frame = InboundFrame {
            origin,
            destination_options: vec![DestinationOption {
                marker: 0x07,
                must_understand: true,
                known: false,
            }],
            message: BvlcMessage::EncapsulatedNpdu {
                npdu: vec![1, 2, 3],
            },
        };
        sup.on_hub_connector_socket_event(
            PRIMARY_SLOT,
            SocketEvent::Received {
                pdu: vec![],
                decoded: Some(frame),
            },
        );

        let events = events.lock().unwrap();
        assert!(!events.iter().any(|e| matches!(e, NodeEvent::Received { .. })));
        let sent = sent.lock().unwrap();
        assert!(matches!(
            sent.last(),
            Some((_, BvlcMessage::Result { error_code: ErrorCode::HeaderNotUnderstood, marker: Some(0x07), .. }))
        ));
    }

    #[test]
    fn node_send_reinitiates_direct_connection_from_fresh_resolution() {
        let (mut sup, _events, _sent) = supervisor(true);
        sup.start().unwrap();
        sup.on_hub_connector_socket_event(PRIMARY_SLOT, SocketEvent::Connected);

        let peer = Vmac::new([2, 2, 2, 2, 2, 2]);
        let ack = InboundFrame {
            origin: peer,
            destination_options: vec![],
            message: BvlcMessage::AddressResolutionAck {
                payload: b"wss://peer:9999".to_vec(),
            },
        };
        sup.on_hub_connector_socket_event(
            PRIMARY_SLOT,
            SocketEvent::Received {
                pdu: vec![],
                decoded: Some(ack),
            },
        );
        // Discard the connect attempt the ack itself triggers reactively.
        sup.drain_transport_io();

        // No live direct connection to `peer` exists, so this call falls back to the
        // uplink, but the fresh resolution sitting in the table should still kick off a
        // new direct connection attempt instead of pinning every future send to the
        // uplink forever.
        sup.node_send(Some(peer), vec![9]).unwrap();

        let io = sup.drain_transport_io();
        assert!(io
            .iter()
            .any(|i| matches!(i, SupervisorIo::NodeSwitch(Io::Connect(_, _)))));
    }
}
