//! Hub Connector: maintains a single logical uplink by alternating between a primary
//! and a failover WSS URL with timed reconnect backoff.
//!
//! Exactly two named slots (primary, failover) share one fixed-duration reconnect timer,
//! rather than a pool of peers each tracking their own growing backoff.
use crate::bvlc::InboundFrame;
use crate::error::NodeError;
use crate::ids::WsUrl;
use crate::output::{DisconnectReason, Io, Outbox, SlotId};
use crate::socket::SocketEvent;
use crate::socket_context::{ConnectionRole, SocketContext};
use crate::time::{LocalDuration, LocalTime};

const PRIMARY_SLOT: SlotId = SlotId(0);
const FAILOVER_SLOT: SlotId = SlotId(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubConnectorState {
    Idle,
    ConnectingPrimary,
    ConnectingFailover,
    ConnectedPrimary,
    ConnectedFailover,
    WaitForReconnect,
    WaitForCtxDeinit,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubConnectorEvent {
    ConnectedPrimary,
    ConnectedFailover,
    Disconnected(DisconnectReason),
    Stopped(Option<NodeError>),
    /// A decoded frame arrived on the uplink; undecodable PDUs are logged and
    /// dropped rather than surfaced.
    Received(InboundFrame),
}

pub struct HubConnectorConfig {
    pub primary_url: WsUrl,
    pub failover_url: WsUrl,
    pub reconnect_timeout: LocalDuration,
}

pub struct HubConnector {
    config: HubConnectorConfig,
    state: HubConnectorState,
    ctx: SocketContext,
    reconnect_armed_at: Option<LocalTime>,
    started: bool,
    outbox: Outbox<HubConnectorEvent>,
    /// Error to report once a fatal-connect-triggered teardown reaches `IDLE`.
    pending_stop_error: Option<NodeError>,
}

impl HubConnector {
    pub fn new(config: HubConnectorConfig) -> Result<Self, NodeError> {
        Ok(Self {
            config,
            state: HubConnectorState::Idle,
            ctx: SocketContext::init(ConnectionRole::Initiator, 2)?,
            reconnect_armed_at: None,
            started: false,
            outbox: Outbox::new(),
            pending_stop_error: None,
        })
    }

    pub fn state(&self) -> HubConnectorState {
        self.state
    }

    pub fn outbox(&mut self) -> &mut Outbox<HubConnectorEvent> {
        &mut self.outbox
    }

    /// `IDLE -> CONNECTING_PRIMARY`.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.state != HubConnectorState::Idle {
            return Err(NodeError::InvalidOperation("hub connector already started"));
        }
        self.started = true;
        self.begin_connect_primary()
    }

    fn begin_connect_primary(&mut self) -> Result<(), NodeError> {
        if let Err(err) = self.ctx.connect(PRIMARY_SLOT) {
            self.fail(err.clone());
            return Err(err);
        }
        self.state = HubConnectorState::ConnectingPrimary;
        self.outbox
            .push(Io::Connect(PRIMARY_SLOT, self.config.primary_url.clone()));
        Ok(())
    }

    fn begin_connect_failover(&mut self) {
        if let Err(err) = self.ctx.connect(FAILOVER_SLOT) {
            self.fail(err);
            return;
        }
        self.state = HubConnectorState::ConnectingFailover;
        self.outbox
            .push(Io::Connect(FAILOVER_SLOT, self.config.failover_url.clone()));
    }

    /// Route a fatal connect error through the standard stop path (`WAIT_FOR_CTX_DEINIT`
    /// then back to `IDLE`) instead of parking in `ERROR`, so a later `start()` is never
    /// permanently rejected.
    fn fail(&mut self, err: NodeError) {
        self.pending_stop_error = Some(err);
        self.state = HubConnectorState::WaitForCtxDeinit;
        if self.ctx.begin_deinit() {
            let err = self.pending_stop_error.take();
            self.finish_stop(err);
            return;
        }
        for slot in [PRIMARY_SLOT, FAILOVER_SLOT] {
            self.outbox
                .push(Io::Disconnect(slot, DisconnectReason::Requested));
        }
    }

    /// `stop()` from any non-deinitializing state: begin context teardown.
    pub fn stop(&mut self) {
        if matches!(
            self.state,
            HubConnectorState::WaitForCtxDeinit | HubConnectorState::Idle
        ) {
            return;
        }
        self.state = HubConnectorState::WaitForCtxDeinit;
        if self.ctx.begin_deinit() {
            self.finish_stop(None);
            return;
        }
        for slot in [PRIMARY_SLOT, FAILOVER_SLOT] {
            self.outbox
                .push(Io::Disconnect(slot, DisconnectReason::Requested));
        }
    }

    fn finish_stop(&mut self, error: Option<NodeError>) {
        self.ctx.finish_deinit();
        self.state = HubConnectorState::Idle;
        self.reconnect_armed_at = None;
        if self.started {
            self.outbox.event(HubConnectorEvent::Stopped(error));
        }
        self.started = false;
    }

    pub fn on_socket_event(&mut self, slot: SlotId, event: SocketEvent) {
        let _ = self.ctx.apply_event(slot, &event);

        if self.state == HubConnectorState::WaitForCtxDeinit {
            if self.ctx.is_fully_idle() {
                let err = self.pending_stop_error.take();
                self.finish_stop(err);
            }
            return;
        }

        match event {
            SocketEvent::Connected => self.on_connected(slot),
            SocketEvent::Disconnected(reason) => self.on_disconnected(slot, reason),
            SocketEvent::Received { decoded, .. } => self.on_received(slot, decoded),
        }
    }

    fn on_received(&mut self, slot: SlotId, decoded: Option<InboundFrame>) {
        if !matches!(
            (self.state, slot),
            (HubConnectorState::ConnectedPrimary, PRIMARY_SLOT)
                | (HubConnectorState::ConnectedFailover, FAILOVER_SLOT)
        ) {
            return;
        }
        match decoded {
            Some(frame) => self.outbox.event(HubConnectorEvent::Received(frame)),
            None => tracing::debug!(target: "datalink", "hub connector: undecodable pdu dropped"),
        }
    }

    fn on_connected(&mut self, slot: SlotId) {
        match (self.state, slot) {
            (HubConnectorState::ConnectingPrimary, PRIMARY_SLOT) => {
                self.state = HubConnectorState::ConnectedPrimary;
                self.outbox.event(HubConnectorEvent::ConnectedPrimary);
            }
            (HubConnectorState::ConnectingFailover, FAILOVER_SLOT) => {
                self.state = HubConnectorState::ConnectedFailover;
                self.outbox.event(HubConnectorEvent::ConnectedFailover);
            }
            _ => {}
        }
    }

    fn on_disconnected(&mut self, slot: SlotId, reason: DisconnectReason) {
        if reason == DisconnectReason::DuplicatedVmac {
            self.state = HubConnectorState::Error;
            self.outbox
                .event(HubConnectorEvent::Disconnected(DisconnectReason::DuplicatedVmac));
            self.stop();
            return;
        }

        match (self.state, slot) {
            (HubConnectorState::ConnectingPrimary, PRIMARY_SLOT) => {
                self.begin_connect_failover();
            }
            (HubConnectorState::ConnectingFailover, FAILOVER_SLOT) => {
                self.state = HubConnectorState::WaitForReconnect;
                self.reconnect_armed_at = Some(LocalTime::now());
                self.outbox.push(Io::SetTimer(self.config.reconnect_timeout));
            }
            (HubConnectorState::ConnectedPrimary, PRIMARY_SLOT)
            | (HubConnectorState::ConnectedFailover, FAILOVER_SLOT) => {
                self.outbox.event(HubConnectorEvent::Disconnected(reason));
                let _ = self.begin_connect_primary();
            }
            _ => {}
        }
    }

    /// Sampled on every tick; drives the reconnect timer.
    pub fn tick(&mut self, now: LocalTime) {
        if self.state != HubConnectorState::WaitForReconnect {
            return;
        }
        let Some(armed_at) = self.reconnect_armed_at else {
            return;
        };
        if now.duration_since(armed_at) >= self.config.reconnect_timeout {
            self.reconnect_armed_at = None;
            let _ = self.begin_connect_primary();
        }
    }

    /// Valid only in `CONNECTED_*`; otherwise drops and returns `INVALID_OPERATION`
    /// without retry.
    pub fn send(&mut self, pdu: Vec<u8>) -> Result<(), NodeError> {
        let slot = match self.state {
            HubConnectorState::ConnectedPrimary => PRIMARY_SLOT,
            HubConnectorState::ConnectedFailover => FAILOVER_SLOT,
            _ => return Err(NodeError::InvalidOperation("hub connector is not connected")),
        };
        self.ctx.can_send(slot)?;
        self.outbox.push(Io::Write(slot, pdu));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> HubConnector {
        HubConnector::new(HubConnectorConfig {
            primary_url: WsUrl::parse("wss://h1:9999").unwrap(),
            failover_url: WsUrl::parse("wss://h2:9999").unwrap(),
            reconnect_timeout: LocalDuration::from_secs(5),
        })
        .unwrap()
    }

    fn drain(hc: &mut HubConnector) -> Vec<Io<HubConnectorEvent>> {
        let mut out = Vec::new();
        while let Some(io) = hc.outbox().next() {
            out.push(io);
        }
        out
    }

    #[test]
    fn happy_path_to_primary() {
        let mut hc = connector();
        hc.start().unwrap();
        drain(&mut hc);

        hc.on_socket_event(PRIMARY_SLOT, SocketEvent::Connected);
        let events = drain(&mut hc);

        assert_eq!(hc.state(), HubConnectorState::ConnectedPrimary);
        assert!(matches!(
            events.as_slice(),
            [Io::Event(HubConnectorEvent::ConnectedPrimary)]
        ));
    }

    #[test]
    fn failover_on_primary_disconnect() {
        let mut hc = connector();
        hc.start().unwrap();
        drain(&mut hc);

        hc.on_socket_event(
            PRIMARY_SLOT,
            SocketEvent::Disconnected(DisconnectReason::Transport("timeout".into())),
        );
        let events = drain(&mut hc);

        assert_eq!(hc.state(), HubConnectorState::ConnectingFailover);
        assert!(events
            .iter()
            .any(|io| matches!(io, Io::Connect(slot, _) if *slot == FAILOVER_SLOT)));

        hc.on_socket_event(FAILOVER_SLOT, SocketEvent::Connected);
        let events = drain(&mut hc);
        assert_eq!(hc.state(), HubConnectorState::ConnectedFailover);
        assert!(events
            .iter()
            .any(|io| matches!(io, Io::Event(HubConnectorEvent::ConnectedFailover))));
    }

    #[test]
    fn reconnect_cycle_waits_full_timeout() {
        let mut hc = connector();
        hc.start().unwrap();
        drain(&mut hc);

        hc.on_socket_event(
            PRIMARY_SLOT,
            SocketEvent::Disconnected(DisconnectReason::Transport("refused".into())),
        );
        drain(&mut hc);
        hc.on_socket_event(
            FAILOVER_SLOT,
            SocketEvent::Disconnected(DisconnectReason::Transport("refused".into())),
        );
        drain(&mut hc);

        assert_eq!(hc.state(), HubConnectorState::WaitForReconnect);

        let armed_at = LocalTime::now();
        hc.tick(armed_at);
        assert_eq!(hc.state(), HubConnectorState::WaitForReconnect);

        hc.tick(armed_at + LocalDuration::from_secs(5));
        let events = drain(&mut hc);
        assert_eq!(hc.state(), HubConnectorState::ConnectingPrimary);
        assert!(events
            .iter()
            .any(|io| matches!(io, Io::Connect(slot, _) if *slot == PRIMARY_SLOT)));
    }

    #[test]
    fn duplicated_vmac_triggers_stop() {
        let mut hc = connector();
        hc.start().unwrap();
        drain(&mut hc);
        hc.on_socket_event(PRIMARY_SLOT, SocketEvent::Connected);
        drain(&mut hc);

        hc.on_socket_event(
            PRIMARY_SLOT,
            SocketEvent::Disconnected(DisconnectReason::DuplicatedVmac),
        );
        let events = drain(&mut hc);

        assert!(events.iter().any(|io| matches!(
            io,
            Io::Event(HubConnectorEvent::Disconnected(DisconnectReason::DuplicatedVmac))
        )));
        assert!(events
            .iter()
            .any(|io| matches!(io, Io::Event(HubConnectorEvent::Stopped(None)))));
        // Both slots were already idle (the failover slot never connected), so the
        // context teardown triggered by stop() completes synchronously.
        assert_eq!(hc.state(), HubConnectorState::Idle);
    }

    #[test]
    fn send_before_connected_is_invalid_operation() {
        let mut hc = connector();
        hc.start().unwrap();
        assert_eq!(
            hc.send(vec![1, 2, 3]),
            Err(NodeError::InvalidOperation("hub connector is not connected"))
        );
    }

    #[test]
    fn fatal_connect_error_recovers_to_idle_instead_of_bricking() {
        let mut hc = connector();
        hc.start().unwrap();
        drain(&mut hc);
        assert_eq!(hc.state(), HubConnectorState::ConnectingPrimary);

        // The primary slot is already CONNECTING, so this second attempt is a fatal
        // connect error from the context's point of view.
        let err = hc.begin_connect_primary().unwrap_err();
        assert!(matches!(err, NodeError::InvalidOperation(_)));
        assert_eq!(hc.state(), HubConnectorState::WaitForCtxDeinit);

        // The transport confirms the teardown; the connector reaches IDLE instead of
        // parking in ERROR forever.
        hc.on_socket_event(PRIMARY_SLOT, SocketEvent::Disconnected(DisconnectReason::Requested));
        let events = drain(&mut hc);

        assert_eq!(hc.state(), HubConnectorState::Idle);
        assert!(events
            .iter()
            .any(|io| matches!(io, Io::Event(HubConnectorEvent::Stopped(Some(_))))));

        // A later start() is accepted rather than permanently rejected.
        assert!(hc.start().is_ok());
    }
}
