//! Node lifecycle: owns the Supervisor, the transport driver task and graceful shutdown.
//!
//! The Supervisor is shared behind a [`parking_lot::ReentrantMutex`] rather than an async
//! mutex: this binary runs its tokio runtime on a single OS thread
//! (`#[tokio::main(flavor = "current_thread")]` in `main.rs`), so every task that touches
//! the Supervisor does so from the same thread the reentrant mutex is scoped to. That makes
//! the process-wide recursive lock a real single-thread lock instead of a simulated one,
//! and lets a handler that's already inside a `with` call re-enter it without deadlocking.
use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use bacnet_sc_core::{
    DeviceUuid, EventSink, NodeConfig as CoreNodeConfig, NodeEvent, NodeSupervisor, TlsMaterial, Vmac,
};

use crate::codec::JsonEncoder;
use crate::config::NodeConfig;
use crate::transport;

/// Time allowed for spawned tasks to wind down before `shutdown` gives up on them.
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Logs every upward event; stands in for the application layer that would otherwise
/// receive decoded NPDUs and lifecycle notifications, since wiring a BACnet object model
/// onto `ENCAPSULATED_NPDU` payloads is out of scope here.
struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Started => tracing::info!("node started"),
            NodeEvent::Restarted => tracing::info!("node restarted with a fresh vmac"),
            NodeEvent::Stopped => tracing::info!("node stopped"),
            NodeEvent::Received { pdu } => tracing::debug!(len = pdu.len(), "npdu received"),
        }
    }
}

/// Shared handle to the Supervisor. `with` is the only way in; every caller borrows it
/// mutably for the duration of one closure, same as driving `&mut NodeSupervisor` directly.
pub struct SupervisorHandle<S: EventSink> {
    inner: Arc<ReentrantMutex<RefCell<NodeSupervisor<S>>>>,
}

impl<S: EventSink> SupervisorHandle<S> {
    fn new(supervisor: NodeSupervisor<S>) -> Self {
        Self {
            inner: Arc::new(ReentrantMutex::new(RefCell::new(supervisor))),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut NodeSupervisor<S>) -> R) -> R {
        let guard = self.inner.lock();
        f(&mut guard.borrow_mut())
    }
}

impl<S: EventSink> Clone for SupervisorHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub struct Node {
    handle: SupervisorHandle<TracingSink>,
    self_vmac: Arc<Mutex<Vmac>>,
    self_uuid: DeviceUuid,
    tls: TlsMaterial,

    hub_function_listen_port: Option<u16>,
    max_inbound_connections: usize,
    node_switch_listen_port: Option<u16>,
    max_direct_connections: usize,

    cancellation: CancellationToken,
    task_tracker: TaskTracker,
}

impl Node {
    pub fn new(config: NodeConfig) -> eyre::Result<Self> {
        let core_config: CoreNodeConfig = config.to_core_config()?;

        let self_vmac = Arc::new(Mutex::new(core_config.initial_vmac));
        let self_uuid = core_config.uuid;
        let tls = core_config.tls.clone();
        let hub_function_listen_port = core_config
            .hub_function_enabled
            .then_some(core_config.hub_function_listen_port)
            .flatten();
        let max_inbound_connections = core_config.max_inbound_connections;
        let node_switch_listen_port = core_config
            .node_switch_enabled
            .then_some(core_config.direct_connect_listen_port)
            .flatten();
        let max_direct_connections = core_config.max_direct_connections;

        let encoder = JsonEncoder::new(self_vmac.clone());
        let supervisor = NodeSupervisor::init(core_config, TracingSink, Box::new(encoder))?;

        Ok(Self {
            handle: SupervisorHandle::new(supervisor),
            self_vmac,
            self_uuid,
            tls,
            hub_function_listen_port,
            max_inbound_connections,
            node_switch_listen_port,
            max_direct_connections,
            cancellation: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    /// Start the Supervisor and spawn the transport driver; returns once both are armed.
    pub fn run(&self) -> eyre::Result<()> {
        self.handle.with(|supervisor| supervisor.start())?;

        let driver = transport::tungstenite::Driver::new(
            self.handle.clone(),
            self.self_vmac.clone(),
            self.self_uuid,
            self.tls.clone(),
            self.hub_function_listen_port,
            self.max_inbound_connections,
            self.node_switch_listen_port,
            self.max_direct_connections,
        );

        self.task_tracker
            .spawn(driver.run(self.cancellation.clone()));
        self.task_tracker.close();

        Ok(())
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub async fn shutdown(&self) {
        tracing::info!("shutting down node, stopping supervisor and transport tasks");

        self.handle.with(|supervisor| supervisor.stop());
        self.cancellation.cancel();

        select! {
            _ = self.task_tracker.wait() => {}
            _ = sleep(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS)) => {
                tracing::warn!("shutdown timeout reached, exiting anyway");
            }
        }
    }
}
