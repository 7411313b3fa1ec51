//! WebSocket transport: dials/accepts connections, drives the Supervisor's tick, and
//! executes the `Io` the Supervisor drains after every tick and every applied event.
//!
//! Each connection's read half, write half and outbound channel are driven together by a
//! single `tokio::select!` loop per connection task; the driver task itself runs
//! independently and is torn down by a shared cancellation token.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eyre::{Context, OptionExt};
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use bacnet_sc_core::{
    DeviceUuid, DisconnectReason, EventSink, Io, LocalTime, SlotId, SocketEvent, SupervisorIo,
    TlsMaterial, Vmac, WsUrl,
};

use crate::codec;
use crate::node::SupervisorHandle;
use crate::transport::{InboundEvent, Pool};

/// How often the Supervisor is ticked regardless of socket activity, driving reconnect
/// backoff and resolution-entry expiry.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

type WriterMap = Arc<Mutex<HashMap<(Pool, SlotId), mpsc::UnboundedSender<Message>>>>;

#[derive(serde::Serialize, serde::Deserialize)]
struct Hello {
    vmac: [u8; 6],
    uuid: [u8; 16],
}

pub struct Driver<S: EventSink> {
    handle: SupervisorHandle<S>,
    self_vmac: Arc<Mutex<Vmac>>,
    self_uuid: DeviceUuid,
    tls: TlsMaterial,
    hub_function_listen_port: Option<u16>,
    max_inbound_connections: usize,
    node_switch_listen_port: Option<u16>,
    max_direct_connections: usize,
}

impl<S: EventSink + 'static> Driver<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: SupervisorHandle<S>,
        self_vmac: Arc<Mutex<Vmac>>,
        self_uuid: DeviceUuid,
        tls: TlsMaterial,
        hub_function_listen_port: Option<u16>,
        max_inbound_connections: usize,
        node_switch_listen_port: Option<u16>,
        max_direct_connections: usize,
    ) -> Self {
        Self {
            handle,
            self_vmac,
            self_uuid,
            tls,
            hub_function_listen_port,
            max_inbound_connections,
            node_switch_listen_port,
            max_direct_connections,
        }
    }

    pub async fn run(self, cancellation: CancellationToken) {
        let client_config = match build_client_config(&self.tls) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::error!(%err, "failed to build tls client config, transport cannot start");
                return;
            }
        };

        let needs_server_config =
            self.hub_function_listen_port.is_some() || self.node_switch_listen_port.is_some();
        let server_config = if needs_server_config {
            match build_server_config(&self.tls) {
                Ok(cfg) => Some(cfg),
                Err(err) => {
                    tracing::error!(%err, "failed to build tls server config, transport cannot start");
                    return;
                }
            }
        } else {
            None
        };

        let writers: WriterMap = Arc::new(Mutex::new(HashMap::new()));
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<InboundEvent>();

        if let Some(port) = self.hub_function_listen_port {
            tokio::spawn(run_acceptor(
                Pool::HubFunction,
                port,
                self.max_inbound_connections,
                0,
                server_config.clone(),
                self.self_vmac.clone(),
                self.self_uuid,
                writers.clone(),
                inbound_tx.clone(),
                cancellation.clone(),
            ));
        }

        if let Some(port) = self.node_switch_listen_port {
            tokio::spawn(run_acceptor(
                Pool::NodeSwitch,
                port,
                self.max_direct_connections,
                self.max_direct_connections,
                server_config.clone(),
                self.self_vmac.clone(),
                self.self_uuid,
                writers.clone(),
                inbound_tx.clone(),
                cancellation.clone(),
            ));
        }

        let mut ticker = interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!("transport driver shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.handle.with(|supervisor| supervisor.tick(LocalTime::now()));
                    self.drain_and_execute(&writers, &inbound_tx, &client_config, &cancellation).await;
                }
                Some(event) = inbound_rx.recv() => {
                    self.apply(event);
                    self.drain_and_execute(&writers, &inbound_tx, &client_config, &cancellation).await;
                }
            }
        }
    }

    fn apply(&self, event: InboundEvent) {
        match event {
            InboundEvent::Socket { pool, slot, event } => self.handle.with(|supervisor| match pool {
                Pool::HubConnector => supervisor.on_hub_connector_socket_event(slot, event),
                Pool::HubFunction => supervisor.on_hub_function_socket_event(slot, event),
                Pool::NodeSwitch => supervisor.on_node_switch_socket_event(slot, event),
            }),
            InboundEvent::PeerIdentified {
                pool,
                slot,
                vmac,
                uuid,
            } => self.handle.with(|supervisor| match pool {
                Pool::HubFunction => {
                    supervisor.register_hub_function_peer(
                        slot,
                        vmac,
                        uuid.unwrap_or_else(|| DeviceUuid::new([0; 16])),
                    );
                }
                Pool::NodeSwitch => supervisor.register_node_switch_peer(slot, vmac),
                Pool::HubConnector => {
                    tracing::trace!(?vmac, "hub identified itself, nothing to register")
                }
            }),
        }
    }

    async fn drain_and_execute(
        &self,
        writers: &WriterMap,
        inbound_tx: &mpsc::UnboundedSender<InboundEvent>,
        client_config: &Arc<ClientConfig>,
        cancellation: &CancellationToken,
    ) {
        let drained = self.handle.with(|supervisor| supervisor.drain_transport_io());
        for sio in drained {
            match sio {
                SupervisorIo::HubConnector(io) => {
                    self.execute(Pool::HubConnector, io, writers, inbound_tx, client_config, cancellation)
                        .await
                }
                SupervisorIo::HubFunction(io) => {
                    self.execute(Pool::HubFunction, io, writers, inbound_tx, client_config, cancellation)
                        .await
                }
                SupervisorIo::NodeSwitch(io) => {
                    self.execute(Pool::NodeSwitch, io, writers, inbound_tx, client_config, cancellation)
                        .await
                }
            }
        }
    }

    async fn execute<E: std::fmt::Debug>(
        &self,
        pool: Pool,
        io: Io<E>,
        writers: &WriterMap,
        inbound_tx: &mpsc::UnboundedSender<InboundEvent>,
        client_config: &Arc<ClientConfig>,
        cancellation: &CancellationToken,
    ) {
        match io {
            Io::Write(slot, pdu) => {
                let sender = writers.lock().unwrap().get(&(pool, slot)).cloned();
                match sender {
                    Some(sender) => {
                        let _ = sender.send(Message::Binary(pdu));
                    }
                    None => tracing::warn!(?pool, slot = slot.0, "write to unconnected slot dropped"),
                }
            }
            Io::Connect(slot, url) => {
                tokio::spawn(spawn_dial(
                    pool,
                    slot,
                    url,
                    self.self_vmac.clone(),
                    self.self_uuid,
                    client_config.clone(),
                    writers.clone(),
                    inbound_tx.clone(),
                    cancellation.clone(),
                ));
            }
            Io::Disconnect(slot, reason) => {
                let sender = writers.lock().unwrap().get(&(pool, slot)).cloned();
                if let Some(sender) = sender {
                    let _ = sender.send(Message::Close(None));
                } else {
                    tracing::trace!(?pool, slot = slot.0, %reason, "disconnect of unconnected slot ignored");
                }
            }
            Io::SetTimer(_) => {}
            Io::Event(event) => tracing::trace!(?pool, ?event, "sub-component event"),
        }
    }
}

fn build_client_config(tls: &TlsMaterial) -> eyre::Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();
    let mut reader = std::io::Cursor::new(&tls.ca_chain);
    for cert in rustls_pemfile::certs(&mut reader) {
        root_store.add(cert.wrap_err("invalid certificate in ca_chain")?)?;
    }
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

fn build_server_config(tls: &TlsMaterial) -> eyre::Result<Arc<ServerConfig>> {
    let mut cert_reader = std::io::Cursor::new(&tls.cert_chain);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("invalid certificate in cert_chain")?;
    let mut key_reader = std::io::Cursor::new(&tls.private_key);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .wrap_err("invalid private key")?
        .ok_or_eyre("no private key found")?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

#[allow(clippy::too_many_arguments)]
async fn spawn_dial(
    pool: Pool,
    slot: SlotId,
    url: WsUrl,
    self_vmac: Arc<Mutex<Vmac>>,
    self_uuid: DeviceUuid,
    client_config: Arc<ClientConfig>,
    writers: WriterMap,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    cancellation: CancellationToken,
) {
    let result = dial(&url, &client_config, pool, slot, &self_vmac, &self_uuid, &writers, &inbound_tx, &cancellation).await;
    if let Err(err) = result {
        tracing::warn!(?pool, slot = slot.0, %url, %err, "connect failed");
        let _ = inbound_tx.send(InboundEvent::Socket {
            pool,
            slot,
            event: SocketEvent::Disconnected(DisconnectReason::Transport(err.to_string())),
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn dial(
    url: &WsUrl,
    client_config: &Arc<ClientConfig>,
    pool: Pool,
    slot: SlotId,
    self_vmac: &Arc<Mutex<Vmac>>,
    self_uuid: &DeviceUuid,
    writers: &WriterMap,
    inbound_tx: &mpsc::UnboundedSender<InboundEvent>,
    cancellation: &CancellationToken,
) -> eyre::Result<()> {
    let parsed = url::Url::parse(url.as_str()).wrap_err("invalid url")?;
    let host = parsed.host_str().ok_or_eyre("url missing host")?.to_string();
    let port = parsed.port_or_known_default().ok_or_eyre("url missing port")?;

    let tcp = TcpStream::connect((host.as_str(), port))
        .await
        .wrap_err("tcp connect failed")?;
    tcp.set_nodelay(true).ok();

    if parsed.scheme() == "wss" {
        let connector = TlsConnector::from(client_config.clone());
        let server_name = ServerName::try_from(host).wrap_err("invalid server name")?;
        let tls_stream = connector.connect(server_name, tcp).await.wrap_err("tls handshake failed")?;
        let (ws, _resp) = tokio_tungstenite::client_async(url.as_str(), tls_stream)
            .await
            .wrap_err("websocket handshake failed")?;
        run_connection(pool, slot, ws, self_vmac.clone(), *self_uuid, writers.clone(), inbound_tx.clone(), cancellation.clone()).await;
    } else {
        let (ws, _resp) = tokio_tungstenite::client_async(url.as_str(), tcp)
            .await
            .wrap_err("websocket handshake failed")?;
        run_connection(pool, slot, ws, self_vmac.clone(), *self_uuid, writers.clone(), inbound_tx.clone(), cancellation.clone()).await;
    }
    Ok(())
}

/// Accepts inbound connections for one acceptor pool (Hub Function or Node Switch), tracking
/// which of its `capacity` raw slot indices are free.
///
/// `bacnet_sc_core`'s acceptor-role [`bacnet_sc_core::SocketContext`] has no slot-occupancy
/// check of its own (unlike the initiator side's `connect`, which refuses a non-idle slot):
/// the transport is the only thing standing between two simultaneous accepts colliding on
/// the same slot index, hence `used` here.
#[allow(clippy::too_many_arguments)]
async fn run_acceptor(
    pool: Pool,
    listen_port: u16,
    capacity: usize,
    slot_offset: usize,
    server_config: Option<Arc<ServerConfig>>,
    self_vmac: Arc<Mutex<Vmac>>,
    self_uuid: DeviceUuid,
    writers: WriterMap,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    cancellation: CancellationToken,
) {
    let listener = match TcpListener::bind(("0.0.0.0", listen_port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(?pool, %err, port = listen_port, "failed to bind acceptor listener");
            return;
        }
    };
    tracing::info!(?pool, port = listen_port, "listening for inbound connections");

    let used: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(vec![false; capacity]));

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            accepted = listener.accept() => {
                let (tcp, peer_addr) = match accepted {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::warn!(?pool, %err, "accept failed");
                        continue;
                    }
                };

                let idx = {
                    let mut guard = used.lock().unwrap();
                    guard.iter().position(|taken| !taken).map(|idx| {
                        guard[idx] = true;
                        idx
                    })
                };
                let Some(idx) = idx else {
                    tracing::warn!(?pool, %peer_addr, "inbound connection pool exhausted, dropping");
                    continue;
                };
                let slot = SlotId(slot_offset + idx);

                tokio::spawn(accept_connection(
                    pool,
                    slot,
                    tcp,
                    server_config.clone(),
                    self_vmac.clone(),
                    self_uuid,
                    writers.clone(),
                    inbound_tx.clone(),
                    cancellation.clone(),
                    used.clone(),
                    idx,
                ));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_connection(
    pool: Pool,
    slot: SlotId,
    tcp: TcpStream,
    server_config: Option<Arc<ServerConfig>>,
    self_vmac: Arc<Mutex<Vmac>>,
    self_uuid: DeviceUuid,
    writers: WriterMap,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    cancellation: CancellationToken,
    used: Arc<Mutex<Vec<bool>>>,
    idx: usize,
) {
    tcp.set_nodelay(true).ok();

    let established = match server_config {
        Some(server_config) => {
            let acceptor = TlsAcceptor::from(server_config);
            match acceptor.accept(tcp).await {
                Ok(tls_stream) => match tokio_tungstenite::accept_async(tls_stream).await {
                    Ok(ws) => {
                        run_connection(pool, slot, ws, self_vmac, self_uuid, writers, inbound_tx.clone(), cancellation).await;
                        true
                    }
                    Err(err) => {
                        tracing::warn!(?pool, slot = slot.0, %err, "websocket handshake failed");
                        false
                    }
                },
                Err(err) => {
                    tracing::warn!(?pool, slot = slot.0, %err, "tls handshake failed");
                    false
                }
            }
        }
        None => match tokio_tungstenite::accept_async(tcp).await {
            Ok(ws) => {
                run_connection(pool, slot, ws, self_vmac, self_uuid, writers, inbound_tx.clone(), cancellation).await;
                true
            }
            Err(err) => {
                tracing::warn!(?pool, slot = slot.0, %err, "websocket handshake failed");
                false
            }
        },
    };

    if !established {
        let _ = inbound_tx.send(InboundEvent::Socket {
            pool,
            slot,
            event: SocketEvent::Disconnected(DisconnectReason::Transport(
                "handshake failed".to_string(),
            )),
        });
    }

    used.lock().unwrap()[idx] = false;
}

/// Drives one already-established connection: exchanges the hello frame, then forwards
/// decoded BVLC-SC frames up and queued writes down until either side closes.
async fn run_connection<Stream>(
    pool: Pool,
    slot: SlotId,
    ws: WebSocketStream<Stream>,
    self_vmac: Arc<Mutex<Vmac>>,
    self_uuid: DeviceUuid,
    writers: WriterMap,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    cancellation: CancellationToken,
) where
    Stream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    let hello = Hello {
        vmac: *self_vmac.lock().unwrap().as_bytes(),
        uuid: *self_uuid.as_bytes(),
    };
    let Ok(hello_bytes) = serde_json::to_vec(&hello) else {
        return;
    };
    if sink.send(Message::Binary(hello_bytes)).await.is_err() {
        return;
    }

    let peer = loop {
        match stream.next().await {
            Some(Ok(Message::Binary(bytes))) => match serde_json::from_slice::<Hello>(&bytes) {
                Ok(hello) => break hello,
                Err(_) => {
                    tracing::warn!(?pool, slot = slot.0, "expected hello frame, got garbage");
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(_)) => return,
            _ => continue,
        }
    };
    let peer_vmac = Vmac::new(peer.vmac);
    let peer_uuid = DeviceUuid::new(peer.uuid);

    let _ = inbound_tx.send(InboundEvent::Socket {
        pool,
        slot,
        event: SocketEvent::Connected,
    });
    if !matches!(pool, Pool::HubConnector) {
        let _ = inbound_tx.send(InboundEvent::PeerIdentified {
            pool,
            slot,
            vmac: peer_vmac,
            uuid: Some(peer_uuid),
        });
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    writers.lock().unwrap().insert((pool, slot), out_tx);

    let disconnect_reason = loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break DisconnectReason::Requested;
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Binary(bytes))) => {
                    let decoded = codec::decode(&bytes);
                    let _ = inbound_tx.send(InboundEvent::Socket {
                        pool,
                        slot,
                        event: SocketEvent::Received { pdu: bytes, decoded },
                    });
                }
                Some(Ok(Message::Close(_))) | None => break DisconnectReason::Requested,
                Some(Ok(_)) => {}
                Some(Err(err)) => break DisconnectReason::Transport(err.to_string()),
            },
            outgoing = out_rx.recv() => match outgoing {
                Some(msg @ Message::Close(_)) => {
                    let _ = sink.send(msg).await;
                    break DisconnectReason::Requested;
                }
                Some(msg) => {
                    if sink.send(msg).await.is_err() {
                        break DisconnectReason::Transport("write failed".to_string());
                    }
                }
                None => break DisconnectReason::Requested,
            },
        }
    };

    writers.lock().unwrap().remove(&(pool, slot));
    let _ = inbound_tx.send(InboundEvent::Socket {
        pool,
        slot,
        event: SocketEvent::Disconnected(disconnect_reason),
    });
}
