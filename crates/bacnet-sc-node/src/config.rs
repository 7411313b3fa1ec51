//! TOML configuration loading and conversion into [`bacnet_sc_core::NodeConfig`].
//!
//! File-shaped `serde` types loaded via the `config` crate, then converted into the core's
//! runtime types by a `to_core_config`-style method that reads TLS material off disk and
//! validates URLs.
use std::path::{Path, PathBuf};
use std::str::FromStr;

use config::Config;
use eyre::{Context, OptionExt};
use serde::Deserialize;
use tracing::metadata::Level;
use uuid::Uuid;

use bacnet_sc_core::{DeviceUuid, NodeConfig as CoreNodeConfig, TlsMaterial, Vmac, WsUrl};
use bacnet_sc_core::time::LocalDuration;

#[derive(Deserialize)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub tls: TlsConfig,
    pub hub: HubConfig,

    #[serde(default)]
    pub hub_function: HubFunctionConfig,

    #[serde(default)]
    pub node_switch: NodeSwitchConfig,

    #[serde(default)]
    pub logger: LoggerConfig,
}

impl NodeConfig {
    pub fn from_path(path: PathBuf) -> eyre::Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Build the core's runtime configuration from this file-shaped one.
    pub fn to_core_config(&self) -> eyre::Result<CoreNodeConfig> {
        Ok(CoreNodeConfig {
            tls: self.tls.load()?,
            uuid: self.identity.device_uuid()?,
            initial_vmac: self.identity.initial_vmac()?,
            max_local_bvlc_len: self.hub.max_bvlc_len,
            max_local_npdu_len: self.hub.max_npdu_len,
            connect_timeout: LocalDuration::from_secs(self.hub.connect_timeout_secs),
            heartbeat_timeout: LocalDuration::from_secs(self.hub.heartbeat_timeout_secs),
            disconnect_timeout: LocalDuration::from_secs(self.hub.disconnect_timeout_secs),
            reconnect_timeout: LocalDuration::from_secs(self.hub.reconnect_timeout_secs),
            resolution_timeout: LocalDuration::from_secs(self.node_switch.resolution_timeout_secs),
            resolution_freshness_ttl: LocalDuration::from_secs(
                self.node_switch.resolution_freshness_ttl_secs,
            ),
            primary_hub_url: WsUrl::parse(&self.hub.primary_url)
                .map_err(|err| eyre::eyre!("invalid primary_url: {err}"))?,
            failover_hub_url: WsUrl::parse(&self.hub.failover_url)
                .map_err(|err| eyre::eyre!("invalid failover_url: {err}"))?,
            hub_function_enabled: self.hub_function.enabled,
            hub_function_listen_port: self.hub_function.listen_port,
            max_inbound_connections: self.hub_function.max_inbound_connections,
            node_switch_enabled: self.node_switch.enabled,
            direct_connect_listen_port: self.node_switch.listen_port,
            direct_connect_initiate_enable: self.node_switch.initiate_enable,
            direct_connect_accept_enable: self.node_switch.accept_enable,
            max_direct_connections: self.node_switch.max_direct_connections,
            accept_uris: self.node_switch.accept_uris.clone(),
        })
    }
}

#[derive(Deserialize)]
pub struct IdentityConfig {
    /// Stable device identity, as a standard UUID string.
    pub uuid: String,
    /// Initial VMAC, as six colon-separated hex bytes, e.g. `01:02:03:04:05:06`.
    pub initial_vmac: String,
}

impl IdentityConfig {
    fn device_uuid(&self) -> eyre::Result<DeviceUuid> {
        let uuid = Uuid::from_str(&self.uuid).wrap_err("invalid identity.uuid")?;
        Ok(DeviceUuid::new(*uuid.as_bytes()))
    }

    fn initial_vmac(&self) -> eyre::Result<Vmac> {
        let mut bytes = [0u8; 6];
        let mut parts = self.initial_vmac.split(':');
        for byte in &mut bytes {
            let part = parts
                .next()
                .ok_or_eyre("identity.initial_vmac must have exactly six hex bytes")?;
            *byte = u8::from_str_radix(part, 16).wrap_err("invalid hex byte in initial_vmac")?;
        }
        if parts.next().is_some() {
            eyre::bail!("identity.initial_vmac must have exactly six hex bytes");
        }
        Ok(Vmac::new(bytes))
    }
}

#[derive(Deserialize)]
pub struct TlsConfig {
    pub ca_chain_path: PathBuf,
    pub cert_chain_path: PathBuf,
    pub private_key_path: PathBuf,
}

impl TlsConfig {
    fn load(&self) -> eyre::Result<TlsMaterial> {
        Ok(TlsMaterial {
            ca_chain: read(&self.ca_chain_path)?,
            cert_chain: read(&self.cert_chain_path)?,
            private_key: read(&self.private_key_path)?,
        })
    }
}

fn read(path: &Path) -> eyre::Result<Vec<u8>> {
    std::fs::read(path).wrap_err_with(|| format!("failed to read {path:?}"))
}

#[derive(Deserialize)]
pub struct HubConfig {
    pub primary_url: String,
    pub failover_url: String,

    #[serde(default = "default_max_bvlc_len")]
    pub max_bvlc_len: u16,
    #[serde(default = "default_max_npdu_len")]
    pub max_npdu_len: u16,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_disconnect_timeout_secs")]
    pub disconnect_timeout_secs: u64,
    #[serde(default = "default_reconnect_timeout_secs")]
    pub reconnect_timeout_secs: u64,
}

fn default_max_bvlc_len() -> u16 {
    1497
}
fn default_max_npdu_len() -> u16 {
    1497
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_heartbeat_timeout_secs() -> u64 {
    300
}
fn default_disconnect_timeout_secs() -> u64 {
    10
}
fn default_reconnect_timeout_secs() -> u64 {
    5
}

#[derive(Deserialize)]
pub struct HubFunctionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default = "default_max_inbound_connections")]
    pub max_inbound_connections: usize,
}

fn default_max_inbound_connections() -> usize {
    32
}

impl Default for HubFunctionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_port: None,
            max_inbound_connections: default_max_inbound_connections(),
        }
    }
}

#[derive(Deserialize)]
pub struct NodeSwitchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default = "default_initiate_enable")]
    pub initiate_enable: bool,
    #[serde(default = "default_accept_enable")]
    pub accept_enable: bool,
    #[serde(default = "default_max_direct_connections")]
    pub max_direct_connections: usize,
    #[serde(default = "default_resolution_timeout_secs")]
    pub resolution_timeout_secs: u64,
    #[serde(default = "default_resolution_freshness_ttl_secs")]
    pub resolution_freshness_ttl_secs: u64,
    #[serde(default)]
    pub accept_uris: Vec<String>,
}

fn default_initiate_enable() -> bool {
    true
}
fn default_accept_enable() -> bool {
    true
}
fn default_max_direct_connections() -> usize {
    32
}
fn default_resolution_timeout_secs() -> u64 {
    10
}
fn default_resolution_freshness_ttl_secs() -> u64 {
    3600
}

impl Default for NodeSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_port: None,
            initiate_enable: default_initiate_enable(),
            accept_enable: default_accept_enable(),
            max_direct_connections: default_max_direct_connections(),
            resolution_timeout_secs: default_resolution_timeout_secs(),
            resolution_freshness_ttl_secs: default_resolution_freshness_ttl_secs(),
            accept_uris: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "default_level", deserialize_with = "deserialize_level")]
    pub level: Level,
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Level::from_str(&s).map_err(serde::de::Error::custom)
}

fn default_level() -> Level {
    Level::INFO
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}
