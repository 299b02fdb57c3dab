//! Configuration types for rendezvous-node.
//! Parsed from rendezvous.toml (see `--config`).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::peer_pool::{PoolConfig, DEFAULT_MAX_ADDRESS_LENGTH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default = "default_apps")]
    pub apps: Vec<AppEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Largest inbound WebSocket message accepted, in bytes.
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
    #[serde(default = "default_true")]
    pub log_verbose: bool,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_payload: default_max_payload(),
            log_verbose: true,
            log_format: default_log_format(),
            keepalive_interval_secs: default_keepalive(),
        }
    }
}

/// One signaling application, served under its own URL path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppEntry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub address_sharing: bool,
    #[serde(default = "default_max_address_length")]
    pub max_address_length: usize,
}

impl AppEntry {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.path.clone())
            .with_address_sharing(self.address_sharing)
            .with_max_address_length(self.max_address_length)
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0:12776".into()
}
fn default_max_payload() -> usize {
    1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_log_format() -> String {
    "text".into()
}
fn default_keepalive() -> u64 {
    30
}
fn default_max_address_length() -> usize {
    DEFAULT_MAX_ADDRESS_LENGTH
}
fn default_apps() -> Vec<AppEntry> {
    vec![
        AppEntry {
            name: "CallApp".into(),
            path: "/callapp".into(),
            address_sharing: false,
            max_address_length: DEFAULT_MAX_ADDRESS_LENGTH,
        },
        AppEntry {
            name: "ConferenceApp".into(),
            path: "/conferenceapp".into(),
            address_sharing: true,
            max_address_length: DEFAULT_MAX_ADDRESS_LENGTH,
        },
    ]
}

impl NodeConfig {
    /// Load config from file, or use defaults if missing. Validated either way.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_socket_addr()?;
        if self.server.keepalive_interval_secs == 0 {
            anyhow::bail!("keepalive_interval_secs must be greater than 0");
        }
        if self.server.max_payload == 0 {
            anyhow::bail!("max_payload must be greater than 0");
        }
        if !matches!(self.server.log_format.as_str(), "text" | "json") {
            anyhow::bail!("unsupported log_format: {}", self.server.log_format);
        }
        if self.apps.is_empty() {
            anyhow::bail!("no apps configured");
        }
        for app in &self.apps {
            if !app.path.starts_with('/') {
                anyhow::bail!("app {} path must start with '/': {}", app.name, app.path);
            }
        }
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen_addr {}: {e}", self.server.listen_addr))
    }

    /// Apply the `PORT` / `port` environment override, as set by cloud hosts.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        let port = std::env::var("PORT").or_else(|_| std::env::var("port")).ok();
        self.apply_port_override(port.as_deref())
    }

    /// Replace the port of `listen_addr`. `None` leaves it unchanged.
    pub fn apply_port_override(&mut self, port: Option<&str>) -> anyhow::Result<()> {
        let Some(port) = port else {
            return Ok(());
        };
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid port override {port:?}: {e}"))?;
        let mut addr = self.listen_socket_addr()?;
        addr.set_port(port);
        tracing::info!(port, "listen port overridden from environment");
        self.server.listen_addr = addr.to_string();
        Ok(())
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_interval_secs)
    }

    /// Pool configs, one per distinct path. The first app wins a duplicate path.
    pub fn pool_configs(&self) -> Vec<PoolConfig> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.apps.len());
        for app in &self.apps {
            if !seen.insert(app.path.as_str()) {
                tracing::warn!(name = %app.name, path = %app.path, "duplicate app path ignored");
                continue;
            }
            out.push(app.pool_config());
        }
        out
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            apps: default_apps(),
        }
    }
}
