//! On-disk node configuration (spec §6): where identity/knowledge/firewall
//! rules live, which addresses to bind, and how to reach the Hub and the
//! wider DHT bootstrap set.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use lib_transport::webrtc_transport::IceServers;

fn default_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".dpc")
}

fn default_dht_bind() -> SocketAddr {
    "0.0.0.0:9330".parse().unwrap()
}

fn default_tls_bind() -> SocketAddr {
    "0.0.0.0:9331".parse().unwrap()
}

fn default_stun_urls() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

/// A node's full runtime configuration, loaded from `<home>/config.toml`
/// and overridable by CLI flags (spec §6's config layer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for identity, knowledge, and firewall rules.
    pub home: PathBuf,
    pub dht_bind: SocketAddr,
    pub tls_bind: SocketAddr,
    /// DHT bootstrap contacts, `host:port`.
    pub bootstrap_seeds: Vec<SocketAddr>,
    /// Federation Hub WebSocket base, e.g. `wss://hub.example.com`. Absent
    /// when this node runs hub-less (spec §4.12 `FULLY_OFFLINE`/`HUB_OFFLINE`).
    pub hub_ws_base: Option<String>,
    pub hub_jwt: Option<String>,
    pub stun_urls: Vec<String>,
    pub turn_urls: Vec<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
    /// Consensus approval threshold in `[0, 1]` (spec §4.8 default 0.75).
    pub consensus_threshold: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            dht_bind: default_dht_bind(),
            tls_bind: default_tls_bind(),
            bootstrap_seeds: Vec::new(),
            hub_ws_base: None,
            hub_jwt: None,
            stun_urls: default_stun_urls(),
            turn_urls: Vec::new(),
            turn_username: None,
            turn_credential: None,
            consensus_threshold: lib_consensus_dpc::DEFAULT_CONSENSUS_THRESHOLD,
        }
    }
}

impl NodeConfig {
    pub fn config_path(home: &Path) -> PathBuf {
        home.join("config.toml")
    }

    /// Loads `<home>/config.toml`, falling back to defaults (with `home`
    /// overridden) if no file exists yet.
    pub fn load(home: &Path) -> anyhow::Result<Self> {
        let path = Self::config_path(home);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let mut config: NodeConfig = toml::from_str(&text)?;
                config.home = home.to_path_buf();
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(NodeConfig { home: home.to_path_buf(), ..Default::default() })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.home)?;
        let text = toml::to_string_pretty(self)?;
        std::fs::write(Self::config_path(&self.home), text)?;
        Ok(())
    }

    pub fn ice_servers(&self) -> IceServers {
        IceServers {
            stun_urls: self.stun_urls.clone(),
            turn_urls: self.turn_urls.clone(),
            turn_username: self.turn_username.clone(),
            turn_credential: self.turn_credential.clone(),
        }
    }

    pub fn firewall_rules_path(&self) -> PathBuf {
        self.home.join(".dpc_access")
    }

    pub fn knowledge_root(&self) -> PathBuf {
        self.home.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_loads_defaults_with_home_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::load(dir.path()).unwrap();
        assert_eq!(config.home, dir.path());
        assert_eq!(config.consensus_threshold, lib_consensus_dpc::DEFAULT_CONSENSUS_THRESHOLD);
    }

    #[test]
    fn saved_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::load(dir.path()).unwrap();
        config.hub_ws_base = Some("wss://hub.example.com".to_string());
        config.save().unwrap();

        let reloaded = NodeConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded.hub_ws_base.as_deref(), Some("wss://hub.example.com"));
    }
}
