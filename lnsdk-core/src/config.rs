use core::time::Duration;
use std::fs;
use std::path::{Path, PathBuf};

use bitcoin::Network;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SdkError, SdkResult};

/// Which deployment of the service stack to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    /// Mainnet production services
    Production,
    /// Mainnet staging services
    Staging,
    /// Local regtest stack
    Regtest,
}

impl core::str::FromStr for EnvironmentType {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" => Ok(EnvironmentType::Production),
            "staging" => Ok(EnvironmentType::Staging),
            "regtest" => Ok(EnvironmentType::Regtest),
            other => Err(SdkError::invalid_input(format!("unknown environment {}", other))),
        }
    }
}

/// Greenlight credentials issued to a partner
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreenlightCredentials {
    /// DER encoded device key
    pub device_key: Vec<u8>,
    /// DER encoded device certificate
    pub device_cert: Vec<u8>,
}

/// Greenlight backend parameters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreenlightNodeConfig {
    /// Partner credentials, used on registration
    pub partner_credentials: Option<GreenlightCredentials>,
    /// Invite code, used on registration
    pub invite_code: Option<String>,
}

/// The closed set of node backends
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum NodeBackend {
    /// A hosted Greenlight node with a local signer
    Greenlight {
        /// backend parameters
        config: GreenlightNodeConfig,
    },
}

impl NodeBackend {
    /// Parse a `{"type": ..., "config": ...}` dictionary
    pub fn from_json(value: Value) -> SdkResult<NodeBackend> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SdkError::UnsupportedNodeConfig("missing node type".into()))?
            .to_ascii_lowercase();
        match kind.as_str() {
            "greenlight" => {
                let config = match value.get("config") {
                    None | Some(Value::Null) => GreenlightNodeConfig::default(),
                    Some(c) => serde_json::from_value(c.clone()).map_err(|e| {
                        SdkError::invalid_input(format!("greenlight config: {}", e))
                    })?,
                };
                Ok(NodeBackend::Greenlight { config })
            }
            other => Err(SdkError::UnsupportedNodeConfig(other.to_string())),
        }
    }
}

/// Immutable per-session configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Service environment
    pub environment: EnvironmentType,
    /// Bitcoin network
    pub network: Network,
    /// API key for the service stack
    pub api_key: Option<String>,
    /// Node backend variant
    pub node_backend: NodeBackend,
    /// Working directory for local storage and logs
    pub working_dir: PathBuf,
    /// Service endpoint
    pub service_url: String,
    /// Esplora compatible chain API endpoint
    pub chain_api_url: String,
    /// LSP to select on first connect
    pub default_lsp_id: Option<String>,
    /// Background sync interval, in seconds
    pub sync_interval_secs: u64,
    /// Bound on each network call, in seconds
    pub network_timeout_secs: u64,
    /// Bound on a lightning payment attempt, in seconds
    pub payment_timeout_secs: u64,
    /// How long a reverse swap fee quote stays current, in seconds
    pub fee_quote_ttl_secs: u64,
    /// Upload a backup after each sync that changed state
    pub auto_backup: bool,
    /// Extra blocks to wait past a swap's lock height before offering a refund
    pub swap_refund_safety_blocks: u32,
    /// Routing fee cap, in percent of the amount
    pub max_fee_percent: f64,
    /// Routing fees below this are always accepted
    pub exempt_fee_msat: u64,
}

impl NodeConfig {
    /// Network timeout
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    /// Payment timeout
    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs)
    }

    /// Sync interval
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Fee quote lifetime
    pub fn fee_quote_ttl(&self) -> Duration {
        Duration::from_secs(self.fee_quote_ttl_secs)
    }

    /// The file backing store lives here
    pub fn storage_dir(&self) -> PathBuf {
        self.working_dir.join("storage")
    }
}

/// Builds [`NodeConfig`]s
pub struct ConfigResolver;

impl ConfigResolver {
    /// Build a config, creating the working directory if needed
    pub fn build_config<P: AsRef<Path>>(
        environment: EnvironmentType,
        api_key: Option<String>,
        node_backend: NodeBackend,
        working_dir: P,
    ) -> SdkResult<NodeConfig> {
        let working_dir = working_dir.as_ref().to_path_buf();
        if working_dir.as_os_str().is_empty() {
            return Err(SdkError::StorageUnavailable("empty working dir".into()));
        }
        fs::create_dir_all(&working_dir).map_err(|e| {
            SdkError::StorageUnavailable(format!("create {}: {}", working_dir.display(), e))
        })?;
        if !working_dir.is_dir() {
            return Err(SdkError::StorageUnavailable(format!(
                "{} is not a directory",
                working_dir.display()
            )));
        }
        info!("working dir {}", working_dir.display());

        let (network, service_url, chain_api_url) = match environment {
            EnvironmentType::Production => (
                Network::Bitcoin,
                "https://bs1.breez.technology:443",
                "https://mempool.space/api",
            ),
            EnvironmentType::Staging => (
                Network::Bitcoin,
                "https://bs1-st.breez.technology:443",
                "https://mempool.space/api",
            ),
            EnvironmentType::Regtest => {
                (Network::Regtest, "http://localhost:8088", "http://localhost:3006/api")
            }
        };

        Ok(NodeConfig {
            environment,
            network,
            api_key: api_key.filter(|k| !k.is_empty()),
            node_backend,
            working_dir,
            service_url: service_url.to_string(),
            chain_api_url: chain_api_url.to_string(),
            default_lsp_id: None,
            sync_interval_secs: 60,
            network_timeout_secs: 30,
            payment_timeout_secs: 60,
            fee_quote_ttl_secs: 300,
            auto_backup: true,
            swap_refund_safety_blocks: 0,
            max_fee_percent: 1.0,
            exempt_fee_msat: 20_000,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn build_config_test() {
        let dir = tempfile::tempdir().unwrap();
        let wd = dir.path().join("a/b");
        let config = ConfigResolver::build_config(
            EnvironmentType::Regtest,
            Some("key".into()),
            NodeBackend::Greenlight { config: Default::default() },
            &wd,
        )
        .unwrap();
        assert!(wd.is_dir());
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.storage_dir(), wd.join("storage"));
    }

    #[test]
    fn storage_unavailable_test() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        let err = ConfigResolver::build_config(
            EnvironmentType::Production,
            None,
            NodeBackend::Greenlight { config: Default::default() },
            file.join("sub"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[test]
    fn node_backend_test() {
        let gl = NodeBackend::from_json(json!({"type": "greenlight", "config": {"invite_code": "abc"}}))
            .unwrap();
        match gl {
            NodeBackend::Greenlight { config } => assert_eq!(config.invite_code.as_deref(), Some("abc")),
        }
        assert!(NodeBackend::from_json(json!({"type": "Greenlight"})).is_ok());
        let err = NodeBackend::from_json(json!({"type": "lnd"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedNodeConfig);
        let err = NodeBackend::from_json(json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedNodeConfig);
    }

    #[test]
    fn environment_parse_test() {
        assert_eq!("Staging".parse::<EnvironmentType>().unwrap(), EnvironmentType::Staging);
        assert!("mars".parse::<EnvironmentType>().is_err());
    }
}
