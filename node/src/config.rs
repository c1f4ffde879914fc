//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};

use crate::NodeError;

/// Configuration for an Opal node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub logger: LoggerConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub genesis: GenesisConfig,

    #[serde(default)]
    pub consensus: ConsensusConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Which network to join: "mainnet" or "testnet".
    #[serde(default = "default_network")]
    pub network: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Filter level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen port, kept in string form for the seeder handshake.
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default)]
    pub seeder: SeederConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SeederConfig {
    /// Ordered list of voucher seeder addresses.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Fixed peer list, honored on testnet only.
    #[serde(default)]
    pub fixed: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Storage backend: "lmdb" or "memory".
    #[serde(default = "default_db_driver")]
    pub driver: String,
    /// Storage directory (LMDB only).
    #[serde(default = "default_db_dir")]
    pub dir: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Enables the test-harness genesis bootstrap.
    #[serde(default)]
    pub legacy: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Base phase timeout in milliseconds; doubles on timeout, capped at
    /// sixty seconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Whether this node generates scores (holds a bid).
    #[serde(default)]
    pub generate: bool,
}

fn default_network() -> String {
    "testnet".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_port() -> String {
    "7446".to_string()
}

fn default_db_driver() -> String {
    "lmdb".to_string()
}

fn default_db_dir() -> String {
    "./opal_data".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            seeder: SeederConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: default_db_driver(),
            dir: default_db_dir(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            generate: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Whether this node runs against the test network.
    pub fn is_testnet(&self) -> bool {
        self.general.network == "testnet"
    }

    /// The listen port as an integer.
    pub fn port(&self) -> Result<u16, NodeError> {
        self.network
            .port
            .parse()
            .map_err(|_| NodeError::Config(format!("invalid port: {}", self.network.port)))
    }
}
