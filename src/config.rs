//! Configuration loading for ferrokv: YAML file, `CONFIG_FILE_NAME`
//! environment override, and CLI flags, in that precedence order
//! (defaults, then file, then flags).

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME_ENV: &str = "CONFIG_FILE_NAME";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid size string {0:?}: expected '<integer><B|KB|MB>'")]
    InvalidSize(String),
}

/// Parse a size string like `4KB`, `2MB`, `512B` into a byte count.
pub fn parse_size(s: &str) -> Result<usize, ConfigError> {
    let s = s.trim();
    let (digits, unit) = s
        .find(|c: char| !c.is_ascii_digit())
        .map(|i| s.split_at(i))
        .unwrap_or((s, "B"));

    let value: usize = digits
        .parse()
        .map_err(|_| ConfigError::InvalidSize(s.to_string()))?;

    let multiplier = match unit.trim().to_uppercase().as_str() {
        "B" | "" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        _ => return Err(ConfigError::InvalidSize(s.to_string())),
    };

    Ok(value * multiplier)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine type; only `in_memory` is implemented.
    pub engine_type: String,
    pub num_partitions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_type: "in_memory".to_string(),
            num_partitions: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub address: String,
    pub max_connections: usize,
    pub max_message_size: String,
    pub idle_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7070".to_string(),
            max_connections: 0,
            max_message_size: "4KB".to_string(),
            idle_timeout_secs: 0,
        }
    }
}

impl NetworkConfig {
    pub fn max_message_bytes(&self) -> Result<usize, ConfigError> {
        parse_size(&self.max_message_size)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_secs))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub output: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    pub enabled: bool,
    pub batch_size: String,
    pub batch_timeout_ms: u64,
    pub max_segment_size: String,
    pub directory: String,
    pub file_name_prefix: String,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: "4KB".to_string(),
            batch_timeout_ms: 10,
            max_segment_size: "4KB".to_string(),
            directory: "./data/wal".to_string(),
            file_name_prefix: "write_ahead".to_string(),
        }
    }
}

impl WalConfig {
    pub fn batch_bytes(&self) -> Result<usize, ConfigError> {
        parse_size(&self.batch_size)
    }

    pub fn max_segment_bytes(&self) -> Result<usize, ConfigError> {
        parse_size(&self.max_segment_size)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaType {
    Master,
    Slave,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub replica_type: Option<ReplicaType>,
    pub master_address: Option<String>,
    pub sync_interval_ms: u64,
    /// Address a master-role node listens on for replication traffic.
    /// Distinct from `network.address` since the replication wire format
    /// (length-prefixed JSON) is incompatible with the client line
    /// protocol. Not a CLI flag; set only via the YAML config file.
    pub listen_address: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replica_type: None,
            master_address: None,
            sync_interval_ms: 1000,
            listen_address: "127.0.0.1:7071".to_string(),
        }
    }
}

impl ReplicationConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

/// The full server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub engine: EngineConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub wal: WalConfig,
    pub replication: ReplicationConfig,
}

impl Config {
    /// Defaults, then a YAML file (named by `$CONFIG_FILE_NAME`, if set),
    /// then CLI flags — each layer only overrides what it sets.
    pub fn load(cli: &ServerArgs) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if !cli.disable_config {
            if let Ok(path) = std::env::var(CONFIG_FILE_NAME_ENV) {
                config = Self::from_yaml_file(&path)?;
            }
        }

        cli.apply_to(&mut config);
        Ok(config)
    }

    fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: Path::new(path).to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: Path::new(path).to_path_buf(),
            source,
        })
    }
}

/// Server CLI flags.
#[derive(Debug, Parser)]
#[command(name = "ferrokv-server", about = "Replicated key/value store server")]
pub struct ServerArgs {
    /// Engine type (in_memory)
    #[arg(short = 'e', long = "et")]
    pub engine_type: Option<String>,
    /// Listen address
    #[arg(short = 'n', long = "na")]
    pub address: Option<String>,
    /// Max concurrent connections (0 = unbounded)
    #[arg(long = "nmc")]
    pub max_connections: Option<usize>,
    /// Max message size, e.g. 4KB, 2MB, 512B
    #[arg(long = "nms")]
    pub max_message_size: Option<String>,
    /// Idle connection timeout, seconds (0 = disabled)
    #[arg(long = "nt")]
    pub idle_timeout_secs: Option<u64>,
    /// Log level: debug|info|warn|error
    #[arg(long = "ll")]
    pub log_level: Option<String>,
    /// Log output path (defaults to stdout)
    #[arg(long = "lo")]
    pub log_output: Option<String>,
    /// WAL batch byte threshold, e.g. 4KB
    #[arg(long = "wbs")]
    pub wal_batch_size: Option<String>,
    /// WAL batch flush timeout, milliseconds
    #[arg(long = "wbt")]
    pub wal_batch_timeout_ms: Option<u64>,
    /// WAL max segment size, e.g. 4KB
    #[arg(long = "wms")]
    pub wal_max_segment_size: Option<String>,
    /// WAL directory
    #[arg(long = "wd")]
    pub wal_dir: Option<String>,
    /// WAL segment file name prefix
    #[arg(long = "wfn")]
    pub wal_file_name_prefix: Option<String>,
    /// Replica type: master|slave
    #[arg(long = "rt")]
    pub replica_type: Option<String>,
    /// Master address (slave only)
    #[arg(long = "rma")]
    pub master_address: Option<String>,
    /// Replica sync interval, milliseconds
    #[arg(long = "ri")]
    pub sync_interval_ms: Option<u64>,
    /// Ignore CONFIG_FILE_NAME and use flags/defaults only
    #[arg(short = 'd', long)]
    pub disable_config: bool,
}

impl ServerArgs {
    fn apply_to(&self, config: &mut Config) {
        if let Some(v) = &self.engine_type {
            config.engine.engine_type = v.clone();
        }
        if let Some(v) = &self.address {
            config.network.address = v.clone();
        }
        if let Some(v) = self.max_connections {
            config.network.max_connections = v;
        }
        if let Some(v) = &self.max_message_size {
            config.network.max_message_size = v.clone();
        }
        if let Some(v) = self.idle_timeout_secs {
            config.network.idle_timeout_secs = v;
        }
        if let Some(v) = &self.log_level {
            config.logging.level = v.clone();
        }
        if let Some(v) = &self.log_output {
            config.logging.output = Some(v.clone());
        }
        if let Some(v) = &self.wal_batch_size {
            config.wal.batch_size = v.clone();
        }
        if let Some(v) = self.wal_batch_timeout_ms {
            config.wal.batch_timeout_ms = v;
        }
        if let Some(v) = &self.wal_max_segment_size {
            config.wal.max_segment_size = v.clone();
        }
        if let Some(v) = &self.wal_dir {
            config.wal.directory = v.clone();
        }
        if let Some(v) = &self.wal_file_name_prefix {
            config.wal.file_name_prefix = v.clone();
        }
        if let Some(v) = &self.replica_type {
            config.replication.replica_type = match v.to_lowercase().as_str() {
                "master" => Some(ReplicaType::Master),
                "slave" => Some(ReplicaType::Slave),
                _ => config.replication.replica_type,
            };
        }
        if let Some(v) = &self.master_address {
            config.replication.master_address = Some(v.clone());
        }
        if let Some(v) = self.sync_interval_ms {
            config.replication.sync_interval_ms = v;
        }
    }
}

/// Client CLI flags.
#[derive(Debug, Parser)]
#[command(name = "ferrokv-client", about = "Interactive ferrokv client")]
pub struct ClientArgs {
    /// Server address
    #[arg(short = 'a', long, default_value = "127.0.0.1:7070")]
    pub address: String,
    /// Max message size, bytes
    #[arg(short = 'm', long, default_value_t = 4096)]
    pub max_message_size: usize,
    /// Request timeout, seconds
    #[arg(short = 't', long, default_value_t = 5)]
    pub timeout_secs: u64,
}
