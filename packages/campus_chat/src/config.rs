use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    port = 8000
//
//   env var:         CAMPUS_SERVER__PORT=8000   (double underscore = nesting)
//
//   (single underscore stays within field names: CAMPUS_CHAT__SEND_QUEUE_CAPACITY)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
    #[serde(default)]
    pub database: DatabaseFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Chat channel tunables (lives under `[chat]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    /// Outbound frames buffered per connection before a forward is dropped.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

/// SQLite pool tunables (lives under `[database]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseFileConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseFileConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_send_queue_capacity() -> usize {
    64
}
fn default_max_connections() -> u32 {
    5
}

/// Build a figment that layers: defaults → config.toml → CAMPUS_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `CAMPUS_SERVER__PORT=9000`  →  `server.port = 9000`
///   `CAMPUS_CHAT__SEND_QUEUE_CAPACITY=16`  →  `chat.send_queue_capacity = 16`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CAMPUS_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Server configuration for runtime behavior.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Channel-related settings
    pub chat: ChatConfig,
    /// Pool size for the SQLite store
    pub db_max_connections: u32,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Capacity of each connection's outbound queue
    pub send_queue_capacity: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            chat: ChatConfig {
                send_queue_capacity: fc.chat.send_queue_capacity.max(1),
            },
            db_max_connections: fc.database.max_connections.max(1),
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

// =============================================================================
// Directory layout config (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct CampusConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl CampusConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".campus_chat"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("campus_chat.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)
                .with_context(|| format!("Failed to delete database: {:?}", self.db_path))?;
            info!("Database reset: {:?}", self.db_path);

            let wal_path = self.db_path.with_extension("db-wal");
            if wal_path.exists() {
                std::fs::remove_file(&wal_path)?;
            }
            let shm_path = self.db_path.with_extension("db-shm");
            if shm_path.exists() {
                std::fs::remove_file(&shm_path)?;
            }
        }
        Ok(())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
