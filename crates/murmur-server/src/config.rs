//! Server configuration.
//!
//! Settings are read from an optional TOML file and then overridden by
//! environment variables prefixed with `MURMUR_`; nested keys are separated
//! by a double underscore.
//!
//! # Environment Variables
//!
//! - `MURMUR_LISTEN_ADDR`: HTTP listen address. Default: `0.0.0.0:8888`
//! - `MURMUR_LOG__FILTER`: tracing filter used when `RUST_LOG` is unset
//! - `MURMUR_STORAGE__STATIC_PATH`: directory for attachment blobs
//! - `MURMUR_BUS__KIND`: `local` or `redis`
//!
//! # Examples
//!
//! ```bash
//! MURMUR_BUS__KIND=redis MURMUR_BUS__REDIS_URL=redis://cache:6379 murmur-server
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use murmur_hub::hub::{DEFAULT_OUTBOUND_CAPACITY, DEFAULT_PERSIST_CAPACITY, DEFAULT_REQUEST_CAPACITY};
use murmur_hub::HubConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

const ENV_PREFIX: &str = "MURMUR";

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "murmur-server", version, about = "Murmur real-time chat server")]
pub struct Args {
    /// Path to the TOML configuration file (optional)
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(short, long)]
    pub listen: Option<String>,
}

/// Which fan-out bus the client actors publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Route straight into this process's hub
    #[default]
    Local,
    /// Publish to a Redis channel shared by every instance
    Redis,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::Local => write!(f, "local"),
            BusKind::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directives, used when `RUST_LOG` is not set
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,murmur_server=debug,murmur_hub=debug".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// libSQL database file; `None` keeps everything in memory
    pub database_path: Option<PathBuf>,
    /// Directory attachment blobs are written to and served from
    pub static_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: Some(PathBuf::from("./data/murmur.db")),
            static_path: PathBuf::from("./static/files"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub outbound_queue_capacity: usize,
    pub request_queue_capacity: usize,
    pub persist_queue_capacity: usize,
    pub close_superseded_sessions: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: DEFAULT_OUTBOUND_CAPACITY,
            request_queue_capacity: DEFAULT_REQUEST_CAPACITY,
            persist_queue_capacity: DEFAULT_PERSIST_CAPACITY,
            close_superseded_sessions: false,
        }
    }
}

impl HubSettings {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            request_capacity: self.request_queue_capacity,
            close_superseded_sessions: self.close_superseded_sessions,
            persist_capacity: self.persist_queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub kind: BusKind,
    pub redis_url: String,
    pub channel: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::Local,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            channel: "murmur-messages".to_string(),
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub hub: HubSettings,
    pub bus: BusConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8888".to_string(),
            log: LogConfig::default(),
            storage: StorageConfig::default(),
            hub: HubSettings::default(),
            bus: BusConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration for the given command line.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        Self::resolve(args, Self::environment())
    }

    /// Layer the command line over `env` and the file named by `args`.
    fn resolve(args: &Args, env: Environment) -> Result<Self, ConfigError> {
        let mut config = Self::from_sources(&args.config, env)?;
        if let Some(listen) = &args.listen {
            config.listen_addr = listen.clone();
        }
        Ok(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Layer `env` over the (optional) file at `path`, over the defaults.
    pub fn from_sources(path: &Path, env: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    /// Log the effective configuration.
    pub fn log_config(&self) {
        info!("Listening on {}", self.listen_addr);
        match &self.storage.database_path {
            Some(path) => info!("Database: {}", path.display()),
            None => info!("Database: in-memory"),
        }
        info!("Attachment directory: {}", self.storage.static_path.display());
        info!(
            "Hub queues: outbound={} requests={} persist={}",
            self.hub.outbound_queue_capacity,
            self.hub.request_queue_capacity,
            self.hub.persist_queue_capacity
        );
        if self.hub.close_superseded_sessions {
            info!("Superseded sessions: closed on re-registration");
        } else {
            info!("Superseded sessions: left open until their connection ends");
        }
        match self.bus.kind {
            BusKind::Local => info!("Bus: local"),
            BusKind::Redis => info!(
                "Bus: redis (url={}, channel={})",
                self.bus.redis_url, self.bus.channel
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::environment().source(Some(source))
    }

    #[test]
    fn test_defaults_without_file() {
        let config =
            ServerConfig::from_sources(Path::new("/nonexistent/murmur.toml"), env(&[])).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8888");
        assert_eq!(config.bus.kind, BusKind::Local);
        assert_eq!(config.hub.outbound_queue_capacity, DEFAULT_OUTBOUND_CAPACITY);
        assert!(!config.hub.close_superseded_sessions);
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
listen_addr = "127.0.0.1:9000"

[hub]
outbound_queue_capacity = 16

[bus]
kind = "redis"
channel = "from-file"
"#
        )
        .unwrap();

        let config = ServerConfig::from_sources(
            file.path(),
            env(&[
                ("MURMUR_BUS__CHANNEL", "from-env"),
                ("MURMUR_HUB__CLOSE_SUPERSEDED_SESSIONS", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.hub.outbound_queue_capacity, 16);
        assert!(config.hub.close_superseded_sessions);
        assert_eq!(config.bus.kind, BusKind::Redis);
        assert_eq!(config.bus.channel, "from-env");
        assert_eq!(config.bus.redis_url, BusConfig::default().redis_url);
    }

    #[test]
    fn test_listen_flag_wins() {
        let args = Args {
            config: PathBuf::from("/nonexistent/murmur.toml"),
            listen: Some("127.0.0.1:1234".to_string()),
        };
        let config = ServerConfig::resolve(&args, env(&[("MURMUR_LISTEN_ADDR", "0.0.0.0:7000")]))
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:1234");
    }

    #[test]
    fn test_hub_config_mapping() {
        let settings = HubSettings {
            outbound_queue_capacity: 4,
            request_queue_capacity: 32,
            persist_queue_capacity: 64,
            close_superseded_sessions: true,
        };
        let hub = settings.hub_config();
        assert_eq!(hub.request_capacity, 32);
        assert_eq!(hub.persist_capacity, 64);
        assert!(hub.close_superseded_sessions);
    }
}
