use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [fanout]
//                    topic_capacity = 4096
//
//   env var:         CHATTER_FANOUT__TOPIC_CAPACITY=4096   (double underscore = nesting)
//
//   (single underscore stays within field names: CHATTER_AUTH__IDENTITY_HEADER)

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// host=127.0.0.1, identity header off
    Local,
    /// host=0.0.0.0, identity header required (behind an authenticating proxy)
    Proxied,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub fanout: FanoutFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub history: HistoryFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Topic tunables (lives under `[fanout]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FanoutFileConfig {
    /// Messages buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
    /// How often idle topics are swept (0 disables the sweep).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for FanoutFileConfig {
    fn default() -> Self {
        Self {
            topic_capacity: default_topic_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Identity tunables (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Header carrying the user already authenticated by the fronting proxy.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            identity_header: default_identity_header(),
        }
    }
}

/// History API tunables (lives under `[history]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryFileConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: i64,
    #[serde(default = "default_history_max_limit")]
    pub max_limit: i64,
}

impl Default for HistoryFileConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_limit: default_history_max_limit(),
        }
    }
}

pub const DEFAULT_PORT: u16 = 8080;

fn default_topic_capacity() -> usize {
    1024
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_identity_header() -> String {
    "x-authenticated-user".to_string()
}
fn default_history_limit() -> i64 {
    50
}
fn default_history_max_limit() -> i64 {
    500
}

/// Build a figment that layers: defaults → profile defaults → config.toml → CHATTER_* env vars.
///
/// The CLI profile takes priority over the config file profile.
///
/// Env vars use double-underscore for nesting into sections:
///   `CHATTER_AUTH__ENABLED=true`  →  `auth.enabled = true`
///   `CHATTER_FANOUT__TOPIC_CAPACITY=64`  →  `fanout.topic_capacity = 64`
pub fn load_config(data_dir: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    // Pass 1: peek at profile from config.toml/env (CLI overrides file)
    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CHATTER_").split("__"));

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok());

    // Pass 2: rebuild with profile defaults between struct defaults and config.toml
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_to_file_config(profile.as_ref())))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CHATTER_").split("__"))
}

fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    match profile {
        Some(Profile::Local) => FileConfig {
            profile: Some(Profile::Local),
            server: ServerFileConfig {
                host: Some("127.0.0.1".to_string()),
                ..Default::default()
            },
            auth: AuthFileConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        },
        Some(Profile::Proxied) => FileConfig {
            profile: Some(Profile::Proxied),
            server: ServerFileConfig {
                host: Some("0.0.0.0".to_string()),
                ..Default::default()
            },
            auth: AuthFileConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        },
        None => FileConfig::default(),
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Identity configuration (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Whether the tenant endpoint and history API require an identity
    pub enabled: bool,
    /// Lower-cased header name
    pub identity_header: String,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        Self {
            enabled: fc.enabled,
            identity_header: fc.identity_header.trim().to_ascii_lowercase(),
        }
    }
}

/// Fan-out configuration (runtime view).
#[derive(Clone, Debug)]
pub struct FanoutConfig {
    pub topic_capacity: usize,
    /// None disables the idle-topic sweep
    pub sweep_interval: Option<Duration>,
}

impl FanoutConfig {
    pub fn from_file(fc: &FanoutFileConfig) -> Self {
        Self {
            topic_capacity: fc.topic_capacity.max(1),
            sweep_interval: if fc.sweep_interval_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.sweep_interval_secs))
            },
        }
    }
}

/// History query limits (runtime view).
#[derive(Clone, Debug)]
pub struct HistoryConfig {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl HistoryConfig {
    pub fn from_file(fc: &HistoryFileConfig) -> Self {
        let max_limit = fc.max_limit.max(1);
        Self {
            default_limit: fc.default_limit.clamp(1, max_limit),
            max_limit,
        }
    }

    /// Resolve a client-supplied limit against the configured bounds.
    pub fn clamp(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

// =============================================================================
// Directory layout config (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ChatterConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl ChatterConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".chatter"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("chatter.db");

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
