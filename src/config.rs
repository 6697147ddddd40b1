//! Process configuration read from the environment.

use thiserror::Error;

use crate::advisory::GeminiConfig;
use crate::storage::StorageConfig;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_STORAGE_PATH: &str = "./data/mindcycle.sled";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Remote document store endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    pub base_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub storage: StorageConfig,
    /// `None` runs the cloud scope in process
    pub cloud: Option<CloudConfig>,
    /// `None` disables advisory calls
    pub gemini: Option<GeminiConfig>,
}

impl AppConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Blank values count as unset
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "PORT",
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };

        let mut storage =
            StorageConfig::new(var("STORAGE_PATH").unwrap_or_else(|| DEFAULT_STORAGE_PATH.into()));
        if let Some(mb) = parse_u64(&var, "STORAGE_CACHE_MB")? {
            storage = storage.with_cache_size(mb.saturating_mul(1024 * 1024));
        }
        if let Some(ms) = parse_u64(&var, "STORAGE_FLUSH_MS")? {
            storage = storage.with_flush_interval(ms);
        }

        let cloud = var("CLOUD_STORE_URL").map(|base_url| CloudConfig {
            base_url,
            token: var("CLOUD_STORE_TOKEN"),
        });

        let gemini = var("GEMINI_API_KEY").map(|key| {
            let mut config = GeminiConfig::new(key);
            if let Some(model) = var("GEMINI_MODEL") {
                config = config.with_model(model);
            }
            if let Some(base_url) = var("GEMINI_BASE_URL") {
                config = config.with_base_url(base_url);
            }
            config
        });

        Ok(Self {
            port,
            storage,
            cloud,
            gemini,
        })
    }
}

fn parse_u64(
    var: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value: raw })
        })
        .transpose()
}
