use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use upload_sandbox::ExtractionPolicy;

pub mod defaults;

use crate::errors::{AppError, AppResult};
use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per upload workspace
    #[serde(default = "default_base_directory")]
    pub base_directory: PathBuf,
}

/// Bounds applied while unpacking uploads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_max_extracted_bytes")]
    pub max_extracted_bytes: u64,
    #[serde(default = "default_max_members_per_archive")]
    pub max_members_per_archive: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_base_directory() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DIRECTORY)
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_max_extracted_bytes() -> u64 {
    DEFAULT_MAX_EXTRACTED_BYTES
}

fn default_max_members_per_archive() -> u64 {
    DEFAULT_MAX_MEMBERS_PER_ARCHIVE
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_directory: default_base_directory(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_extracted_bytes: default_max_extracted_bytes(),
            max_members_per_archive: default_max_members_per_archive(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl IngestionConfig {
    pub fn policy(&self) -> ExtractionPolicy {
        ExtractionPolicy::new()
            .max_rounds(self.max_rounds)
            .max_extracted_bytes(self.max_extracted_bytes)
            .max_members_per_archive(self.max_members_per_archive)
    }
}

impl Config {
    pub fn load() -> AppResult<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(&config_file)
    }

    pub fn load_from_file(config_file: &str) -> AppResult<Self> {
        let config = if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(config_file)?;
            toml::from_str(&contents).map_err(|e| AppError::Configuration {
                message: format!("{config_file}: {e}"),
            })?
        } else {
            let default_config = Self::default();
            let contents =
                toml::to_string_pretty(&default_config).map_err(|e| AppError::Configuration {
                    message: e.to_string(),
                })?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
            default_config
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.ingestion.max_rounds == 0 {
            return Err(AppError::Configuration {
                message: "ingestion.max_rounds must be at least 1".to_string(),
            });
        }
        if self.ingestion.max_extracted_bytes == 0 {
            return Err(AppError::Configuration {
                message: "ingestion.max_extracted_bytes must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
