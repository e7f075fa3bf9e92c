//! Configuration management infrastructure.
//!
//! This module provides configuration file support, allowing users to save
//! and load digest and embedding preferences.

use crate::domain::comdoc::SectorSize;
use crate::domain::crypto::HashAlgorithm;
use crate::infra::error::{SigningError, SigningResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    /// Default hash algorithm for content digests
    pub default_hash_algorithm: String,

    /// Sector size for newly created containers (512 or 4096)
    pub sector_size: u32,

    /// Re-open the container after committing a signature and read it back
    pub verify_after_commit: bool,

    /// Whether an existing signature stream may be overwritten
    pub replace_existing_signature: bool,

    /// Log at debug level unless `RUST_LOG` says otherwise
    pub verbose: bool,
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            default_hash_algorithm: "sha256".to_string(),
            sector_size: 512,
            verify_after_commit: true,
            replace_existing_signature: false,
            verbose: false,
        }
    }
}

impl EngineConfiguration {
    /// The configured hash algorithm.
    ///
    /// # Errors
    /// `ConfigurationError` if the stored name is not a supported algorithm.
    pub fn hash_algorithm(&self) -> SigningResult<HashAlgorithm> {
        self.default_hash_algorithm.parse().map_err(|_| {
            SigningError::ConfigurationError(format!(
                "Invalid hash algorithm: {}",
                self.default_hash_algorithm
            ))
        })
    }

    /// The configured sector size for new containers.
    ///
    /// # Errors
    /// `ConfigurationError` unless the value is 512 or 4096.
    pub fn sector_size(&self) -> SigningResult<SectorSize> {
        SectorSize::from_bytes(self.sector_size).map_err(|_| {
            SigningError::ConfigurationError(format!(
                "Sector size must be 512 or 4096, got {}",
                self.sector_size
            ))
        })
    }

    /// Default `env_logger` filter for the CLI.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    /// `ConfigurationError` naming the first invalid value.
    pub fn validate(&self) -> SigningResult<()> {
        self.hash_algorithm()?;
        self.sector_size()?;
        Ok(())
    }
}

/// Configuration manager for handling config files
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with default path
    pub fn new() -> SigningResult<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Create a configuration manager with custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> SigningResult<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Ok(config_dir.join("comdoc-signer").join("config.toml"))
        } else {
            // Fallback to current directory
            Ok(PathBuf::from("comdoc-signer-config.toml"))
        }
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub fn load_or_create_default(&self) -> SigningResult<EngineConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            log::info!(
                "Configuration file not found, creating default: {}",
                self.config_path.display()
            );
            let default_config = EngineConfiguration::default();
            self.save(&default_config)?;
            Ok(default_config)
        }
    }

    /// Load the file if present, defaults otherwise. Never writes.
    pub fn load_or_default(&self) -> SigningResult<EngineConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            Ok(EngineConfiguration::default())
        }
    }

    /// Load configuration from file
    pub fn load(&self) -> SigningResult<EngineConfiguration> {
        log::info!("Loading configuration from: {}", self.config_path.display());

        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            SigningError::ConfigurationError(format!(
                "Failed to read config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        let config: EngineConfiguration = toml::from_str(&content).map_err(|e| {
            SigningError::ConfigurationError(format!("Failed to parse config file: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &EngineConfiguration) -> SigningResult<()> {
        log::info!("Saving configuration to: {}", self.config_path.display());

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SigningError::ConfigurationError(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| {
            SigningError::ConfigurationError(format!("Failed to serialize config: {e}"))
        })?;

        fs::write(&self.config_path, content).map_err(|e| {
            SigningError::ConfigurationError(format!(
                "Failed to write config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Update a specific configuration value
    pub fn update_value(&self, key: &str, value: &str) -> SigningResult<()> {
        let mut config = self.load_or_default()?;

        match key {
            "default_hash_algorithm" => {
                value.parse::<HashAlgorithm>().map_err(|_| {
                    SigningError::ConfigurationError(format!("Invalid hash algorithm: {value}"))
                })?;
                config.default_hash_algorithm = value.to_string();
            }
            "sector_size" => {
                config.sector_size = value.parse().map_err(|_| {
                    SigningError::ConfigurationError(format!("Invalid sector size: {value}"))
                })?;
            }
            "verify_after_commit" => config.verify_after_commit = parse_bool(value)?,
            "replace_existing_signature" => config.replace_existing_signature = parse_bool(value)?,
            "verbose" => config.verbose = parse_bool(value)?,
            _ => {
                return Err(SigningError::ConfigurationError(format!(
                    "Unknown configuration key: {key}"
                )));
            }
        }

        config.validate()?;
        self.save(&config)
    }

    /// Get the configuration file path
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Export configuration as a portable format
    pub fn export_config(&self, format: ExportFormat) -> SigningResult<String> {
        let config = self.load_or_default()?;

        match format {
            ExportFormat::Toml => toml::to_string_pretty(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("TOML export failed: {e}"))),
            ExportFormat::Json => serde_json::to_string_pretty(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("JSON export failed: {e}"))),
        }
    }

    /// Import configuration from a string
    pub fn import_config(&self, content: &str, format: ExportFormat) -> SigningResult<()> {
        let config: EngineConfiguration = match format {
            ExportFormat::Toml => toml::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("TOML import failed: {e}"))
            })?,
            ExportFormat::Json => serde_json::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("JSON import failed: {e}"))
            })?,
        };

        config.validate()?;
        self.save(&config)
    }
}

/// Configuration export/import formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Toml,
    Json,
}

fn parse_bool(value: &str) -> SigningResult<bool> {
    value
        .parse()
        .map_err(|_| SigningError::ConfigurationError(format!("Invalid boolean value: {value}")))
}
