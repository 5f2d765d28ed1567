//! Application configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::discovery::similarity::SimilarityKind;
use crate::error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// HTTP transport settings
    pub http: HttpConfig,

    /// Crawler settings
    pub discovery: DiscoveryConfig,

    /// Path guessing settings
    pub guesser: GuesserConfig,

    /// Vector injection settings
    pub injection: InjectionConfig,

    /// Anomaly detection settings
    pub detection: DetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub request_timeout: u64,

    /// Maximum redirect depth
    pub max_redirects: usize,

    /// User agent string
    pub user_agent: String,

    /// Retries for transient transport failures
    pub max_retries: u32,

    /// Base backoff between retries in milliseconds (multiplied by attempt)
    pub retry_backoff_ms: u64,

    /// Accept self-signed certificates on the target
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum link depth from the seed URL
    pub max_depth: usize,

    /// Maximum pages fetched by the crawler
    pub max_pages: usize,

    /// Maximum concurrent discovery requests
    pub max_concurrent: usize,

    /// Delay between crawl batches in milliseconds
    pub delay_ms: u64,

    /// URL regexes that are never requested
    pub exclude_patterns: Vec<String>,

    /// Hidden field names that should be injected anyway
    pub force_injectable: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuesserConfig {
    /// Body similarity strategy used against the soft-404 baseline
    pub similarity: SimilarityKind,

    /// Minimum dissimilarity (0.0 - 1.0) for a same-status candidate to exist
    pub dissimilarity_threshold: f64,

    /// Extensions used when no extension list is supplied. Empty means bare
    /// words only.
    pub default_extensions: Vec<String>,

    /// Maximum concurrent probes
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Maximum concurrent injection requests
    pub max_concurrent: usize,

    /// Delay before each injection request in milliseconds
    pub delay_ms: u64,

    /// Buffered exchanges between injector and detector
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Latency in milliseconds above which a response is slow
    pub slow_threshold_ms: u64,

    /// Characters used when no sanitized-chars list is supplied
    pub sanitized_chars: Vec<String>,

    /// Report 4xx/5xx responses to injected requests
    pub flag_error_status: bool,

    /// Characters of context kept on each side of an evidence match
    pub evidence_radius: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: 30,
            max_redirects: 10,
            user_agent: format!("Surfacer/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 2,
            retry_backoff_ms: 250,
            accept_invalid_certs: false,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_pages: 500,
            max_concurrent: 8,
            delay_ms: 0,
            exclude_patterns: vec![
                r"logout".to_string(),
                r"phpids=on".to_string(),
                r"\.(pdf|zip|png|jpe?g|gif|ico|css|woff2?)(\?|$)".to_string(),
            ],
            force_injectable: Vec::new(),
        }
    }
}

impl Default for GuesserConfig {
    fn default() -> Self {
        Self {
            similarity: SimilarityKind::TokenJaccard,
            dissimilarity_threshold: 0.2,
            default_extensions: Vec::new(),
            max_concurrent: 8,
        }
    }
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            delay_ms: 0,
            channel_capacity: 256,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 500,
            sanitized_chars: vec!["<".to_string(), ">".to_string()],
            flag_error_status: true,
            evidence_radius: 40,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => match Self::default_config_path() {
                Ok(p) => p,
                Err(_) => {
                    tracing::info!("No configuration directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).map_err(|source| ConfigError::ReadError {
                    path: config_path.display().to_string(),
                    source,
                })?;

            let config: Config =
                toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

            tracing::info!("Loaded configuration from {:?}", config_path);
            Ok(config)
        } else if path.is_some() {
            Err(ConfigError::ReadError {
                path: config_path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            })
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Serialize the configuration as pretty TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::ValidationError {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.http.request_timeout == 0 {
            return Err(invalid("http.request_timeout", "must be greater than 0"));
        }
        if self.discovery.max_concurrent == 0 {
            return Err(invalid("discovery.max_concurrent", "must be greater than 0"));
        }
        if self.discovery.max_pages == 0 {
            return Err(invalid("discovery.max_pages", "must be greater than 0"));
        }
        if self.guesser.max_concurrent == 0 {
            return Err(invalid("guesser.max_concurrent", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.guesser.dissimilarity_threshold) {
            return Err(invalid("guesser.dissimilarity_threshold", "must be between 0.0 and 1.0"));
        }
        if self.injection.max_concurrent == 0 {
            return Err(invalid("injection.max_concurrent", "must be greater than 0"));
        }
        if self.injection.channel_capacity == 0 {
            return Err(invalid("injection.channel_capacity", "must be greater than 0"));
        }
        for pattern in &self.discovery.exclude_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(invalid("discovery.exclude_patterns", &e.to_string()));
            }
        }

        Ok(())
    }

    /// Get default configuration file path
    fn default_config_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("io", "surfacer", "surfacer")
            .ok_or(ConfigError::NoConfigDir)?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("io", "surfacer", "surfacer")
            .ok_or(ConfigError::NoConfigDir)?;

        Ok(dirs.data_dir().to_path_buf())
    }
}
