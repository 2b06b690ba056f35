//! Configuration loader.

use std::path::Path;

use tracing::{debug, info};

use crate::error::ConfigError;
use crate::Config;

/// Configuration file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension.
    pub fn from_extension(path: &str) -> Option<Self> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            Some("toml") => Some(Self::Toml),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }

    /// Parse content in this format.
    pub fn parse<T: serde::de::DeserializeOwned>(&self, content: &str) -> Result<T, ConfigError> {
        match self {
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| ConfigError::parse(*self, e)),
            Self::Toml => toml::from_str(content).map_err(|e| ConfigError::parse(*self, e)),
            Self::Json => serde_json::from_str(content).map_err(|e| ConfigError::parse(*self, e)),
        }
    }
}

impl std::fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Yaml => "YAML",
            Self::Toml => "TOML",
            Self::Json => "JSON",
        };
        f.write_str(name)
    }
}

/// Configuration loader.
pub struct ConfigLoader {
    /// Config file path.
    file_path: Option<String>,

    /// Environment variable prefix.
    env_prefix: Option<String>,

    /// Default values.
    defaults: Config,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new() -> Self {
        Self {
            file_path: None,
            env_prefix: None,
            defaults: Config::default(),
        }
    }

    /// Set the config file path.
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Set default values.
    pub fn with_defaults(mut self, defaults: Config) -> Self {
        self.defaults = defaults;
        self
    }

    /// Load the configuration.
    pub fn load(self) -> Result<Config, ConfigError> {
        let mut config = self.defaults.clone();

        if let Some(ref path) = self.file_path {
            config = self.load_from_file(path)?;
        }

        if let Some(ref prefix) = self.env_prefix {
            self.apply_env_overrides(&mut config, prefix)?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Load from file.
    fn load_from_file(&self, path: &str) -> Result<Config, ConfigError> {
        debug!("Loading configuration from {}", path);

        if !Path::new(path).exists() {
            return Err(ConfigError::FileNotFound(path.to_string()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;

        let format = ConfigFormat::from_extension(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_string()))?;

        let config: Config = format.parse(&content)?;

        info!("Loaded configuration from {}", path);

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&self, config: &mut Config, prefix: &str) -> Result<(), ConfigError> {
        // Model overrides
        if let Ok(val) = std::env::var(format!("{}_MODEL_PATH", prefix)) {
            config.model.path = val;
        }
        if let Ok(val) = std::env::var(format!("{}_MODEL_URL", prefix)) {
            config.model.url = val;
        }
        if let Ok(val) = std::env::var(format!("{}_AUTO_DOWNLOAD", prefix)) {
            config.model.auto_download = val == "true" || val == "1";
        }

        // Conversion overrides
        if let Ok(val) = std::env::var(format!("{}_OUTPUT_PATH", prefix)) {
            config.conversion.output_path = val;
        }
        if let Ok(val) = std::env::var(format!("{}_CALIBRATION_SAMPLES", prefix)) {
            config.conversion.calibration_samples = parse_env(prefix, "CALIBRATION_SAMPLES", &val)?;
        }
        if let Ok(val) = std::env::var(format!("{}_SEED", prefix)) {
            let seed: u64 = parse_env(prefix, "SEED", &val)?;
            config.conversion.seed = Some(seed);
            config.verification.seed = Some(seed);
        }

        // Verification overrides
        if let Ok(val) = std::env::var(format!("{}_VERIFICATION_SAMPLES", prefix)) {
            config.verification.samples = parse_env(prefix, "VERIFICATION_SAMPLES", &val)?;
        }
        if let Ok(val) = std::env::var(format!("{}_MAX_DIFF", prefix)) {
            config.verification.max_diff_threshold = parse_env(prefix, "MAX_DIFF", &val)?;
        }

        // Logging overrides
        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", prefix)) {
            config.logging.level = val;
        }
        if let Ok(val) = std::env::var(format!("{}_LOG_FORMAT", prefix)) {
            config.logging.format = val;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(prefix: &str, key: &str, val: &str) -> Result<T, ConfigError> {
    val.parse().map_err(|_| ConfigError::EnvOverride {
        var: format!("{prefix}_{key}"),
        value: val.to_string(),
    })
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration from default locations.
pub fn load_default_config() -> Result<Config, ConfigError> {
    let paths = [
        "litequant.yaml",
        "litequant.yml",
        "litequant.toml",
        "litequant.json",
    ];

    for path in &paths {
        if Path::new(path).exists() {
            return ConfigLoader::new()
                .with_file(*path)
                .with_env_prefix("LITEQUANT")
                .load();
        }
    }

    ConfigLoader::new().with_env_prefix("LITEQUANT").load()
}

/// Builder for programmatic configuration.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new config builder.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set model path.
    pub fn model_path(mut self, path: impl Into<String>) -> Self {
        self.config.model.path = path.into();
        self
    }

    /// Set artifact output path.
    pub fn output_path(mut self, path: impl Into<String>) -> Self {
        self.config.conversion.output_path = path.into();
        self
    }

    /// Set calibration sample count.
    pub fn calibration_samples(mut self, n: usize) -> Self {
        self.config.conversion.calibration_samples = n;
        self
    }

    /// Set verification sample count.
    pub fn verification_samples(mut self, n: usize) -> Self {
        self.config.verification.samples = n;
        self
    }

    /// Override the acceptability threshold.
    pub fn max_diff_threshold(mut self, threshold: f64) -> Self {
        self.config.verification.max_diff_threshold = threshold;
        self
    }

    /// Seed both samplers.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.conversion.seed = Some(seed);
        self.config.verification.seed = Some(seed.wrapping_add(1));
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
