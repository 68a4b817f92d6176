//! Configuration for adaptive compression

use crate::compressor::{builtin_provider, CompressionLevel};
use crate::mime::DEFAULT_MIME_TYPES;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::worker::DEFAULT_IDLE_DELAY;
use serde::{Deserialize, Serialize};
use shrinkwire_core::types::kbps_to_bytes_per_ms;
use shrinkwire_core::{Error, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Adaptive compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveCompressionConfig {
    /// Enable compression
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Compress responses to HTTPS requests
    #[serde(default)]
    pub enable_for_https: bool,

    /// Content codings in priority order
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,

    /// Compressible MIME types (`type/subtype`, `type/*` or `*/*`)
    #[serde(default = "default_mime_types")]
    pub mime_types: Vec<String>,

    /// MIME types never compressed
    #[serde(default)]
    pub excluded_mime_types: Vec<String>,

    /// Bandwidth in KiB/s above which adaptive mode defers to standard
    #[serde(default = "default_max_bandwidth_kbps")]
    pub max_bandwidth_kbps: f64,

    /// Memory usage percentage above which adaptive mode defers to standard
    #[serde(default = "default_max_memory_percent")]
    pub max_memory_percent: f64,

    /// Levels measured and considered by the decision engine
    #[serde(default = "default_levels")]
    pub levels: Vec<CompressionLevel>,

    /// Level used by standard mode
    #[serde(default = "default_standard_level")]
    pub standard_level: CompressionLevel,

    /// Metrics compute tasks kept before the oldest is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Background worker poll delay on an empty queue
    #[serde(default = "default_idle_delay", with = "humantime_serde")]
    pub idle_delay: Duration,
}

impl Default for AdaptiveCompressionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            enable_for_https: false,
            providers: default_providers(),
            mime_types: default_mime_types(),
            excluded_mime_types: Vec::new(),
            max_bandwidth_kbps: default_max_bandwidth_kbps(),
            max_memory_percent: default_max_memory_percent(),
            levels: default_levels(),
            standard_level: default_standard_level(),
            queue_capacity: default_queue_capacity(),
            idle_delay: default_idle_delay(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_providers() -> Vec<String> {
    vec!["br".to_string(), "gzip".to_string(), "deflate".to_string()]
}

fn default_mime_types() -> Vec<String> {
    DEFAULT_MIME_TYPES.iter().map(|m| m.to_string()).collect()
}

// ~1 Mbit/s
fn default_max_bandwidth_kbps() -> f64 {
    122.0
}

fn default_max_memory_percent() -> f64 {
    100.0
}

fn default_levels() -> Vec<CompressionLevel> {
    CompressionLevel::ALL.to_vec()
}

fn default_standard_level() -> CompressionLevel {
    CompressionLevel::Fastest
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_idle_delay() -> Duration {
    DEFAULT_IDLE_DELAY
}

impl AdaptiveCompressionConfig {
    /// Bandwidth threshold in bytes per millisecond
    pub fn max_bandwidth_bytes_per_ms(&self) -> f64 {
        kbps_to_bytes_per_ms(self.max_bandwidth_kbps)
    }

    /// Candidate levels without duplicates, in configured order
    pub fn unique_levels(&self) -> Vec<CompressionLevel> {
        let mut levels = Vec::with_capacity(self.levels.len());
        for level in &self.levels {
            if !levels.contains(level) {
                levels.push(*level);
            }
        }
        levels
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.max_memory_percent) {
            return Err(Error::Config(format!(
                "max_memory_percent must be within 0..=100, got {}",
                self.max_memory_percent
            )));
        }

        if !self.max_bandwidth_kbps.is_finite() || self.max_bandwidth_kbps <= 0.0 {
            return Err(Error::Config(format!(
                "max_bandwidth_kbps must be positive, got {}",
                self.max_bandwidth_kbps
            )));
        }

        if self.levels.is_empty() {
            return Err(Error::Config("at least one compression level is required".to_string()));
        }

        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be greater than zero".to_string()));
        }

        if let Some(unknown) = self.providers.iter().find(|p| builtin_provider(p).is_none()) {
            return Err(Error::Config(format!("unknown compression provider '{}'", unknown)));
        }

        Ok(())
    }
}

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Config("Unable to detect config format".to_string()))?;

        match ext {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(Error::Config(format!("Unsupported config format: {}", ext))),
        }
    }
}

/// Parse and validate a configuration
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<AdaptiveCompressionConfig> {
    let config: AdaptiveCompressionConfig = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?
        }
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    config.validate()?;
    Ok(config)
}

/// Load a configuration file, format chosen by extension
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<AdaptiveCompressionConfig> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    let format = ConfigFormat::from_path(path)?;

    load_from_str(&content, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AdaptiveCompressionConfig::default();
        assert!(config.enabled);
        assert!(!config.enable_for_https);
        assert_eq!(config.providers, vec!["br", "gzip", "deflate"]);
        assert_eq!(config.levels.len(), 4);
        assert_eq!(config.queue_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bandwidth_threshold_conversion() {
        let config = AdaptiveCompressionConfig {
            max_bandwidth_kbps: 1000.0,
            ..Default::default()
        };
        assert_eq!(config.max_bandwidth_bytes_per_ms(), 1024.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            AdaptiveCompressionConfig {
                max_memory_percent: 120.0,
                ..Default::default()
            },
            AdaptiveCompressionConfig {
                max_bandwidth_kbps: 0.0,
                ..Default::default()
            },
            AdaptiveCompressionConfig {
                levels: Vec::new(),
                ..Default::default()
            },
            AdaptiveCompressionConfig {
                queue_capacity: 0,
                ..Default::default()
            },
            AdaptiveCompressionConfig {
                providers: vec!["lzma".to_string()],
                ..Default::default()
            },
        ];

        for config in bad {
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_unique_levels() {
        let config = AdaptiveCompressionConfig {
            levels: vec![
                CompressionLevel::Optimal,
                CompressionLevel::Fastest,
                CompressionLevel::Optimal,
            ],
            ..Default::default()
        };
        assert_eq!(
            config.unique_levels(),
            vec![CompressionLevel::Optimal, CompressionLevel::Fastest]
        );
    }

    #[test]
    fn test_load_yaml() {
        let yaml = r#"
providers: [gzip, zstd]
mime_types: ["text/*"]
max_bandwidth_kbps: 250
levels: [fastest, smallest_size]
idle_delay: 250ms
"#;
        let config = load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.providers, vec!["gzip", "zstd"]);
        assert_eq!(config.levels, vec![CompressionLevel::Fastest, CompressionLevel::SmallestSize]);
        assert_eq!(config.idle_delay, Duration::from_millis(250));
        assert_eq!(config.standard_level, CompressionLevel::Fastest);
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml = "enable_for_https = true\nqueue_capacity = 8\n";
        let config = load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert!(config.enable_for_https);
        assert_eq!(config.queue_capacity, 8);

        let json = r#"{"max_memory_percent": 80, "standard_level": "optimal"}"#;
        let config = load_from_str(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.max_memory_percent, 80.0);
        assert_eq!(config.standard_level, CompressionLevel::Optimal);
    }

    #[test]
    fn test_parse_errors_are_config_errors() {
        for (content, format) in [
            ("{\"enabled\": ", ConfigFormat::Json),
            ("enabled = [", ConfigFormat::Toml),
            ("levels: [fastest", ConfigFormat::Yaml),
        ] {
            let err = load_from_str(content, format).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{format:?}: {err}");
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "enabled: false").unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert!(!config.enabled);

        assert!(ConfigFormat::from_path(Path::new("config.ini")).is_err());
    }
}
