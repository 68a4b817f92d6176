//! Common types used throughout Shrinkwire

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Bandwidth probe accuracy tier.
///
/// The discriminant is the probe duration in seconds and is also the value
/// carried on the wire in `X-Bandwidth-Estimation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandwidthAccuracy {
    /// Up to 5 seconds, moderate accuracy
    Quick = 5,
    /// Up to 10 seconds
    Balanced = 10,
    /// Up to 15 seconds
    High = 15,
    /// Up to 20 seconds, best accuracy
    Highest = 20,
}

impl Default for BandwidthAccuracy {
    fn default() -> Self {
        Self::Quick
    }
}

impl BandwidthAccuracy {
    /// All tiers, fastest first
    pub const ALL: [BandwidthAccuracy; 4] = [Self::Quick, Self::Balanced, Self::High, Self::Highest];

    /// Probe duration in whole seconds
    pub fn seconds(self) -> u64 {
        self as u64
    }

    /// Probe duration
    pub fn duration(self) -> Duration {
        Duration::from_secs(self.seconds())
    }

    /// Look up a tier by its wire code
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| *tier as i64 == code)
    }

    /// Wire code sent in `X-Bandwidth-Estimation`
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for BandwidthAccuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quick => write!(f, "quick"),
            Self::Balanced => write!(f, "balanced"),
            Self::High => write!(f, "high"),
            Self::Highest => write!(f, "highest"),
        }
    }
}

impl std::str::FromStr for BandwidthAccuracy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "balanced" => Ok(Self::Balanced),
            "high" => Ok(Self::High),
            "highest" => Ok(Self::Highest),
            other => Err(crate::Error::Config(format!(
                "unknown bandwidth accuracy '{other}'"
            ))),
        }
    }
}

/// Compression mode annotated on a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMethod {
    /// Fixed encoding negotiated from `Accept-Encoding`
    Standard,
    /// Encoding and level chosen from the advertised bandwidth
    Adaptive,
    /// Never compress
    None,
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Standard
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Adaptive => write!(f, "adaptive"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Route matched for the current request.
///
/// Inserted into the request extensions by whatever router sits in front of
/// the compression middleware. `pattern` is the route template (e.g.
/// `/api/items/{id}`), not the concrete path, so metrics aggregate per endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRoute {
    /// Route template
    pub pattern: String,
    /// Compression annotation, `None` when the route carries no annotation
    pub compression: Option<CompressionMethod>,
}

impl MatchedRoute {
    /// Route without compression annotation
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            compression: None,
        }
    }

    /// Annotate the route with a compression mode
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = Some(method);
        self
    }

    /// Effective compression mode; unannotated routes use standard compression
    pub fn compression_method(&self) -> CompressionMethod {
        self.compression.unwrap_or_default()
    }
}

/// Current UTC time in fractional Unix milliseconds
pub fn unix_millis_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1000.0
}

/// Convert kilobytes per second into bytes per millisecond
pub fn kbps_to_bytes_per_ms(kilobytes_per_second: f64) -> f64 {
    kilobytes_per_second * 1024.0 / 1000.0
}
