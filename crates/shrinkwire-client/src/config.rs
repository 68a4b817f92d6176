//! Client-side probe configuration

use serde::{Deserialize, Serialize};
use shrinkwire_core::types::kbps_to_bytes_per_ms;
use shrinkwire_core::BandwidthAccuracy;

/// Bandwidth probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Probe duration tier
    #[serde(default)]
    pub accuracy: BandwidthAccuracy,

    /// Measure latency from the server's `X-Sent-Timestamp` instead of the
    /// round trip. Requires synchronised clocks.
    #[serde(default)]
    pub use_response_sent_time: bool,

    /// Server-side bandwidth threshold in KiB/s, used for reporting only
    #[serde(default = "default_max_bandwidth_kbps")]
    pub max_bandwidth_kbps: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            accuracy: BandwidthAccuracy::default(),
            use_response_sent_time: false,
            max_bandwidth_kbps: default_max_bandwidth_kbps(),
        }
    }
}

fn default_max_bandwidth_kbps() -> f64 {
    122.0
}

impl ProbeConfig {
    /// Probe with the given tier
    pub fn with_accuracy(mut self, accuracy: BandwidthAccuracy) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Use the server send timestamp latency model
    pub fn with_sent_timestamp(mut self, enabled: bool) -> Self {
        self.use_response_sent_time = enabled;
        self
    }

    /// Whether `bytes_per_ms` is above the server threshold, so adaptive
    /// compression will defer to standard compression
    pub fn exceeds_threshold(&self, bytes_per_ms: f64) -> bool {
        bytes_per_ms > kbps_to_bytes_per_ms(self.max_bandwidth_kbps)
    }
}
