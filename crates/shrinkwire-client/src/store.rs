//! Per-host bandwidth cache

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http::Uri;
use shrinkwire_core::{Error, Result};
use std::fmt;
use url::Url;

/// Identity of a remote origin: `(scheme, host, port)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    /// URL scheme, lowercase
    pub scheme: String,
    /// Host name or address, lowercase
    pub host: String,
    /// Explicit port, or the scheme's default
    pub port: u16,
}

impl HostKey {
    /// Key of an absolute URL
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Config(format!("Invalid URL '{url}': {e}")))?;
        Self::from_url(&url)
    }

    /// Key of a parsed URL
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("URL '{url}' has no host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Config(format!("URL '{url}' has no port")))?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// Key of an absolute request URI
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        Self::parse(&uri.to_string())
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Latest bandwidth estimate for a host
#[derive(Debug, Clone, PartialEq)]
pub struct BandwidthSample {
    /// Origin the estimate belongs to
    pub host: HostKey,
    /// Estimated bandwidth in bytes per millisecond
    pub bytes_per_ms: f64,
    /// When the estimate was produced
    pub observed_at: DateTime<Utc>,
}

impl BandwidthSample {
    /// Sample observed now
    pub fn new(host: HostKey, bytes_per_ms: f64) -> Self {
        Self {
            host,
            bytes_per_ms,
            observed_at: Utc::now(),
        }
    }
}

/// Concurrent per-host bandwidth storage
pub trait BandwidthStore: Send + Sync + fmt::Debug {
    /// Latest sample for `host`
    fn get(&self, host: &HostKey) -> Option<BandwidthSample>;

    /// Replace the sample for its host
    fn set(&self, sample: BandwidthSample);

    /// Forget `host`, returning the removed sample
    fn remove(&self, host: &HostKey) -> Option<BandwidthSample>;
}

/// [`BandwidthStore`] kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryBandwidthStore {
    samples: DashMap<HostKey, BandwidthSample>,
}

impl InMemoryBandwidthStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hosts with a sample
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no host has a sample
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl BandwidthStore for InMemoryBandwidthStore {
    fn get(&self, host: &HostKey) -> Option<BandwidthSample> {
        self.samples.get(host).map(|s| s.value().clone())
    }

    fn set(&self, sample: BandwidthSample) {
        self.samples.insert(sample.host.clone(), sample);
    }

    fn remove(&self, host: &HostKey) -> Option<BandwidthSample> {
        self.samples.remove(host).map(|(_, sample)| sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_default_ports() {
        let key = HostKey::parse("https://API.example.com/items?id=1").unwrap();
        assert_eq!(key.scheme, "https");
        assert_eq!(key.host, "api.example.com");
        assert_eq!(key.port, 443);

        let explicit = HostKey::parse("http://api.example.com:80/other").unwrap();
        assert_eq!(explicit.port, 80);
        assert_ne!(key, explicit);
        assert_eq!(explicit.to_string(), "http://api.example.com:80");
    }

    #[test]
    fn test_host_key_rejects_relative() {
        assert!(HostKey::parse("/api/items").is_err());
        assert!(HostKey::from_uri(&Uri::from_static("/api/items")).is_err());
    }

    #[test]
    fn test_store_overwrites_per_host() {
        let store = InMemoryBandwidthStore::new();
        let key = HostKey::parse("http://localhost:8080").unwrap();
        assert!(store.get(&key).is_none());

        store.set(BandwidthSample::new(key.clone(), 12.5));
        store.set(BandwidthSample::new(key.clone(), 40.0));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).unwrap().bytes_per_ms, 40.0);

        assert_eq!(store.remove(&key).unwrap().bytes_per_ms, 40.0);
        assert!(store.get(&key).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_zero_is_a_value() {
        let store = InMemoryBandwidthStore::new();
        let key = HostKey::parse("http://localhost:8080").unwrap();
        store.set(BandwidthSample::new(key.clone(), 0.0));
        assert_eq!(store.get(&key).map(|s| s.bytes_per_ms), Some(0.0));
    }
}
