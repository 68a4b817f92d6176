//! Probe-and-store bandwidth service

use crate::probe::{BandwidthMeasurement, BandwidthProbe};
use crate::store::{BandwidthSample, BandwidthStore, HostKey};
use shrinkwire_core::Result;
use std::sync::Arc;
use tracing::debug;

/// Keeps the bandwidth store up to date from probes
#[derive(Debug, Clone)]
pub struct BandwidthService {
    probe: BandwidthProbe,
    store: Arc<dyn BandwidthStore>,
}

impl BandwidthService {
    /// Create a service
    pub fn new(probe: BandwidthProbe, store: Arc<dyn BandwidthStore>) -> Self {
        Self { probe, store }
    }

    /// Shared store
    pub fn store(&self) -> &Arc<dyn BandwidthStore> {
        &self.store
    }

    /// Probe `url` and store the estimate for its host.
    ///
    /// A failed probe leaves any previous sample untouched.
    pub async fn update_bandwidth_for_host(&self, url: &str) -> Result<(BandwidthSample, BandwidthMeasurement)> {
        let host = HostKey::parse(url)?;
        let measurement = self.probe.measure(url).await?;

        let sample = BandwidthSample::new(host, measurement.bytes_per_ms);
        debug!(host = %sample.host, bytes_per_ms = sample.bytes_per_ms, "Bandwidth stored");
        self.store.set(sample.clone());

        Ok((sample, measurement))
    }

    /// Stored estimate for the host of `url`
    pub fn get_bandwidth_for_host(&self, url: &str) -> Result<Option<BandwidthSample>> {
        let host = HostKey::parse(url)?;
        Ok(self.store.get(&host))
    }

    /// Forget the host of `url`
    pub fn remove_bandwidth_for_host(&self, url: &str) -> Result<Option<BandwidthSample>> {
        let host = HostKey::parse(url)?;
        Ok(self.store.remove(&host))
    }
}
