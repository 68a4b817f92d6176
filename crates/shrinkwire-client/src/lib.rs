//! # Shrinkwire Client
//!
//! Client half of bandwidth-aware compression: measure the bandwidth to a
//! server with a timed probe, remember it per host, and advertise it on
//! every subsequent request so the server can pick the cheapest encoding.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod client;
pub mod config;
pub mod probe;
pub mod service;
pub mod store;

pub use client::AdaptiveCompressionClient;
pub use config::ProbeConfig;
pub use probe::{estimate_bandwidth, BandwidthMeasurement, BandwidthProbe, ClientBody};
pub use service::BandwidthService;
pub use store::{BandwidthSample, BandwidthStore, HostKey, InMemoryBandwidthStore};
