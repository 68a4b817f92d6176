//! Bandwidth-aware response compression for Shrinkwire
//!
//! Provides:
//! - Pluggable compression providers (brotli, gzip, deflate, zstd)
//! - Accept-Encoding negotiation and MIME filtering
//! - An online store of measured compression ratio and throughput
//! - A background worker refreshing those metrics off the request path
//! - A decision engine minimising compress + transfer time per response
//! - The bandwidth echo responder used by client probes
//!
//! Wire [`AdaptiveCompressionMiddleware`] and [`BandwidthEstimationMiddleware`]
//! into the middleware chain and spawn the metrics computer once at startup.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod body;
pub mod compressor;
pub mod config;
pub mod echo;
pub mod engine;
pub mod memory;
pub mod metrics_store;
pub mod middleware;
pub mod mime;
pub mod negotiate;
pub mod queue;
pub mod service;
pub mod worker;

pub use compressor::{CompressionLevel, CompressionProvider, ProviderRegistry};
pub use config::{AdaptiveCompressionConfig, ConfigFormat};
pub use echo::{BandwidthEstimationMiddleware, RequestAborted};
pub use engine::{CompressionDecision, DecisionEngine};
pub use memory::{MemoryProfiler, StaticMemoryProfiler, SystemMemoryProfiler};
pub use metrics_store::{CompressionMetric, MetricsStore};
pub use middleware::AdaptiveCompressionMiddleware;
pub use mime::MimeFilter;
pub use queue::{ComputeTask, ComputeTaskScheduler, MetricsComputeTaskQueue};
pub use worker::{BackgroundMetricsComputer, WorkerHandle};
