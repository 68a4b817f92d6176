//! Background metrics computer
//!
//! A single long-lived task drains the compute queue, compresses each captured
//! body with every candidate `(encoding, level)` and records ratio and
//! throughput in the metrics store. Codec work runs on the blocking pool so
//! the request runtime is never stalled.

use crate::compressor::{CompressionLevel, CompressionProvider, CountingSink, ProviderRegistry};
use crate::metrics_store::{CompressionMetric, MetricsStore};
use crate::queue::{ComputeTask, MetricsComputeTaskQueue};
use bytes::Bytes;
use shrinkwire_core::{Error, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sleep between polls of an empty queue
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_secs(1);

/// Lower bound on a measured duration, in milliseconds
const MIN_ELAPSED_MS: f64 = 0.001;

/// Result of compressing one buffer into a counting sink
#[derive(Debug, Clone, Copy)]
struct Measurement {
    compressed: u64,
    elapsed: Duration,
}

fn measure(
    provider: &dyn CompressionProvider,
    data: &[u8],
    level: CompressionLevel,
) -> std::io::Result<Measurement> {
    let mut sink = CountingSink::new();
    let started = Instant::now();
    {
        let mut stream = provider.create_stream(&mut sink, level)?;
        stream.write_all(data)?;
        stream.finish()?;
    }
    Ok(Measurement {
        compressed: sink.written(),
        elapsed: started.elapsed(),
    })
}

/// Drains the compute queue into the metrics store
#[derive(Debug, Clone)]
pub struct BackgroundMetricsComputer {
    registry: Arc<ProviderRegistry>,
    store: Arc<MetricsStore>,
    queue: Arc<MetricsComputeTaskQueue>,
    levels: Vec<CompressionLevel>,
    idle_delay: Duration,
}

impl BackgroundMetricsComputer {
    /// Create a computer; duplicate levels are ignored
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<MetricsStore>,
        queue: Arc<MetricsComputeTaskQueue>,
        levels: &[CompressionLevel],
    ) -> Self {
        let mut unique = Vec::with_capacity(levels.len());
        for level in levels {
            if !unique.contains(level) {
                unique.push(*level);
            }
        }

        Self {
            registry,
            store,
            queue,
            levels: unique,
            idle_delay: DEFAULT_IDLE_DELAY,
        }
    }

    /// Override the empty-queue poll delay
    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    /// Candidate levels
    pub fn levels(&self) -> &[CompressionLevel] {
        &self.levels
    }

    /// Start the worker on the current runtime
    pub fn spawn(self) -> WorkerHandle {
        let token = CancellationToken::new();
        let child = token.child_token();
        let join = tokio::spawn(async move { self.run(child).await });
        WorkerHandle { token, join }
    }

    /// Process tasks until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            levels = ?self.levels,
            idle_delay = ?self.idle_delay,
            "Background metrics computer started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if self.compute_next().await {
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.idle_delay) => {}
            }
        }

        info!(pending = self.queue.len(), "Background metrics computer stopped");
    }

    /// Process one queued task; `false` if the queue was empty
    pub async fn compute_next(&self) -> bool {
        match self.queue.dequeue() {
            Some(task) => {
                self.compute_task(task).await;
                true
            }
            None => false,
        }
    }

    /// Measure every still-missing `(encoding, level)` for `task`.
    ///
    /// Returns the number of metrics stored. The task's buffer is released
    /// when this returns, whatever the outcome.
    pub async fn compute_task(&self, task: ComputeTask) -> usize {
        let size = task.size();
        let mut stored = 0;

        debug!(route = %task.route, size, encodings = ?task.encodings, "Computing compression metrics");

        for encoding in &task.encodings {
            let Some(provider) = self.registry.get(encoding) else {
                warn!(encoding = %encoding, "No compression provider registered, skipping");
                continue;
            };

            for level in &self.levels {
                if !self.store.should_add(&task.route, encoding, *level, size) {
                    debug!(encoding = %encoding, level = %level, size, "Metric already covered");
                    continue;
                }

                match self.compute_metric(provider, &task, *level).await {
                    Ok(metric) => {
                        info!(
                            route = %metric.route,
                            encoding = %metric.encoding,
                            level = %metric.level,
                            size = metric.data_size,
                            ratio = metric.ratio,
                            speed = metric.speed,
                            "Compression metric computed"
                        );
                        if self.store.upsert(metric) {
                            stored += 1;
                        }
                    }
                    Err(e) => {
                        error!(
                            route = %task.route,
                            encoding = %encoding,
                            level = %level,
                            error = %e,
                            "Failed to compute compression metric"
                        );
                    }
                }
            }
        }

        stored
    }

    async fn compute_metric(
        &self,
        provider: &Arc<dyn CompressionProvider>,
        task: &ComputeTask,
        level: CompressionLevel,
    ) -> Result<CompressionMetric> {
        if task.data.is_empty() {
            return Err(Error::Compression("empty body".to_string()));
        }

        let encoding = provider.encoding_name().to_string();
        let provider = Arc::clone(provider);
        let data: Bytes = task.data.clone();
        let size = data.len();

        let measurement = tokio::task::spawn_blocking(move || measure(provider.as_ref(), &data, level))
            .await
            .map_err(|e| Error::Internal(format!("Metrics computation panicked: {}", e)))??;

        let elapsed_ms = (measurement.elapsed.as_secs_f64() * 1000.0).max(MIN_ELAPSED_MS);

        Ok(CompressionMetric {
            encoding,
            route: task.route.clone(),
            level,
            data_size: size as u64,
            ratio: measurement.compressed as f64 / size as f64,
            speed: size as f64 / elapsed_ms,
        })
    }
}

/// Handle to a spawned [`BackgroundMetricsComputer`]
#[derive(Debug)]
pub struct WorkerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop the worker and wait for the in-flight task to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "Background metrics computer terminated abnormally");
        }
    }

    /// Whether the worker task has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
