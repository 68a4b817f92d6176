//! Metrics compute queue
//!
//! Producers are request handlers handing over captured bodies; the single
//! consumer is the background metrics computer. The queue is bounded: when it
//! is full the oldest task is displaced so enqueueing never blocks or fails.

use crate::compressor::CompressionLevel;
use crate::metrics_store::{in_size_band, MetricsStore};
use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of queued tasks before the oldest is dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Request to measure every candidate codec on a captured response body
pub struct ComputeTask {
    id: u64,
    /// Route template the body belongs to
    pub route: String,
    /// Encodings the client accepted
    pub encodings: Vec<String>,
    /// Captured uncompressed body, owned by the task until it is processed
    pub data: Bytes,
}

impl ComputeTask {
    /// Create a task; ownership of `data` moves into the task
    pub fn new(route: impl Into<String>, encodings: Vec<String>, data: Bytes) -> Self {
        Self {
            id: 0,
            route: route.into(),
            encodings,
            data,
        }
    }

    /// Captured body size in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for ComputeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeTask")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("encodings", &self.encodings)
            .field("size", &self.data.len())
            .finish()
    }
}

#[derive(Debug)]
struct PendingTask {
    id: u64,
    encodings: Vec<String>,
    size: u64,
}

impl PendingTask {
    fn is_equivalent(&self, encodings: &[String], size: u64) -> bool {
        encodings
            .iter()
            .any(|e| self.encodings.iter().any(|q| q.eq_ignore_ascii_case(e)))
            && in_size_band(self.size, size)
    }
}

fn route_key(route: &str) -> String {
    route.to_ascii_lowercase()
}

/// Bounded multi-producer queue of compute tasks
pub struct MetricsComputeTaskQueue {
    tasks: ArrayQueue<ComputeTask>,
    /// Waiting tasks per lowercased route
    pending: DashMap<String, Vec<PendingTask>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl MetricsComputeTaskQueue {
    /// Create a queue holding at most `capacity` tasks (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: ArrayQueue::new(capacity.max(1)),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a task, displacing the oldest one if the queue is full
    pub fn enqueue(&self, mut task: ComputeTask) {
        task.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending
            .entry(route_key(&task.route))
            .or_default()
            .push(Self::pending_for(&task));
        self.push(task);
    }

    /// Queue `task` unless an equivalent task is already waiting.
    ///
    /// The check and the claim happen under the route's entry lock, so
    /// concurrent callers for the same route and size band queue one task.
    /// Returns whether the task was queued.
    pub fn enqueue_unique(&self, mut task: ComputeTask) -> bool {
        {
            let mut waiting = self.pending.entry(route_key(&task.route)).or_default();
            if waiting
                .iter()
                .any(|pending| pending.is_equivalent(&task.encodings, task.size()))
            {
                return false;
            }
            task.id = self.next_id.fetch_add(1, Ordering::Relaxed);
            waiting.push(Self::pending_for(&task));
        }

        self.push(task);
        true
    }

    fn pending_for(task: &ComputeTask) -> PendingTask {
        PendingTask {
            id: task.id,
            encodings: task.encodings.clone(),
            size: task.size(),
        }
    }

    fn push(&self, task: ComputeTask) {
        if let Some(displaced) = self.tasks.force_push(task) {
            self.release(&displaced);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                route = %displaced.route,
                size = displaced.data.len(),
                "Metrics compute queue full, dropped oldest task"
            );
        }
    }

    fn release(&self, task: &ComputeTask) {
        let key = route_key(&task.route);
        if let Some(mut waiting) = self.pending.get_mut(&key) {
            waiting.retain(|pending| pending.id != task.id);
        }
        self.pending.remove_if(&key, |_, waiting| waiting.is_empty());
    }

    /// Take the oldest task, `None` when empty
    pub fn dequeue(&self) -> Option<ComputeTask> {
        let task = self.tasks.pop()?;
        self.release(&task);
        Some(task)
    }

    /// `false` if an equivalent task is already waiting.
    ///
    /// Equivalent means same route (case-insensitive), at least one shared
    /// encoding and a size inside the dedup band.
    pub fn should_enqueue(&self, encodings: &[String], route: &str, size: u64) -> bool {
        self.pending.get(&route_key(route)).map_or(true, |waiting| {
            !waiting
                .iter()
                .any(|pending| pending.is_equivalent(encodings, size))
        })
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is queued
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Maximum number of queued tasks
    pub fn capacity(&self) -> usize {
        self.tasks.capacity()
    }

    /// Tasks dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MetricsComputeTaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl fmt::Debug for MetricsComputeTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsComputeTaskQueue")
            .field("len", &self.tasks.len())
            .field("capacity", &self.tasks.capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Admission control in front of the queue.
///
/// A task is scheduled only if no equivalent task is waiting and the store
/// still lacks a sample for some `(encoding, level)` in the body's size band.
#[derive(Debug, Clone)]
pub struct ComputeTaskScheduler {
    queue: Arc<MetricsComputeTaskQueue>,
    store: Arc<MetricsStore>,
    levels: Vec<CompressionLevel>,
}

impl ComputeTaskScheduler {
    /// Create a scheduler over a shared queue and store
    pub fn new(
        queue: Arc<MetricsComputeTaskQueue>,
        store: Arc<MetricsStore>,
        levels: Vec<CompressionLevel>,
    ) -> Self {
        Self { queue, store, levels }
    }

    /// Whether a task for this body would produce new metrics
    pub fn should_schedule(&self, encodings: &[String], route: &str, size: u64) -> bool {
        if size == 0 || !self.queue.should_enqueue(encodings, route, size) {
            return false;
        }

        encodings.iter().any(|encoding| {
            self.levels
                .iter()
                .any(|level| self.store.should_add(route, encoding, *level, size))
        })
    }

    /// Enqueue `task` if it is still useful; otherwise its buffer is released.
    ///
    /// Returns whether the task was queued.
    pub fn schedule(&self, task: ComputeTask) -> bool {
        if !self.should_schedule(&task.encodings, &task.route, task.size()) {
            debug!(route = %task.route, size = task.data.len(), "Metrics compute task not needed");
            return false;
        }

        let route = task.route.clone();
        let size = task.data.len();
        if !self.queue.enqueue_unique(task) {
            debug!(route = %route, size, "Equivalent metrics compute task already queued");
            return false;
        }

        debug!(route = %route, size, "Enqueued metrics compute task");
        true
    }

    /// Shared queue
    pub fn queue(&self) -> &Arc<MetricsComputeTaskQueue> {
        &self.queue
    }
}
