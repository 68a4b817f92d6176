//! Process host memory pressure

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::System;

/// How long a memory reading is reused
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Source of the current memory usage
pub trait MemoryProfiler: Send + Sync + fmt::Debug {
    /// Used physical memory as a percentage of total, `0.0` if unknown
    fn memory_usage_percent(&self) -> f64;
}

struct Sampler {
    system: System,
    taken_at: Option<Instant>,
}

/// [`MemoryProfiler`] backed by the operating system.
///
/// At most one caller refreshes at a time; concurrent callers get the last
/// published reading instead of waiting on the refresh.
pub struct SystemMemoryProfiler {
    sampler: Mutex<Sampler>,
    percent_bits: AtomicU64,
}

impl SystemMemoryProfiler {
    /// Create a profiler; the first reading happens on first use
    pub fn new() -> Self {
        Self {
            sampler: Mutex::new(Sampler {
                system: System::new(),
                taken_at: None,
            }),
            percent_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn cached(&self) -> f64 {
        f64::from_bits(self.percent_bits.load(Ordering::Acquire))
    }
}

impl Default for SystemMemoryProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemMemoryProfiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemMemoryProfiler")
            .field("percent", &self.cached())
            .finish()
    }
}

impl MemoryProfiler for SystemMemoryProfiler {
    fn memory_usage_percent(&self) -> f64 {
        let Some(mut sampler) = self.sampler.try_lock() else {
            return self.cached();
        };

        let fresh = sampler
            .taken_at
            .is_some_and(|taken_at| taken_at.elapsed() < REFRESH_INTERVAL);
        if fresh {
            return self.cached();
        }

        sampler.system.refresh_memory();
        let total = sampler.system.total_memory();
        let percent = if total == 0 {
            0.0
        } else {
            sampler.system.used_memory() as f64 / total as f64 * 100.0
        };
        self.percent_bits.store(percent.to_bits(), Ordering::Release);
        sampler.taken_at = Some(Instant::now());
        percent
    }
}

/// Fixed reading, for tests and for hosts where probing is undesirable
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticMemoryProfiler(pub f64);

impl MemoryProfiler for StaticMemoryProfiler {
    fn memory_usage_percent(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_profiler_in_range() {
        let profiler = SystemMemoryProfiler::new();
        let percent = profiler.memory_usage_percent();
        assert!((0.0..=100.0).contains(&percent));
        // Cached reading within the refresh interval
        assert_eq!(profiler.memory_usage_percent(), percent);
    }

    #[test]
    fn test_refresh_in_progress_returns_cached_reading() {
        let profiler = SystemMemoryProfiler::new();
        let first = profiler.memory_usage_percent();

        let mut sampler = profiler.sampler.lock();
        sampler.taken_at = None;
        // Stale, but another caller holds the sampler
        assert_eq!(profiler.memory_usage_percent(), first);
        drop(sampler);

        assert!((0.0..=100.0).contains(&profiler.memory_usage_percent()));
    }

    #[test]
    fn test_static_profiler() {
        assert_eq!(StaticMemoryProfiler(42.5).memory_usage_percent(), 42.5);
    }
}
