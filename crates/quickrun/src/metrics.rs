//! Cumulative compilation statistics

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{CompilationResult, duration_nanos};

/// Point-in-time copy of the counters held by [`Metrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_compilations: u64,
    pub successful_compilations: u64,
    pub failed_compilations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,

    #[serde(with = "duration_nanos")]
    pub average_compile_time: Duration,
    #[serde(with = "duration_nanos")]
    pub average_execution_time: Duration,
    #[serde(with = "duration_nanos")]
    pub total_compile_time: Duration,
    #[serde(with = "duration_nanos")]
    pub total_execution_time: Duration,

    /// Largest `memory_used` seen, in bytes
    pub peak_memory_usage: u64,
    /// Running mean of `memory_used`, in bytes
    pub average_memory_usage: u64,

    pub last_compilation_time: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
}

impl MetricsSnapshot {
    fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            total_compilations: 0,
            successful_compilations: 0,
            failed_compilations: 0,
            cache_hits: 0,
            cache_misses: 0,
            average_compile_time: Duration::ZERO,
            average_execution_time: Duration::ZERO,
            total_compile_time: Duration::ZERO,
            total_execution_time: Duration::ZERO,
            peak_memory_usage: 0,
            average_memory_usage: 0,
            last_compilation_time: None,
            start_time,
        }
    }

    /// Percentage of compilations that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total_compilations == 0 {
            return 0.0;
        }
        self.successful_compilations as f64 / self.total_compilations as f64 * 100.0
    }

    /// Percentage of lookups served from the cache
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64 * 100.0
    }
}

/// Thread-safe compilation counters
///
/// Mutated only through [`record`](Self::record), once per finished
/// compilation. Reads take a [`snapshot`](Self::snapshot).
#[derive(Debug)]
pub struct Metrics {
    inner: Mutex<MetricsSnapshot>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::new(Utc::now())),
        }
    }

    /// Fold one finished compilation into the counters
    pub fn record(&self, result: &CompilationResult) {
        let now = Utc::now();
        let mut m = self.inner.lock();

        m.total_compilations += 1;
        m.last_compilation_time = Some(now);

        if result.success {
            m.successful_compilations += 1;
        } else {
            m.failed_compilations += 1;
        }

        if result.cache_hit {
            m.cache_hits += 1;
        } else {
            m.cache_misses += 1;
        }

        m.total_compile_time += result.compile_time;
        m.total_execution_time += result.execution_time;

        let count = m.total_compilations;
        m.average_compile_time = divide(m.total_compile_time, count);
        m.average_execution_time = divide(m.total_execution_time, count);

        m.peak_memory_usage = m.peak_memory_usage.max(result.memory_used);
        let previous = u128::from(m.average_memory_usage) * u128::from(count - 1);
        let average = (previous + u128::from(result.memory_used)) / u128::from(count);
        m.average_memory_usage = u64::try_from(average).unwrap_or(u64::MAX);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().clone()
    }

    pub fn success_rate(&self) -> f64 {
        self.inner.lock().success_rate()
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.inner.lock().cache_hit_rate()
    }

    /// Time since collection started
    pub fn uptime(&self) -> Duration {
        let start = self.inner.lock().start_time;
        Utc::now()
            .signed_duration_since(start)
            .to_std()
            .unwrap_or_default()
    }

    /// Zero every counter and restart collection
    pub fn reset(&self) {
        *self.inner.lock() = MetricsSnapshot::new(Utc::now());
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn divide(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(count) if count > 0 => total / count,
        Ok(_) => Duration::ZERO,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}
