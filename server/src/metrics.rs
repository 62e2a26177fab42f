// Metrics collection and tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

const MAX_SAMPLES: usize = 1000;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Mark process start for uptime reporting. Later calls are no-ops.
pub fn mark_start() {
    START_TIME.get_or_init(Instant::now);
}

/// Latency statistics over all samples, with percentiles over the most
/// recent ones.
#[derive(Debug)]
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    samples: Mutex<VecDeque<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    pub fn record(&self, latency_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() == MAX_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn avg_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.total_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count();
        LatencySnapshot {
            count,
            avg_ms: self.avg_ms(),
            min_ms: if count == 0 { 0 } else { self.min_ms.load(Ordering::Relaxed) },
            max_ms: self.max_ms.load(Ordering::Relaxed),
            p50_ms: self.percentile(50),
            p95_ms: self.percentile(95),
            p99_ms: self.percentile(99),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters shared by every connection and HTTP handler.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub http_requests: AtomicU64,
    pub connections_opened: AtomicU64,
    pub connections_active: AtomicU64,
    pub turns_started: AtomicU64,
    pub turns_completed: AtomicU64,
    pub turns_aborted: AtomicU64,
    pub turns_failed: AtomicU64,
    pub chunks_emitted: AtomicU64,
    pub synthesis_failures: AtomicU64,
    pub synthesis: LatencyStats,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        Self::incr(&self.connections_opened);
        Self::incr(&self.connections_active);
    }

    pub fn connection_closed(&self) {
        // saturating: a close without open must not wrap
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineSnapshot {
            http_requests: load(&self.http_requests),
            connections_opened: load(&self.connections_opened),
            connections_active: load(&self.connections_active),
            turns_started: load(&self.turns_started),
            turns_completed: load(&self.turns_completed),
            turns_aborted: load(&self.turns_aborted),
            turns_failed: load(&self.turns_failed),
            chunks_emitted: load(&self.chunks_emitted),
            synthesis_failures: load(&self.synthesis_failures),
            synthesis_latency: self.synthesis.snapshot(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct PipelineSnapshot {
    pub http_requests: u64,
    pub connections_opened: u64,
    pub connections_active: u64,
    pub turns_started: u64,
    pub turns_completed: u64,
    pub turns_aborted: u64,
    pub turns_failed: u64,
    pub chunks_emitted: u64,
    pub synthesis_failures: u64,
    pub synthesis_latency: LatencySnapshot,
}

#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

impl SystemMetrics {
    pub fn collect() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let memory_used = system.used_memory();
        let memory_total = system.total_memory();
        let memory_usage_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        } else {
            0.0
        };

        Self {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: START_TIME.get().map(|s| s.elapsed().as_secs()).unwrap_or(0),
            system_load: load_average(),
        }
    }
}

#[cfg(unix)]
fn load_average() -> Option<f64> {
    std::fs::read_to_string("/proc/loadavg")
        .ok()?
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
}

#[cfg(not(unix))]
fn load_average() -> Option<f64> {
    None
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub pipeline: PipelineSnapshot,
}

impl MetricsResponse {
    pub fn collect(metrics: &PipelineMetrics) -> Self {
        Self {
            timestamp: Utc::now(),
            system: SystemMetrics::collect(),
            pipeline: metrics.snapshot(),
        }
    }
}
