//! Server-wide request metrics.
//!
//! Lightweight and thread-safe: counters are atomics, the latency window
//! and slow-request ring are small mutex-guarded deques.
//!
//! - request latencies with p50/p95/p99 over a rolling window
//! - slow request detection (last `MAX_SLOW_REQUESTS` kept)
//! - per-operation counts and average latency
//! - query outcome counters (results, empty answers, errors)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// Last N request latencies kept for percentiles.
const LATENCY_WINDOW_SIZE: usize = 1000;

const MAX_SLOW_REQUESTS: usize = 10;

/// Requests at or above this duration are recorded and logged as slow.
pub const SLOW_QUERY_THRESHOLD_MS: u64 = 100;

/// Operations tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Ping,
    Query,
    GetStats,
    Shutdown,
}

impl Operation {
    const ALL: [Operation; 4] = [
        Operation::Ping,
        Operation::Query,
        Operation::GetStats,
        Operation::Shutdown,
    ];

    fn index(self) -> usize {
        match self {
            Operation::Ping => 0,
            Operation::Query => 1,
            Operation::GetStats => 2,
            Operation::Shutdown => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Ping => "Ping",
            Operation::Query => "Query",
            Operation::GetStats => "GetStats",
            Operation::Shutdown => "Shutdown",
        }
    }
}

#[derive(Default)]
struct OperationCounter {
    count: AtomicU64,
    latency_sum_ms: AtomicU64,
}

pub struct Metrics {
    request_count: AtomicU64,
    slow_request_count: AtomicU64,

    latencies_ms: Mutex<VecDeque<u64>>,
    latency_sum_ms: AtomicU64,

    ops: [OperationCounter; 4],

    query_results: AtomicU64,
    empty_queries: AtomicU64,
    query_errors: AtomicU64,

    slow_requests: Mutex<VecDeque<SlowRequest>>,
    started_at: Instant,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowRequest {
    pub operation: String,
    pub duration_ms: u64,
    /// Milliseconds since server start.
    pub timestamp_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStat {
    pub operation: String,
    pub count: u64,
    pub avg_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub slow_request_count: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub avg_ms: u64,
    pub query_results: u64,
    pub empty_queries: u64,
    pub query_errors: u64,
    pub top_slow_requests: Vec<SlowRequest>,
    pub op_stats: Vec<OperationStat>,
    pub uptime_secs: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            slow_request_count: AtomicU64::new(0),
            latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            latency_sum_ms: AtomicU64::new(0),
            ops: Default::default(),
            query_results: AtomicU64::new(0),
            empty_queries: AtomicU64::new(0),
            query_errors: AtomicU64::new(0),
            slow_requests: Mutex::new(VecDeque::with_capacity(MAX_SLOW_REQUESTS)),
            started_at: Instant::now(),
        }
    }

    /// Record one completed request.
    pub fn record_request(&self, op: Operation, duration_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let counter = &self.ops[op.index()];
        counter.count.fetch_add(1, Ordering::Relaxed);
        counter.latency_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);

        {
            let mut latencies = self.latencies_ms.lock().unwrap_or_else(|e| e.into_inner());
            if latencies.len() >= LATENCY_WINDOW_SIZE {
                if let Some(old) = latencies.pop_front() {
                    self.latency_sum_ms.fetch_sub(old, Ordering::Relaxed);
                }
            }
            latencies.push_back(duration_ms);
            self.latency_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        }

        if duration_ms >= SLOW_QUERY_THRESHOLD_MS {
            self.slow_request_count.fetch_add(1, Ordering::Relaxed);
            let slow = SlowRequest {
                operation: op.name().to_string(),
                duration_ms,
                timestamp_ms: self.started_at.elapsed().as_millis() as u64,
            };
            let mut ring = self.slow_requests.lock().unwrap_or_else(|e| e.into_inner());
            if ring.len() >= MAX_SLOW_REQUESTS {
                ring.pop_front();
            }
            ring.push_back(slow);
        }
    }

    /// Record the outcome of one query request.
    pub fn record_query_outcome(&self, results: usize) {
        self.query_results.fetch_add(results as u64, Ordering::Relaxed);
        if results == 0 {
            self.empty_queries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_query_error(&self) {
        self.query_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p95, p99, avg) = {
            let latencies = self.latencies_ms.lock().unwrap_or_else(|e| e.into_inner());
            if latencies.is_empty() {
                (0, 0, 0, 0)
            } else {
                let mut sorted: Vec<u64> = latencies.iter().copied().collect();
                sorted.sort_unstable();
                let len = sorted.len();
                let p50 = sorted[len * 50 / 100];
                let p95 = sorted[len * 95 / 100];
                let p99 = sorted.get(len * 99 / 100).copied().unwrap_or(sorted[len - 1]);
                let avg = self.latency_sum_ms.load(Ordering::Relaxed) / len as u64;
                (p50, p95, p99, avg)
            }
        };

        let top_slow_requests = {
            let ring = self.slow_requests.lock().unwrap_or_else(|e| e.into_inner());
            ring.iter().cloned().collect()
        };

        MetricsSnapshot {
            request_count: self.request_count.load(Ordering::Relaxed),
            slow_request_count: self.slow_request_count.load(Ordering::Relaxed),
            p50_ms: p50,
            p95_ms: p95,
            p99_ms: p99,
            avg_ms: avg,
            query_results: self.query_results.load(Ordering::Relaxed),
            empty_queries: self.empty_queries.load(Ordering::Relaxed),
            query_errors: self.query_errors.load(Ordering::Relaxed),
            top_slow_requests,
            op_stats: self.op_stats(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Operations seen so far, busiest first.
    fn op_stats(&self) -> Vec<OperationStat> {
        let mut stats: Vec<OperationStat> = Operation::ALL
            .iter()
            .filter_map(|op| {
                let counter = &self.ops[op.index()];
                let count = counter.count.load(Ordering::Relaxed);
                if count == 0 {
                    return None;
                }
                Some(OperationStat {
                    operation: op.name().to_string(),
                    count,
                    avg_ms: counter.latency_sum_ms.load(Ordering::Relaxed) / count,
                })
            })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_snapshot() {
        let snap = Metrics::new().snapshot();
        assert_eq!(snap.request_count, 0);
        assert_eq!(snap.p50_ms, 0);
        assert_eq!(snap.p99_ms, 0);
        assert!(snap.top_slow_requests.is_empty());
        assert!(snap.op_stats.is_empty());
    }

    #[test]
    fn test_percentiles() {
        let metrics = Metrics::new();
        for ms in 1..=100 {
            metrics.record_request(Operation::Query, ms);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.request_count, 100);
        assert_eq!(snap.p50_ms, 51);
        assert_eq!(snap.p95_ms, 96);
        assert_eq!(snap.p99_ms, 100);
        assert_eq!(snap.avg_ms, 50);
        // only the 100ms request crosses the threshold
        assert_eq!(snap.slow_request_count, 1);
    }

    #[test]
    fn test_latency_window_rolls() {
        let metrics = Metrics::new();
        for _ in 0..LATENCY_WINDOW_SIZE {
            metrics.record_request(Operation::Ping, 1000);
        }
        for _ in 0..LATENCY_WINDOW_SIZE {
            metrics.record_request(Operation::Ping, 1);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.p99_ms, 1);
        assert_eq!(snap.avg_ms, 1);
        assert_eq!(snap.top_slow_requests.len(), MAX_SLOW_REQUESTS);
    }

    #[test]
    fn test_op_stats_sorted_by_count() {
        let metrics = Metrics::new();
        metrics.record_request(Operation::Ping, 0);
        metrics.record_request(Operation::Query, 10);
        metrics.record_request(Operation::Query, 20);

        let ops = metrics.snapshot().op_stats;
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].operation, "Query");
        assert_eq!(ops[0].count, 2);
        assert_eq!(ops[0].avg_ms, 15);
        assert_eq!(ops[1].operation, "Ping");
    }

    #[test]
    fn test_query_outcomes() {
        let metrics = Metrics::new();
        metrics.record_query_outcome(3);
        metrics.record_query_outcome(0);
        metrics.record_query_error();
        let snap = metrics.snapshot();
        assert_eq!(snap.query_results, 3);
        assert_eq!(snap.empty_queries, 1);
        assert_eq!(snap.query_errors, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..250 {
                        m.record_request(Operation::Query, 5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().request_count, 1000);
    }
}
