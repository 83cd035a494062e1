//! Request accounting for the coordinator endpoint
//!
//! Counts requests, failures and latencies per request type.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use relay_core::RequestType;

/// Key used for request types outside the protocol vocabulary
const UNKNOWN_REQUEST: &str = "unknown";

/// Per-request-type statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestStats {
    pub requests: u64,
    pub errors: u64,
    pub p99_latency_us: Option<u64>,
}

/// Request metrics collector
pub struct RequestMetrics {
    /// Total requests by request type
    requests: DashMap<String, AtomicU64>,
    /// Errors by request type
    errors: DashMap<String, AtomicU64>,
    /// Latency samples (request type -> recent latencies in microseconds)
    latencies: DashMap<String, Vec<u64>>,
    /// Max latency samples to keep
    max_samples: usize,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            errors: DashMap::new(),
            latencies: DashMap::new(),
            max_samples: 1000,
        }
    }

    /// Metrics key for a request type; unknown names share one bucket
    pub fn key(request_type: &RequestType) -> &str {
        match request_type {
            RequestType::Other(_) => UNKNOWN_REQUEST,
            known => known.as_str(),
        }
    }

    /// Record a request
    pub fn record_request(&self, key: &str) {
        self.requests
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error
    pub fn record_error(&self, key: &str) {
        self.errors
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record latency
    pub fn record_latency(&self, key: &str, latency_us: u64) {
        let mut entry = self.latencies.entry(key.to_string()).or_default();
        if entry.len() >= self.max_samples {
            entry.remove(0);
        }
        entry.push(latency_us);
    }

    /// Get request count for a request type
    pub fn get_request_count(&self, key: &str) -> u64 {
        self.requests
            .get(key)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get error count for a request type
    pub fn get_error_count(&self, key: &str) -> u64 {
        self.errors
            .get(key)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get p99 latency for a request type in microseconds
    pub fn get_p99_latency(&self, key: &str) -> Option<u64> {
        self.latencies.get(key).and_then(|samples| {
            if samples.is_empty() {
                return None;
            }
            let mut sorted: Vec<_> = samples.iter().copied().collect();
            sorted.sort_unstable();
            let idx = (sorted.len() as f64 * 0.99) as usize;
            sorted.get(idx.min(sorted.len() - 1)).copied()
        })
    }

    /// Total requests across all types
    pub fn total_requests(&self) -> u64 {
        self.requests
            .iter()
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .sum()
    }

    /// Get summary of all metrics, ordered by request type
    pub fn summary(&self) -> BTreeMap<String, RequestStats> {
        let mut result = BTreeMap::new();

        for entry in self.requests.iter() {
            let key = entry.key().clone();
            let stats = RequestStats {
                requests: entry.value().load(Ordering::Relaxed),
                errors: self.get_error_count(&key),
                p99_latency_us: self.get_p99_latency(&key),
            };
            result.insert(key, stats);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::new();

        metrics.record_request("register");
        metrics.record_request("register");
        metrics.record_error("register");
        metrics.record_latency("register", 1000);
        metrics.record_latency("register", 2000);

        assert_eq!(metrics.get_request_count("register"), 2);
        assert_eq!(metrics.get_error_count("register"), 1);
        assert_eq!(metrics.get_p99_latency("register"), Some(2000));
        assert_eq!(metrics.get_p99_latency("ping"), None);
        assert_eq!(metrics.total_requests(), 2);
    }

    #[test]
    fn test_unknown_types_share_a_key() {
        assert_eq!(
            RequestMetrics::key(&RequestType::Other("gossip".to_string())),
            "unknown"
        );
        assert_eq!(RequestMetrics::key(&RequestType::CheckMessages), "checkMessages");
    }

    #[test]
    fn test_summary() {
        let metrics = RequestMetrics::new();
        metrics.record_request("ping");
        metrics.record_request("broadcast");
        metrics.record_error("broadcast");

        let summary = metrics.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary["broadcast"].errors, 1);
        assert_eq!(summary["ping"].requests, 1);
        assert_eq!(summary["ping"].errors, 0);
    }
}
