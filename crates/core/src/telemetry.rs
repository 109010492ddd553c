//! In-process request metrics.
//!
//! One counter set per process behind a single mutex; every update is O(1).
//! The transport layer records an observation per handled request and the
//! ops surface reads a point-in-time snapshot.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Default)]
struct MetricsInner {
    total_requests: u64,
    total_server_errors: u64,
    total_duration_ms: u64,
    status_counts: HashMap<String, u64>,
    endpoint_counts: HashMap<String, u64>,
}

#[derive(Debug)]
pub struct RequestMetrics {
    started_at: Instant,
    inner: Mutex<MetricsInner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointCount {
    pub endpoint: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub total_server_errors: u64,
    pub average_duration_ms: f64,
    pub status_counts: std::collections::BTreeMap<String, u64>,
    pub top_endpoints: Vec<EndpointCount>,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        RequestMetrics {
            started_at: Instant::now(),
            inner: Mutex::new(MetricsInner::default()),
        }
    }
}

impl RequestMetrics {
    pub fn new() -> RequestMetrics {
        RequestMetrics::default()
    }

    /// Record one handled request.
    pub fn record(&self, method: &str, path: &str, status_code: u16, duration_ms: u64) {
        let endpoint_key = format!("{method} {path}");
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.total_requests += 1;
        inner.total_duration_ms += duration_ms;
        *inner
            .status_counts
            .entry(status_code.to_string())
            .or_default() += 1;
        *inner.endpoint_counts.entry(endpoint_key).or_default() += 1;
        if status_code >= 500 {
            inner.total_server_errors += 1;
        }
    }

    /// Point-in-time snapshot with the ten busiest endpoints.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let average_duration_ms = if inner.total_requests > 0 {
            let raw = inner.total_duration_ms as f64 / inner.total_requests as f64;
            (raw * 100.0).round() / 100.0
        } else {
            0.0
        };
        let mut top_endpoints: Vec<EndpointCount> = inner
            .endpoint_counts
            .iter()
            .map(|(endpoint, count)| EndpointCount {
                endpoint: endpoint.clone(),
                count: *count,
            })
            .collect();
        top_endpoints.sort_by(|a, b| b.count.cmp(&a.count).then(a.endpoint.cmp(&b.endpoint)));
        top_endpoints.truncate(10);

        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            total_requests: inner.total_requests,
            total_server_errors: inner.total_server_errors,
            average_duration_ms,
            status_counts: inner
                .status_counts
                .iter()
                .map(|(status, count)| (status.clone(), *count))
                .collect(),
            top_endpoints,
        }
    }
}
