//! Endpoint health tracking
//!
//! Callers report per-operation outcomes; three consecutive errors mark an
//! endpoint unhealthy and a single success resets it. The pool is
//! process-local and reconstructible.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use crate::core::constants::ENDPOINT_ERROR_THRESHOLD;

/// Health state of a single endpoint
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub healthy: bool,
    pub last_check: Instant,
    /// Most recent successful response time, in seconds
    pub response_time: f64,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl EndpointHealth {
    fn new() -> Self {
        Self {
            healthy: true,
            last_check: Instant::now(),
            response_time: 0.0,
            error_count: 0,
            last_error: None,
        }
    }
}

/// Pool snapshot for observability
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_endpoints: usize,
    pub healthy_endpoints: usize,
    pub unhealthy_endpoints: usize,
    pub avg_response_time: f64,
    pub endpoints: Vec<EndpointStatus>,
}

/// Per-endpoint snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub endpoint: String,
    pub healthy: bool,
    pub response_time: f64,
    pub error_count: u32,
    pub last_error: Option<String>,
}

/// Tracks health for a fixed, ordered set of endpoints
pub struct EndpointPool {
    /// Insertion order, for deterministic round-robin
    order: RwLock<Vec<String>>,
    health: RwLock<HashMap<String, EndpointHealth>>,
    health_check_interval: Duration,
    last_health_check: RwLock<Instant>,
}

impl EndpointPool {
    pub fn new(endpoints: &[String], health_check_interval: Duration) -> Self {
        let health = endpoints
            .iter()
            .map(|e| (e.clone(), EndpointHealth::new()))
            .collect();
        tracing::debug!(count = endpoints.len(), "Initialized endpoint pool");
        Self {
            order: RwLock::new(endpoints.to_vec()),
            health: RwLock::new(health),
            health_check_interval,
            last_health_check: RwLock::new(Instant::now()),
        }
    }

    /// Healthy endpoints in registration order
    pub fn healthy_endpoints(&self) -> Vec<String> {
        let health = self.health.read();
        self.order
            .read()
            .iter()
            .filter(|e| health.get(*e).is_some_and(|h| h.healthy))
            .cloned()
            .collect()
    }

    pub fn all_endpoints(&self) -> Vec<String> {
        self.order.read().clone()
    }

    pub fn health(&self, endpoint: &str) -> Option<EndpointHealth> {
        self.health.read().get(endpoint).cloned()
    }

    /// Record a failed operation against an endpoint.
    pub fn mark_error(&self, endpoint: &str, error: impl Into<String>) {
        let mut health = self.health.write();
        let Some(entry) = health.get_mut(endpoint) else {
            return;
        };
        entry.error_count += 1;
        entry.last_error = Some(error.into());
        entry.last_check = Instant::now();

        if entry.error_count >= ENDPOINT_ERROR_THRESHOLD && entry.healthy {
            entry.healthy = false;
            tracing::warn!(
                endpoint = %endpoint,
                errors = entry.error_count,
                "Endpoint marked unhealthy"
            );
        }
    }

    /// Record a successful operation; resets the error counter.
    pub fn mark_success(&self, endpoint: &str, response_time: f64) {
        let mut health = self.health.write();
        let Some(entry) = health.get_mut(endpoint) else {
            return;
        };
        entry.healthy = true;
        entry.response_time = response_time;
        entry.last_check = Instant::now();
        entry.error_count = 0;
        entry.last_error = None;
    }

    /// Restore an endpoint to its initial healthy state.
    pub fn reset(&self, endpoint: &str) {
        if let Some(entry) = self.health.write().get_mut(endpoint) {
            *entry = EndpointHealth::new();
            tracing::debug!(endpoint = %endpoint, "Endpoint health reset");
        }
    }

    pub fn add_endpoint(&self, endpoint: &str) {
        let mut order = self.order.write();
        if order.iter().any(|e| e == endpoint) {
            return;
        }
        order.push(endpoint.to_string());
        self.health
            .write()
            .insert(endpoint.to_string(), EndpointHealth::new());
        tracing::debug!(endpoint = %endpoint, "Added endpoint");
    }

    pub fn remove_endpoint(&self, endpoint: &str) {
        self.order.write().retain(|e| e != endpoint);
        self.health.write().remove(endpoint);
        tracing::debug!(endpoint = %endpoint, "Removed endpoint");
    }

    /// Whether the periodic health-check cadence has elapsed.
    pub fn health_check_due(&self) -> bool {
        self.last_health_check.read().elapsed() > self.health_check_interval
    }

    pub fn mark_health_check_done(&self) {
        *self.last_health_check.write() = Instant::now();
    }

    pub fn stats(&self) -> PoolStats {
        let order = self.order.read();
        let health = self.health.read();

        let endpoints: Vec<EndpointStatus> = order
            .iter()
            .filter_map(|e| {
                health.get(e).map(|h| EndpointStatus {
                    endpoint: e.clone(),
                    healthy: h.healthy,
                    response_time: h.response_time,
                    error_count: h.error_count,
                    last_error: h.last_error.clone(),
                })
            })
            .collect();

        let healthy: Vec<&EndpointStatus> = endpoints.iter().filter(|e| e.healthy).collect();
        let timed: Vec<f64> = healthy
            .iter()
            .map(|e| e.response_time)
            .filter(|t| *t > 0.0)
            .collect();
        let avg_response_time = if timed.is_empty() {
            0.0
        } else {
            timed.iter().sum::<f64>() / timed.len() as f64
        };

        PoolStats {
            total_endpoints: endpoints.len(),
            healthy_endpoints: healthy.len(),
            unhealthy_endpoints: endpoints.len() - healthy.len(),
            avg_response_time,
            endpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(endpoints: &[&str]) -> EndpointPool {
        let endpoints: Vec<String> = endpoints.iter().map(|s| s.to_string()).collect();
        EndpointPool::new(&endpoints, Duration::from_secs(300))
    }

    #[test]
    fn endpoints_start_healthy() {
        let pool = pool(&["http://a", "http://b"]);
        assert_eq!(pool.healthy_endpoints().len(), 2);
    }

    #[test]
    fn three_strikes_marks_unhealthy() {
        let pool = pool(&["http://a"]);

        pool.mark_error("http://a", "boom");
        pool.mark_error("http://a", "boom");
        assert_eq!(pool.healthy_endpoints(), vec!["http://a".to_string()]);

        pool.mark_error("http://a", "boom");
        assert!(pool.healthy_endpoints().is_empty());
    }

    #[test]
    fn success_resets_error_counter() {
        let pool = pool(&["http://a"]);

        for _ in 0..3 {
            pool.mark_error("http://a", "boom");
        }
        assert!(pool.healthy_endpoints().is_empty());

        pool.mark_success("http://a", 0.02);
        let health = pool.health("http://a").unwrap();
        assert!(health.healthy);
        assert_eq!(health.error_count, 0);
        assert!(health.last_error.is_none());
    }

    #[test]
    fn unknown_endpoint_is_ignored() {
        let pool = pool(&["http://a"]);
        pool.mark_error("http://nope", "boom");
        pool.mark_success("http://nope", 0.1);
        assert_eq!(pool.healthy_endpoints().len(), 1);
    }

    #[test]
    fn add_and_remove_endpoints() {
        let pool = pool(&["http://a"]);
        pool.add_endpoint("http://b");
        pool.add_endpoint("http://b"); // idempotent
        assert_eq!(pool.all_endpoints().len(), 2);

        pool.remove_endpoint("http://a");
        assert_eq!(pool.all_endpoints(), vec!["http://b".to_string()]);
    }

    #[test]
    fn stats_reflect_health() {
        let pool = pool(&["http://a", "http://b"]);
        pool.mark_success("http://a", 0.1);
        for _ in 0..3 {
            pool.mark_error("http://b", "down");
        }

        let stats = pool.stats();
        assert_eq!(stats.total_endpoints, 2);
        assert_eq!(stats.healthy_endpoints, 1);
        assert_eq!(stats.unhealthy_endpoints, 1);
        assert!((stats.avg_response_time - 0.1).abs() < 1e-9);
    }
}
