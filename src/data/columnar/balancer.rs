//! Endpoint selection policies
//!
//! - reads: fastest healthy endpoint (round-robin when `prefer_fastest` is
//!   off)
//! - writes: fewest errors, tie-broken on response time
//! - analytics: sticky endpoint refreshed on a fixed cadence
//! - complex queries bias toward least-error endpoints, simple ones
//!   round-robin
//!
//! Selection never blocks: with no healthy endpoint it returns `None` and the
//! caller surfaces the error.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use super::endpoints::EndpointPool;
use crate::core::config::BalancerConfig;

/// Kind of operation an endpoint is being selected for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
    Analytics,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Analytics => "analytics",
        }
    }
}

/// Query complexity hint for [`LoadBalancer::endpoint_for_query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryComplexity {
    Simple,
    Medium,
    Complex,
}

struct StickyAnalytics {
    endpoint: Option<String>,
    refreshed_at: Instant,
}

/// Selects endpoints from the pool by operation kind
pub struct LoadBalancer {
    pool: Arc<EndpointPool>,
    config: BalancerConfig,
    round_robin_index: AtomicUsize,
    analytics: Mutex<StickyAnalytics>,
}

impl LoadBalancer {
    pub fn new(pool: Arc<EndpointPool>, config: BalancerConfig) -> Self {
        Self {
            pool,
            config,
            round_robin_index: AtomicUsize::new(0),
            analytics: Mutex::new(StickyAnalytics {
                endpoint: None,
                refreshed_at: Instant::now(),
            }),
        }
    }

    /// Best endpoint for the operation kind, or `None` when nothing is
    /// healthy.
    pub fn select(&self, op: OpKind) -> Option<String> {
        let healthy = self.pool.healthy_endpoints();
        if healthy.is_empty() {
            tracing::warn!(op = op.as_str(), "No healthy endpoints available");
            return None;
        }
        if healthy.len() == 1 {
            return Some(healthy[0].clone());
        }

        match op {
            OpKind::Read => {
                if self.config.prefer_fastest {
                    self.fastest(&healthy)
                } else {
                    self.round_robin(&healthy)
                }
            }
            OpKind::Write => self.most_reliable(&healthy),
            OpKind::Analytics => self.sticky_analytics(&healthy),
        }
    }

    /// Endpoint choice driven by query characteristics.
    pub fn endpoint_for_query(&self, complexity: QueryComplexity) -> Option<String> {
        let healthy = self.pool.healthy_endpoints();
        if healthy.is_empty() {
            return None;
        }
        match complexity {
            QueryComplexity::Simple => self.round_robin(&healthy),
            QueryComplexity::Medium => self.fastest(&healthy),
            QueryComplexity::Complex => self.fewest_errors(&healthy),
        }
    }

    /// Report an operation outcome back to the pool.
    pub fn report(&self, endpoint: &str, response_time: f64, success: bool) {
        if success {
            self.pool.mark_success(endpoint, response_time);
        } else {
            self.pool.mark_error(
                endpoint,
                format!("Operation failed after {:.3}s", response_time),
            );
        }
    }

    fn fastest(&self, healthy: &[String]) -> Option<String> {
        healthy
            .iter()
            .min_by(|a, b| {
                let ta = self.response_time(a);
                let tb = self.response_time(b);
                ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    fn most_reliable(&self, healthy: &[String]) -> Option<String> {
        healthy
            .iter()
            .min_by(|a, b| {
                let ka = (self.error_count(a), self.response_time(a));
                let kb = (self.error_count(b), self.response_time(b));
                ka.0.cmp(&kb.0).then(
                    ka.1.partial_cmp(&kb.1).unwrap_or(std::cmp::Ordering::Equal),
                )
            })
            .cloned()
    }

    fn fewest_errors(&self, healthy: &[String]) -> Option<String> {
        healthy.iter().min_by_key(|e| self.error_count(e)).cloned()
    }

    fn round_robin(&self, healthy: &[String]) -> Option<String> {
        let idx = self.round_robin_index.fetch_add(1, Ordering::Relaxed);
        let selected = healthy[(idx + 1) % healthy.len()].clone();
        tracing::debug!(endpoint = %selected, "Round-robin selected endpoint");
        Some(selected)
    }

    /// Keep the analytics endpoint stable between refresh intervals so
    /// engine-side caches stay warm.
    fn sticky_analytics(&self, healthy: &[String]) -> Option<String> {
        let mut sticky = self.analytics.lock();
        let refresh_due = sticky.refreshed_at.elapsed().as_secs() >= self.config.analytics_sticky_secs;

        if !refresh_due
            && let Some(ref current) = sticky.endpoint
            && healthy.contains(current)
        {
            return Some(current.clone());
        }

        let selected = self.round_robin(healthy)?;
        sticky.endpoint = Some(selected.clone());
        sticky.refreshed_at = Instant::now();
        Some(selected)
    }

    fn response_time(&self, endpoint: &str) -> f64 {
        self.pool
            .health(endpoint)
            .map(|h| h.response_time)
            .unwrap_or(f64::MAX)
    }

    fn error_count(&self, endpoint: &str) -> u32 {
        self.pool
            .health(endpoint)
            .map(|h| h.error_count)
            .unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn setup(endpoints: &[&str]) -> (Arc<EndpointPool>, LoadBalancer) {
        let endpoints: Vec<String> = endpoints.iter().map(|s| s.to_string()).collect();
        let pool = Arc::new(EndpointPool::new(&endpoints, Duration::from_secs(300)));
        let balancer = LoadBalancer::new(Arc::clone(&pool), BalancerConfig::default());
        (pool, balancer)
    }

    #[test]
    fn no_healthy_endpoints_returns_none() {
        let (pool, balancer) = setup(&["http://a"]);
        for _ in 0..3 {
            pool.mark_error("http://a", "down");
        }
        assert_eq!(balancer.select(OpKind::Read), None);
    }

    #[test]
    fn single_endpoint_is_always_selected() {
        let (_pool, balancer) = setup(&["http://a"]);
        assert_eq!(balancer.select(OpKind::Read), Some("http://a".to_string()));
        assert_eq!(balancer.select(OpKind::Write), Some("http://a".to_string()));
    }

    #[test]
    fn reads_prefer_fastest() {
        let (pool, balancer) = setup(&["http://slow", "http://fast"]);
        pool.mark_success("http://slow", 0.5);
        pool.mark_success("http://fast", 0.01);
        assert_eq!(
            balancer.select(OpKind::Read),
            Some("http://fast".to_string())
        );
    }

    #[test]
    fn writes_prefer_fewest_errors() {
        let (pool, balancer) = setup(&["http://flaky", "http://solid"]);
        pool.mark_success("http://flaky", 0.01);
        pool.mark_error("http://flaky", "hiccup");
        pool.mark_success("http://solid", 0.5);
        assert_eq!(
            balancer.select(OpKind::Write),
            Some("http://solid".to_string())
        );
    }

    #[test]
    fn unhealthy_endpoint_is_skipped_until_success() {
        let (pool, balancer) = setup(&["http://a", "http://b"]);
        for _ in 0..3 {
            pool.mark_error("http://a", "down");
        }
        for _ in 0..10 {
            assert_eq!(balancer.select(OpKind::Read), Some("http://b".to_string()));
        }

        pool.mark_success("http://a", 0.001);
        pool.mark_success("http://b", 0.5);
        assert_eq!(balancer.select(OpKind::Read), Some("http://a".to_string()));
    }

    #[test]
    fn analytics_endpoint_is_sticky() {
        let (_pool, balancer) = setup(&["http://a", "http://b"]);
        let first = balancer.select(OpKind::Analytics).unwrap();
        for _ in 0..5 {
            assert_eq!(balancer.select(OpKind::Analytics), Some(first.clone()));
        }
    }

    #[test]
    fn complex_queries_prefer_fewest_errors() {
        let (pool, balancer) = setup(&["http://flaky", "http://solid"]);
        pool.mark_error("http://flaky", "hiccup");
        assert_eq!(
            balancer.endpoint_for_query(QueryComplexity::Complex),
            Some("http://solid".to_string())
        );
    }

    #[test]
    fn report_feeds_the_pool() {
        let (pool, balancer) = setup(&["http://a"]);
        balancer.report("http://a", 0.1, false);
        balancer.report("http://a", 0.1, false);
        balancer.report("http://a", 0.1, false);
        assert!(pool.healthy_endpoints().is_empty());

        balancer.report("http://a", 0.05, true);
        assert_eq!(pool.healthy_endpoints().len(), 1);
    }
}
