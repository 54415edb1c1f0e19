//! # Shared Application State
//!
//! State every HTTP handler can reach through `web::Data`: the runtime
//! configuration, request-level metrics, and the server start time.
//!
//! Everything mutable sits behind `Arc<RwLock<..>>` so many requests can
//! read concurrently while updates take the write lock briefly. Live
//! session tracking is *not* here; the `SessionManager` in
//! `audio::session` is the single authority for that.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Shared state handed to every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Runtime configuration, updatable through PUT /config
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP request metrics, updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started, for uptime reporting
    pub start_time: Instant,
}

/// Request counters aggregated across all endpoints.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Requests processed since startup
    pub request_count: u64,

    /// Requests that ended in a 4xx/5xx or handler error
    pub error_count: u64,

    /// Per-endpoint breakdown, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Counters for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately instead of holding it
    /// across response generation.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating the replacement.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Called by the metrics middleware for every inbound request.
    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    /// Called when a request ends in an error status.
    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    /// Fold one finished request into the per-endpoint counters.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics for the /metrics endpoint.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Seconds since the server came up.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Mean latency over every request this endpoint has served.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
