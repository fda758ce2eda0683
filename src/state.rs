//! # Application State Management
//!
//! Shared state handed to every request handler and every media stream actor.
//!
//! ## What lives here:
//! - The validated configuration, immutable after startup (`Arc<AppConfig>`)
//! - HTTP and call metrics behind an `Arc<RwLock<T>>`
//! - The outbound clients (carrier REST, agent connector, opening-line
//!   generation, transfer orchestration), all sharing one `reqwest::Client`
//!   connection pool
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every worker thread's `App` holds a clone of the same state
//! - **RwLock**: many readers (`/metrics`) or one writer (middleware, call actors)
//!
//! Metrics are best effort: a poisoned lock is recovered rather than
//! propagated, since losing a counter must never fail a call.

use crate::agent::connector::AgentConnector;
use crate::bridge::translator::ConversationDefaults;
use crate::config::AppConfig;
use crate::generation::OpeningLineGenerator;
use crate::telephony::client::TelephonyClient;
use crate::transfer::TransferOrchestrator;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Validated configuration, fixed for the life of the process
    pub config: Arc<AppConfig>,

    /// Request and call metrics, updated by middleware and call actors
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// Carrier REST client
    pub telephony: TelephonyClient,

    /// Opens agent conversations for new calls
    pub agents: AgentConnector,

    /// Produces the first sentence for calls placed without one
    pub opening_lines: OpeningLineGenerator,

    /// Runs human handoffs in the background
    pub transfers: TransferOrchestrator,

    /// Prompt and first message used when a call carries none
    pub defaults: Arc<ConversationDefaults>,
}

/// Metrics collected across HTTP requests and bridged calls.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: overall HTTP load and reliability
/// - **calls_placed**: outbound calls the carrier accepted
/// - **active_calls**: media streams currently bridged
/// - **transfers_started**: human handoffs kicked off
/// - **endpoint_metrics**: per-route latency and error rate
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub calls_placed: u64,
    pub active_calls: u32,
    pub transfers_started: u64,
    /// Key: "METHOD /route/pattern"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the shared state and the outbound clients from a validated config.
    ///
    /// Fails only if the HTTP client cannot be constructed (TLS backend setup).
    pub fn new(config: AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.bridge.http_timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let telephony = TelephonyClient::new(http.clone(), &config.telephony);
        let agents = AgentConnector::new(http.clone(), &config.agent);
        let opening_lines = OpeningLineGenerator::new(http, config.generation.clone());
        let transfers = TransferOrchestrator::new(telephony.clone());

        Ok(Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            telephony,
            agents,
            opening_lines,
            transfers,
            defaults: Arc::new(ConversationDefaults::default()),
        })
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    /// Called for every 4xx/5xx response.
    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record latency and outcome for one endpoint.
    ///
    /// The first request to an endpoint creates its entry with `or_default()`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn increment_calls_placed(&self) {
        self.metrics_mut().calls_placed += 1;
    }

    /// A carrier media stream connected.
    pub fn increment_active_calls(&self) {
        self.metrics_mut().active_calls += 1;
    }

    /// A carrier media stream ended. Never goes below zero.
    pub fn decrement_active_calls(&self) {
        let mut metrics = self.metrics_mut();
        metrics.active_calls = metrics.active_calls.saturating_sub(1);
    }

    pub fn increment_transfers(&self) {
        self.metrics_mut().transfers_started += 1;
    }

    /// Consistent copy of the metrics, taken without holding the lock while
    /// the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds (0.0 before the first request).
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_active_calls_never_underflow() {
        let state = AppState::new(test_config()).unwrap();
        state.increment_active_calls();
        state.decrement_active_calls();
        state.decrement_active_calls();
        assert_eq!(state.get_metrics_snapshot().active_calls, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(test_config()).unwrap();
        state.record_endpoint_request("POST /outbound-call", 100, false);
        state.record_endpoint_request("POST /outbound-call", 300, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /outbound-call"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 200.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_call_counters() {
        let state = AppState::new(test_config()).unwrap();
        state.increment_calls_placed();
        state.increment_transfers();
        state.increment_active_calls();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.calls_placed, 1);
        assert_eq!(snapshot.transfers_started, 1);
        assert_eq!(snapshot.active_calls, 1);
    }

    #[test]
    fn test_empty_endpoint_metric() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }
}
