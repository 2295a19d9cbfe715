//! Prometheus metrics for the live-trade service
//!
//! Covers:
//! - session lifecycle (opened, closed by outcome, live)
//! - WebSocket connections per channel
//! - inbound messages by type and rejections by error code

use anyhow::Result;
use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::session::TradeState;

/// Live-trade metrics collector
#[derive(Debug)]
pub struct LiveTradeMetrics {
    start_time: AtomicI64,
}

impl LiveTradeMetrics {
    pub fn new() -> Self {
        Self {
            start_time: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    fn register_metrics() {
        // Sessions
        describe_counter!("live_trade_sessions_opened_total", "Trade sessions created");
        describe_counter!(
            "live_trade_sessions_closed_total",
            "Trade sessions that reached a terminal state, by outcome"
        );
        describe_gauge!("live_trade_sessions_active", "Live trade sessions");

        // WebSocket
        describe_gauge!(
            "live_trade_websocket_connections_active",
            "Bound WebSocket connections by channel"
        );
        describe_counter!(
            "live_trade_websocket_messages_received_total",
            "Inbound client messages by type"
        );
        describe_counter!(
            "live_trade_websocket_messages_rejected_total",
            "Inbound client messages answered with an error, by code"
        );

        // Auth
        describe_counter!(
            "live_trade_auth_failures_total",
            "WebSocket upgrades rejected for a missing or invalid token"
        );

        // System
        describe_gauge!("live_trade_uptime_seconds", "Service uptime in seconds");
    }

    pub fn record_session_opened(&self) {
        counter!("live_trade_sessions_opened_total").increment(1);
    }

    pub fn record_session_closed(&self, outcome: TradeState) {
        counter!("live_trade_sessions_closed_total",
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    pub fn record_message_received(&self, message_type: &'static str) {
        counter!("live_trade_websocket_messages_received_total",
            "type" => message_type
        )
        .increment(1);
    }

    pub fn record_message_rejected(&self, code: &'static str) {
        counter!("live_trade_websocket_messages_rejected_total",
            "code" => code
        )
        .increment(1);
    }

    pub fn record_auth_failure(&self) {
        counter!("live_trade_auth_failures_total").increment(1);
    }

    /// Refresh gauges from live counts
    #[allow(clippy::cast_precision_loss)]
    pub fn update_gauges(
        &self,
        sessions: usize,
        trade_connections: usize,
        notification_connections: usize,
    ) {
        gauge!("live_trade_sessions_active").set(sessions as f64);
        gauge!("live_trade_websocket_connections_active", "channel" => "live_trade")
            .set(trade_connections as f64);
        gauge!("live_trade_websocket_connections_active", "channel" => "notifications")
            .set(notification_connections as f64);

        let uptime = Utc::now().timestamp() - self.start_time.load(Ordering::Relaxed);
        gauge!("live_trade_uptime_seconds").set(uptime.max(0) as f64);
    }
}

impl Default for LiveTradeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: std::sync::OnceLock<LiveTradeMetrics> = std::sync::OnceLock::new();

/// Get global metrics instance
pub fn get_metrics() -> &'static LiveTradeMetrics {
    METRICS.get_or_init(LiveTradeMetrics::new)
}

static HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Install the Prometheus recorder once per process
pub fn install_recorder() -> Result<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    LiveTradeMetrics::register_metrics();
    Ok(HANDLE.get_or_init(|| handle).clone())
}

/// Start gauge updater task
pub fn start_metrics_updater<F>(counts: F) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> (usize, usize, usize) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));

        loop {
            interval.tick().await;
            let (sessions, trade_connections, notification_connections) = counts();
            get_metrics().update_gauges(sessions, trade_connections, notification_connections);
        }
    })
}
