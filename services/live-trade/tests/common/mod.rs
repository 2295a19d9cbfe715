//! Fixtures shared by every live-trade test target

use live_trade::LiveTradeConfig;
use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ensure tracing is initialized only once across all tests
static INIT: Once = Once::new();

/// Initialize test environment
pub fn init_test_env() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "live_trade=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Create a test configuration suitable for testing
pub fn create_test_config() -> LiveTradeConfig {
    let mut config = LiveTradeConfig::default();
    config.server.port = 0; // Random port for tests
    config.auth.jwt_secret = "test-jwt-secret-key-for-testing-only".to_string();
    config.rate_limiting.messages_per_second = 1000; // High limit for tests
    config.rate_limiting.burst_size = 1000;
    config.monitoring.metrics_enabled = false;
    config
}
