//! Configuration for the live-trade service

use anyhow::{Result, bail};
use barterbay_common::{ItemId, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::OfferLimits;

/// Live-trade service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveTradeConfig {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,
    /// Token verification
    pub auth: AuthConfig,
    /// Trade session policy
    pub sessions: SessionConfig,
    /// Per-connection rate limiting
    pub rate_limiting: RateLimitConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
    /// Inventory backend
    pub inventory: InventoryConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Live-trade WebSocket path
    pub live_trade_path: String,
    /// Notification WebSocket path
    pub notifications_path: String,
    /// Outbound events buffered per connection before dropping
    pub outbound_buffer: usize,
    /// Undelivered notifications kept per user
    pub notification_backlog: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            live_trade_path: barterbay_common::LIVE_TRADE_PATH.to_string(),
            notifications_path: barterbay_common::NOTIFICATIONS_PATH.to_string(),
            outbound_buffer: barterbay_common::DEFAULT_OUTBOUND_BUFFER,
            notification_backlog: barterbay_common::DEFAULT_NOTIFICATION_BACKLOG,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret for HMAC-signed tokens
    pub jwt_secret: String,
    /// Allowed token algorithms
    pub allowed_algorithms: Vec<String>,
    /// Clock skew tolerated on `exp`
    pub leeway_seconds: u64,
    /// Lifetime of tokens issued with `--dev-token`
    pub dev_token_expiry_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
            allowed_algorithms: vec!["HS256".to_string()],
            leeway_seconds: 30,
            dev_token_expiry_seconds: 3600, // 1 hour
        }
    }
}

/// Trade session policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Unanswered invites are cancelled after this long
    pub invite_timeout_seconds: u64,
    /// Negotiations with no activity are cancelled after this long
    pub idle_timeout_seconds: u64,
    /// How often the expiry sweep runs
    pub sweep_interval_seconds: u64,
    /// Upper bound on one inventory commit, enforced by the store
    pub commit_timeout_ms: u64,
    /// Distinct items per side
    pub max_offer_lines: usize,
    /// Units per offer line
    pub max_line_quantity: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            invite_timeout_seconds: barterbay_common::DEFAULT_INVITE_TIMEOUT_SECS,
            idle_timeout_seconds: barterbay_common::DEFAULT_IDLE_TIMEOUT_SECS,
            sweep_interval_seconds: barterbay_common::DEFAULT_SWEEP_INTERVAL_SECS,
            commit_timeout_ms: barterbay_common::DEFAULT_COMMIT_TIMEOUT_MS,
            max_offer_lines: barterbay_common::DEFAULT_MAX_OFFER_LINES,
            max_line_quantity: barterbay_common::DEFAULT_MAX_LINE_QUANTITY,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn invite_timeout(&self) -> Duration {
        Duration::from_secs(self.invite_timeout_seconds)
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    #[must_use]
    pub const fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    #[must_use]
    pub const fn offer_limits(&self) -> OfferLimits {
        OfferLimits {
            max_lines: self.max_offer_lines,
            max_line_quantity: self.max_line_quantity,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Sustained inbound frames per second per connection
    pub messages_per_second: u32,
    /// Burst capacity
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_second: 20,
            burst_size: 40,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins
    pub allowed_origins: Vec<String>,
    /// Max age for preflight requests
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            max_age_seconds: 86400, // 24 hours
        }
    }
}

/// Monitoring and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    pub metrics_enabled: bool,
    /// Metrics endpoint path
    pub metrics_path: String,
    /// Health check endpoint path
    pub health_path: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_path: barterbay_common::METRICS_PATH.to_string(),
            health_path: barterbay_common::HEALTH_PATH.to_string(),
        }
    }
}

/// Inventory backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// PostgreSQL URL; in-memory inventory when absent
    pub database_url: Option<String>,
    /// Pool size for the PostgreSQL backend
    pub max_connections: u32,
    /// Holdings loaded into the in-memory backend at startup
    pub seed: Vec<SeedHolding>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            seed: Vec::new(),
        }
    }
}

/// One seeded holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedHolding {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub quantity: u32,
}

impl LiveTradeConfig {
    /// Load configuration from file, with `LIVE_TRADE__SECTION__KEY` overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("LIVE_TRADE").separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            bail!("auth.jwt_secret must not be empty");
        }
        if self.auth.allowed_algorithms.is_empty() {
            bail!("auth.allowed_algorithms must list at least one algorithm");
        }
        if self.server.outbound_buffer == 0 {
            bail!("server.outbound_buffer must be positive");
        }
        for path in [
            &self.server.live_trade_path,
            &self.server.notifications_path,
            &self.monitoring.health_path,
            &self.monitoring.metrics_path,
        ] {
            if !path.starts_with('/') {
                bail!("route path {path:?} must start with '/'");
            }
        }
        if self.sessions.sweep_interval_seconds == 0 {
            bail!("sessions.sweep_interval_seconds must be positive");
        }
        if self.sessions.commit_timeout_ms == 0 {
            bail!("sessions.commit_timeout_ms must be positive");
        }
        if self.sessions.max_offer_lines == 0 || self.sessions.max_line_quantity == 0 {
            bail!("offer limits must be positive");
        }
        if self.rate_limiting.enabled
            && (self.rate_limiting.messages_per_second == 0 || self.rate_limiting.burst_size == 0)
        {
            bail!("rate_limiting.messages_per_second and burst_size must be positive");
        }
        Ok(())
    }

    /// Get server address
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
