//! Constants shared across the live-trade services
//!
//! Single source of truth for protocol paths and limits

// Protocol paths
/// WebSocket upgrade path for live trading
pub const LIVE_TRADE_PATH: &str = "/live-trade";
/// WebSocket upgrade path for the notification stream
pub const NOTIFICATIONS_PATH: &str = "/notifications";
/// Health endpoint
pub const HEALTH_PATH: &str = "/health";
/// Prometheus endpoint
pub const METRICS_PATH: &str = "/metrics";

// Identifier limits
pub const MAX_TRADE_ID_LEN: usize = 64;
pub const MAX_USERNAME_LEN: usize = 64;

// Offer limits
pub const DEFAULT_MAX_OFFER_LINES: usize = 32;
pub const DEFAULT_MAX_LINE_QUANTITY: u32 = 1_000_000;

// Time constants
pub const MILLIS_PER_SEC: u64 = 1000;
pub const SECS_PER_MIN: u64 = 60;

// Session timeouts
pub const DEFAULT_INVITE_TIMEOUT_SECS: u64 = 2 * SECS_PER_MIN;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 15 * SECS_PER_MIN;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 5 * MILLIS_PER_SEC;

// Buffer sizes
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;
pub const DEFAULT_NOTIFICATION_BACKLOG: usize = 50;

// WebSocket close codes (4000-4999 are reserved for applications)
pub const CLOSE_CODE_SUPERSEDED: u16 = 4001;
pub const CLOSE_CODE_SHUTDOWN: u16 = 4002;
