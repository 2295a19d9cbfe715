//! BarterBay Live-Trade Service
//!
//! WebSocket service in which two authenticated users negotiate a trade.
//! Features:
//! - Session registry enforcing one live trade per user
//! - Table-driven trade state machine (invite, negotiate, confirm, commit)
//! - Atomic inventory commit through `inventory-store`
//! - Last-connection-wins connection manager with disconnect detection
//! - Offline notification backlog and per-connection rate limiting

#![allow(missing_docs)]

use anyhow::Result;

pub mod auth;
pub mod config;
pub mod connections;
pub mod engine;
pub mod error;
#[cfg(feature = "monitoring")]
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod rate_limiter;
pub mod registry;
pub mod server;
pub mod session;
pub mod websocket;

pub use config::{AuthConfig, LiveTradeConfig, RateLimitConfig, ServerConfig, SessionConfig};
pub use engine::TradeEngine;
pub use error::{TradeError, TradeResult};
pub use server::LiveTradeServer;

/// Start the live-trade server
pub async fn start_server(config: LiveTradeConfig) -> Result<()> {
    let server = LiveTradeServer::new(config).await?;
    server.start().await
}
