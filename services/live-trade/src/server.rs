//! Live-trade server implementation

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    middleware,
    response::Json,
    routing::get,
};
use barterbay_common::UserId;
use inventory_store::{InMemoryInventory, InventoryStore};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    auth::{AuthVerifier, JwtVerifier},
    config::{InventoryConfig, LiveTradeConfig},
    connections::{CloseReason, ConnectionManager},
    engine::TradeEngine,
    middleware::{create_cors_layer, logging_middleware},
    models::CancelReason,
    notifications::{NotificationHub, Notifier},
    registry::SessionRegistry,
    websocket::{GatewayState, live_trade_handler, notifications_handler},
};

/// Health check payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
    pub live_trade_connections: usize,
    pub notification_connections: usize,
}

#[derive(Clone)]
struct AppState {
    gateway: GatewayState,
    start_time: Instant,
    #[cfg(feature = "monitoring")]
    prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl axum::extract::FromRef<AppState> for GatewayState {
    fn from_ref(state: &AppState) -> Self {
        state.gateway.clone()
    }
}

/// Live-trade server
pub struct LiveTradeServer {
    config: LiveTradeConfig,
    engine: Arc<TradeEngine>,
    notifications: Arc<NotificationHub>,
    verifier: Arc<JwtVerifier>,
    tasks: Vec<JoinHandle<()>>,
    start_time: Instant,
}

impl LiveTradeServer {
    /// Build the server with the inventory backend named in `config`
    pub async fn new(config: LiveTradeConfig) -> Result<Self> {
        let inventory = build_inventory(&config.inventory, config.sessions.commit_timeout()).await?;
        Self::with_inventory(config, inventory)
    }

    /// Build the server around an existing inventory store.
    ///
    /// Spawns the disconnect listener and expiry sweep, so it must be
    /// called inside a Tokio runtime.
    pub fn with_inventory(
        config: LiveTradeConfig,
        inventory: Arc<dyn InventoryStore>,
    ) -> Result<Self> {
        config.validate()?;
        info!("Initializing live-trade server");

        let verifier = Arc::new(
            JwtVerifier::new(&config.auth).context("invalid auth configuration")?,
        );

        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel::<UserId>();
        let connections = Arc::new(ConnectionManager::with_disconnect_channel(disconnect_tx));
        let notifications = Arc::new(NotificationHub::new(config.server.notification_backlog));

        let engine = Arc::new(TradeEngine::new(
            Arc::new(SessionRegistry::new()),
            connections,
            inventory,
            Arc::clone(&notifications) as Arc<dyn Notifier>,
            config.sessions.clone(),
        ));

        let tasks = vec![
            engine.spawn_disconnect_listener(disconnect_rx),
            engine.spawn_expiry_task(),
        ];

        info!("Live-trade server initialized successfully");
        Ok(Self {
            config,
            engine,
            notifications,
            verifier,
            tasks,
            start_time: Instant::now(),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<TradeEngine> {
        &self.engine
    }

    #[must_use]
    pub fn notifications(&self) -> &Arc<NotificationHub> {
        &self.notifications
    }

    #[must_use]
    pub fn verifier(&self) -> &Arc<JwtVerifier> {
        &self.verifier
    }

    /// Router with all routes and middleware
    pub fn router(&self) -> Router {
        let gateway = GatewayState {
            engine: Arc::clone(&self.engine),
            notifications: Arc::clone(&self.notifications),
            verifier: Arc::clone(&self.verifier) as Arc<dyn AuthVerifier>,
            rate_limiting: self.config.rate_limiting.clone(),
            outbound_buffer: self.config.server.outbound_buffer,
        };

        let state = AppState {
            gateway,
            start_time: self.start_time,
            #[cfg(feature = "monitoring")]
            prometheus: self.prometheus_handle(),
        };

        #[cfg_attr(not(feature = "monitoring"), allow(unused_mut))]
        let mut routes = Router::new()
            .route(&self.config.server.live_trade_path, get(live_trade_handler))
            .route(
                &self.config.server.notifications_path,
                get(notifications_handler),
            )
            .route(&self.config.monitoring.health_path, get(health_check));

        #[cfg(feature = "monitoring")]
        if self.config.monitoring.metrics_enabled {
            routes = routes.route(&self.config.monitoring.metrics_path, get(metrics));
        }

        let mut app: Router = routes
            .with_state(state)
            .layer(middleware::from_fn(logging_middleware))
            .layer(TraceLayer::new_for_http());

        if self.config.cors.enabled {
            app = app.layer(create_cors_layer(&self.config.cors));
        }

        app
    }

    /// Bind the configured address and serve until Ctrl-C / SIGTERM
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .server_address()
            .parse()
            .with_context(|| format!("invalid server address '{}'", self.config.server_address()))?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind to address {addr}"))?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an existing listener until `shutdown` resolves
    pub async fn serve<F>(mut self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        #[cfg(feature = "monitoring")]
        if self.config.monitoring.metrics_enabled {
            let engine = Arc::clone(&self.engine);
            let notifications = Arc::clone(&self.notifications);
            self.tasks.push(crate::metrics::start_metrics_updater(move || {
                (
                    engine.registry().len(),
                    engine.connections().connection_count(),
                    notifications.connections().connection_count(),
                )
            }));
        }

        info!("Starting live-trade server on {}", listener.local_addr()?);

        let engine = Arc::clone(&self.engine);
        let notifications = Arc::clone(&self.notifications);
        let graceful = async move {
            shutdown.await;
            info!("Shutdown signal received, closing live connections");

            let cancelled = engine.cancel_all(CancelReason::Shutdown).await;
            if cancelled > 0 {
                info!(cancelled, "Cancelled live trade sessions");
            }
            engine.connections().close_all(CloseReason::Shutdown);
            notifications.connections().close_all(CloseReason::Shutdown);
        };

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await;

        for task in &self.tasks {
            task.abort();
        }

        if let Err(e) = result {
            error!("Server encountered a fatal error: {}", e);
            return Err(e.into());
        }

        info!("Live-trade server stopped");
        Ok(())
    }

    #[cfg(feature = "monitoring")]
    fn prometheus_handle(&self) -> Option<metrics_exporter_prometheus::PrometheusHandle> {
        if !self.config.monitoring.metrics_enabled {
            return None;
        }
        match crate::metrics::install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        }
    }
}

async fn build_inventory(
    config: &InventoryConfig,
    commit_timeout: Duration,
) -> Result<Arc<dyn InventoryStore>> {
    if let Some(url) = &config.database_url {
        #[cfg(feature = "postgres")]
        {
            let store = inventory_store::PgInventoryStore::connect(url, config.max_connections)
                .await
                .context("failed to connect inventory database")?
                .with_commit_timeout(commit_timeout);
            store.ensure_schema().await?;
            return Ok(Arc::new(store));
        }

        #[cfg(not(feature = "postgres"))]
        {
            let _ = (url, commit_timeout);
            anyhow::bail!("inventory.database_url is set but the `postgres` feature is disabled");
        }
    }

    info!(
        seeded = config.seed.len(),
        "Using in-memory inventory store"
    );
    Ok(Arc::new(InMemoryInventory::with_holdings(
        config
            .seed
            .iter()
            .map(|holding| (holding.user_id, holding.item_id, holding.quantity)),
    )))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = &state.gateway.engine;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_sessions: engine.registry().len(),
        live_trade_connections: engine.connections().connection_count(),
        notification_connections: state.gateway.notifications.connections().connection_count(),
    })
}

#[cfg(feature = "monitoring")]
async fn metrics(State(state): State<AppState>) -> axum::response::Response {
    use axum::response::IntoResponse;

    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Route documentation
pub fn print_routes(config: &LiveTradeConfig) {
    println!("Live-Trade Routes:");
    println!("==================");
    println!();
    println!("WebSocket (token via ?token= or Authorization: Bearer):");
    println!(
        "  GET  {:<24} - Live trade sessions",
        config.server.live_trade_path
    );
    println!(
        "  GET  {:<24} - Notification stream",
        config.server.notifications_path
    );
    println!();
    println!("Health & Monitoring:");
    println!(
        "  GET  {:<24} - Health check",
        config.monitoring.health_path
    );
    println!(
        "  GET  {:<24} - Prometheus metrics",
        config.monitoring.metrics_path
    );
    println!();
    println!("Client messages:");
    println!("  trade_invite, trade_accept, trade_decline, add_item, remove_item,");
    println!("  confirm_trade, cancel_trade, ping");
}
