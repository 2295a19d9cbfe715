//! BarterBay Live-Trade Service - Main Entry Point

use anyhow::{Context, Result, bail};
use barterbay_common::{Participant, UserId};
use clap::{Arg, Command};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_trade::{LiveTradeConfig, auth::JwtVerifier, start_server};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_trade=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let matches = Command::new("live-trade")
        .version(env!("CARGO_PKG_VERSION"))
        .author("BarterBay Team")
        .about("Live peer-to-peer item trading over WebSocket")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("live-trade.toml"),
        )
        .arg(
            Arg::new("routes")
                .long("routes")
                .help("Print available routes and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dev-token")
                .long("dev-token")
                .value_name("USER_ID:USERNAME")
                .help("Print a signed token for local testing and exit"),
        )
        .get_matches();

    // Load configuration
    let default_config = "live-trade.toml".to_string();
    let config_path = matches
        .get_one::<String>("config")
        .unwrap_or(&default_config);
    let config = match LiveTradeConfig::from_file(config_path) {
        Ok(config) => {
            info!("Loaded configuration from: {}", config_path);
            config
        }
        Err(e) => {
            error!("Failed to load config from {}: {}", config_path, e);
            info!("Using default configuration");
            LiveTradeConfig::default()
        }
    };

    if matches.get_flag("routes") {
        live_trade::server::print_routes(&config);
        return Ok(());
    }

    if let Some(arg) = matches.get_one::<String>("dev-token") {
        let participant = parse_participant(arg)?;
        let verifier = JwtVerifier::new(&config.auth)?;
        println!(
            "{}",
            verifier.issue_token(&participant, config.auth.dev_token_expiry_seconds)?
        );
        return Ok(());
    }

    info!(
        "Starting BarterBay live-trade service v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Server will bind to: {}", config.server_address());
    info!(
        "Inventory: {}",
        if config.inventory.database_url.is_some() {
            "postgres"
        } else {
            "in-memory"
        }
    );
    info!("Features enabled:");
    info!("  CORS: {}", config.cors.enabled);
    info!("  Rate Limiting: {}", config.rate_limiting.enabled);
    info!("  Metrics: {}", config.monitoring.metrics_enabled);

    if let Err(e) = start_server(config).await {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Parse `USER_ID:USERNAME`
fn parse_participant(arg: &str) -> Result<Participant> {
    let (id, username) = arg
        .split_once(':')
        .context("expected USER_ID:USERNAME")?;
    let id: i64 = id.trim().parse().context("USER_ID must be an integer")?;
    let username = username.trim();
    if username.is_empty() {
        bail!("USERNAME must not be empty");
    }
    Ok(Participant::new(UserId(id), username))
}
