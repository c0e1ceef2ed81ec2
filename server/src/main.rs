mod api;

use anyhow::Result;
use clap::Parser;
use guarded_query_gateway::{GatewayConfig, QueryGateway};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;

#[derive(Parser, Debug)]
#[clap(author, version, about = "HTTP service for the guarded query gateway")]
struct Args {
    /// Config file path
    #[clap(short, long, env = "GUARDED_QUERY_CONFIG")]
    config: Option<String>,

    /// TCP port to listen on
    #[clap(short, long, env = "API_PORT", default_value_t = 8080)]
    port: u16,

    /// JSON catalog of databases
    #[clap(long, env = "GUARDED_QUERY_CATALOG")]
    catalog: Option<String>,

    /// SQLite store path
    #[clap(long, env = "GUARDED_QUERY_STORE")]
    store: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting guarded query service");

    let args = Args::parse();
    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(catalog) = args.catalog {
        config.catalog_path = Some(catalog.into());
    }
    if let Some(store) = args.store {
        config.store_path = store;
    }

    let gateway = Arc::new(QueryGateway::from_config(config)?);

    // Background scan failures are logged by the worker; keep a tally here
    if let Some(mut failures) = gateway.take_scan_failures() {
        tokio::spawn(async move {
            let mut count = 0u64;
            while let Some(failure) = failures.recv().await {
                count += 1;
                tracing::warn!(
                    "Background scan failure #{} for {}: {}",
                    count,
                    failure.database_id,
                    failure.error
                );
            }
        });
    }

    let app = api::create_router(Arc::new(AppState { gateway }));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
