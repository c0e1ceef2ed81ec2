use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use guarded_query_gateway::{AlertFilter, GatewayConfig, QueryGateway};
use log::{error, info};
use serde::Serialize;
use serde_json::Value;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Guarded read-only SQL gateway and anomaly scanner")]
struct Args {
    /// Config file path
    #[clap(short, long, env = "GUARDED_QUERY_CONFIG")]
    config: Option<String>,

    /// JSON catalog of databases
    #[clap(long, env = "GUARDED_QUERY_CATALOG")]
    catalog: Option<String>,

    /// SQLite store path
    #[clap(long, env = "GUARDED_QUERY_STORE")]
    store: Option<String>,

    /// Rewrite alert wording with a language model
    #[clap(long)]
    enhance: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a statement without running it
    Validate {
        /// Database id
        database: String,

        /// SQL statement
        sql: String,
    },

    /// Validate and run a read query
    Query {
        /// Database id
        database: String,

        /// SQL statement
        sql: String,

        /// Positional parameters as a JSON array
        #[clap(long)]
        params: Option<String>,
    },

    /// Run an anomaly scan and wait for it
    Scan {
        /// Database id
        database: String,
    },

    /// List alerts
    Alerts {
        /// Database id
        database: String,

        /// Include dismissed alerts
        #[clap(long)]
        include_dismissed: bool,

        /// Maximum alerts listed
        #[clap(long, default_value_t = 50)]
        limit: usize,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = GatewayConfig::load(args.config.as_deref())?;

    // Override config with command-line arguments
    if let Some(catalog) = args.catalog {
        config.catalog_path = Some(catalog.into());
    }
    if let Some(store) = args.store {
        config.store_path = store;
    }
    if args.enhance {
        config.enhancement.enabled = true;
    }

    let gateway = QueryGateway::from_config(config)?;

    match args.command {
        Command::Validate { database, sql } => {
            print_json(&gateway.validate(&database, &sql).await?)?;
        }
        Command::Query { database, sql, params } => {
            let params: Vec<Value> = match params {
                Some(raw) => serde_json::from_str(&raw).context("--params must be a JSON array")?,
                None => Vec::new(),
            };
            let outcome = gateway.validate_and_execute(&database, &sql, &params).await;
            print_json(&outcome)?;
            if !outcome.is_success() {
                bail!("query failed: {}", outcome.validation.error_summary());
            }
        }
        Command::Scan { database } => {
            let report = gateway.run_scan(&database).await?;
            info!(
                "Scan {} finished as {} with {} alert(s)",
                report.scan.id,
                report.scan.status,
                report.alerts.len()
            );
            print_json(&serde_json::json!({
                "scan": report.scan,
                "alerts": report.alerts,
            }))?;
            if let Some(reason) = &report.scan.error {
                error!("Scan failed: {}", reason);
            }
        }
        Command::Alerts {
            database,
            include_dismissed,
            limit,
        } => {
            let filter = AlertFilter {
                include_dismissed,
                limit,
            };
            print_json(&gateway.get_alerts(&database, filter).await?)?;
        }
    }

    gateway.shutdown().await;
    Ok(())
}
