//! unfurl: resolve media URLs, queue resolutions and run the task worker.
//!
//! Configuration comes from the environment (and `.env`); see `unfurl_core::Config`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use unfurl_core::models::ResolveMediaPayload;
use unfurl_core::Config;
use unfurl_infra::init_telemetry;
use unfurl_services::{AppState, ResolveOptions};

#[derive(Parser)]
#[command(name = "unfurl", about = "Media URL metadata resolver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a URL now and print the record
    Resolve {
        url: String,
        /// Ignore the cached record
        #[arg(long)]
        force: bool,
        /// Id of the API credential to use
        #[arg(long)]
        key: Option<String>,
    },
    /// Queue a resolution for the worker
    Enqueue {
        url: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        key: Option<String>,
    },
    /// Run the task worker until interrupted
    Worker,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;
    init_telemetry(config.log_json())?;

    let cli = Cli::parse();
    let state = AppState::from_config(&config).await?;

    match cli.command {
        Commands::Resolve { url, force, key } => {
            let options = ResolveOptions {
                force,
                credential_id: key,
            };
            let record = state.resolver.resolve_to_record(&url, &options).await;
            print_json(&record)?;
            if record.is_error() {
                std::process::exit(1);
            }
        }
        Commands::Enqueue { url, force, key } => {
            let payload = ResolveMediaPayload {
                url,
                force,
                credential_id: key,
            };
            let task_id = state
                .queue
                .submit(&payload, chrono::Utc::now())
                .await
                .context("Failed to queue resolution")?;
            print_json(&serde_json::json!({ "task_id": task_id }))?;
        }
        Commands::Worker => {
            if state.pool.is_none() {
                tracing::warn!("No database configured, the worker only sees tasks queued in this process");
            }
            let queue = state.start_worker();
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            queue.shutdown().await;
            tracing::info!("Worker stopped");
        }
    }

    Ok(())
}
