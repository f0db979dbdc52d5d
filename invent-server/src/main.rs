use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use invent_core::{CannedGenerationClient, InventConfig};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use invent_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Invent development backend", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "invent.toml")]
    config: String,

    /// Override `[http] host`
    #[arg(long)]
    host: Option<String>,

    /// Override `[http] port`
    #[arg(long)]
    port: Option<u16>,

    /// Simulated generation latency in milliseconds
    #[arg(long)]
    generation_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match InventConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let host = args.host.unwrap_or(config.http.host);
    let port = args.port.unwrap_or(config.http.port);

    let mut generator = CannedGenerationClient::new();
    if let Some(ms) = args.generation_delay_ms {
        generator = generator.with_delay(Duration::from_millis(ms));
    }
    let state = Arc::new(HttpState::new(generator));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let listener = TcpListener::bind(format!("{}:{}", host, port)).await?;
    http::start_http_server(listener, state, tx.subscribe()).await?;

    Ok(())
}
