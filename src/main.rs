use anyhow::Result;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

mod api;
mod canonical;
mod config;
mod db;
mod error;
mod security;
mod services;

pub use error::Error;

use api::rest::RestApi;
use db::DatabaseService;
use services::analyzer::VisionClient;
use services::risk::RiskRecomputeClient;

async fn run_app() -> Result<()> {
    // Initialize logging
    env_logger::init();
    info!("Starting HotelGuard ingestion service");

    // Optional config file path as the first argument; env vars override
    // file values either way.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Arc::new(config::load_config(config_path.as_deref())?);
    info!("Configuration loaded");

    // Database pool and migrations
    let database = DatabaseService::new(&config.database).await?;

    // External collaborators
    let analyzer = Arc::new(VisionClient::new(config.analyzer.clone())?);
    let risk = Arc::new(RiskRecomputeClient::new(config.risk.clone())?);

    // Start the REST API
    let http_server = RestApi::new(
        Arc::clone(&config),
        Arc::clone(&database.pool),
        analyzer,
        risk,
    )?;

    let server = tokio::spawn(async move { http_server.run().await });

    // Wait for termination signals
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server.abort();

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
