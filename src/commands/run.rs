// ABOUTME: The run command: executes one extraction end to end
// ABOUTME: Wires the HTTP client, CSV sink, and state file into the sync runner

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::ExtractorConfig;
use crate::filemaker::DataApiClient;
use crate::output::CsvSink;
use crate::state::{JsonStateStore, SyncState};
use crate::sync::SyncRunner;

pub async fn run(
    config_path: &Path,
    output_dir: &Path,
    state_file: Option<PathBuf>,
) -> Result<()> {
    let raw = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read configuration from {config_path:?}"))?;
    let config = ExtractorConfig::from_json(&raw)?;
    // Reject contradictory configuration before touching the network.
    config.query.validate()?;

    if !config.connection.ssl_verify {
        tracing::warn!("SSL certificate verification is disabled!");
    }

    let client = DataApiClient::new(&config.connection)?;
    let state_path = state_file.unwrap_or_else(SyncState::default_path);
    let store = JsonStateStore::new(&state_path);
    let mut sink = CsvSink::new(output_dir);

    tracing::info!("State file: {:?}", state_path);
    tracing::info!("Output directory: {:?}", output_dir);

    // Abort cleanly on Ctrl+C without committing any state.
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    let mut runner = SyncRunner::new(&client, &store, &mut sink, &config.query);
    let result = runner.run_with_shutdown(shutdown_rx).await;

    // Sessions expire server-side after 15 minutes, but close them promptly
    // regardless of how the run ended.
    client.logout_all().await;

    let report = result?;

    println!();
    println!("========================================");
    println!("Extraction complete");
    println!("========================================");
    for table in &report.tables {
        println!("  {}: {} record(s)", table.name, table.rows);
    }
    println!("  Total: {} record(s)", report.total_rows());

    Ok(())
}
