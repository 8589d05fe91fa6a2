// ABOUTME: The state command: inspect or reset persisted incremental state
// ABOUTME: Operates on the same JSON file the run command commits to

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::state::{JsonStateStore, StateStore, SyncState};

#[derive(Args)]
pub struct StateArgs {
    /// Path to the incremental state file (defaults to ~/.filemaker-extractor/state.json)
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,
    #[command(subcommand)]
    command: StateCommands,
}

#[derive(Subcommand)]
enum StateCommands {
    /// Show watermarks and table schemas recorded by previous runs
    Show,
    /// Clear recorded state, either for one (database, layout) pair or entirely
    Reset {
        #[arg(long, requires = "layout")]
        database: Option<String>,
        #[arg(long, requires = "database")]
        layout: Option<String>,
    },
}

pub fn state(args: StateArgs) -> Result<()> {
    let path = args.state_file.unwrap_or_else(SyncState::default_path);
    let store = JsonStateStore::new(&path);

    match args.command {
        StateCommands::Show => {
            if !path.exists() {
                println!("No incremental state recorded.");
                return Ok(());
            }
            let state = store.load().context("Failed to load state")?;
            if state.targets.is_empty() {
                println!("No incremental state recorded.");
            } else {
                let mut names: Vec<&String> = state.targets.keys().collect();
                names.sort();
                for name in names {
                    let target = &state.targets[name];
                    println!(
                        "{}: {} record(s) at {}",
                        name, target.last_row_count, target.last_sync_at
                    );
                    let mut fields: Vec<&String> = target.last_values.keys().collect();
                    fields.sort();
                    for field in fields {
                        println!("  {} = {}", field, target.last_values[field]);
                    }
                }
            }
            if !state.table_schemas.is_empty() {
                let mut tables: Vec<&String> = state.table_schemas.keys().collect();
                tables.sort();
                for table in tables {
                    println!(
                        "table '{}': {} column(s)",
                        table,
                        state.table_schemas[table].len()
                    );
                }
            }
        }
        StateCommands::Reset { database, layout } => match (database, layout) {
            (Some(database), Some(layout)) => {
                let mut state = store.load().context("Failed to load state")?;
                if state.remove_target(&database, &layout).is_some() {
                    store.store(&state).context("Failed to save state")?;
                    println!("Cleared state for {}/{}.", database, layout);
                } else {
                    println!("No state recorded for {}/{}.", database, layout);
                }
            }
            _ => {
                if path.exists() {
                    std::fs::remove_file(&path)
                        .with_context(|| format!("Failed to remove {path:?}"))?;
                    println!("Cleared all incremental state.");
                } else {
                    println!("No incremental state recorded.");
                }
            }
        },
    }
    Ok(())
}
