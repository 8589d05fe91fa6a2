// ABOUTME: Output sink contract and CSV table writer
// ABOUTME: Emits one CSV file per table plus a JSON manifest with the write mode

use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ExtractError, Result};
use crate::normalize::NormalizedRecord;

/// How the downstream storage should apply a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the destination table wholesale.
    Overwrite,
    /// Insert-or-update keyed by the given primary key columns.
    Upsert { pkey: Vec<String> },
}

/// Accepts finished tables. Implementations must persist durably before
/// returning success.
pub trait OutputSink {
    fn write_table(
        &mut self,
        name: &str,
        columns: &[String],
        records: &[NormalizedRecord],
        mode: &WriteMode,
    ) -> Result<()>;
}

/// Writes `<table>.csv` plus `<table>.csv.manifest` (JSON) into a directory.
/// The manifest carries what the CSV cannot: primary key and write mode.
pub struct CsvSink {
    dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct TableManifest<'a> {
    columns: &'a [String],
    primary_key: &'a [String],
    incremental: bool,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write_inner(
        &self,
        name: &str,
        columns: &[String],
        records: &[NormalizedRecord],
        mode: &WriteMode,
    ) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create output directory {:?}", self.dir))?;

        let csv_path = self.dir.join(format!("{name}.csv"));
        let mut writer = csv::Writer::from_path(&csv_path)
            .with_context(|| format!("Failed to create {csv_path:?}"))?;
        writer.write_record(columns)?;
        for record in records {
            let row: Vec<String> = columns
                .iter()
                .map(|column| record.get(column).map(render_cell).unwrap_or_default())
                .collect();
            writer.write_record(&row)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to flush {csv_path:?}"))?;

        let (primary_key, incremental): (&[String], bool) = match mode {
            WriteMode::Overwrite => (&[], false),
            WriteMode::Upsert { pkey } => (pkey, true),
        };
        let manifest = TableManifest {
            columns,
            primary_key,
            incremental,
        };
        let manifest_path = self.dir.join(format!("{name}.csv.manifest"));
        let file = File::create(&manifest_path)
            .with_context(|| format!("Failed to create {manifest_path:?}"))?;
        serde_json::to_writer_pretty(file, &manifest)
            .with_context(|| format!("Failed to write {manifest_path:?}"))?;

        tracing::info!("wrote table '{}' ({} records)", name, records.len());
        Ok(())
    }
}

impl OutputSink for CsvSink {
    fn write_table(
        &mut self,
        name: &str,
        columns: &[String],
        records: &[NormalizedRecord],
        mode: &WriteMode,
    ) -> Result<()> {
        self.write_inner(name, columns, records, mode)
            .map_err(ExtractError::Output)
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Collects written tables in memory; used in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub tables: Vec<WrittenTable>,
}

#[derive(Debug, Clone)]
pub struct WrittenTable {
    pub name: String,
    pub columns: Vec<String>,
    pub records: Vec<NormalizedRecord>,
    pub mode: WriteMode,
}

impl MemorySink {
    pub fn table(&self, name: &str) -> Option<&WrittenTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}

impl OutputSink for MemorySink {
    fn write_table(
        &mut self,
        name: &str,
        columns: &[String],
        records: &[NormalizedRecord],
        mode: &WriteMode,
    ) -> Result<()> {
        self.tables.push(WrittenTable {
            name: name.to_string(),
            columns: columns.to_vec(),
            records: records.to_vec(),
            mode: mode.clone(),
        });
        Ok(())
    }
}
