// ABOUTME: Incremental watermark state persisted across runs
// ABOUTME: Tracks last-seen values per (database, layout) and written table schemas

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{LoadingOptions, QueryCriterion};
use crate::error::{ExtractError, Result};
use crate::filemaker::RawRecord;

/// FileMaker timestamp rendering, e.g. `01/31/2024 16:45:00`.
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

const STATE_VERSION: u32 = 1;

/// Watermark state for one (database, layout) target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub database: String,
    pub layout: String,
    /// Maximum observed raw value per incremental field.
    #[serde(default)]
    pub last_values: HashMap<String, Value>,
    pub last_sync_at: DateTime<Utc>,
    #[serde(default)]
    pub last_row_count: u64,
}

impl TargetState {
    pub fn new(database: &str, layout: &str) -> Self {
        Self {
            database: database.to_string(),
            layout: layout.to_string(),
            last_values: HashMap::new(),
            last_sync_at: Utc::now(),
            last_row_count: 0,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.database, self.layout)
    }
}

/// Everything persisted across runs: per-target watermarks plus the column
/// order each output table was last written with (so later runs keep a
/// stable column order even when early records omit fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub targets: HashMap<String, TargetState>,
    #[serde(default)]
    pub table_schemas: HashMap<String, Vec<String>>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            targets: HashMap::new(),
            table_schemas: HashMap::new(),
            version: STATE_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn target(&self, database: &str, layout: &str) -> Option<&TargetState> {
        self.targets.get(&target_key(database, layout))
    }

    pub fn upsert_target(&mut self, target: TargetState) {
        self.targets.insert(target.qualified_name(), target);
        self.updated_at = Utc::now();
    }

    pub fn remove_target(&mut self, database: &str, layout: &str) -> Option<TargetState> {
        let removed = self.targets.remove(&target_key(database, layout));
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Default state file location.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".filemaker-extractor").join("state.json"))
            .unwrap_or_else(|| PathBuf::from(".filemaker-extractor/state.json"))
    }
}

fn target_key(database: &str, layout: &str) -> String {
    format!("{database}/{layout}")
}

/// Returns the lower-bound criterion for the next fetch, or `None` on the
/// first run (no prior state) or when incremental fetching is disabled.
pub fn filter_for(
    prior: Option<&TargetState>,
    options: &LoadingOptions,
) -> Option<QueryCriterion> {
    if !options.incremental_fetch {
        return None;
    }
    let field = options.incremental_field();
    let last = prior?.last_values.get(field)?;
    Some(QueryCriterion {
        field_name: field.to_string(),
        find_criteria: format!(">= {}", render_watermark(last)),
    })
}

/// Scans fetched records for the maximum value of the incremental field and
/// returns the advanced state. An empty fetch leaves the prior state
/// untouched so the watermark never regresses.
pub fn advance(
    prior: Option<&TargetState>,
    database: &str,
    layout: &str,
    records: &[RawRecord],
    field: &str,
) -> Result<TargetState> {
    let mut next = prior
        .cloned()
        .unwrap_or_else(|| TargetState::new(database, layout));
    if records.is_empty() {
        return Ok(next);
    }

    let mut max = next.last_values.get(field).cloned();
    for record in records {
        let Some(value) = record.field_data.get(field) else {
            continue;
        };
        if value.is_null() || matches!(value, Value::String(s) if s.is_empty()) {
            continue;
        }
        max = match max {
            None => Some(value.clone()),
            Some(current) => {
                if compare_watermark(value, &current)? == Ordering::Greater {
                    Some(value.clone())
                } else {
                    Some(current)
                }
            }
        };
    }

    if let Some(value) = max {
        next.last_values.insert(field.to_string(), value);
    }
    next.last_sync_at = Utc::now();
    next.last_row_count = records.len() as u64;
    Ok(next)
}

/// Compares two watermark values using the field's value semantics: numeric
/// for numbers, chronological for strings that parse as FileMaker
/// timestamps, lexicographic for other strings. Mixed kinds are a
/// configuration error, never a silent fallback.
pub fn compare_watermark(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            match (x, y) {
                (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
                    ExtractError::Config("non-finite numeric watermark value".to_string())
                }),
                _ => Err(ExtractError::Config(
                    "numeric watermark value out of range".to_string(),
                )),
            }
        }
        (Value::String(x), Value::String(y)) => {
            let parsed_x = NaiveDateTime::parse_from_str(x, TIMESTAMP_FORMAT);
            let parsed_y = NaiveDateTime::parse_from_str(y, TIMESTAMP_FORMAT);
            match (parsed_x, parsed_y) {
                (Ok(tx), Ok(ty)) => Ok(tx.cmp(&ty)),
                _ => Ok(x.cmp(y)),
            }
        }
        _ => Err(ExtractError::Config(format!(
            "incomparable watermark values {a} and {b}; the incremental field must \
             hold one consistent type"
        ))),
    }
}

fn render_watermark(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Durable storage for [`SyncState`], addressed as one document. A `store`
/// must be all-or-nothing: a crash mid-write may not mix old and new
/// watermark values.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<SyncState>;
    fn store(&self, state: &SyncState) -> Result<()>;
}

/// JSON-file store. Writes go through a temp file in the same directory and
/// an atomic rename.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load_inner(&self) -> anyhow::Result<SyncState> {
        if !self.path.exists() {
            return Ok(SyncState::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read sync state from {:?}", self.path))?;
        match serde_json::from_str(&contents) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse sync state from {:?}: {}. Starting from empty state.",
                    self.path,
                    e
                );
                Ok(SyncState::new())
            }
        }
    }

    fn store_inner(&self, state: &SyncState) -> anyhow::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {parent:?}"))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temporary state file")?;
        serde_json::to_writer_pretty(&mut tmp, state).context("Failed to serialize sync state")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write sync state to {:?}", self.path))?;
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<SyncState> {
        self.load_inner().map_err(ExtractError::State)
    }

    fn store(&self, state: &SyncState) -> Result<()> {
        self.store_inner(state).map_err(ExtractError::State)
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: std::sync::Mutex<Option<SyncState>>,
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<SyncState> {
        Ok(self
            .inner
            .lock()
            .expect("state store lock poisoned")
            .clone()
            .unwrap_or_default())
    }

    fn store(&self, state: &SyncState) -> Result<()> {
        *self.inner.lock().expect("state store lock poisoned") = Some(state.clone());
        Ok(())
    }
}
