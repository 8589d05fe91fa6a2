// ABOUTME: Top-level sync orchestration for one extraction run
// ABOUTME: Sequences metadata or layout phases and commits incremental state last

use std::collections::HashSet;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::{LoadMode, ObjectType, QueryConfig};
use crate::error::{ExtractError, Result};
use crate::filemaker::{DataSource, LayoutDescriptor};
use crate::normalize::{normalize_name, normalize_record, NormalizedRecord};
use crate::output::{OutputSink, WriteMode};
use crate::pager::Pager;
use crate::query::build_plan;
use crate::state::{self, StateStore};

/// Structured outcome of a successful run. Failures travel as
/// [`ExtractError`] and carry their kind.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
}

#[derive(Debug, Clone)]
pub struct TableReport {
    pub name: String,
    pub rows: u64,
}

impl RunReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    fn single(name: String, rows: u64) -> Self {
        Self {
            tables: vec![TableReport { name, rows }],
        }
    }
}

/// Runs one extraction: validates the configuration, branches on the object
/// type, and commits incremental state only after everything else succeeded.
pub struct SyncRunner<'a, D: DataSource, S: StateStore, O: OutputSink> {
    source: &'a D,
    state_store: &'a S,
    sink: &'a mut O,
    config: &'a QueryConfig,
}

impl<'a, D: DataSource, S: StateStore, O: OutputSink> SyncRunner<'a, D, S, O> {
    pub fn new(
        source: &'a D,
        state_store: &'a S,
        sink: &'a mut O,
        config: &'a QueryConfig,
    ) -> Self {
        Self {
            source,
            state_store,
            sink,
            config,
        }
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        self.config.validate()?;
        match self.config.object_type {
            ObjectType::Metadata => self.run_metadata().await,
            ObjectType::Layout => self.run_layout().await,
        }
    }

    /// Runs to completion or until the shutdown channel fires. A cancelled
    /// run commits nothing: the prior incremental state stays intact for the
    /// next attempt.
    pub async fn run_with_shutdown(
        &mut self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<RunReport> {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                tracing::info!("Shutdown signal received, aborting run");
                Err(ExtractError::Cancelled)
            }
            result = self.run() => result,
        }
    }

    async fn run_metadata(&mut self) -> Result<RunReport> {
        if self.config.field_metadata.is_empty() {
            // List databases and their layouts; no schema fetch.
            let databases = self
                .source
                .list_databases()
                .await
                .map_err(ExtractError::from_api)?;
            tracing::info!("listing layouts for {} database(s)", databases.len());

            let mut rows = Vec::new();
            for database in &databases {
                let layouts = self
                    .source
                    .list_layouts(&database.name)
                    .await
                    .map_err(ExtractError::from_api)?;
                flatten_layouts(&database.name, &layouts, &mut rows);
            }
            let columns = string_columns(&["database_name", "layout_name", "is_folder"]);
            self.sink
                .write_table("layouts", &columns, &rows, &WriteMode::Overwrite)?;
            return Ok(RunReport::single("layouts".to_string(), rows.len() as u64));
        }

        let mut rows = Vec::new();
        for target in &self.config.field_metadata {
            let fields = self
                .source
                .layout_schema(&target.database, &target.layout_name)
                .await
                .map_err(ExtractError::from_api)?;
            tracing::info!(
                "fetched schema for '{}/{}' ({} fields)",
                target.database,
                target.layout_name,
                fields.len()
            );
            for field in fields {
                let mut row = NormalizedRecord::new();
                row.insert("database_name".to_string(), Value::String(target.database.clone()));
                row.insert(
                    "layout_name".to_string(),
                    Value::String(target.layout_name.clone()),
                );
                row.insert("name".to_string(), Value::String(field.name));
                row.insert("type".to_string(), Value::String(field.field_type));
                row.insert("display_type".to_string(), Value::String(field.display_type));
                row.insert("result".to_string(), Value::String(field.result));
                row.insert("max_repeat".to_string(), Value::from(field.max_repeat));
                row.insert("global".to_string(), Value::Bool(field.global));
                row.insert("not_empty".to_string(), Value::Bool(field.not_empty));
                rows.push(row);
            }
        }
        let columns = string_columns(&[
            "database_name",
            "layout_name",
            "name",
            "type",
            "display_type",
            "result",
            "max_repeat",
            "global",
            "not_empty",
        ]);
        self.sink.write_table(
            "layout_fields_metadata",
            &columns,
            &rows,
            &WriteMode::Overwrite,
        )?;
        Ok(RunReport::single(
            "layout_fields_metadata".to_string(),
            rows.len() as u64,
        ))
    }

    async fn run_layout(&mut self) -> Result<RunReport> {
        let database = &self.config.database;
        let layout = &self.config.layout_name;
        let options = &self.config.loading_options;

        let mut persisted = self.state_store.load()?;
        let prior = persisted.target(database, layout);

        let filter = state::filter_for(prior, options);
        match &filter {
            Some(criterion) => tracing::info!(
                "incremental fetch lower bound: {} {}",
                criterion.field_name,
                criterion.find_criteria
            ),
            None if options.incremental_fetch => {
                tracing::info!("no prior watermark for '{database}/{layout}', fetching everything")
            }
            None => {}
        }

        let plan = build_plan(&self.config.query_groups, filter.as_ref())?;

        // Repetition counts come from the layout schema.
        let schema = self
            .source
            .layout_schema(database, layout)
            .await
            .map_err(ExtractError::from_api)?;

        let pager = Pager::new(self.source, database, layout, self.config.page_size);
        let fetched = pager.fetch_plan(&plan).await?;
        tracing::info!(
            "fetched {} record(s) from layout '{}'",
            fetched.records.len(),
            layout
        );

        // Advance the watermark before writing output; it is committed only
        // at the end, after the sink reported success.
        let advanced = if options.incremental_fetch {
            Some(state::advance(
                persisted.target(database, layout),
                database,
                layout,
                &fetched.records,
                options.incremental_field(),
            )?)
        } else {
            None
        };

        let mut rows = Vec::with_capacity(fetched.records.len());
        for record in &fetched.records {
            rows.push(normalize_record(record, Some(&schema))?);
        }

        let table_name = if fetched.info.table.is_empty() {
            layout.clone()
        } else {
            fetched.info.table.clone()
        };

        // Previously written columns first, then any new ones in record
        // order, so the table keeps a stable shape across runs.
        let mut columns = persisted
            .table_schemas
            .get(&table_name)
            .cloned()
            .unwrap_or_default();
        let mut seen: HashSet<String> = columns.iter().cloned().collect();
        for row in &rows {
            for column in row.keys() {
                if seen.insert(column.clone()) {
                    columns.push(column.clone());
                }
            }
        }

        let mode = match options.incremental {
            LoadMode::Full => WriteMode::Overwrite,
            LoadMode::Incremental => WriteMode::Upsert {
                pkey: options.pkey.iter().map(|c| normalize_name(c)).collect(),
            },
        };
        self.sink.write_table(&table_name, &columns, &rows, &mode)?;

        // Finalize: one atomic state commit, only on the success path.
        if let Some(target) = advanced {
            persisted.upsert_target(target);
        }
        persisted.table_schemas.insert(table_name.clone(), columns);
        self.state_store.store(&persisted)?;

        Ok(RunReport::single(table_name, rows.len() as u64))
    }
}

fn flatten_layouts(database: &str, layouts: &[LayoutDescriptor], rows: &mut Vec<NormalizedRecord>) {
    for layout in layouts {
        let mut row = NormalizedRecord::new();
        row.insert("database_name".to_string(), Value::String(database.to_string()));
        row.insert("layout_name".to_string(), Value::String(layout.name.clone()));
        row.insert("is_folder".to_string(), Value::Bool(layout.is_folder));
        rows.push(row);
        if !layout.folder_layout_names.is_empty() {
            flatten_layouts(database, &layout.folder_layout_names, rows);
        }
    }
}

fn string_columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
