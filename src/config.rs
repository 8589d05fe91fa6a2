// ABOUTME: Configuration value objects for an extraction run
// ABOUTME: Deserialized from JSON and validated before any API call

use serde::Deserialize;

use crate::error::{ExtractError, Result};

/// Field used as the incremental watermark when none is configured.
pub const DEFAULT_INCREMENTAL_FIELD: &str = "_Timestamp_Modified";

const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Top-level configuration document: connection credentials plus the
/// declarative query/loading configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    pub connection: ConnectionConfig,
    #[serde(flatten)]
    pub query: QueryConfig,
}

impl ExtractorConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| ExtractError::Config(format!("failed to parse configuration: {e}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Server root, e.g. `https://fms.example.com`. The Data API path is
    /// appended by the client.
    pub base_url: String,
    pub username: String,
    #[serde(alias = "#password")]
    pub password: String,
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Metadata,
    #[default]
    Layout,
}

/// The declarative part of the configuration: what to fetch and how to load it.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub object_type: ObjectType,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub layout_name: String,
    /// (database, layout) pairs whose field schemas should be fetched.
    /// Only meaningful in metadata mode; empty means "list layouts only".
    #[serde(default)]
    pub field_metadata: Vec<FieldMetadataTarget>,
    /// Query groups. Groups are OR-combined; criteria within a group are
    /// AND-combined.
    #[serde(default, rename = "query")]
    pub query_groups: Vec<QueryGroup>,
    #[serde(default)]
    pub loading_options: LoadingOptions,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMetadataTarget {
    pub database: String,
    pub layout_name: String,
}

pub type QueryGroup = Vec<QueryCriterion>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryCriterion {
    pub field_name: String,
    /// FileMaker find-syntax expression (ranges, comparisons, wildcards).
    pub find_criteria: String,
}

/// Load mode, configured as `0` (full) or `1` (incremental).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum LoadMode {
    #[default]
    Full,
    Incremental,
}

impl TryFrom<u8> for LoadMode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(LoadMode::Full),
            1 => Ok(LoadMode::Incremental),
            other => Err(format!("'incremental' must be 0 or 1, got {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadingOptions {
    #[serde(default)]
    pub incremental: LoadMode,
    /// Destination primary key columns. Required for incremental loading.
    #[serde(default)]
    pub pkey: Vec<String>,
    /// Augment the query with a watermark filter from the previous run.
    #[serde(default)]
    pub incremental_fetch: bool,
    /// Watermark source field. Modeled as a list for configuration
    /// compatibility but capped at one element.
    #[serde(default = "default_incremental_fields")]
    pub incremental_fields: Vec<String>,
}

impl Default for LoadingOptions {
    fn default() -> Self {
        Self {
            incremental: LoadMode::Full,
            pkey: Vec::new(),
            incremental_fetch: false,
            incremental_fields: default_incremental_fields(),
        }
    }
}

impl LoadingOptions {
    /// The configured watermark field, falling back to the default.
    pub fn incremental_field(&self) -> &str {
        self.incremental_fields
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_INCREMENTAL_FIELD)
    }
}

impl QueryConfig {
    /// Checks the configuration invariants. Called at the start of every run,
    /// before any API call.
    pub fn validate(&self) -> Result<()> {
        if self.object_type == ObjectType::Layout
            && (self.database.is_empty() || self.layout_name.is_empty())
        {
            return Err(ExtractError::Config(
                "object_type 'layout' requires both 'database' and 'layout_name'".to_string(),
            ));
        }

        let options = &self.loading_options;
        if options.incremental == LoadMode::Incremental && options.pkey.is_empty() {
            return Err(ExtractError::Config(
                "incremental loading requires a non-empty 'pkey'".to_string(),
            ));
        }
        if options.incremental_fetch && options.incremental != LoadMode::Incremental {
            return Err(ExtractError::Config(
                "'incremental_fetch' requires incremental loading (incremental = 1)".to_string(),
            ));
        }
        if options.incremental_fields.len() > 1 {
            return Err(ExtractError::Config(format!(
                "at most one incremental field is supported, got {}",
                options.incremental_fields.len()
            )));
        }
        if self.page_size == 0 {
            return Err(ExtractError::Config(
                "'page_size' must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_incremental_fields() -> Vec<String> {
    vec![DEFAULT_INCREMENTAL_FIELD.to_string()]
}
