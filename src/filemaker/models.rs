// ABOUTME: Wire models for the FileMaker Data API
// ABOUTME: Serialized find requests and deserialized response envelopes

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// AND-combined criteria for one find request (one OR-branch).
///
/// Criteria keep their configuration order so that retried runs reproduce
/// byte-identical request bodies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindPayload {
    criteria: Vec<(String, String)>,
}

impl FindPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field_name: &str, find_criteria: &str) {
        self.criteria
            .push((field_name.to_string(), find_criteria.to_string()));
    }

    pub fn contains_field(&self, field_name: &str) -> bool {
        self.criteria.iter().any(|(name, _)| name == field_name)
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl Serialize for FindPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.criteria.len()))?;
        for (field, criteria) in &self.criteria {
            map.serialize_entry(field, criteria)?;
        }
        map.end()
    }
}

/// Body of a `_find` call. The API expects pagination inside the body.
#[derive(Debug, Clone, Serialize)]
pub struct FindRequest {
    pub query: Vec<FindPayload>,
    pub offset: u32,
    pub limit: u32,
}

/// Standard Data API response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub response: T,
    #[serde(default)]
    pub messages: Vec<ApiMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsResponse {
    #[serde(default)]
    pub data: Vec<RawRecord>,
    #[serde(default)]
    pub data_info: DataInfo,
}

/// One record as returned by the API, before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default)]
    pub field_data: serde_json::Map<String, Value>,
    #[serde(default)]
    pub record_id: String,
    #[serde(default)]
    pub mod_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataInfo {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub layout: String,
    /// The underlying table name; used to name the output table.
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub total_record_count: u64,
    #[serde(default)]
    pub found_count: u64,
    #[serde(default)]
    pub returned_count: u64,
}

/// One page of raw records plus the metadata block returned with it.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub info: DataInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDescriptor {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_folder: bool,
    /// Layouts nested under a folder entry.
    #[serde(default)]
    pub folder_layout_names: Vec<LayoutDescriptor>,
}

/// Field schema entry from layout metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub display_type: String,
    /// Result type for calculation fields (text, number, date, ...).
    #[serde(default)]
    pub result: String,
    #[serde(default = "default_repeat")]
    pub max_repeat: u32,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub not_empty: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabasesResponse {
    #[serde(default)]
    pub databases: Vec<DatabaseDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutsResponse {
    #[serde(default)]
    pub layouts: Vec<LayoutDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutMetadataResponse {
    #[serde(default)]
    pub field_meta_data: Vec<FieldDescriptor>,
}

fn default_repeat() -> u32 {
    1
}
