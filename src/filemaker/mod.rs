// ABOUTME: FileMaker Data API boundary: wire models, client, and source trait
// ABOUTME: The rest of the engine talks to the API only through DataSource

pub mod client;
pub mod models;

use async_trait::async_trait;

pub use client::{ApiError, DataApiClient};
pub use models::{
    DataInfo, DatabaseDescriptor, FieldDescriptor, FindPayload, FindRequest, LayoutDescriptor,
    Page, RawRecord,
};

/// The remote data source contract consumed by the engine.
///
/// Retry and backoff policy belongs to the transport behind this trait, not
/// to the callers: the engine surfaces every error as-is.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Runs one find request (a single AND-group) and returns one page.
    async fn find(
        &self,
        database: &str,
        layout: &str,
        payload: &FindPayload,
        offset: u32,
        limit: u32,
    ) -> Result<Page, ApiError>;

    /// Lists records of a layout without any filter, one page at a time.
    async fn list_records(
        &self,
        database: &str,
        layout: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Page, ApiError>;

    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>, ApiError>;

    async fn list_layouts(&self, database: &str) -> Result<Vec<LayoutDescriptor>, ApiError>;

    async fn layout_schema(
        &self,
        database: &str,
        layout: &str,
    ) -> Result<Vec<FieldDescriptor>, ApiError>;
}
