// ABOUTME: HTTP client for the FileMaker Data API
// ABOUTME: Manages per-database sessions and maps error responses to typed kinds

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::config::ConnectionConfig;

use super::models::{
    ApiEnvelope, DatabaseDescriptor, DatabasesResponse, FieldDescriptor, FindPayload, FindRequest,
    LayoutDescriptor, LayoutMetadataResponse, LayoutsResponse, Page, RecordsResponse,
    SessionResponse,
};
use super::DataSource;

/// FileMaker reports "no records match the request" with this code inside an
/// HTTP error response. It is the API's end-of-data signal, not a failure.
const FM_CODE_NO_RECORDS: &str = "401";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid base URL '{0}'")]
    InvalidUrl(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited by the server")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response (HTTP {status}): {body}")]
    Unexpected { status: u16, body: String },
}

/// Client for one FileMaker server. Sessions are per database, so tokens are
/// acquired lazily per database and released together at the end of the run.
pub struct DataApiClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    tokens: Mutex<HashMap<String, String>>,
}

impl DataApiClient {
    pub fn new(connection: &ConnectionConfig) -> Result<Self, ApiError> {
        let parsed = Url::parse(&connection.base_url)
            .map_err(|_| ApiError::InvalidUrl(connection.base_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(connection.base_url.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!connection.ssl_verify)
            .build()?;

        Ok(Self {
            http,
            base_url: connection.base_url.trim_end_matches('/').to_string(),
            username: connection.username.clone(),
            password: connection.password.clone(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/fmi/data/v2/{}", self.base_url, path)
    }

    /// Returns the session token for a database, logging in on first use.
    async fn session_token(&self, database: &str) -> Result<String, ApiError> {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(database) {
            return Ok(token.clone());
        }

        let url = self.endpoint(&format!("databases/{database}/sessions"));
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!(
                "failed to open a session for database '{database}'. \
                 Verify your user name, password, and database name. Detail: {body}"
            )));
        }

        let envelope: ApiEnvelope<SessionResponse> = response.json().await?;
        let token = envelope.response.token;
        tracing::debug!("opened Data API session for database '{}'", database);
        tokens.insert(database.to_string(), token.clone());
        Ok(token)
    }

    /// Closes every open session. Sessions also expire server-side after 15
    /// minutes of inactivity, so failures here are logged and ignored.
    pub async fn logout_all(&self) {
        let tokens: Vec<(String, String)> = self.tokens.lock().await.drain().collect();
        for (database, token) in tokens {
            let url = self.endpoint(&format!("databases/{database}/sessions/{token}"));
            match self.http.delete(&url).send().await {
                Ok(_) => tracing::debug!("closed session for database '{}'", database),
                Err(e) => tracing::debug!("failed to close session for '{}': {}", database, e),
            }
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        Ok(request.send().await?)
    }

    /// Parses a records response, treating FileMaker's "no records match"
    /// error code as an empty page.
    async fn read_page(&self, response: Response) -> Result<Page, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_no_records_response(&body) {
                return Ok(Page::default());
            }
            return Err(map_error_status(status, body));
        }

        let envelope: ApiEnvelope<RecordsResponse> = response.json().await?;
        Ok(Page {
            records: envelope.response.data,
            info: envelope.response.data_info,
        })
    }

    async fn read_envelope<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
        context: &str,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => ApiError::NotFound(context.to_string()),
                _ => map_error_status(status, body),
            });
        }
        let envelope: ApiEnvelope<T> = response.json().await?;
        Ok(envelope.response)
    }
}

fn map_error_status(status: StatusCode, body: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth(body),
        StatusCode::NOT_FOUND => ApiError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
        _ => ApiError::Unexpected {
            status: status.as_u16(),
            body,
        },
    }
}

fn is_no_records_response(body: &str) -> bool {
    serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body)
        .map(|envelope| {
            envelope
                .messages
                .iter()
                .any(|m| m.code == FM_CODE_NO_RECORDS)
        })
        .unwrap_or(false)
}

#[async_trait]
impl DataSource for DataApiClient {
    async fn find(
        &self,
        database: &str,
        layout: &str,
        payload: &FindPayload,
        offset: u32,
        limit: u32,
    ) -> Result<Page, ApiError> {
        let token = self.session_token(database).await?;
        let body = FindRequest {
            query: vec![payload.clone()],
            offset,
            limit,
        };
        let url = self.endpoint(&format!("databases/{database}/layouts/{layout}/_find"));
        let response = self
            .send(self.http.post(&url).bearer_auth(token).json(&body))
            .await?;
        self.read_page(response).await
    }

    async fn list_records(
        &self,
        database: &str,
        layout: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Page, ApiError> {
        let token = self.session_token(database).await?;
        let url = self.endpoint(&format!("databases/{database}/layouts/{layout}/records"));
        let response = self
            .send(
                self.http
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[("_offset", offset.to_string()), ("_limit", limit.to_string())]),
            )
            .await?;
        self.read_page(response).await
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>, ApiError> {
        // Database listing authenticates with credentials directly; it is the
        // one endpoint that exists outside a database session.
        let url = self.endpoint("databases");
        let response = self
            .send(
                self.http
                    .get(&url)
                    .basic_auth(&self.username, Some(&self.password)),
            )
            .await?;
        let databases: DatabasesResponse = self.read_envelope(response, "databases").await?;
        Ok(databases.databases)
    }

    async fn list_layouts(&self, database: &str) -> Result<Vec<LayoutDescriptor>, ApiError> {
        let token = self.session_token(database).await?;
        let url = self.endpoint(&format!("databases/{database}/layouts"));
        let response = self.send(self.http.get(&url).bearer_auth(token)).await?;
        let layouts: LayoutsResponse = self
            .read_envelope(response, &format!("layouts of '{database}'"))
            .await?;
        Ok(layouts.layouts)
    }

    async fn layout_schema(
        &self,
        database: &str,
        layout: &str,
    ) -> Result<Vec<FieldDescriptor>, ApiError> {
        let token = self.session_token(database).await?;
        let url = self.endpoint(&format!("databases/{database}/layouts/{layout}"));
        let response = self.send(self.http.get(&url).bearer_auth(token)).await?;
        let metadata: LayoutMetadataResponse = self
            .read_envelope(response, &format!("layout '{database}/{layout}'"))
            .await?;
        Ok(metadata.field_meta_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionConfig {
        ConnectionConfig {
            base_url: "https://fms.example.com/".to_string(),
            username: "api".to_string(),
            password: "secret".to_string(),
            ssl_verify: true,
        }
    }

    #[test]
    fn test_client_creation_strips_trailing_slash() {
        let client = DataApiClient::new(&connection()).unwrap();
        assert_eq!(
            client.endpoint("databases/Sales/layouts/Orders/_find"),
            "https://fms.example.com/fmi/data/v2/databases/Sales/layouts/Orders/_find"
        );
    }

    #[test]
    fn test_client_rejects_invalid_url() {
        let mut bad = connection();
        bad.base_url = "not a url".to_string();
        assert!(matches!(
            DataApiClient::new(&bad),
            Err(ApiError::InvalidUrl(_))
        ));

        let mut ftp = connection();
        ftp.base_url = "ftp://fms.example.com".to_string();
        assert!(DataApiClient::new(&ftp).is_err());
    }

    #[test]
    fn test_no_records_response_detection() {
        let body = r#"{"messages":[{"code":"401","message":"No records match the request"}],"response":{}}"#;
        assert!(is_no_records_response(body));

        let other = r#"{"messages":[{"code":"952","message":"Invalid FileMaker Data API token"}],"response":{}}"#;
        assert!(!is_no_records_response(other));

        assert!(!is_no_records_response("not json"));
    }

    #[test]
    fn test_error_status_mapping() {
        assert!(matches!(
            map_error_status(StatusCode::UNAUTHORIZED, String::new()),
            ApiError::Auth(_)
        ));
        assert!(matches!(
            map_error_status(StatusCode::NOT_FOUND, String::new()),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            map_error_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ApiError::RateLimited
        ));
        assert!(matches!(
            map_error_status(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            ApiError::Unexpected { status: 500, .. }
        ));
    }
}
