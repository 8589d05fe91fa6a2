// ABOUTME: Error taxonomy for the extraction engine
// ABOUTME: Distinguishes configuration, fetch, normalization, and boundary failures

use thiserror::Error;

use crate::filemaker::ApiError;

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Invalid or contradictory configuration. Raised before any API call is
    /// made, except for watermark type mismatches which only become visible
    /// once records arrive.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A remote call failed. `payload_index` and `offset` locate the failing
    /// page for paged fetches; both are zero for one-shot metadata calls.
    #[error("remote fetch failed (payload {payload_index}, offset {offset}): {source}")]
    Fetch {
        payload_index: usize,
        offset: u32,
        #[source]
        source: ApiError,
    },

    /// Two distinct source fields collided on the same destination column
    /// after renaming. The run fails rather than producing ambiguous output.
    #[error("column name collision: {0}")]
    Normalization(String),

    /// Reading or writing the incremental state store failed.
    #[error("state store error: {0}")]
    State(anyhow::Error),

    /// Writing to the output sink failed.
    #[error("output error: {0}")]
    Output(anyhow::Error),

    /// The run was cancelled before completion. No state was committed.
    #[error("run cancelled")]
    Cancelled,
}

/// Coarse error classification reported in run results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Fetch,
    Normalization,
    State,
    Output,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Normalization => "normalization",
            ErrorKind::State => "state",
            ErrorKind::Output => "output",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Config(_) => ErrorKind::Config,
            ExtractError::Fetch { .. } => ErrorKind::Fetch,
            ExtractError::Normalization(_) => ErrorKind::Normalization,
            ExtractError::State(_) => ErrorKind::State,
            ExtractError::Output(_) => ErrorKind::Output,
            ExtractError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True for failures the user can fix themselves (bad configuration,
    /// wrong credentials, missing layout). These exit with code 1; anything
    /// else exits with code 2.
    pub fn is_user_error(&self) -> bool {
        match self {
            ExtractError::Config(_) => true,
            ExtractError::Fetch { source, .. } => {
                matches!(source, ApiError::Auth(_) | ApiError::NotFound(_))
            }
            _ => false,
        }
    }

    /// Wraps an API error from a one-shot (non-paginated) remote call.
    pub(crate) fn from_api(source: ApiError) -> Self {
        ExtractError::Fetch {
            payload_index: 0,
            offset: 0,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_user_error() {
        let err = ExtractError::Config("missing layout_name".to_string());
        assert!(err.is_user_error());
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_auth_fetch_error_is_user_error() {
        let err = ExtractError::Fetch {
            payload_index: 0,
            offset: 1,
            source: ApiError::Auth("bad credentials".to_string()),
        };
        assert!(err.is_user_error());
        assert_eq!(err.kind(), ErrorKind::Fetch);
    }

    #[test]
    fn test_rate_limit_is_not_user_error() {
        let err = ExtractError::Fetch {
            payload_index: 2,
            offset: 1001,
            source: ApiError::RateLimited,
        };
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_fetch_error_carries_page_context() {
        let err = ExtractError::Fetch {
            payload_index: 1,
            offset: 2001,
            source: ApiError::RateLimited,
        };
        let message = err.to_string();
        assert!(message.contains("payload 1"));
        assert!(message.contains("offset 2001"));
    }
}
