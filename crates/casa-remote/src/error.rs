use thiserror::Error;

/// Failure taxonomy shared by polling, control actions and media lookups.
///
/// Polling treats every variant except `Cancelled` the same way (one more
/// consecutive error, longer backoff); control actions surface the message
/// as a transient notice.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The request never produced a response (connect, timeout, reset).
    #[error("request failed: {0}")]
    Transport(String),

    #[error("API error: {status} {reason}")]
    Http { status: u16, reason: String },

    /// The body was not the document we expected.
    #[error("malformed response: {0}")]
    DataShape(String),

    /// The caller aborted the request; never counts as a failure.
    #[error("request cancelled")]
    Cancelled,

    #[error("artwork unusable: {0}")]
    Artwork(String),
}

impl SyncError {
    pub fn http(status: reqwest::StatusCode) -> Self {
        Self::Http {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Text for the auto-expiring notice shown under the transport controls.
    pub fn control_message(&self) -> String {
        match self {
            Self::Http { status: 401, .. } => "Unauthorized (401): check API access".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::DataShape(e.to_string())
        } else if let Some(status) = e.status() {
            Self::http(status)
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::DataShape(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message() {
        let unauthorized = SyncError::Http {
            status: 401,
            reason: "Unauthorized".into(),
        };
        assert_eq!(unauthorized.control_message(), "Unauthorized (401): check API access");

        let missing = SyncError::http(reqwest::StatusCode::NOT_FOUND);
        assert_eq!(missing.control_message(), "API error: 404 Not Found");
        assert!(!missing.is_cancelled());
        assert!(SyncError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_json_errors_are_data_shape() {
        let err: SyncError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, SyncError::DataShape(_)));
    }
}
