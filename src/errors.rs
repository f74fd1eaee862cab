use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::uploader::upload_task::UploadEvent;

/// Errors returned synchronously to the caller. These never cross the
/// worker boundary; failures inside a running upload become a
/// [`FailureReason`] instead.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_endpoint(url: &str) -> Self {
        Self::InvalidEndpoint {
            url: url.to_string(),
        }
    }

    pub fn invalid_argument(message: &str) -> Self {
        Self::InvalidArgument(message.to_string())
    }
}

/// Why an upload ended without a link. Exactly one of these is delivered
/// through the completion path when a pipeline stage fails.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("Unable to load image {handle}: {message}")]
    StreamUnavailable { handle: String, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Server responded with HTTP status {0}")]
    NonOkStatus(u16),

    #[error("Unable to get image link: {message}")]
    MalformedResponse { message: String },

    #[error("Imgur Error: {code} - {message}")]
    ApiError { code: String, message: String },

    #[error("Upload cancelled while {stage}")]
    Cancelled { stage: String },
}

impl FailureReason {
    pub fn stream_unavailable(handle: &str, message: impl Into<String>) -> Self {
        Self::StreamUnavailable {
            handle: handle.to_string(),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Whether a new submission of the same request could plausibly succeed.
    /// The pipeline itself never retries; this only informs the result sink.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureReason::NetworkError { .. } | FailureReason::Cancelled { .. } => true,
            FailureReason::NonOkStatus(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

/// Map a transport error onto the failure taxonomy.
pub fn map_reqwest_error(err: reqwest::Error) -> FailureReason {
    if err.is_timeout() {
        FailureReason::network(format!("request timed out: {}", err))
    } else if err.is_connect() {
        FailureReason::network(format!("could not connect: {}", err))
    } else {
        FailureReason::network(err.to_string())
    }
}

/// Forward an event to the caller's context. A dropped receiver means the
/// caller stopped listening; the worker carries on and finishes the run.
pub fn safe_send_event(tx: &UnboundedSender<UploadEvent>, upload_id: &str, event: UploadEvent) -> bool {
    match tx.send(event) {
        Ok(_) => true,
        Err(e) => {
            log::warn!(
                "Failed to deliver {:?} for upload {} (receiver dropped, non-critical)",
                e.0,
                upload_id
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display_matches_remote_fields() {
        let reason = FailureReason::ApiError {
            code: "1003".to_string(),
            message: "Invalid image type or URL".to_string(),
        };
        assert_eq!(
            reason.to_string(),
            "Imgur Error: 1003 - Invalid image type or URL"
        );
        assert!(!reason.is_retryable());
    }

    #[test]
    fn test_status_classification() {
        assert!(FailureReason::NonOkStatus(503).is_retryable());
        assert!(!FailureReason::NonOkStatus(404).is_retryable());
        assert!(FailureReason::network("reset").is_retryable());
        assert!(!FailureReason::stream_unavailable("a.png", "gone").is_retryable());
    }

    #[test]
    fn test_failure_reason_serializes_with_kind_tag() {
        let json = serde_json::to_value(FailureReason::NonOkStatus(500)).unwrap();
        assert_eq!(json["kind"], "non_ok_status");
        assert_eq!(json["detail"], 500);

        let json = serde_json::to_value(FailureReason::network("boom")).unwrap();
        assert_eq!(json["kind"], "network_error");
        assert_eq!(json["detail"]["message"], "boom");
    }
}
