//! Error types for the weft-client crate.

use thiserror::Error;
use weft_bridge::PageError;

/// Errors surfaced to callers of client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration failed validation before any work started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A page-level failure (closed tab, evaluation error, timeout).
    #[error(transparent)]
    Page(#[from] PageError),

    /// The remote application rejected a requested action. Carries the
    /// original failure's classification so callers can react per kind.
    #[error("command rejected ({kind}): {message}")]
    CommandFailed {
        /// The page-side error class (e.g. the thrown error's name).
        kind: String,
        /// Numeric code when the page supplied one.
        code: Option<i64>,
        message: String,
        /// The chat the command targeted, when applicable.
        chat_id: Option<String>,
    },

    /// A command returned a shape the client could not interpret.
    #[error("unexpected response shape: {0}")]
    BadResponse(String),

    /// The caller's cancellation signal fired before the operation resolved.
    #[error("operation cancelled")]
    Cancelled,

    /// The session is destroyed; no further operations are possible.
    #[error("session destroyed")]
    Destroyed,

    /// Reading a local file for upload failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Version cache plumbing failed.
    #[error("version cache error: {0}")]
    Cache(#[from] anyhow::Error),
}

impl ClientError {
    /// Build a command failure from the page-side error object
    /// (`{ name, message, code }`).
    pub(crate) fn command_failed(err: &serde_json::Value, chat_id: Option<&str>) -> Self {
        Self::CommandFailed {
            kind: err
                .get("name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("Error")
                .to_string(),
            code: err.get("code").and_then(serde_json::Value::as_i64),
            message: err
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown failure")
                .to_string(),
            chat_id: chat_id.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_failure_carries_classification_and_context() {
        let err = ClientError::command_failed(
            &json!({ "name": "SendError", "message": "chat not found", "code": 404 }),
            Some("123@c.us"),
        );
        match err {
            ClientError::CommandFailed {
                kind,
                code,
                message,
                chat_id,
            } => {
                assert_eq!(kind, "SendError");
                assert_eq!(code, Some(404));
                assert_eq!(message, "chat not found");
                assert_eq!(chat_id.as_deref(), Some("123@c.us"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn command_failure_tolerates_sparse_error_objects() {
        let err = ClientError::command_failed(&json!({}), None);
        match err {
            ClientError::CommandFailed { kind, code, .. } => {
                assert_eq!(kind, "Error");
                assert!(code.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
