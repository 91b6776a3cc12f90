//! Error types for the weft-browser crate.

use std::time::Duration;

use thiserror::Error;
use weft_bridge::PageError;

/// Errors that can occur while driving the browser.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Failed to establish a WebSocket connection to the DevTools endpoint.
    #[error("failed to connect to DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error response.
    #[error("CDP error {code}: {message}")]
    CdpError {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A CDP command timed out waiting for a response.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// A protocol-level error (serialization, unexpected message format).
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// JavaScript evaluation threw in the page.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// Navigation was rejected by the browser.
    #[error("navigation failed: {reason}")]
    NavigationFailed { reason: String },

    /// The page target is gone (tab closed, browser exited).
    #[error("page is closed")]
    PageClosed,

    /// No suitable page target was found at the DevTools endpoint.
    #[error("no page target found at {endpoint}")]
    NoTarget { endpoint: String },

    /// The DevTools HTTP endpoint could not be queried.
    #[error("DevTools discovery failed: {0}")]
    Discovery(#[from] reqwest::Error),
}

/// CDP error messages that mean a binding of the name already exists.
pub(crate) fn is_duplicate_binding(message: &str) -> bool {
    message.contains("already exists") || message.contains("Binding already set")
}

impl From<BrowserError> for PageError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::PageClosed => PageError::Closed,
            BrowserError::JsException { message } => PageError::Evaluation { message },
            BrowserError::Timeout { method, duration } => PageError::Timeout {
                what: method,
                duration,
            },
            BrowserError::CdpError { ref message, .. } if is_duplicate_binding(message) => {
                PageError::DuplicateBinding {
                    name: message.clone(),
                }
            }
            other => PageError::Transport {
                detail: other.to_string(),
            },
        }
    }
}
