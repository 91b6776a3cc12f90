//! The capability the bridge requires from a page driver.
//!
//! The bridge never talks to a browser directly; it talks to anything that
//! can evaluate a script, install a preload script, and manage named
//! bindings. A driver over a live Chromium tab implements this in
//! `weft-browser`; tests implement it in memory.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors a page driver can report to the bridge.
///
/// The idempotency rules of the binding registry key off these variants:
/// [`PageError::Closed`] makes an exposure a harmless no-op, and
/// [`PageError::DuplicateBinding`] from a racing caller is treated as
/// success.
#[derive(Debug, Error)]
pub enum PageError {
    /// The page (or its transport) is gone.
    #[error("page is closed")]
    Closed,

    /// A binding of this name already exists in the page.
    #[error("binding already exists: {name}")]
    DuplicateBinding { name: String },

    /// Script evaluation threw in the page context.
    #[error("script evaluation failed: {message}")]
    Evaluation { message: String },

    /// The underlying transport failed.
    #[error("page transport error: {detail}")]
    Transport { detail: String },

    /// A bounded wait expired.
    #[error("timed out after {duration:?} waiting for {what}")]
    Timeout { what: String, duration: Duration },
}

/// Narrow capability interface over one remote execution context.
#[async_trait]
pub trait PageContext: Send + Sync {
    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<Value, PageError>;

    /// Register a script to run in every new document before page scripts.
    async fn add_preload_script(&self, source: &str) -> Result<(), PageError>;

    /// Expose a named binding callable from the page. The page-side function
    /// takes a single string payload.
    async fn add_binding(&self, name: &str) -> Result<(), PageError>;

    /// Retract a named binding. Removing a binding that does not exist is an
    /// error on most drivers; callers that retract defensively ignore it.
    async fn remove_binding(&self, name: &str) -> Result<(), PageError>;

    /// Whether the page is known to be closed. Advisory: a page may close
    /// between this check and the next call.
    fn is_closed(&self) -> bool;

    /// Release the underlying browser resource. Must be safe to call more
    /// than once.
    async fn close(&self) -> Result<(), PageError>;
}

/// A call from the page into a host binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingCall {
    /// The binding name the page invoked.
    pub name: String,
    /// The single string payload, by convention a JSON array of arguments.
    pub payload: String,
}

/// A main-frame navigation observed on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub url: String,
}

/// How often [`wait_for_function`] re-evaluates its expression.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll `expression` in the page until it evaluates truthy.
///
/// `timeout: None` means wait until the page closes -- callers use that only
/// for waits that are understood to end at session teardown, and race it
/// against their shutdown signal. Evaluation errors are tolerated while
/// waiting (the global may simply not exist yet); only a closed page or an
/// expired timeout fail the wait.
pub async fn wait_for_function(
    page: &dyn PageContext,
    expression: &str,
    timeout: Option<Duration>,
) -> Result<(), PageError> {
    let probe = format!("!!({expression})");
    let started = tokio::time::Instant::now();
    loop {
        if page.is_closed() {
            return Err(PageError::Closed);
        }
        match page.evaluate(&probe).await {
            Ok(Value::Bool(true)) => return Ok(()),
            Ok(_) => {}
            Err(PageError::Closed) => return Err(PageError::Closed),
            Err(err) => {
                tracing::debug!(expression, error = %err, "wait probe failed, retrying");
            }
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                return Err(PageError::Timeout {
                    what: expression.to_string(),
                    duration: limit,
                });
            }
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    #[tokio::test]
    async fn wait_for_function_returns_once_truthy() {
        let page = FakePage::new();
        page.respond_with("window.Debug", serde_json::json!(true));
        wait_for_function(&page, "window.Debug && window.Debug.VERSION", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_function_times_out() {
        let page = FakePage::new();
        let err = wait_for_function(&page, "window.Missing", Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::Timeout { .. }));
    }

    #[tokio::test]
    async fn wait_for_function_fails_fast_on_closed_page() {
        let page = FakePage::new();
        page.mark_closed();
        let err = wait_for_function(&page, "window.Debug", None).await.unwrap_err();
        assert!(matches!(err, PageError::Closed));
    }
}
