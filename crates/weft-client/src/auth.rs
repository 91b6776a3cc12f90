//! Pluggable session-credential strategies.
//!
//! The client drives authentication through this interface and never touches
//! credential storage itself. [`NoAuth`] is the default: every session starts
//! unauthenticated and presents a fresh credential.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClientError;

/// What to do when the page asks for a new login credential.
#[derive(Debug, Clone, Default)]
pub struct AuthDecision {
    /// Abort authentication instead of presenting a credential.
    pub failed: bool,
    /// Payload for the `auth_failure` event when `failed` is set.
    pub failure_payload: Option<Value>,
    /// Whether a clean session restart may recover from the failure.
    pub restart: bool,
}

impl AuthDecision {
    /// Proceed with the credential flow.
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn fail(payload: Value, restart: bool) -> Self {
        Self {
            failed: true,
            failure_payload: Some(payload),
            restart,
        }
    }
}

/// Hooks a credential strategy can implement around the session lifecycle.
///
/// All methods default to no-ops so a strategy only implements the phases it
/// cares about.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Called once before the browser/page is touched.
    async fn before_browser_initialized(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    /// Called after the page is reachable but before navigation.
    async fn after_browser_initialized(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    /// The page requires a new login credential.
    async fn on_authentication_needed(&mut self) -> AuthDecision {
        AuthDecision::proceed()
    }

    /// Payload attached to the `authenticated` event.
    async fn auth_event_payload(&mut self) -> Value {
        Value::Null
    }

    /// The session reached ready.
    async fn after_auth_ready(&mut self) {}

    /// The session is disconnecting.
    async fn disconnect(&mut self) {}

    /// The remote session was logged out; discard stored credentials.
    async fn logout(&mut self) {}

    /// The session is being destroyed; release strategy resources.
    async fn destroy(&mut self) {}
}

/// No credential persistence; authenticate from scratch every session.
pub struct NoAuth;

#[async_trait]
impl AuthStrategy for NoAuth {}
