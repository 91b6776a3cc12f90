//! The page capability the client needs beyond the bridge's `PageContext`.
//!
//! The bridge only evaluates scripts and manages bindings; the client also
//! navigates, overrides the user agent, watches navigations, consumes the
//! binding-call stream, and pins documents for the version cache. Anything
//! implementing this trait can host a session -- the live driver in
//! `weft-browser` in production, an in-memory fake in the integration tests.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use weft_bridge::{BindingCall, Navigation, PageContext, PageError};

/// A page capable of hosting a messenger session.
#[async_trait]
pub trait MessengerPage: PageContext {
    /// Navigate the main frame, sending `referer` with the request.
    async fn navigate(&self, url: &str, referer: &str) -> Result<(), PageError>;

    /// Override the page's user agent.
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), PageError>;

    /// Subscribe to main-frame navigations.
    fn navigations(&self) -> broadcast::Receiver<Navigation>;

    /// Take the binding-call stream. Yields `Some` exactly once; the
    /// session's event pump is the single consumer.
    fn take_binding_calls(&self) -> Option<mpsc::UnboundedReceiver<BindingCall>>;

    /// Serve `body` instead of the live response for `url` (`None` stops
    /// intercepting). Used to pin a cached web version.
    async fn serve_document(&self, url: &str, body: Option<String>) -> Result<(), PageError>;
}

#[async_trait]
impl MessengerPage for weft_browser::Page {
    async fn navigate(&self, url: &str, referer: &str) -> Result<(), PageError> {
        weft_browser::Page::navigate(self, url, referer).await
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), PageError> {
        weft_browser::Page::set_user_agent(self, user_agent).await
    }

    fn navigations(&self) -> broadcast::Receiver<Navigation> {
        weft_browser::Page::navigations(self)
    }

    fn take_binding_calls(&self) -> Option<mpsc::UnboundedReceiver<BindingCall>> {
        weft_browser::Page::take_binding_calls(self)
    }

    async fn serve_document(&self, url: &str, body: Option<String>) -> Result<(), PageError> {
        weft_browser::Page::serve_document(self, url, body).await
    }
}
