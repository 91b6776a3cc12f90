//! Page driver over one DevTools page target.
//!
//! [`Page`] implements the bridge's [`PageContext`] capability on top of the
//! CDP transport and routes the target's unsolicited events: binding calls
//! onto an unbounded channel for the session's event pump, main-frame
//! navigations onto a broadcast channel for the client's navigation watcher,
//! and detach notifications into the closed flag. It can also serve a pinned
//! document for the messenger URL through the Fetch domain, which is how the
//! web-version cache pins a page version.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use weft_bridge::{BindingCall, Navigation, PageContext, PageError};

use crate::cdp::{CdpClient, CdpEvent};
use crate::error::{is_duplicate_binding, BrowserError};

/// A document to serve in place of the live response for one URL.
#[derive(Debug, Clone)]
pub(crate) struct ServedDocument {
    pub url: String,
    pub body: String,
}

/// Driver for a single browser tab.
pub struct Page {
    cdp: Arc<CdpClient>,
    closed: Arc<AtomicBool>,
    binding_calls: Mutex<Option<mpsc::UnboundedReceiver<BindingCall>>>,
    nav_tx: broadcast::Sender<Navigation>,
    served: Arc<Mutex<Option<ServedDocument>>>,
    _router: tokio::task::JoinHandle<()>,
}

impl Page {
    /// Connect to a page target and enable the domains the driver needs.
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let (cdp, events) = CdpClient::connect(ws_url).await?;
        let cdp = Arc::new(cdp);
        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;
        cdp.enable_domain("Network").await?;

        let closed = Arc::new(AtomicBool::new(false));
        let served = Arc::new(Mutex::new(None));
        let (binding_tx, binding_rx) = mpsc::unbounded_channel();
        let (nav_tx, _) = broadcast::channel(32);

        let router = tokio::spawn(route_events(
            events,
            Arc::clone(&cdp),
            Arc::clone(&closed),
            Arc::clone(&served),
            binding_tx,
            nav_tx.clone(),
        ));

        Ok(Self {
            cdp,
            closed,
            binding_calls: Mutex::new(Some(binding_rx)),
            nav_tx,
            served,
            _router: router,
        })
    }

    /// Take the binding-call receiver. Yields `Some` exactly once; the
    /// session's event pump is the single consumer.
    pub fn take_binding_calls(&self) -> Option<mpsc::UnboundedReceiver<BindingCall>> {
        self.binding_calls.lock().unwrap().take()
    }

    /// Subscribe to main-frame navigations.
    pub fn navigations(&self) -> broadcast::Receiver<Navigation> {
        self.nav_tx.subscribe()
    }

    /// Navigate the tab, sending `referer` with the request.
    pub async fn navigate(&self, url: &str, referer: &str) -> Result<(), PageError> {
        let result = self
            .cdp
            .send_command("Page.navigate", json!({ "url": url, "referrer": referer }))
            .await
            .map_err(PageError::from)?;
        if let Some(reason) = result.get("errorText").and_then(Value::as_str) {
            if !reason.is_empty() {
                return Err(PageError::from(BrowserError::NavigationFailed {
                    reason: reason.to_string(),
                }));
            }
        }
        Ok(())
    }

    pub async fn set_user_agent(&self, user_agent: &str) -> Result<(), PageError> {
        self.cdp
            .send_command(
                "Network.setUserAgentOverride",
                json!({ "userAgent": user_agent }),
            )
            .await
            .map_err(PageError::from)?;
        Ok(())
    }

    pub async fn bypass_csp(&self) -> Result<(), PageError> {
        self.cdp
            .send_command("Page.setBypassCSP", json!({ "enabled": true }))
            .await
            .map_err(PageError::from)?;
        Ok(())
    }

    pub async fn set_download_path(&self, path: &str) -> Result<(), PageError> {
        self.cdp
            .send_command(
                "Page.setDownloadBehavior",
                json!({ "behavior": "allow", "downloadPath": path }),
            )
            .await
            .map_err(PageError::from)?;
        Ok(())
    }

    /// Serve `body` in place of the live response whenever the tab requests
    /// `url`. Passing `None` stops intercepting.
    pub async fn serve_document(&self, url: &str, body: Option<String>) -> Result<(), PageError> {
        match body {
            Some(body) => {
                *self.served.lock().unwrap() = Some(ServedDocument {
                    url: url.to_string(),
                    body,
                });
                self.cdp
                    .send_command(
                        "Fetch.enable",
                        json!({ "patterns": [{ "urlPattern": url, "requestStage": "Request" }] }),
                    )
                    .await
                    .map_err(PageError::from)?;
            }
            None => {
                *self.served.lock().unwrap() = None;
                self.cdp
                    .send_command("Fetch.disable", json!({}))
                    .await
                    .map_err(PageError::from)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageContext for Page {
    async fn evaluate(&self, script: &str) -> Result<Value, PageError> {
        if self.is_closed() {
            return Err(PageError::Closed);
        }
        let result = self
            .cdp
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": script,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await
            .map_err(PageError::from)?;

        if let Some(message) = exception_message(&result) {
            return Err(PageError::Evaluation { message });
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn add_preload_script(&self, source: &str) -> Result<(), PageError> {
        if self.is_closed() {
            return Err(PageError::Closed);
        }
        self.cdp
            .send_command(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await
            .map_err(PageError::from)?;
        Ok(())
    }

    async fn add_binding(&self, name: &str) -> Result<(), PageError> {
        if self.is_closed() {
            return Err(PageError::Closed);
        }
        match self
            .cdp
            .send_command("Runtime.addBinding", json!({ "name": name }))
            .await
        {
            Ok(_) => Ok(()),
            Err(BrowserError::CdpError { ref message, .. }) if is_duplicate_binding(message) => {
                Err(PageError::DuplicateBinding {
                    name: name.to_string(),
                })
            }
            Err(err) => Err(PageError::from(err)),
        }
    }

    async fn remove_binding(&self, name: &str) -> Result<(), PageError> {
        if self.is_closed() {
            return Err(PageError::Closed);
        }
        self.cdp
            .send_command("Runtime.removeBinding", json!({ "name": name }))
            .await
            .map_err(PageError::from)?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.cdp.is_connected()
    }

    async fn close(&self) -> Result<(), PageError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Best-effort: the target may already be gone.
        if let Err(err) = self.cdp.send_command("Page.close", json!({})).await {
            tracing::debug!(error = %err, "Page.close failed (target may be gone)");
        }
        Ok(())
    }
}

/// Route the target's unsolicited events to their consumers.
async fn route_events(
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    cdp: Arc<CdpClient>,
    closed: Arc<AtomicBool>,
    served: Arc<Mutex<Option<ServedDocument>>>,
    binding_tx: mpsc::UnboundedSender<BindingCall>,
    nav_tx: broadcast::Sender<Navigation>,
) {
    while let Some(event) = events.recv().await {
        match event.method.as_str() {
            "Runtime.bindingCalled" => {
                if let Some(call) = parse_binding_call(&event.params) {
                    let _ = binding_tx.send(call);
                }
            }
            "Page.frameNavigated" => {
                if let Some(nav) = parse_main_frame_navigation(&event.params) {
                    tracing::debug!(url = %nav.url, "main frame navigated");
                    // No subscribers is fine during startup.
                    let _ = nav_tx.send(nav);
                }
            }
            "Fetch.requestPaused" => {
                handle_paused_request(&cdp, &served, &event.params).await;
            }
            "Inspector.detached" => {
                tracing::info!("DevTools inspector detached, marking page closed");
                closed.store(true, Ordering::SeqCst);
            }
            _ => {}
        }
    }
    closed.store(true, Ordering::SeqCst);
    tracing::debug!("page event router stopped");
}

async fn handle_paused_request(
    cdp: &CdpClient,
    served: &Mutex<Option<ServedDocument>>,
    params: &Value,
) {
    let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
        return;
    };
    let url = params
        .pointer("/request/url")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let body = {
        let guard = served.lock().unwrap();
        guard
            .as_ref()
            .filter(|doc| doc.url == url)
            .map(|doc| doc.body.clone())
    };

    let outcome = match body {
        Some(body) => {
            cdp.send_command(
                "Fetch.fulfillRequest",
                json!({
                    "requestId": request_id,
                    "responseCode": 200,
                    "responseHeaders": [{ "name": "Content-Type", "value": "text/html" }],
                    "body": B64.encode(body),
                }),
            )
            .await
        }
        None => {
            cdp.send_command("Fetch.continueRequest", json!({ "requestId": request_id }))
                .await
        }
    };
    if let Err(err) = outcome {
        tracing::warn!(request_id, error = %err, "failed to resolve paused request");
    }
}

/// Extract a binding call from `Runtime.bindingCalled` params.
fn parse_binding_call(params: &Value) -> Option<BindingCall> {
    Some(BindingCall {
        name: params.get("name")?.as_str()?.to_string(),
        payload: params.get("payload")?.as_str()?.to_string(),
    })
}

/// Extract a main-frame navigation from `Page.frameNavigated` params.
/// Subframe navigations (frames with a parent) are ignored.
fn parse_main_frame_navigation(params: &Value) -> Option<Navigation> {
    let frame = params.get("frame")?;
    if frame.get("parentId").and_then(Value::as_str).is_some() {
        return None;
    }
    Some(Navigation {
        url: frame.get("url")?.as_str()?.to_string(),
    })
}

/// Pull the exception message out of a `Runtime.evaluate` result, if any.
fn exception_message(result: &Value) -> Option<String> {
    let details = result.get("exceptionDetails")?;
    let message = details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("unknown exception");
    Some(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_call_parses_name_and_payload() {
        let params = json!({
            "name": "onAddMessageEvent",
            "payload": "[{\"id\":1}]",
            "executionContextId": 3,
        });
        let call = parse_binding_call(&params).unwrap();
        assert_eq!(call.name, "onAddMessageEvent");
        assert_eq!(call.payload, "[{\"id\":1}]");

        assert!(parse_binding_call(&json!({ "name": "x" })).is_none());
    }

    #[test]
    fn only_main_frame_navigations_are_surfaced() {
        let main = json!({ "frame": { "id": "A", "url": "https://example.com/app" } });
        let nav = parse_main_frame_navigation(&main).unwrap();
        assert_eq!(nav.url, "https://example.com/app");

        let sub = json!({
            "frame": { "id": "B", "parentId": "A", "url": "https://example.com/iframe" }
        });
        assert!(parse_main_frame_navigation(&sub).is_none());
    }

    #[test]
    fn exception_details_win_over_value() {
        let thrown = json!({
            "result": { "type": "object" },
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": { "description": "ReferenceError: Store is not defined" }
            }
        });
        assert_eq!(
            exception_message(&thrown).unwrap(),
            "ReferenceError: Store is not defined"
        );

        let clean = json!({ "result": { "type": "number", "value": 2 } });
        assert!(exception_message(&clean).is_none());
    }

    #[test]
    fn exception_falls_back_to_text() {
        let thrown = json!({ "exceptionDetails": { "text": "Promise was rejected" } });
        assert_eq!(exception_message(&thrown).unwrap(), "Promise was rejected");
    }
}
