//! Low-level Chrome DevTools Protocol transport.
//!
//! A JSON-RPC 2.0 style client over the DevTools WebSocket: commands go out
//! with auto-incrementing ids, responses are correlated back to the waiting
//! caller through a pending map, and unsolicited events are forwarded on a
//! channel for the page driver to route. When the socket drops, every
//! pending command is failed rather than left hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::BrowserError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>;

/// Default time to wait for a command response.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// An unsolicited CDP event.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event method, e.g. `Runtime.bindingCalled`.
    pub method: String,
    pub params: Value,
}

#[derive(Debug, serde::Serialize)]
struct CdpCommand {
    id: u64,
    method: String,
    params: Value,
}

/// A correlated CDP response.
#[derive(Debug, Clone)]
pub struct CdpResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<CdpResponseError>,
}

/// Error object carried by a failed CDP response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
}

/// DevTools WebSocket client for one page target.
///
/// [`connect`](Self::connect) returns the client together with the event
/// receiver; the page driver owns the receiver and routes events from there.
pub struct CdpClient {
    next_id: AtomicU64,
    pending: PendingMap,
    writer: Mutex<WsSink>,
    connected: Arc<AtomicBool>,
    _reader: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a DevTools page WebSocket
    /// (`ws://host:port/devtools/page/<target>`).
    pub async fn connect(
        ws_url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CdpEvent>), BrowserError> {
        tracing::info!(url = ws_url, "connecting to DevTools WebSocket");

        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|err| BrowserError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: err.to_string(),
            })?;
        let (writer, reader) = stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader_handle = tokio::spawn(Self::read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&connected),
            event_tx,
        ));

        Ok((
            Self {
                next_id: AtomicU64::new(1),
                pending,
                writer: Mutex::new(writer),
                connected,
                _reader: reader_handle,
            },
            event_rx,
        ))
    }

    /// Whether the WebSocket is still up. Advisory; a send may still fail.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a command and wait for its response with the default timeout.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.send_command_with_timeout(method, params, COMMAND_TIMEOUT)
            .await
    }

    /// Send a command and wait for its response.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        if !self.is_connected() {
            return Err(BrowserError::PageClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&CdpCommand {
            id,
            method: method.to_string(),
            params,
        })
        .map_err(|err| BrowserError::Protocol {
            detail: format!("failed to serialize command: {err}"),
        })?;

        tracing::debug!(id, method, "sending CDP command");

        // Register before sending so a fast response cannot race the map.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = writer.send(Message::Text(json.into())).await {
                self.pending.lock().await.remove(&id);
                return Err(BrowserError::Protocol {
                    detail: format!("failed to send WebSocket message: {err}"),
                });
            }
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(BrowserError::Protocol {
                    detail: "response channel closed unexpectedly".to_string(),
                })
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(BrowserError::Timeout {
                    method: method.to_string(),
                    duration: timeout,
                });
            }
        };

        if let Some(err) = response.error {
            return Err(BrowserError::CdpError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Enable a CDP domain; most domains only emit events after this.
    pub async fn enable_domain(&self, domain: &str) -> Result<(), BrowserError> {
        self.send_command(&format!("{domain}.enable"), serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn read_loop(
        mut reader: WsSource,
        pending: PendingMap,
        connected: Arc<AtomicBool>,
        event_tx: mpsc::UnboundedSender<CdpEvent>,
    ) {
        while let Some(message) = reader.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => {
                    tracing::info!("DevTools WebSocket closed by remote");
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "WebSocket read error, stopping reader");
                    break;
                }
            };

            let json: Value = match serde_json::from_str(&text) {
                Ok(json) => json,
                Err(err) => {
                    tracing::warn!(error = %err, "unparseable CDP message, skipping");
                    continue;
                }
            };

            if let Some(response) = parse_cdp_response(&json) {
                let mut guard = pending.lock().await;
                match guard.remove(&response.id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(id = response.id, "response for unknown command id"),
                }
            } else if let Some(event) = parse_cdp_event(&json) {
                // Nobody listening is fine; the driver may have shut down.
                let _ = event_tx.send(event);
            }
        }

        connected.store(false, Ordering::SeqCst);

        // Fail everything still waiting so no caller hangs on a dead socket.
        let mut guard = pending.lock().await;
        for (id, tx) in guard.drain() {
            let _ = tx.send(CdpResponse {
                id,
                result: None,
                error: Some(CdpResponseError {
                    code: -1,
                    message: "WebSocket connection closed".to_string(),
                    data: None,
                }),
            });
        }
    }
}

/// Parse a CDP response (a message with an `id`).
pub fn parse_cdp_response(json: &Value) -> Option<CdpResponse> {
    let id = json.get("id")?.as_u64()?;
    Some(CdpResponse {
        id,
        result: json.get("result").cloned(),
        error: json
            .get("error")
            .and_then(|err| serde_json::from_value(err.clone()).ok()),
    })
}

/// Parse a CDP event (a message with a `method` and no `id`).
pub fn parse_cdp_event(json: &Value) -> Option<CdpEvent> {
    if json.get("id").is_some() {
        return None;
    }
    Some(CdpEvent {
        method: json.get("method")?.as_str()?.to_string(),
        params: json.get("params").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_with_id_method_params() {
        let cmd = CdpCommand {
            id: 7,
            method: "Runtime.evaluate".to_string(),
            params: serde_json::json!({ "expression": "1 + 1", "returnByValue": true }),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "Runtime.evaluate");
        assert_eq!(json["params"]["expression"], "1 + 1");
    }

    #[test]
    fn response_parses_result_and_error() {
        let ok = serde_json::json!({ "id": 1, "result": { "value": 2 } });
        let response = parse_cdp_response(&ok).unwrap();
        assert_eq!(response.id, 1);
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["value"], 2);

        let failed = serde_json::json!({
            "id": 2,
            "error": { "code": -32602, "message": "Invalid params", "data": "missing url" }
        });
        let response = parse_cdp_response(&failed).unwrap();
        let err = response.error.unwrap();
        assert_eq!(err.code, -32602);
        assert_eq!(err.data.as_deref(), Some("missing url"));
    }

    #[test]
    fn event_requires_method_and_no_id() {
        let event = serde_json::json!({
            "method": "Runtime.bindingCalled",
            "params": { "name": "onThing", "payload": "[]" }
        });
        let parsed = parse_cdp_event(&event).unwrap();
        assert_eq!(parsed.method, "Runtime.bindingCalled");
        assert_eq!(parsed.params["name"], "onThing");

        // A message with an id is a response, never an event.
        let response = serde_json::json!({ "id": 1, "method": "x", "result": {} });
        assert!(parse_cdp_event(&response).is_none());
        assert!(parse_cdp_response(&event).is_none());
    }

    #[test]
    fn event_without_params_defaults_to_null() {
        let event = serde_json::json!({ "method": "Page.loadEventFired" });
        assert_eq!(parse_cdp_event(&event).unwrap().params, Value::Null);
    }
}
