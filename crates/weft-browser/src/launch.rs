//! DevTools target discovery.
//!
//! The driver attaches to an already-running browser through its DevTools
//! HTTP endpoint (started with `--remote-debugging-port`): list the open
//! targets, prefer a tab already sitting on the messenger URL, otherwise
//! reuse any blank page tab, otherwise open a fresh one.

use serde::Deserialize;

use crate::error::BrowserError;

/// One entry from the DevTools `/json/list` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub ws_url: Option<String>,
}

/// Pick the tab to drive: one already on `url_prefix` if present, else any
/// page target with a debugger socket.
pub(crate) fn pick_target<'a>(targets: &'a [TargetInfo], url_prefix: &str) -> Option<&'a TargetInfo> {
    let pages = targets
        .iter()
        .filter(|t| t.kind == "page" && t.ws_url.is_some());
    pages
        .clone()
        .find(|t| t.url.starts_with(url_prefix))
        .or_else(|| pages.clone().find(|t| t.url == "about:blank"))
        .or_else(|| pages.clone().next())
}

/// Resolve the WebSocket URL of the tab to drive.
///
/// `endpoint` is the DevTools HTTP root, e.g. `http://127.0.0.1:9222`. A new
/// tab is opened when no page target exists.
pub async fn discover_page(endpoint: &str, url_prefix: &str) -> Result<String, BrowserError> {
    let endpoint = endpoint.trim_end_matches('/');
    let client = reqwest::Client::new();

    let targets: Vec<TargetInfo> = client
        .get(format!("{endpoint}/json/list"))
        .send()
        .await?
        .json()
        .await?;

    if let Some(target) = pick_target(&targets, url_prefix) {
        if let Some(ws_url) = &target.ws_url {
            tracing::info!(url = %target.url, "attaching to existing page target");
            return Ok(ws_url.clone());
        }
    }

    tracing::info!("no page target available, opening a new tab");
    let created: TargetInfo = client
        .put(format!("{endpoint}/json/new"))
        .send()
        .await?
        .json()
        .await?;
    created.ws_url.ok_or_else(|| BrowserError::NoTarget {
        endpoint: endpoint.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(kind: &str, url: &str, ws: Option<&str>) -> TargetInfo {
        TargetInfo {
            kind: kind.to_string(),
            url: url.to_string(),
            ws_url: ws.map(str::to_string),
        }
    }

    #[test]
    fn prefers_tab_already_on_the_messenger() {
        let targets = vec![
            target("page", "about:blank", Some("ws://a")),
            target("page", "https://messenger.example/app", Some("ws://b")),
        ];
        let picked = pick_target(&targets, "https://messenger.example/").unwrap();
        assert_eq!(picked.ws_url.as_deref(), Some("ws://b"));
    }

    #[test]
    fn falls_back_to_blank_then_any_page() {
        let targets = vec![
            target("background_page", "chrome-extension://x", Some("ws://ext")),
            target("page", "https://other.example/", Some("ws://other")),
            target("page", "about:blank", Some("ws://blank")),
        ];
        let picked = pick_target(&targets, "https://messenger.example/").unwrap();
        assert_eq!(picked.ws_url.as_deref(), Some("ws://blank"));

        let no_blank = vec![target("page", "https://other.example/", Some("ws://other"))];
        let picked = pick_target(&no_blank, "https://messenger.example/").unwrap();
        assert_eq!(picked.ws_url.as_deref(), Some("ws://other"));
    }

    #[test]
    fn targets_without_sockets_are_skipped() {
        let targets = vec![
            target("page", "https://messenger.example/app", None),
            target("page", "about:blank", Some("ws://blank")),
        ];
        let picked = pick_target(&targets, "https://messenger.example/").unwrap();
        assert_eq!(picked.ws_url.as_deref(), Some("ws://blank"));
    }

    #[test]
    fn empty_target_list_yields_none() {
        assert!(pick_target(&[], "https://messenger.example/").is_none());
    }

    #[test]
    fn target_info_deserializes_devtools_shape() {
        let json = serde_json::json!({
            "type": "page",
            "url": "about:blank",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/AB12",
            "title": "New Tab",
        });
        let info: TargetInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.kind, "page");
        assert_eq!(
            info.ws_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/AB12")
        );
    }
}
