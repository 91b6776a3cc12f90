//! Command surface: typed results, typed failures, media preparation.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use common::*;
use weft_client::{ClientError, MessageSendOptions, SearchOptions};
use weft_types::RemoteState;

#[tokio::test]
async fn send_message_returns_the_sent_model() {
    let h = ready(test_config()).await;
    h.driver.page.respond_with(
        "WeftUtils.sendMessage",
        json!({ "ok": message_fixture("S1", true) }),
    );

    let sent = h
        .client
        .send_message("123@c.us", "hello", &MessageSendOptions::default())
        .await
        .unwrap();
    assert_eq!(sent.id.id, "S1");
    assert!(sent.id.from_me);
}

#[tokio::test]
async fn rejected_send_surfaces_classification_and_chat_context() {
    let h = ready(test_config()).await;
    h.driver.page.respond_with(
        "WeftUtils.sendMessage",
        json!({ "error": { "name": "ChatNotFound", "message": "chat not found: 9@c.us", "code": 404 } }),
    );

    let err = h
        .client
        .send_message("9@c.us", "hello", &MessageSendOptions::default())
        .await
        .unwrap_err();
    match err {
        ClientError::CommandFailed {
            kind,
            code,
            message,
            chat_id,
        } => {
            assert_eq!(kind, "ChatNotFound");
            assert_eq!(code, Some(404));
            assert!(message.contains("chat not found"));
            assert_eq!(chat_id.as_deref(), Some("9@c.us"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn number_lookup_distinguishes_registered_from_not() {
    let h = ready(test_config()).await;
    h.driver
        .page
        .respond_with("QueryExist", json!({ "ok": "15551234567@c.us" }));
    assert_eq!(
        h.client.get_number_id("+1 (555) 123-4567").await.unwrap(),
        Some("15551234567@c.us".to_string())
    );
    assert!(h.client.is_registered_user("+1 (555) 123-4567").await.unwrap());

    h.driver.page.set_response("QueryExist", json!({ "ok": null }));
    assert_eq!(h.client.get_number_id("15550000000").await.unwrap(), None);
    assert!(!h.client.is_registered_user("15550000000").await.unwrap());
}

#[tokio::test]
async fn state_and_version_queries_decode() {
    let h = ready(test_config()).await;
    h.driver
        .page
        .respond_with("return window.Store.AppState.state", json!({ "ok": "CONNECTED" }));
    h.driver
        .page
        .respond_with("return window.Debug.VERSION", json!({ "ok": "2.3000.101" }));

    assert_eq!(h.client.get_state().await.unwrap(), RemoteState::Connected);
    assert_eq!(h.client.get_version().await.unwrap(), "2.3000.101");
}

#[tokio::test]
async fn chat_queries_roundtrip_models() {
    let h = ready(test_config()).await;
    h.driver.page.respond_with(
        "getChatModel",
        json!({ "ok": [ { "id": { "_serialized": "123@c.us" }, "name": "Alice", "isGroup": false, "unreadCount": 2 } ] }),
    );

    let chats = h.client.get_chats().await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id.as_str(), "123@c.us");
    assert_eq!(chats[0].unread_count, 2);
}

#[tokio::test]
async fn chat_lookup_failure_names_the_chat() {
    let h = ready(test_config()).await;
    h.driver.page.respond_with(
        "getChatById",
        json!({ "error": { "name": "ChatNotFound", "message": "chat not found: 9@c.us" } }),
    );

    let err = h.client.get_chat_by_id("9@c.us").await.unwrap_err();
    match err {
        ClientError::CommandFailed { kind, chat_id, .. } => {
            assert_eq!(kind, "ChatNotFound");
            assert_eq!(chat_id.as_deref(), Some("9@c.us"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn archive_and_search_commands_decode() {
    let h = ready(test_config()).await;
    h.driver
        .page
        .respond_with("archiveChat", json!({ "ok": true }));
    h.driver.page.respond_with(
        "searchMessages",
        json!({ "ok": [ message_fixture("F1", false) ] }),
    );

    assert!(h.client.archive_chat("123@c.us").await.unwrap());
    let found = h
        .client
        .search_messages("hello", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id.id, "F1");
}

#[tokio::test]
async fn pairing_code_request_returns_the_code() {
    let h = ready(test_config()).await;
    h.driver
        .page
        .respond_with("startAltLinkingFlow", json!({ "ok": "ABCDEFGH" }));
    let code = h
        .client
        .request_pairing_code("15551234567", true)
        .await
        .unwrap();
    assert_eq!(code, "ABCDEFGH");
}

#[tokio::test]
async fn prepared_media_leaves_a_handle_and_no_stray_element() {
    let h = ready(test_config()).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.png");
    std::fs::write(&path, b"not really a png").unwrap();

    h.driver
        .page
        .respond_with("processMediaData", json!({ "ok": true }));

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let handle = h
        .client
        .prepare_media(&path, "photo 1", cancel_rx)
        .await
        .unwrap();
    assert_eq!(handle, "weft-upload-photo_1");
    assert!(h.driver.page.element_ids().is_empty());
}

#[tokio::test]
async fn cancelled_media_preparation_fails_and_removes_the_input() {
    let h = ready(test_config()).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");
    std::fs::write(&path, b"bytes").unwrap();

    // Page-side processing never resolves; the cancellation must win.
    h.driver.page.hang_evaluate_containing("processMediaData");

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = cancel_tx.send(true);
    });

    let err = h
        .client
        .prepare_media(&path, "clip/1", cancel_rx)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    // The page-side input element is gone.
    assert!(h.driver.page.element_ids().is_empty());
}
