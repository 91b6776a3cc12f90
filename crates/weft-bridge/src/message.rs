//! The typed message taxonomy crossing the page/host boundary.
//!
//! The page calls exposed bindings by name with a single string payload (a
//! JSON array of arguments). [`BridgeMessage::parse`] turns that pair into an
//! enumerated message, so nothing downstream of the boundary dispatches on
//! strings. Unknown callback names and malformed payloads are errors the
//! boundary logs and drops; they are never fatal to the pipeline.

use serde_json::Value;
use thiserror::Error;

use weft_types::{
    CallData, ChatData, MessageData, PollVoteData, Reaction, RemoteState,
};

/// Errors raised at the bridge boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The page invoked a binding name no message kind maps to.
    #[error("unknown bridge callback: {name}")]
    UnknownCallback { name: String },

    /// The payload did not match the shape the callback requires.
    #[error("bad payload for {name}: {detail}")]
    Payload { name: String, detail: String },
}

/// One message from the page context to the host.
///
/// Variant order follows the flow of a session: credential and sync signals
/// first, then store mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    /// Connection-state change observed while authenticating.
    AuthState(RemoteState),
    /// The page finished its history/state sync.
    AuthSynced,
    /// History-sync progress percentage.
    OfflineProgress(u8),
    /// A fresh login credential is available.
    QrChanged(String),
    /// The remote session was explicitly invalidated.
    Logout,
    /// Connection-state change observed after the session is ready.
    StateChange(RemoteState),
    MessageAdd(MessageData),
    /// A message arrived still encrypted.
    MessageCiphertext(MessageData),
    MessageChange(MessageData),
    MessageTypeChange(MessageData),
    MessageAck(MessageData, i32),
    MediaUploaded(MessageData),
    MessageRemove(MessageData),
    MessageEdit(MessageData, String, String),
    ChatRemove(ChatData),
    ChatArchive(ChatData, bool, bool),
    UnreadCount(ChatData),
    CallAdd(CallData),
    PollVoteAdd(PollVoteData),
    /// A batch captured from the reaction table's upsert path.
    Reactions(Vec<Reaction>),
}

impl BridgeMessage {
    /// The exposed-callback name this message arrives through.
    pub fn callback_name(&self) -> &'static str {
        match self {
            Self::AuthState(_) => "onAuthAppStateChangedEvent",
            Self::AuthSynced => "onAppStateHasSyncedEvent",
            Self::OfflineProgress(_) => "onOfflineProgressUpdateEvent",
            Self::QrChanged(_) => "onQRChangedEvent",
            Self::Logout => "onLogoutEvent",
            Self::StateChange(_) => "onAppStateChangedEvent",
            Self::MessageAdd(_) => "onAddMessageEvent",
            Self::MessageCiphertext(_) => "onAddMessageCiphertextEvent",
            Self::MessageChange(_) => "onChangeMessageEvent",
            Self::MessageTypeChange(_) => "onChangeMessageTypeEvent",
            Self::MessageAck(..) => "onMessageAckEvent",
            Self::MediaUploaded(_) => "onMessageMediaUploadedEvent",
            Self::MessageRemove(_) => "onRemoveMessageEvent",
            Self::MessageEdit(..) => "onEditMessageEvent",
            Self::ChatRemove(_) => "onRemoveChatEvent",
            Self::ChatArchive(..) => "onArchiveChatEvent",
            Self::UnreadCount(_) => "onChatUnreadCountEvent",
            Self::CallAdd(_) => "onIncomingCall",
            Self::PollVoteAdd(_) => "onPollVoteEvent",
            Self::Reactions(_) => "onReaction",
        }
    }

    /// A short stable tag for throttle/breaker keys and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthState(_) => "auth_state",
            Self::AuthSynced => "auth_synced",
            Self::OfflineProgress(_) => "offline_progress",
            Self::QrChanged(_) => "qr_changed",
            Self::Logout => "logout",
            Self::StateChange(_) => "state_change",
            Self::MessageAdd(_) => "message_add",
            Self::MessageCiphertext(_) => "message_ciphertext",
            Self::MessageChange(_) => "message_change",
            Self::MessageTypeChange(_) => "message_type_change",
            Self::MessageAck(..) => "message_ack",
            Self::MediaUploaded(_) => "media_uploaded",
            Self::MessageRemove(_) => "message_remove",
            Self::MessageEdit(..) => "message_edit",
            Self::ChatRemove(_) => "chat_remove",
            Self::ChatArchive(..) => "chat_archive",
            Self::UnreadCount(_) => "unread_count",
            Self::CallAdd(_) => "call_add",
            Self::PollVoteAdd(_) => "poll_vote_add",
            Self::Reactions(_) => "reactions",
        }
    }

    /// Parse an exposed-callback invocation into a message.
    ///
    /// `payload` is the single string the page passed to the binding, by
    /// convention a JSON array of the callback's arguments.
    pub fn parse(name: &str, payload: &str) -> Result<Self, BridgeError> {
        let args: Vec<Value> =
            serde_json::from_str(payload).map_err(|err| BridgeError::Payload {
                name: name.to_string(),
                detail: format!("payload is not a JSON array: {err}"),
            })?;

        let arg = |idx: usize| -> Result<&Value, BridgeError> {
            args.get(idx).ok_or_else(|| BridgeError::Payload {
                name: name.to_string(),
                detail: format!("missing argument {idx}"),
            })
        };
        match name {
            "onAuthAppStateChangedEvent" => Ok(Self::AuthState(decode_arg(name, &args, 0, "state")?)),
            "onAppStateHasSyncedEvent" => Ok(Self::AuthSynced),
            "onOfflineProgressUpdateEvent" => {
                let pct = arg(0)?.as_u64().ok_or_else(|| BridgeError::Payload {
                    name: name.to_string(),
                    detail: "progress is not an integer".to_string(),
                })?;
                Ok(Self::OfflineProgress(pct.min(100) as u8))
            }
            "onQRChangedEvent" => {
                let qr = arg(0)?.as_str().ok_or_else(|| BridgeError::Payload {
                    name: name.to_string(),
                    detail: "credential is not a string".to_string(),
                })?;
                Ok(Self::QrChanged(qr.to_string()))
            }
            "onLogoutEvent" => Ok(Self::Logout),
            "onAppStateChangedEvent" => Ok(Self::StateChange(decode_arg(name, &args, 0, "state")?)),
            "onAddMessageEvent" => Ok(Self::MessageAdd(decode_arg(name, &args, 0, "message")?)),
            "onAddMessageCiphertextEvent" => Ok(Self::MessageCiphertext(decode_arg(name, &args, 0, "message")?)),
            "onChangeMessageEvent" => Ok(Self::MessageChange(decode_arg(name, &args, 0, "message")?)),
            "onChangeMessageTypeEvent" => Ok(Self::MessageTypeChange(decode_arg(name, &args, 0, "message")?)),
            "onMessageAckEvent" => {
                let ack = arg(1)?.as_i64().ok_or_else(|| BridgeError::Payload {
                    name: name.to_string(),
                    detail: "ack is not an integer".to_string(),
                })?;
                Ok(Self::MessageAck(decode_arg(name, &args, 0, "message")?, ack as i32))
            }
            "onMessageMediaUploadedEvent" => Ok(Self::MediaUploaded(decode_arg(name, &args, 0, "message")?)),
            "onRemoveMessageEvent" => Ok(Self::MessageRemove(decode_arg(name, &args, 0, "message")?)),
            "onEditMessageEvent" => {
                let new_body = arg(1)?.as_str().unwrap_or_default().to_string();
                let prev_body = arg(2)?.as_str().unwrap_or_default().to_string();
                Ok(Self::MessageEdit(decode_arg(name, &args, 0, "message")?, new_body, prev_body))
            }
            "onRemoveChatEvent" => Ok(Self::ChatRemove(decode_arg(name, &args, 0, "chat")?)),
            "onArchiveChatEvent" => {
                let archived = arg(1)?.as_bool().unwrap_or(false);
                let prev = arg(2)?.as_bool().unwrap_or(false);
                Ok(Self::ChatArchive(decode_arg(name, &args, 0, "chat")?, archived, prev))
            }
            "onChatUnreadCountEvent" => Ok(Self::UnreadCount(decode_arg(name, &args, 0, "chat")?)),
            "onIncomingCall" => Ok(Self::CallAdd(decode_arg(name, &args, 0, "call")?)),
            "onPollVoteEvent" => Ok(Self::PollVoteAdd(decode_arg(name, &args, 0, "poll vote")?)),
            "onReaction" => Ok(Self::Reactions(decode_arg(name, &args, 0, "reaction batch")?)),
            other => Err(BridgeError::UnknownCallback {
                name: other.to_string(),
            }),
        }
    }
}

/// Deserialize one positional argument of a callback payload.
fn decode_arg<T: serde::de::DeserializeOwned>(
    name: &str,
    args: &[Value],
    idx: usize,
    what: &str,
) -> Result<T, BridgeError> {
    let value = args.get(idx).ok_or_else(|| BridgeError::Payload {
        name: name.to_string(),
        detail: format!("missing argument {idx}"),
    })?;
    serde_json::from_value(value.clone()).map_err(|err| BridgeError::Payload {
        name: name.to_string(),
        detail: format!("argument {idx} is not a valid {what}: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(args: Value) -> String {
        serde_json::to_string(&args).unwrap()
    }

    #[test]
    fn parses_auth_state() {
        let msg =
            BridgeMessage::parse("onAuthAppStateChangedEvent", &payload(json!(["UNPAIRED"])))
                .unwrap();
        assert_eq!(msg, BridgeMessage::AuthState(RemoteState::Unpaired));
    }

    #[test]
    fn parses_progress_and_clamps() {
        let msg =
            BridgeMessage::parse("onOfflineProgressUpdateEvent", &payload(json!([42]))).unwrap();
        assert_eq!(msg, BridgeMessage::OfflineProgress(42));
        let clamped =
            BridgeMessage::parse("onOfflineProgressUpdateEvent", &payload(json!([250]))).unwrap();
        assert_eq!(clamped, BridgeMessage::OfflineProgress(100));
    }

    #[test]
    fn parses_message_ack_pair() {
        let args = json!([
            {
                "id": { "id": "A1", "fromMe": true, "_serialized": "true_x_A1" },
                "type": "chat",
                "body": "hi",
                "t": 1700000000,
            },
            3,
        ]);
        match BridgeMessage::parse("onMessageAckEvent", &payload(args)).unwrap() {
            BridgeMessage::MessageAck(msg, ack) => {
                assert_eq!(msg.id.id, "A1");
                assert_eq!(ack, 3);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_edit_with_bodies() {
        let args = json!([
            {
                "id": { "id": "E1", "fromMe": false, "_serialized": "false_x_E1" },
                "type": "chat",
                "body": "new",
                "t": 0,
            },
            "new",
            "old",
        ]);
        match BridgeMessage::parse("onEditMessageEvent", &payload(args)).unwrap() {
            BridgeMessage::MessageEdit(_, new_body, prev_body) => {
                assert_eq!(new_body, "new");
                assert_eq!(prev_body, "old");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_archive_flags() {
        let args = json!([{ "id": "123@c.us" }, true, false]);
        match BridgeMessage::parse("onArchiveChatEvent", &payload(args)).unwrap() {
            BridgeMessage::ChatArchive(chat, archived, prev) => {
                assert_eq!(chat.id.as_str(), "123@c.us");
                assert!(archived);
                assert!(!prev);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_callback_is_an_error_not_a_panic() {
        let err = BridgeMessage::parse("onSomethingNew", &payload(json!([]))).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownCallback { .. }));
    }

    #[test]
    fn malformed_payload_reports_the_callback() {
        let err = BridgeMessage::parse("onAddMessageEvent", "not json").unwrap_err();
        match err {
            BridgeError::Payload { name, .. } => assert_eq!(name, "onAddMessageEvent"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_argument_is_a_payload_error() {
        let err = BridgeMessage::parse("onMessageAckEvent", &payload(json!([{}]))).unwrap_err();
        assert!(matches!(err, BridgeError::Payload { .. }));
    }

    #[test]
    fn callback_names_roundtrip_through_parse() {
        let messages = [
            BridgeMessage::AuthSynced,
            BridgeMessage::Logout,
            BridgeMessage::OfflineProgress(10),
            BridgeMessage::QrChanged("ref,key".into()),
        ];
        for msg in messages {
            let args = match &msg {
                BridgeMessage::OfflineProgress(pct) => json!([pct]),
                BridgeMessage::QrChanged(qr) => json!([qr]),
                _ => json!([]),
            };
            let parsed = BridgeMessage::parse(msg.callback_name(), &payload(args)).unwrap();
            assert_eq!(parsed, msg);
        }
    }
}
