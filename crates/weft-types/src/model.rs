//! Payload models mirrored from the remote page's stores.
//!
//! These are deliberately loose snapshots: the page serializes its internal
//! entities to JSON and the bridge forwards them as-is. Every struct keeps
//! unrecognized fields in a `rest` map so a page update cannot break
//! deserialization, and only the fields the event pipeline actually inspects
//! are typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An entity identifier as the page emits it.
///
/// Depending on which serializer produced the payload, ids arrive either as a
/// plain serialized string (`"123@c.us"`) or as a wid object carrying a
/// `_serialized` field. Both forms compare by their serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Plain(String),
    Wid {
        #[serde(rename = "_serialized")]
        serialized: String,
        #[serde(default)]
        user: String,
        #[serde(default)]
        server: String,
    },
}

impl EntityId {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(id) => id,
            Self::Wid { serialized, .. } => serialized,
        }
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::Plain(String::new())
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::Plain(id.to_string())
    }
}

/// Identity of a message in the message store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageId {
    /// The store-local id component.
    pub id: String,
    /// Whether the message was sent by this session's own account.
    pub from_me: bool,
    /// The chat the message belongs to.
    pub remote: Option<EntityId>,
    #[serde(rename = "_serialized")]
    pub serialized: String,
}

/// Snapshot of a message entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageData {
    pub id: MessageId,
    /// Message kind tag (`chat`, `ciphertext`, `revoked`, `gp2`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Discriminator for notification-style messages (`add`, `remove`, ...).
    pub subtype: Option<String>,
    pub body: String,
    pub from: Option<EntityId>,
    pub to: Option<EntityId>,
    pub author: Option<EntityId>,
    /// Store timestamp, in seconds.
    #[serde(rename = "t")]
    pub timestamp: i64,
    pub is_new_msg: bool,
    pub ack: Option<i32>,
    pub recipients: Vec<EntityId>,
    pub template_params: Vec<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Snapshot of a chat entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatData {
    pub id: EntityId,
    pub name: Option<String>,
    pub is_group: bool,
    pub unread_count: i64,
    pub archived: Option<bool>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Snapshot of a contact entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactData {
    pub id: EntityId,
    pub name: Option<String>,
    pub pushname: Option<String>,
    pub number: Option<String>,
    pub is_my_contact: bool,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Snapshot of an incoming call entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallData {
    pub id: Value,
    pub peer_jid: Option<String>,
    pub is_video: bool,
    pub is_group: bool,
    pub outgoing: bool,
    pub can_handle_locally: bool,
    pub web_client_should_handle: bool,
    pub participants: Value,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A reaction row captured from the reaction table's upsert path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reaction {
    pub id: Value,
    pub msg_key: Value,
    pub parent_msg_key: Value,
    pub sender_user_jid: String,
    /// Seconds since epoch.
    pub timestamp: f64,
    pub reaction: String,
    pub read: bool,
    pub orphan: i64,
    pub orphan_reason: Option<String>,
    pub ack: Option<i32>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Raw poll-vote payload as the poll-vote store emits it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollVoteData {
    pub sender: String,
    pub selected_option_local_ids: Vec<i64>,
    /// Milliseconds since epoch.
    pub sender_timestamp_ms: i64,
    pub parent_message: MessageData,
}

/// A poll option the voter selected, resolved against the parent poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedPollOption {
    pub local_id: i64,
    pub name: String,
}

/// A resolved poll vote, as delivered to the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollVote {
    /// Who voted.
    pub voter: String,
    /// The currently selected option(s). Empty when the voter deselected
    /// everything.
    pub selected_options: Vec<SelectedPollOption>,
    /// When the option was selected or deselected, in milliseconds.
    pub interacted_at_ms: i64,
    /// The poll-creation message this vote belongs to.
    pub parent_message: MessageData,
}

impl PollVote {
    /// Resolve a raw vote against its parent poll's option list.
    ///
    /// Selected ids with no matching option in the parent are dropped rather
    /// than failing the whole vote; the page occasionally emits votes before
    /// the parent finished materializing.
    pub fn resolve(raw: PollVoteData) -> Self {
        let options: Vec<(i64, String)> = raw
            .parent_message
            .rest
            .get("pollOptions")
            .and_then(Value::as_array)
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| {
                        let local_id = o.get("localId").and_then(Value::as_i64)?;
                        let name = o.get("name").and_then(Value::as_str)?.to_string();
                        Some((local_id, name))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let selected_options = raw
            .selected_option_local_ids
            .iter()
            .filter_map(|id| {
                options
                    .iter()
                    .find(|(local_id, _)| local_id == id)
                    .map(|(local_id, name)| SelectedPollOption {
                        local_id: *local_id,
                        name: name.clone(),
                    })
            })
            .collect();

        Self {
            voter: raw.sender,
            selected_options,
            interacted_at_ms: raw.sender_timestamp_ms,
            parent_message: raw.parent_message,
        }
    }
}

/// A group notification derived from a `gp2` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNotification {
    pub id: MessageId,
    /// The group chat the notification belongs to.
    pub chat_id: String,
    /// The raw notification subtype (`add`, `remove`, `promote`, ...).
    pub kind: String,
    pub author: Option<String>,
    pub body: String,
    /// Seconds since epoch.
    pub timestamp: i64,
    /// The users the notification concerns.
    pub recipient_ids: Vec<String>,
}

impl GroupNotification {
    /// Build a notification from the message entity that carried it.
    pub fn from_message(msg: &MessageData) -> Self {
        Self {
            id: msg.id.clone(),
            chat_id: msg
                .id
                .remote
                .as_ref()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default(),
            kind: msg.subtype.clone().unwrap_or_default(),
            author: msg.author.as_ref().map(|id| id.as_str().to_string()),
            body: msg.body.clone(),
            timestamp: msg.timestamp,
            recipient_ids: msg
                .recipients
                .iter()
                .map(|id| id.as_str().to_string())
                .collect(),
        }
    }
}

/// The session's own connection info, serialized from the page on ready.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientInfo {
    pub pushname: Option<String>,
    pub wid: EntityId,
    pub platform: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}
