//! The public event taxonomy.
//!
//! One variant per documented event name; payload shapes are stable per
//! variant regardless of which internal store produced them. [`Event::name`]
//! returns the documented string name for subscribers that key on it.

use serde_json::Value;

use crate::model::{
    CallData, ChatData, GroupNotification, MessageData, PollVote, Reaction,
};
use crate::state::{AckCode, DisconnectReason, RemoteState};

/// An event delivered to host-application subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A login credential is available for scanning.
    Qr(String),
    /// The credential was accepted. Carries the auth strategy's payload.
    Authenticated(Value),
    /// Authentication failed and the retry budget is exhausted.
    AuthFailure(Value),
    /// Stores injected and listeners attached: the session is usable.
    Ready,
    /// History-sync progress, 0..=100.
    LoadingScreen(u8),
    /// A message was received from someone else.
    Message(MessageData),
    /// A message was created, including this account's own.
    MessageCreate(MessageData),
    /// A message's delivery acknowledgement changed.
    MessageAck { message: MessageData, ack: AckCode },
    /// A message was deleted by the current user, for the current user.
    MessageRevokeMe(MessageData),
    /// A message was deleted for everyone. `revoked` carries the
    /// pre-revocation snapshot when one was observed.
    MessageRevokeEveryone {
        message: MessageData,
        revoked: Option<MessageData>,
    },
    /// A message body or caption was edited.
    MessageEdit {
        message: MessageData,
        new_body: String,
        prev_body: String,
    },
    /// A message arrived still encrypted; a resolved event follows once the
    /// page decrypts it.
    MessageCiphertext(MessageData),
    /// Media for an outgoing message finished uploading.
    MediaUploaded(MessageData),
    GroupJoin(GroupNotification),
    GroupLeave(GroupNotification),
    GroupAdminChanged(GroupNotification),
    GroupMembershipRequest(GroupNotification),
    GroupUpdate(GroupNotification),
    /// A contact or group participant changed their number.
    ContactChanged {
        message: MessageData,
        old_id: String,
        new_id: String,
        is_contact: bool,
    },
    /// The page's connection state changed.
    StateChange(RemoteState),
    /// The session ended. No further events fire after this.
    Disconnected(DisconnectReason),
    /// A poll option was selected or deselected.
    VoteUpdate(PollVote),
    IncomingCall(CallData),
    /// A reaction was sent, received, updated or removed.
    MessageReaction(Reaction),
    ChatRemoved(ChatData),
    ChatArchived {
        chat: ChatData,
        archived: bool,
        prev_archived: bool,
    },
    /// A chat's unread counter changed.
    UnreadCount(ChatData),
}

impl Event {
    /// The documented string name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Qr(_) => "qr",
            Event::Authenticated(_) => "authenticated",
            Event::AuthFailure(_) => "auth_failure",
            Event::Ready => "ready",
            Event::LoadingScreen(_) => "loading_screen",
            Event::Message(_) => "message",
            Event::MessageCreate(_) => "message_create",
            Event::MessageAck { .. } => "message_ack",
            Event::MessageRevokeMe(_) => "message_revoke_me",
            Event::MessageRevokeEveryone { .. } => "message_revoke_everyone",
            Event::MessageEdit { .. } => "message_edit",
            Event::MessageCiphertext(_) => "message_ciphertext",
            Event::MediaUploaded(_) => "media_uploaded",
            Event::GroupJoin(_) => "group_join",
            Event::GroupLeave(_) => "group_leave",
            Event::GroupAdminChanged(_) => "group_admin_changed",
            Event::GroupMembershipRequest(_) => "group_membership_request",
            Event::GroupUpdate(_) => "group_update",
            Event::ContactChanged { .. } => "contact_changed",
            Event::StateChange(_) => "change_state",
            Event::Disconnected(_) => "disconnected",
            Event::VoteUpdate(_) => "vote_update",
            Event::IncomingCall(_) => "incoming_call",
            Event::MessageReaction(_) => "message_reaction",
            Event::ChatRemoved(_) => "chat_removed",
            Event::ChatArchived { .. } => "chat_archived",
            Event::UnreadCount(_) => "unread_count",
        }
    }
}
