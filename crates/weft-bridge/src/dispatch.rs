//! Fan-in from bridge messages to the public event stream.
//!
//! One dispatcher per session consumes parsed [`BridgeMessage`]s in store
//! order, applies dedup/throttle/breaker policy, and emits [`Event`]s into
//! the session's channel. Messages that steer the session rather than carry
//! a store mutation are returned to the owner as [`ControlSignal`]s; the
//! dispatcher itself never touches the page.

use std::time::Instant;

use tokio::sync::mpsc;

use weft_types::{AckCode, BridgeTuning, Event, GroupNotification, MessageData, PollVote, RemoteState};

use crate::attach::{notify_kind, GroupEventKind};
use crate::message::BridgeMessage;
use crate::normalize::{CircuitBreaker, Deduper, Throttle};

/// A message the session owner must act on, beyond event delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSignal {
    /// Connection-state change during authentication (credential flow).
    AuthState(RemoteState),
    /// The page finished syncing; run store injection and report ready.
    Synced,
    /// A fresh credential was delivered (counts against the retry budget).
    CredentialRefreshed,
    /// Connection-state change after ready (accepted-state policy applies).
    RemoteState(RemoteState),
    /// The remote session was explicitly invalidated.
    LoggedOut,
}

/// Per-session event dispatcher.
pub struct BridgeDispatcher {
    dedup: Deduper,
    throttle: Throttle,
    breaker: CircuitBreaker,
    /// Most recent non-revoked message change, kept as the pre-revocation
    /// snapshot for `message_revoke_everyone`.
    last_message: Option<MessageData>,
    tx: mpsc::UnboundedSender<Event>,
}

impl BridgeDispatcher {
    pub fn new(tuning: &BridgeTuning, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            dedup: Deduper::new(tuning.dedup_window),
            throttle: Throttle::new(tuning.throttle_interval, tuning.dedup_window),
            breaker: CircuitBreaker::new(
                tuning.breaker_threshold,
                tuning.breaker_window,
                tuning.breaker_decay,
            ),
            last_message: None,
            tx,
        }
    }

    /// Handle one message, emitting events and returning any control signal.
    ///
    /// Failures never escape this boundary: they are logged, counted into
    /// the breaker for the message's kind, and the pipeline moves on. One
    /// store's bad event must not block delivery of other stores' events.
    pub fn handle(&mut self, msg: BridgeMessage, now: Instant) -> Option<ControlSignal> {
        let kind = msg.kind();
        if !self.breaker.allow(kind, now) {
            return None;
        }
        match self.dispatch(msg, now) {
            Ok(signal) => signal,
            Err(detail) => {
                tracing::error!(kind, detail = %detail, "bridge handler failed, dropping event");
                self.breaker.record_failure(kind, now);
                None
            }
        }
    }

    /// Count a failure that happened upstream of dispatch (e.g. a payload
    /// that would not parse) against the breaker for its kind.
    pub fn record_failure(&mut self, kind: &str, now: Instant) {
        self.breaker.record_failure(kind, now);
    }

    /// Drop dedup/throttle/breaker entries older than the rolling window.
    /// The owner runs this on the recovery cadence.
    pub fn sweep(&mut self, now: Instant) {
        self.dedup.sweep(now);
        self.throttle.sweep(now);
        self.breaker.sweep(now);
    }

    fn dispatch(
        &mut self,
        msg: BridgeMessage,
        now: Instant,
    ) -> Result<Option<ControlSignal>, String> {
        match msg {
            BridgeMessage::AuthState(state) => Ok(Some(ControlSignal::AuthState(state))),
            BridgeMessage::AuthSynced => Ok(Some(ControlSignal::Synced)),
            BridgeMessage::Logout => Ok(Some(ControlSignal::LoggedOut)),
            BridgeMessage::QrChanged(qr) => {
                self.emit(Event::Qr(qr));
                Ok(Some(ControlSignal::CredentialRefreshed))
            }
            BridgeMessage::OfflineProgress(pct) => {
                if self.dedup.observe("loading_screen", &pct.to_string(), now) {
                    self.emit(Event::LoadingScreen(pct));
                }
                Ok(None)
            }
            BridgeMessage::StateChange(state) => {
                self.emit(Event::StateChange(state.clone()));
                Ok(Some(ControlSignal::RemoteState(state)))
            }
            BridgeMessage::MessageAdd(msg) => {
                self.on_message_add(msg, now);
                Ok(None)
            }
            BridgeMessage::MessageCiphertext(msg) => {
                self.emit(Event::MessageCiphertext(msg));
                Ok(None)
            }
            BridgeMessage::MessageChange(msg) => {
                self.on_message_change(msg);
                Ok(None)
            }
            BridgeMessage::MessageTypeChange(msg) => {
                if msg.kind == "revoked" {
                    let revoked = self
                        .last_message
                        .as_ref()
                        .filter(|last| last.id.id == msg.id.id)
                        .cloned();
                    self.emit(Event::MessageRevokeEveryone {
                        message: msg,
                        revoked,
                    });
                }
                Ok(None)
            }
            BridgeMessage::MessageAck(msg, code) => {
                let Some(ack) = AckCode::from_code(code) else {
                    tracing::debug!(code, id = %msg.id.serialized, "unknown ack code, skipping");
                    return Ok(None);
                };
                let key = format!("message_ack:{}", msg.id.serialized);
                if self.throttle.allow(&key, now) {
                    self.emit(Event::MessageAck { message: msg, ack });
                }
                Ok(None)
            }
            BridgeMessage::MediaUploaded(msg) => {
                self.emit(Event::MediaUploaded(msg));
                Ok(None)
            }
            BridgeMessage::MessageRemove(msg) => {
                if msg.is_new_msg {
                    self.emit(Event::MessageRevokeMe(msg));
                }
                Ok(None)
            }
            BridgeMessage::MessageEdit(msg, new_body, prev_body) => {
                if msg.kind == "revoked" {
                    return Ok(None);
                }
                let key = format!("message_edit:{}", msg.id.serialized);
                if self.throttle.allow(&key, now) {
                    self.emit(Event::MessageEdit {
                        message: msg,
                        new_body,
                        prev_body,
                    });
                }
                Ok(None)
            }
            BridgeMessage::ChatRemove(chat) => {
                self.emit(Event::ChatRemoved(chat));
                Ok(None)
            }
            BridgeMessage::ChatArchive(chat, archived, prev_archived) => {
                self.emit(Event::ChatArchived {
                    chat,
                    archived,
                    prev_archived,
                });
                Ok(None)
            }
            BridgeMessage::UnreadCount(chat) => {
                self.emit(Event::UnreadCount(chat));
                Ok(None)
            }
            BridgeMessage::CallAdd(call) => {
                self.emit(Event::IncomingCall(call));
                Ok(None)
            }
            BridgeMessage::PollVoteAdd(raw) => {
                self.emit(Event::VoteUpdate(PollVote::resolve(raw)));
                Ok(None)
            }
            BridgeMessage::Reactions(reactions) => {
                for reaction in reactions {
                    self.emit(Event::MessageReaction(reaction));
                }
                Ok(None)
            }
        }
    }

    fn on_message_add(&mut self, msg: MessageData, now: Instant) {
        // Two adds for the same id in immediate succession deliver once.
        if !self.dedup.observe("message_add", &msg.id.id, now) {
            tracing::warn!(id = %msg.id.id, "duplicate message add suppressed");
            return;
        }

        if msg.kind == "gp2" {
            let notification = GroupNotification::from_message(&msg);
            let event = match notify_kind(msg.subtype.as_deref().unwrap_or_default()) {
                GroupEventKind::Join => Event::GroupJoin(notification),
                GroupEventKind::Leave => Event::GroupLeave(notification),
                GroupEventKind::AdminChanged => Event::GroupAdminChanged(notification),
                GroupEventKind::MembershipRequest => Event::GroupMembershipRequest(notification),
                GroupEventKind::Update => Event::GroupUpdate(notification),
            };
            self.emit(event);
            return;
        }

        let from_me = msg.id.from_me;
        self.emit(Event::MessageCreate(msg.clone()));
        if !from_me {
            self.emit(Event::Message(msg));
        }
    }

    fn on_message_change(&mut self, msg: MessageData) {
        if msg.kind != "revoked" {
            self.last_message = Some(msg.clone());
        }

        let is_participant = msg.kind == "gp2" && msg.subtype.as_deref() == Some("modify");
        let is_contact =
            msg.kind == "notification_template" && msg.subtype.as_deref() == Some("change_number");
        if !is_participant && !is_contact {
            return;
        }

        let new_id = if is_participant {
            msg.recipients.first().map(|id| id.as_str().to_string())
        } else {
            msg.to.as_ref().map(|id| id.as_str().to_string())
        };
        let Some(new_id) = new_id else {
            tracing::debug!(id = %msg.id.serialized, "number change without a new id, skipping");
            return;
        };
        let old_id = if is_participant {
            msg.author.as_ref().map(|id| id.as_str().to_string())
        } else {
            msg.template_params.iter().find(|id| **id != new_id).cloned()
        };
        let Some(old_id) = old_id else {
            tracing::debug!(id = %msg.id.serialized, "number change without an old id, skipping");
            return;
        };

        self.emit(Event::ContactChanged {
            message: msg,
            old_id,
            new_id,
            is_contact,
        });
    }

    fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            // Receiver gone: the session is tearing down.
            tracing::debug!("event receiver dropped, discarding event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn dispatcher() -> (BridgeDispatcher, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BridgeDispatcher::new(&BridgeTuning::default(), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn message(id: &str, from_me: bool) -> MessageData {
        serde_json::from_value(json!({
            "id": {
                "id": id,
                "fromMe": from_me,
                "remote": { "_serialized": "123@c.us" },
                "_serialized": format!("{from_me}_123@c.us_{id}"),
            },
            "type": "chat",
            "body": "hello",
            "t": 1700000000,
            "isNewMsg": true,
        }))
        .unwrap()
    }

    fn gp2(id: &str, subtype: &str) -> MessageData {
        serde_json::from_value(json!({
            "id": {
                "id": id,
                "fromMe": false,
                "remote": { "_serialized": "group@g.us" },
                "_serialized": format!("false_group@g.us_{id}"),
            },
            "type": "gp2",
            "subtype": subtype,
            "author": "admin@c.us",
            "body": "",
            "t": 1700000001,
            "recipients": ["alice@c.us"],
            "isNewMsg": true,
        }))
        .unwrap()
    }

    #[test]
    fn incoming_message_emits_create_then_message() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle(BridgeMessage::MessageAdd(message("A1", false)), Instant::now());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "message_create");
        assert_eq!(events[1].name(), "message");
    }

    #[test]
    fn own_message_emits_only_create() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle(BridgeMessage::MessageAdd(message("A2", true)), Instant::now());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "message_create");
    }

    #[test]
    fn duplicate_add_for_same_id_delivers_once() {
        let (mut dispatcher, mut rx) = dispatcher();
        let now = Instant::now();
        dispatcher.handle(BridgeMessage::MessageAdd(message("A3", false)), now);
        dispatcher.handle(BridgeMessage::MessageAdd(message("A3", false)), now);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2, "one message/message_create pair expected");
    }

    #[test]
    fn group_notification_fan_out_by_subtype() {
        let cases = [
            ("add", "group_join"),
            ("invite", "group_join"),
            ("linked_group_join", "group_join"),
            ("remove", "group_leave"),
            ("leave", "group_leave"),
            ("promote", "group_admin_changed"),
            ("demote", "group_admin_changed"),
            ("membership_approval_request", "group_membership_request"),
            ("subject", "group_update"),
        ];
        for (i, (subtype, expected)) in cases.into_iter().enumerate() {
            let (mut dispatcher, mut rx) = dispatcher();
            dispatcher.handle(
                BridgeMessage::MessageAdd(gp2(&format!("N{i}"), subtype)),
                Instant::now(),
            );
            let events = drain(&mut rx);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].name(), expected, "subtype {subtype}");
        }
    }

    #[test]
    fn ciphertext_precedes_resolved_pair() {
        let (mut dispatcher, mut rx) = dispatcher();
        let now = Instant::now();
        let mut provisional = message("C1", false);
        provisional.kind = "ciphertext".into();
        dispatcher.handle(BridgeMessage::MessageCiphertext(provisional), now);
        dispatcher.handle(BridgeMessage::MessageAdd(message("C1", false)), now);

        let names: Vec<_> = drain(&mut rx).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["message_ciphertext", "message_create", "message"]);
    }

    #[test]
    fn revoke_everyone_carries_pre_revocation_snapshot() {
        let (mut dispatcher, mut rx) = dispatcher();
        let now = Instant::now();
        dispatcher.handle(BridgeMessage::MessageChange(message("R1", false)), now);

        let mut revoked = message("R1", false);
        revoked.kind = "revoked".into();
        revoked.body = String::new();
        dispatcher.handle(BridgeMessage::MessageTypeChange(revoked), now);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::MessageRevokeEveryone { revoked, .. } => {
                assert_eq!(revoked.as_ref().unwrap().body, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn revoke_without_snapshot_still_delivers() {
        let (mut dispatcher, mut rx) = dispatcher();
        let mut revoked = message("R2", false);
        revoked.kind = "revoked".into();
        dispatcher.handle(BridgeMessage::MessageTypeChange(revoked), Instant::now());

        match &drain(&mut rx)[0] {
            Event::MessageRevokeEveryone { revoked, .. } => assert!(revoked.is_none()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn revoke_me_requires_new_message_flag() {
        let (mut dispatcher, mut rx) = dispatcher();
        let now = Instant::now();
        let mut old = message("R3", false);
        old.is_new_msg = false;
        dispatcher.handle(BridgeMessage::MessageRemove(old), now);
        assert!(drain(&mut rx).is_empty());

        dispatcher.handle(BridgeMessage::MessageRemove(message("R4", false)), now);
        assert_eq!(drain(&mut rx)[0].name(), "message_revoke_me");
    }

    #[test]
    fn participant_number_change_extracts_ids() {
        let (mut dispatcher, mut rx) = dispatcher();
        let mut msg = gp2("P1", "modify");
        msg.recipients = vec!["new@c.us".into()];
        msg.author = Some("old@c.us".into());
        dispatcher.handle(BridgeMessage::MessageChange(msg), Instant::now());

        match &drain(&mut rx)[0] {
            Event::ContactChanged {
                old_id,
                new_id,
                is_contact,
                ..
            } => {
                assert_eq!(old_id, "old@c.us");
                assert_eq!(new_id, "new@c.us");
                assert!(!is_contact);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn contact_number_change_uses_template_params() {
        let (mut dispatcher, mut rx) = dispatcher();
        let mut msg = message("P2", false);
        msg.kind = "notification_template".into();
        msg.subtype = Some("change_number".into());
        msg.to = Some("new@c.us".into());
        msg.template_params = vec!["old@c.us".into(), "new@c.us".into()];
        dispatcher.handle(BridgeMessage::MessageChange(msg), Instant::now());

        match &drain(&mut rx)[0] {
            Event::ContactChanged {
                old_id,
                new_id,
                is_contact,
                ..
            } => {
                assert_eq!(old_id, "old@c.us");
                assert_eq!(new_id, "new@c.us");
                assert!(is_contact);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn ordinary_change_emits_nothing() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle(BridgeMessage::MessageChange(message("P3", false)), Instant::now());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn ack_stream_is_throttled_per_message() {
        let (mut dispatcher, mut rx) = dispatcher();
        let start = Instant::now();
        dispatcher.handle(BridgeMessage::MessageAck(message("K1", true), 1), start);
        dispatcher.handle(
            BridgeMessage::MessageAck(message("K1", true), 2),
            start + Duration::from_millis(5),
        );
        dispatcher.handle(
            BridgeMessage::MessageAck(message("K1", true), 3),
            start + Duration::from_millis(60),
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[1] {
            Event::MessageAck { ack, .. } => assert_eq!(*ack, AckCode::Read),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_ack_code_is_skipped() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle(BridgeMessage::MessageAck(message("K2", true), 9), Instant::now());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn edit_of_revoked_message_is_skipped() {
        let (mut dispatcher, mut rx) = dispatcher();
        let mut revoked = message("E1", false);
        revoked.kind = "revoked".into();
        dispatcher.handle(
            BridgeMessage::MessageEdit(revoked, "new".into(), "old".into()),
            Instant::now(),
        );
        assert!(drain(&mut rx).is_empty());

        dispatcher.handle(
            BridgeMessage::MessageEdit(message("E2", false), "new".into(), "old".into()),
            Instant::now(),
        );
        assert_eq!(drain(&mut rx)[0].name(), "message_edit");
    }

    #[test]
    fn repeated_progress_values_fire_at_most_twice() {
        let (mut dispatcher, mut rx) = dispatcher();
        let now = Instant::now();
        for _ in 0..10 {
            dispatcher.handle(BridgeMessage::OfflineProgress(40), now);
        }
        dispatcher.handle(BridgeMessage::OfflineProgress(41), now);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::LoadingScreen(40));
        assert_eq!(events[1], Event::LoadingScreen(41));
    }

    #[test]
    fn qr_emits_event_and_signals_refresh() {
        let (mut dispatcher, mut rx) = dispatcher();
        let signal = dispatcher.handle(
            BridgeMessage::QrChanged("ref,key,id".into()),
            Instant::now(),
        );
        assert_eq!(signal, Some(ControlSignal::CredentialRefreshed));
        assert_eq!(drain(&mut rx)[0], Event::Qr("ref,key,id".into()));
    }

    #[test]
    fn state_change_emits_and_signals() {
        let (mut dispatcher, mut rx) = dispatcher();
        let signal = dispatcher.handle(
            BridgeMessage::StateChange(RemoteState::Conflict),
            Instant::now(),
        );
        assert_eq!(signal, Some(ControlSignal::RemoteState(RemoteState::Conflict)));
        assert_eq!(drain(&mut rx)[0], Event::StateChange(RemoteState::Conflict));
    }

    #[test]
    fn control_messages_produce_signals_without_events() {
        let (mut dispatcher, mut rx) = dispatcher();
        let now = Instant::now();
        assert_eq!(
            dispatcher.handle(BridgeMessage::AuthSynced, now),
            Some(ControlSignal::Synced)
        );
        assert_eq!(
            dispatcher.handle(BridgeMessage::Logout, now),
            Some(ControlSignal::LoggedOut)
        );
        assert_eq!(
            dispatcher.handle(BridgeMessage::AuthState(RemoteState::UnpairedIdle), now),
            Some(ControlSignal::AuthState(RemoteState::UnpairedIdle))
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn tripped_breaker_drops_the_failing_kind_only() {
        let (mut dispatcher, mut rx) = dispatcher();
        let now = Instant::now();
        for _ in 0..5 {
            dispatcher.record_failure("message_add", now);
        }
        dispatcher.handle(BridgeMessage::MessageAdd(message("B1", false)), now);
        assert!(drain(&mut rx).is_empty());

        dispatcher.handle(BridgeMessage::ChatRemove(Default::default()), now);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn reactions_batch_fans_out_per_reaction() {
        let (mut dispatcher, mut rx) = dispatcher();
        let reactions: Vec<weft_types::Reaction> = serde_json::from_value(json!([
            { "senderUserJid": "a@c.us", "reaction": "x", "timestamp": 1.0 },
            { "senderUserJid": "b@c.us", "reaction": "y", "timestamp": 2.0 },
        ]))
        .unwrap();
        dispatcher.handle(BridgeMessage::Reactions(reactions), Instant::now());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn poll_vote_is_resolved_before_delivery() {
        let (mut dispatcher, mut rx) = dispatcher();
        let raw: weft_types::PollVoteData = serde_json::from_value(json!({
            "sender": "voter@c.us",
            "selectedOptionLocalIds": [1],
            "senderTimestampMs": 1700000000000i64,
            "parentMessage": {
                "id": { "id": "P1", "fromMe": true, "_serialized": "true_x_P1" },
                "type": "poll_creation",
                "body": "lunch?",
                "t": 0,
                "pollOptions": [{ "localId": 1, "name": "pizza" }],
            },
        }))
        .unwrap();
        dispatcher.handle(BridgeMessage::PollVoteAdd(raw), Instant::now());

        match &drain(&mut rx)[0] {
            Event::VoteUpdate(vote) => {
                assert_eq!(vote.voter, "voter@c.us");
                assert_eq!(vote.selected_options[0].name, "pizza");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
