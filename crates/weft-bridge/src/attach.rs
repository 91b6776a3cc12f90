//! Store-listener wiring: the attachment script and its one-shot guard.
//!
//! The page side keeps a registry of attached handlers per store so a rerun
//! of the attachment script detaches every previously recorded handler before
//! attaching fresh ones -- attaching twice without detaching must never
//! double-deliver a mutation. The host side guards the whole "attach all
//! listeners" operation with a one-shot flag that only an explicit reset
//! (reinjection) clears.

use std::sync::atomic::{AtomicBool, Ordering};

/// Callbacks the host exposes before running the attachment script. Every
/// listener in the script reports through one of these names.
pub const CALLBACK_NAMES: [&str; 15] = [
    "onAddMessageEvent",
    "onAddMessageCiphertextEvent",
    "onChangeMessageEvent",
    "onChangeMessageTypeEvent",
    "onMessageAckEvent",
    "onMessageMediaUploadedEvent",
    "onRemoveMessageEvent",
    "onEditMessageEvent",
    "onRemoveChatEvent",
    "onArchiveChatEvent",
    "onChatUnreadCountEvent",
    "onAppStateChangedEvent",
    "onIncomingCall",
    "onPollVoteEvent",
    "onReaction",
];

/// The (store, event) pairs the attachment script wires. The reaction table
/// is not listed: it has no discrete event and is observed by decorating its
/// `bulkUpsert` entrypoint instead.
pub const LISTENER_PLAN: [(&str, &str); 13] = [
    ("Msg", "add"),
    ("Msg", "change"),
    ("Msg", "change:type"),
    ("Msg", "change:ack"),
    ("Msg", "change:isUnsentMedia"),
    ("Msg", "remove"),
    ("Msg", "change:body change:caption"),
    ("Chat", "remove"),
    ("Chat", "change:archive"),
    ("Chat", "change:unreadCount"),
    ("Call", "add"),
    ("AppState", "change:state"),
    ("PollVote", "add"),
];

/// Public event family a group notification fans out to, keyed on the
/// notification subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEventKind {
    Join,
    Leave,
    AdminChanged,
    MembershipRequest,
    Update,
}

/// The fixed subtype discriminator table. Unknown subtypes map to the
/// generic update event.
pub fn notify_kind(subtype: &str) -> GroupEventKind {
    match subtype {
        "add" | "invite" | "linked_group_join" => GroupEventKind::Join,
        "remove" | "leave" => GroupEventKind::Leave,
        "promote" | "demote" => GroupEventKind::AdminChanged,
        "membership_approval_request" => GroupEventKind::MembershipRequest,
        _ => GroupEventKind::Update,
    }
}

/// One-shot guard around the "attach all listeners" operation.
///
/// The first [`begin`](Self::begin) wins; concurrent or repeated calls are
/// no-ops until [`reset`](Self::reset), which a reinjection cycle triggers.
pub struct ListenerSet {
    attached: AtomicBool,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self {
            attached: AtomicBool::new(false),
        }
    }

    /// Claim the attach operation. Returns `true` exactly once per cycle.
    pub fn begin(&self) -> bool {
        !self.attached.swap(true, Ordering::SeqCst)
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Clear the guard so the next [`begin`](Self::begin) attaches again.
    pub fn reset(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the page-side attachment script.
///
/// Walks the page-side listener registry and detaches every recorded handler
/// first (detach failures are logged, the teardown continues), then attaches
/// and records fresh handlers for every pair in [`LISTENER_PLAN`]. Ciphertext
/// adds subscribe a one-shot `change:type` continuation on the message itself
/// so the stable event follows the provisional one once decryption resolves.
pub fn script() -> String {
    r#"(() => {
    const tag = () => '[' + (window.__weft_client_id || 'default') + ']';
    const stores = ['Msg', 'Chat', 'Call', 'AppState', 'PollVote'];

    window.__weft_listeners = window.__weft_listeners || {};

    for (const storeName of stores) {
        const emitter = window.Store && window.Store[storeName];
        const recorded = window.__weft_listeners[storeName];
        if (recorded && emitter && typeof emitter.off === 'function') {
            for (const [evt, handler] of Object.entries(recorded)) {
                try {
                    emitter.off(evt, handler);
                } catch (err) {
                    console.warn(tag() + ' failed to detach ' + storeName + '.' + evt + ':', err);
                }
            }
        }
        window.__weft_listeners[storeName] = {};
    }

    const listen = (storeName, eventName, handler) => {
        const emitter = window.Store[storeName];
        if (!emitter || typeof emitter.on !== 'function') {
            console.warn(tag() + ' store ' + storeName + ' is not listenable, skipping ' + eventName);
            return;
        }
        window.__weft_listeners[storeName][eventName] = handler;
        emitter.on(eventName, handler);
    };

    listen('Msg', 'add', (msg) => {
        if (!msg.isNewMsg) return;
        if (msg.type === 'ciphertext') {
            msg.once('change:type', (resolved) =>
                window.__weft_emit('onAddMessageEvent', [window.WeftUtils.getMessageModel(resolved)])
            );
            window.__weft_emit('onAddMessageCiphertextEvent', [window.WeftUtils.getMessageModel(msg)]);
        } else {
            window.__weft_emit('onAddMessageEvent', [window.WeftUtils.getMessageModel(msg)]);
        }
    });
    listen('Msg', 'change', (msg) => {
        window.__weft_emit('onChangeMessageEvent', [window.WeftUtils.getMessageModel(msg)]);
    });
    listen('Msg', 'change:type', (msg) => {
        window.__weft_emit('onChangeMessageTypeEvent', [window.WeftUtils.getMessageModel(msg)]);
    });
    listen('Msg', 'change:ack', (msg, ack) => {
        window.__weft_emit('onMessageAckEvent', [window.WeftUtils.getMessageModel(msg), ack]);
    });
    listen('Msg', 'change:isUnsentMedia', (msg, unsent) => {
        if (msg.id.fromMe && !unsent)
            window.__weft_emit('onMessageMediaUploadedEvent', [window.WeftUtils.getMessageModel(msg)]);
    });
    listen('Msg', 'remove', (msg) => {
        if (msg.isNewMsg)
            window.__weft_emit('onRemoveMessageEvent', [window.WeftUtils.getMessageModel(msg)]);
    });
    listen('Msg', 'change:body change:caption', (msg, newBody, prevBody) => {
        window.__weft_emit('onEditMessageEvent', [window.WeftUtils.getMessageModel(msg), newBody, prevBody]);
    });
    listen('AppState', 'change:state', (_appState, state) => {
        window.__weft_emit('onAppStateChangedEvent', [state]);
    });
    listen('Call', 'add', (call) => {
        window.__weft_emit('onIncomingCall', [window.WeftUtils.getCallModel(call)]);
    });
    listen('Chat', 'remove', async (chat) => {
        window.__weft_emit('onRemoveChatEvent', [await window.WeftUtils.getChatModel(chat)]);
    });
    listen('Chat', 'change:archive', async (chat, curr, prev) => {
        window.__weft_emit('onArchiveChatEvent', [await window.WeftUtils.getChatModel(chat), curr, prev]);
    });
    listen('Chat', 'change:unreadCount', async (chat) => {
        window.__weft_emit('onChatUnreadCountEvent', [await window.WeftUtils.getChatModel(chat)]);
    });
    listen('PollVote', 'add', async (vote) => {
        const model = await window.WeftUtils.getPollVoteModel(vote);
        if (model) window.__weft_emit('onPollVoteEvent', [model]);
    });

    const table = window.Store.AddonReactionTable;
    if (table && typeof table.bulkUpsert === 'function' && !table.bulkUpsert.__weftPatched) {
        const original = table.bulkUpsert;
        table.bulkUpsert = ((...args) => {
            try {
                window.__weft_emit('onReaction', [args[0].map((reaction) => {
                    const sender = reaction.author ?? reaction.from;
                    return {
                        ...reaction,
                        msgKey: reaction.id,
                        parentMsgKey: reaction.reactionParentKey,
                        senderUserJid: sender && sender._serialized,
                        timestamp: reaction.reactionTimestamp / 1000,
                    };
                })]);
            } catch (err) {
                console.error(tag() + ' reaction observer failed:', err);
            }
            return original.apply(table, args);
        }).bind(table);
        table.bulkUpsert.__weftPatched = true;
    }
})();
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_is_one_shot_until_reset() {
        let set = ListenerSet::new();
        assert!(set.begin());
        assert!(!set.begin());
        assert!(!set.begin());
        assert!(set.is_attached());

        set.reset();
        assert!(set.begin());
        assert!(!set.begin());
    }

    #[test]
    fn overlapping_begins_grant_exactly_one() {
        use std::sync::Arc;

        let set = Arc::new(ListenerSet::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let set = Arc::clone(&set);
            handles.push(std::thread::spawn(move || set.begin()));
        }
        let granted: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(granted, 1);
    }

    #[test]
    fn notify_kind_table_is_total() {
        assert_eq!(notify_kind("add"), GroupEventKind::Join);
        assert_eq!(notify_kind("invite"), GroupEventKind::Join);
        assert_eq!(notify_kind("linked_group_join"), GroupEventKind::Join);
        assert_eq!(notify_kind("remove"), GroupEventKind::Leave);
        assert_eq!(notify_kind("leave"), GroupEventKind::Leave);
        assert_eq!(notify_kind("promote"), GroupEventKind::AdminChanged);
        assert_eq!(notify_kind("demote"), GroupEventKind::AdminChanged);
        assert_eq!(
            notify_kind("membership_approval_request"),
            GroupEventKind::MembershipRequest
        );
        // Anything unrecognized is a generic update.
        assert_eq!(notify_kind("subject"), GroupEventKind::Update);
        assert_eq!(notify_kind(""), GroupEventKind::Update);
    }

    #[test]
    fn script_detaches_before_attaching() {
        let js = script();
        let detach = js.find("emitter.off(evt, handler)").unwrap();
        let attach = js.find("emitter.on(eventName, handler)").unwrap();
        assert!(detach < attach);
    }

    #[test]
    fn script_covers_the_whole_plan() {
        let js = script();
        for (store, event) in LISTENER_PLAN {
            let call = format!("listen('{store}', '{event}'");
            assert!(js.contains(&call), "plan entry {store}/{event} not wired");
        }
    }

    #[test]
    fn script_reports_through_known_callbacks_only() {
        let js = script();
        for segment in js.split("__weft_emit('").skip(1) {
            let name = segment.split('\'').next().unwrap();
            assert!(
                CALLBACK_NAMES.contains(&name),
                "script emits through unexposed callback {name}"
            );
        }
    }

    #[test]
    fn ciphertext_defers_stable_event_to_type_change() {
        let js = script();
        let provisional = js.find("onAddMessageCiphertextEvent").unwrap();
        let continuation = js.find("msg.once('change:type'").unwrap();
        // The one-shot continuation is registered before the provisional
        // event fires, so resolution can never be missed.
        assert!(continuation < provisional);
    }

    #[test]
    fn reaction_decoration_is_marked_one_shot() {
        let js = script();
        assert!(js.contains("!table.bulkUpsert.__weftPatched"));
        assert!(js.contains("table.bulkUpsert.__weftPatched = true"));
        assert!(js.contains("original.apply(table, args)"));
    }
}
