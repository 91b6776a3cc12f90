//! Page-side scripts the client evaluates.
//!
//! These bind the page's internal module registry to the `window.AuthStore`
//! and `window.Store` accessors the bridge relies on, install the auth-time
//! event hooks, and wrap command bodies so rejections come back as data
//! instead of thrown exceptions. Every installer carries its own page-side
//! guard so re-evaluation (reinjection, recovery repair) is harmless.

/// Expression that is truthy once the page's core runtime is loaded.
pub const PAGE_READY_EXPR: &str = "window.Debug && window.Debug.VERSION";

/// Expression that is truthy once the store root is exposed and populated.
pub const STORE_READY_EXPR: &str = "!!window.Store && !!window.Store.Msg";

/// Expression that is truthy while the full injection is in place.
pub const INJECTED_EXPR: &str =
    "typeof window.Store !== 'undefined' && typeof window.WeftUtils !== 'undefined'";

/// Expression that is truthy while the auth object is reachable.
pub const AUTH_READY_EXPR: &str = "!!window.AuthStore && !!window.AuthStore.Cmd";

/// Marker the messenger puts in the URL after a remote logout.
pub const POST_LOGOUT_MARKER: &str = "post_logout=1";

/// Record the session id for page-side console output.
pub fn set_client_id(client_id: &str) -> String {
    format!(
        "window.__weft_client_id = {};",
        serde_json::to_string(client_id).unwrap_or_else(|_| "\"default\"".into())
    )
}

/// Bind `window.AuthStore` from the page's module registry.
pub const EXPOSE_AUTH_STORE: &str = r#"(() => {
    if (window.AuthStore && window.AuthStore.AppState) return;
    window.AuthStore = {};
    window.AuthStore.AppState = window.require('WAWebSocketModel').Socket;
    window.AuthStore.Cmd = window.require('WAWebCmd').Cmd;
    window.AuthStore.Conn = window.require('WAWebConnModel').Conn;
    window.AuthStore.OfflineMessageHandler = window.require('WAWebOfflineHandler').OfflineMessageHandler;
    window.AuthStore.PairingCodeLinkUtils = window.require('WAWebAltDeviceLinkingApi');
    window.AuthStore.Base64Tools = window.require('WABase64');
    window.AuthStore.RegistrationUtils = {
        ...window.require('WAWebCompanionRegClientUtils'),
        ...window.require('WAWebAdvSignatureApi'),
        ...window.require('WAWebSignalStoreApi'),
    };
})();
"#;

/// Bind `window.Store` (collections plus the command/query modules the
/// command surface calls) from the page's module registry.
pub const EXPOSE_STORE: &str = r#"(() => {
    if (window.Store && window.Store.Msg) return;
    window.Store = Object.assign({}, window.require('WAWebCollections'));
    window.Store.AppState = window.require('WAWebSocketModel').Socket;
    window.Store.Cmd = window.require('WAWebCmd').Cmd;
    window.Store.Conn = window.require('WAWebConnModel').Conn;
    window.Store.User = window.require('WAWebUserPrefsMeUser');
    window.Store.WidFactory = window.require('WAWebWidFactory');
    window.Store.SendSeen = window.require('WAWebUpdateUnreadChatAction');
    window.Store.SendMessage = window.require('WAWebSendMsgChatAction');
    window.Store.MsgActions = window.require('WAWebMsgActionCapability');
    window.Store.QueryExist = window.require('WAWebQueryExistsJob').queryWidExists;
    window.Store.NumberInfo = window.require('WAPhoneUtils');
    window.Store.ReactionsSendApi = window.require('WAWebSendReactionMsgAction');
    window.Store.AddonReactionTable = window.require('WAWebAddonReactionTableMode').reactionTableMode;
    window.Store.PresenceUtils = window.require('WAWebPresenceChatAction');
    window.Store.StatusUtils = window.require('WAWebContactStatusBridge');
    window.Store.ProfileUtils = window.require('WAWebSetPushnameConnAction');
    window.Store.GroupInvite = window.require('WAWebGroupInviteJob');
    window.Store.GroupQueryJob = window.require('WAWebGroupQueryJob');
    window.Store.MsgSearch = window.require('WAWebMsgSearchApi');
    window.Store.MediaPrep = window.require('WAWebPrepRawMedia');
    window.Store.MediaUpload = window.require('WAWebMediaUpload');
})();
"#;

/// Define `window.WeftUtils`: the model serializers and actions the listener
/// wiring and the command surface call.
pub const LOAD_UTILS: &str = r#"(() => {
    if (window.WeftUtils && window.WeftUtils.getMessageModel) return;
    window.WeftUtils = {};

    window.WeftUtils.getMessageModel = (message) => {
        const model = message.serialize();
        model.isEphemeral = message.isEphemeral;
        model.isStatusV3 = message.isStatusV3;
        if (model.id && typeof model.id === 'object' && message.id.remote) {
            model.id.remote = { _serialized: message.id.remote._serialized || String(message.id.remote) };
        }
        delete model.pendingAckUpdate;
        return model;
    };

    window.WeftUtils.getChatModel = async (chat) => {
        const model = chat.serialize();
        model.isGroup = !!chat.isGroup;
        model.formattedTitle = chat.formattedTitle;
        if (chat.groupMetadata) {
            model.groupMetadata = chat.groupMetadata.serialize();
        }
        delete model.msgs;
        return model;
    };

    window.WeftUtils.getContactModel = (contact) => {
        const model = contact.serialize();
        model.isMyContact = !!contact.isAddressBookContact;
        model.isBusiness = !!contact.isBusiness;
        return model;
    };

    window.WeftUtils.getCallModel = (call) => ({
        id: call.id,
        peerJid: call.peerJid && (call.peerJid._serialized || String(call.peerJid)),
        offerTime: call.offerTime,
        isVideo: !!call.isVideo,
        isGroup: !!call.isGroup,
        outgoing: !!call.outgoing,
        canHandleLocally: !!call.canHandleLocally,
        webClientShouldHandle: !!call.webClientShouldHandle,
        participants: call.participants || [],
    });

    window.WeftUtils.getPollVoteModel = async (vote) => {
        let parent = window.Store.Msg.get(vote.parentMsgKey);
        if (!parent) {
            const fetched = await window.Store.Msg.getMessagesById([vote.parentMsgKey]);
            parent = fetched && fetched.messages && fetched.messages[0];
        }
        if (!parent) return null;
        return {
            sender: vote.sender._serialized || String(vote.sender),
            selectedOptionLocalIds: vote.selectedOptionLocalIds || [],
            senderTimestampMs: vote.senderTimestampMs,
            parentMessage: window.WeftUtils.getMessageModel(parent),
        };
    };

    window.WeftUtils.getChatById = async (chatId) => {
        const wid = window.Store.WidFactory.createWid(chatId);
        return await window.Store.Chat.find(wid);
    };

    window.WeftUtils.getContactById = async (contactId) => {
        const wid = window.Store.WidFactory.createWid(contactId);
        return await window.Store.Contact.find(wid);
    };

    window.WeftUtils.sendSeen = async (chatId) => {
        const chat = await window.WeftUtils.getChatById(chatId);
        if (!chat) return false;
        await window.Store.SendSeen.markSeen(chat, true);
        return true;
    };

    window.WeftUtils.sendMessage = async (chatId, content, options = {}) => {
        const chat = await window.WeftUtils.getChatById(chatId);
        if (!chat) {
            const err = new Error('chat not found: ' + chatId);
            err.name = 'ChatNotFound';
            throw err;
        }

        const meta = {};
        if (options.quotedMessageId) {
            const quoted = window.Store.Msg.get(options.quotedMessageId);
            if (quoted) meta.quotedMsg = quoted;
        }
        if (options.mentions && options.mentions.length) {
            meta.mentionedJidList = options.mentions.map((id) => window.Store.WidFactory.createWid(id));
        }
        if (options.mediaHandle) {
            const prepared = window.WeftUtils.preparedMediaMap && window.WeftUtils.preparedMediaMap[options.mediaHandle];
            if (!prepared) {
                const err = new Error('no prepared media under handle ' + options.mediaHandle);
                err.name = 'MediaNotPrepared';
                throw err;
            }
            Object.assign(meta, prepared);
            delete window.WeftUtils.preparedMediaMap[options.mediaHandle];
        }
        if (options.caption) meta.caption = options.caption;

        if (options.sendSeen !== false) {
            void window.Store.SendSeen.markSeen(chat, false);
        }

        const sent = await window.Store.SendMessage.addAndSendMsgToChat(chat, content, meta);
        const model = await sent[1];
        return window.WeftUtils.getMessageModel(window.Store.Msg.get(model.id) || model);
    };

    window.WeftUtils.processMediaData = async (file, options = {}) => {
        const data = await window.Store.MediaPrep.prepRawMedia(file, options);
        const uploaded = await window.Store.MediaUpload.uploadMedia(data);
        return uploaded;
    };
})();
"#;

/// Wait out the launching states, then report whether a fresh credential is
/// required. Must be evaluated with promise awaiting enabled.
pub const NEEDS_CREDENTIAL: &str = r#"(async () => {
    const AppState = window.AuthStore.AppState;
    const launching = ['OPENING', 'UNLAUNCHED', 'PAIRING'];
    let state = AppState.state;
    if (launching.includes(state)) {
        await new Promise((resolve) => {
            const onChange = (_appState, next) => {
                if (!launching.includes(next)) {
                    AppState.off('change:state', onChange);
                    resolve();
                }
            };
            AppState.on('change:state', onChange);
        });
        state = AppState.state;
    }
    return state === 'UNPAIRED' || state === 'UNPAIRED_IDLE';
})()
"#;

/// Build the login credential and republish it on every refresh.
pub const SUBSCRIBE_CREDENTIAL: &str = r#"(() => {
    if (window.__weft_qr_hooked) return;
    window.__weft_qr_hooked = true;
    const tag = () => '[' + (window.__weft_client_id || 'default') + ']';
    const reg = window.AuthStore.RegistrationUtils;

    const buildCredential = async () => {
        const info = await reg.waSignalStore.getRegistrationInfo();
        const noise = await reg.waNoiseInfo.get();
        const staticKey = window.AuthStore.Base64Tools.encodeB64(noise.staticKeyPair.pubKey);
        const identityKey = window.AuthStore.Base64Tools.encodeB64(info.identityKeyPair.pubKey);
        const secret = await reg.getADVSecretKey();
        return [window.AuthStore.Conn.ref, staticKey, identityKey, secret, reg.DEVICE_PLATFORM].join(',');
    };

    const publish = async () => {
        try {
            window.__weft_emit('onQRChangedEvent', [await buildCredential()]);
        } catch (err) {
            console.error(tag() + ' credential build failed:', err);
        }
    };

    publish();
    window.AuthStore.Conn.on('change:ref', publish);
})();
"#;

/// Wire the auth-time emitters: state changes, sync completion, offline
/// progress (deduplicated page-side) and logout. Guarded; when the auth
/// object is not reachable yet, retries on a coarse timer.
pub const INSTALL_AUTH_HOOKS: &str = r#"(() => {
    const tag = () => '[' + (window.__weft_client_id || 'default') + ']';

    const setup = () => {
        const { AppState, Cmd, OfflineMessageHandler } = window.AuthStore || {};
        if (!AppState || !Cmd) {
            console.error(tag() + ' auth object unavailable, cannot install hooks');
            return false;
        }

        AppState.on('change:state', (_appState, state) => {
            window.__weft_emit('onAuthAppStateChangedEvent', [state]);
        });
        AppState.on('change:hasSynced', () => {
            window.__weft_emit('onAppStateHasSyncedEvent', []);
        });

        window.__weft_last_progress = -1;
        Cmd.on('offline_progress_update', () => {
            if (!OfflineMessageHandler) return;
            const progress = OfflineMessageHandler.getOfflineDeliveryProgress();
            if (progress !== window.__weft_last_progress) {
                window.__weft_last_progress = progress;
                window.__weft_emit('onOfflineProgressUpdateEvent', [progress]);
            }
        });
        Cmd.on('logout', () => {
            window.__weft_emit('onLogoutEvent', []);
        });
        return true;
    };

    if (window.__weft_auth_hooks_installed) return;
    if (setup()) {
        window.__weft_auth_hooks_installed = true;
    } else if (!window.__weft_auth_retry) {
        window.__weft_auth_retry = setInterval(() => {
            if (setup()) {
                clearInterval(window.__weft_auth_retry);
                window.__weft_auth_retry = undefined;
                window.__weft_auth_hooks_installed = true;
            }
        }, 60000);
    }
})();
"#;

/// Repair script for the auth check: re-expose the auth object, clear the
/// hook guard and reinstall.
pub fn auth_repair() -> String {
    format!("{EXPOSE_AUTH_STORE}\nwindow.__weft_auth_hooks_installed = false;\n{INSTALL_AUTH_HOOKS}")
}

/// Issue the session-takeover command.
pub const TAKEOVER: &str = "window.Store.AppState.takeover();";

/// Ask the page to refresh the login credential.
pub const REFRESH_CREDENTIAL: &str = r#"(() => {
    const cmd = (window.Store && window.Store.Cmd) || (window.AuthStore && window.AuthStore.Cmd);
    if (cmd && typeof cmd.refreshQR === 'function') {
        cmd.refreshQR();
    } else {
        console.warn('[' + (window.__weft_client_id || 'default') + '] cannot refresh credential: command module unavailable');
    }
})();
"#;

/// Log the remote session out, if the page is far enough along to do so.
pub const LOGOUT: &str = r#"(() => {
    if (window.Store && window.Store.AppState && typeof window.Store.AppState.logout === 'function') {
        return window.Store.AppState.logout();
    }
})();
"#;

/// Serialize the session's own connection info.
pub const CLIENT_INFO: &str =
    "(() => ({ ...window.Store.Conn.serialize(), wid: window.Store.User.getMeUser() }))()";

/// Wrap a command body so rejections come back as data:
/// `{ ok: value }` on success, `{ error: { name, message, code } }` on throw.
pub fn command(body: &str) -> String {
    format!(
        r#"(async () => {{
    try {{
        const value = await (async () => {{ {body} }})();
        return {{ ok: value === undefined ? null : value }};
    }} catch (err) {{
        return {{ error: {{ name: err && err.name, message: err && err.message, code: err && err.code }} }};
    }}
}})()"#
    )
}

/// Create the hidden upload input for a media preparation.
pub fn create_upload_input(input_id: &str) -> String {
    format!(
        r#"(() => {{
    const input = document.createElement('input');
    input.type = 'file';
    input.id = '{input_id}';
    input.style.display = 'none';
    document.body.appendChild(input);
}})();"#
    )
}

/// Remove the upload input again. Safe when it is already gone.
pub fn remove_upload_input(input_id: &str) -> String {
    format!(
        r#"(() => {{
    const el = document.getElementById('{input_id}');
    if (el) el.remove();
}})();"#
    )
}

/// Stage shipped bytes on the upload input and run media processing. The
/// prepared data lands in `WeftUtils.preparedMediaMap` under the input id,
/// and the input element is removed whether processing succeeds or not.
pub fn process_media(input_id: &str, bytes_b64: &str, mime: &str, filename: &str) -> String {
    let body = format!(
        r#"const input = document.getElementById('{input_id}');
        if (!input) throw new Error('upload input missing');
        try {{
            const raw = atob('{bytes_b64}');
            const bytes = new Uint8Array(raw.length);
            for (let i = 0; i < raw.length; i++) bytes[i] = raw.charCodeAt(i);
            const file = new File([bytes], {filename}, {{ type: '{mime}' }});
            const data = await window.WeftUtils.processMediaData(file, {{}});
            if (!window.WeftUtils.preparedMediaMap) window.WeftUtils.preparedMediaMap = {{}};
            window.WeftUtils.preparedMediaMap['{input_id}'] = data;
            return true;
        }} finally {{
            const el = document.getElementById('{input_id}');
            if (el) el.remove();
        }}"#,
        filename = serde_json::to_string(filename).unwrap_or_else(|_| "\"upload\"".into()),
    );
    command(&body)
}
