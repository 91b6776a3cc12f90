//! The command surface: RPC-style calls riding the bridge.
//!
//! Every command evaluates a wrapped script in the page and maps a page-side
//! rejection into [`ClientError::CommandFailed`] carrying the original
//! failure's classification, message and chat context. Nothing here is
//! fire-and-forget; callers always get a definite outcome.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use weft_types::{ChatData, ContactData, MessageData, RemoteState};

use crate::client::Client;
use crate::driver::MessengerPage;
use crate::error::ClientError;
use crate::scripts;

/// Options for [`Client::send_message`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendOptions {
    /// Id of the message being replied to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<String>,
    /// User ids to mention.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    /// Handle returned by [`Client::prepare_media`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Mark the chat seen after sending. Defaults to true page-side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_seen: Option<bool>,
}

/// Options for [`Client::search_messages`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub chat_id: Option<String>,
}

fn js_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".into())
}

/// Keep upload handles to a safe alphabet.
fn sanitize_handle(unique_id: &str) -> String {
    unique_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Guess a MIME type from the file extension; processing page-side sniffs
/// the real type anyway.
fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("ogg") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

impl<P: MessengerPage + 'static> Client<P> {
    async fn run_command(&self, body: &str, chat_id: Option<&str>) -> Result<Value, ClientError> {
        let value = self.page.evaluate(&scripts::command(body)).await?;
        if let Some(err) = value.get("error") {
            if !err.is_null() {
                return Err(ClientError::command_failed(err, chat_id));
            }
        }
        Ok(value.get("ok").cloned().unwrap_or(Value::Null))
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
        value: Value,
    ) -> Result<T, ClientError> {
        serde_json::from_value(value)
            .map_err(|err| ClientError::BadResponse(format!("{what}: {err}")))
    }

    /// Send a message to a chat.
    pub async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
        options: &MessageSendOptions,
    ) -> Result<MessageData, ClientError> {
        let body = format!(
            "return await window.WeftUtils.sendMessage({}, {}, {});",
            js_str(chat_id),
            js_str(content),
            serde_json::to_string(options)
                .map_err(|err| ClientError::BadResponse(err.to_string()))?,
        );
        let value = self.run_command(&body, Some(chat_id)).await?;
        self.decode("sent message", value)
    }

    /// Mark a chat as seen.
    pub async fn send_seen(&self, chat_id: &str) -> Result<bool, ClientError> {
        let body = format!("return await window.WeftUtils.sendSeen({});", js_str(chat_id));
        let value = self.run_command(&body, Some(chat_id)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// React to a message. An empty string removes the reaction.
    pub async fn send_reaction(
        &self,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), ClientError> {
        let body = format!(
            r#"let msg = window.Store.Msg.get({id});
            if (!msg) {{
                const fetched = await window.Store.Msg.getMessagesById([{id}]);
                msg = fetched && fetched.messages && fetched.messages[0];
            }}
            if (!msg) {{
                const err = new Error('message not found: ' + {id});
                err.name = 'MessageNotFound';
                throw err;
            }}
            await window.Store.ReactionsSendApi.sendReactionToMsg(msg, {reaction});
            return true;"#,
            id = js_str(message_id),
            reaction = js_str(reaction),
        );
        self.run_command(&body, None).await?;
        Ok(())
    }

    /// All chats, current state.
    pub async fn get_chats(&self) -> Result<Vec<ChatData>, ClientError> {
        let body = "const chats = window.Store.Chat.getModelsArray();\n\
            return await Promise.all(chats.map((chat) => window.WeftUtils.getChatModel(chat)));";
        let value = self.run_command(body, None).await?;
        self.decode("chat list", value)
    }

    /// Look up (or fetch) a chat by id.
    pub async fn get_chat_by_id(&self, chat_id: &str) -> Result<ChatData, ClientError> {
        let body = format!(
            r#"const chat = await window.WeftUtils.getChatById({id});
            if (!chat) {{
                const err = new Error('chat not found: ' + {id});
                err.name = 'ChatNotFound';
                throw err;
            }}
            return await window.WeftUtils.getChatModel(chat);"#,
            id = js_str(chat_id),
        );
        let value = self.run_command(&body, Some(chat_id)).await?;
        self.decode("chat", value)
    }

    /// All known contacts.
    pub async fn get_contacts(&self) -> Result<Vec<ContactData>, ClientError> {
        let body = "return window.Store.Contact.getModelsArray()\n\
            .map((contact) => window.WeftUtils.getContactModel(contact));";
        let value = self.run_command(body, None).await?;
        self.decode("contact list", value)
    }

    /// Look up (or fetch) a contact by id.
    pub async fn get_contact_by_id(&self, contact_id: &str) -> Result<ContactData, ClientError> {
        let body = format!(
            r#"const contact = await window.WeftUtils.getContactById({id});
            if (!contact) {{
                const err = new Error('contact not found: ' + {id});
                err.name = 'ContactNotFound';
                throw err;
            }}
            return window.WeftUtils.getContactModel(contact);"#,
            id = js_str(contact_id),
        );
        let value = self.run_command(&body, None).await?;
        self.decode("contact", value)
    }

    /// Look up a message by its serialized id.
    pub async fn get_message_by_id(
        &self,
        message_id: &str,
    ) -> Result<Option<MessageData>, ClientError> {
        let body = format!(
            r#"let msg = window.Store.Msg.get({id});
            if (!msg) {{
                const fetched = await window.Store.Msg.getMessagesById([{id}]);
                msg = fetched && fetched.messages && fetched.messages[0];
            }}
            return msg ? window.WeftUtils.getMessageModel(msg) : null;"#,
            id = js_str(message_id),
        );
        let value = self.run_command(&body, None).await?;
        if value.is_null() {
            return Ok(None);
        }
        self.decode("message", value).map(Some)
    }

    /// Resolve a phone number to its account id, if registered.
    pub async fn get_number_id(&self, number: &str) -> Result<Option<String>, ClientError> {
        let cleaned: String = number.chars().filter(char::is_ascii_digit).collect();
        let body = format!(
            r#"const wid = window.Store.WidFactory.createWid({id});
            const result = await window.Store.QueryExist(wid);
            return result && result.wid ? result.wid._serialized : null;"#,
            id = js_str(&format!("{cleaned}@c.us")),
        );
        let value = self.run_command(&body, None).await?;
        Ok(value.as_str().map(str::to_string))
    }

    /// Whether a phone number has an account.
    pub async fn is_registered_user(&self, number: &str) -> Result<bool, ClientError> {
        Ok(self.get_number_id(number).await?.is_some())
    }

    /// The page's current connection state.
    pub async fn get_state(&self) -> Result<RemoteState, ClientError> {
        let value = self
            .run_command("return window.Store.AppState.state;", None)
            .await?;
        let tag = value
            .as_str()
            .ok_or_else(|| ClientError::BadResponse("state is not a string".into()))?;
        Ok(RemoteState::from_tag(tag))
    }

    /// The page version currently running.
    pub async fn get_version(&self) -> Result<String, ClientError> {
        let value = self.run_command("return window.Debug.VERSION;", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::BadResponse("version is not a string".into()))
    }

    pub async fn archive_chat(&self, chat_id: &str) -> Result<bool, ClientError> {
        self.set_archive(chat_id, true).await
    }

    pub async fn unarchive_chat(&self, chat_id: &str) -> Result<bool, ClientError> {
        self.set_archive(chat_id, false).await
    }

    async fn set_archive(&self, chat_id: &str, archive: bool) -> Result<bool, ClientError> {
        let body = format!(
            r#"const chat = await window.WeftUtils.getChatById({id});
            if (!chat) {{
                const err = new Error('chat not found: ' + {id});
                err.name = 'ChatNotFound';
                throw err;
            }}
            await window.Store.Cmd.archiveChat(chat, {archive});
            return true;"#,
            id = js_str(chat_id),
        );
        let value = self.run_command(&body, Some(chat_id)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn pin_chat(&self, chat_id: &str) -> Result<bool, ClientError> {
        self.set_pin(chat_id, true).await
    }

    pub async fn unpin_chat(&self, chat_id: &str) -> Result<bool, ClientError> {
        self.set_pin(chat_id, false).await
    }

    async fn set_pin(&self, chat_id: &str, pin: bool) -> Result<bool, ClientError> {
        let body = format!(
            r#"const chat = await window.WeftUtils.getChatById({id});
            if (!chat) {{
                const err = new Error('chat not found: ' + {id});
                err.name = 'ChatNotFound';
                throw err;
            }}
            await window.Store.Cmd.pinChat(chat, {pin});
            return true;"#,
            id = js_str(chat_id),
        );
        let value = self.run_command(&body, Some(chat_id)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Mute a chat, optionally until a unix timestamp (seconds); `None`
    /// mutes indefinitely.
    pub async fn mute_chat(
        &self,
        chat_id: &str,
        unmute_at: Option<i64>,
    ) -> Result<(), ClientError> {
        let until = unmute_at
            .map(|at| at.to_string())
            .unwrap_or_else(|| "-1".into());
        let body = format!(
            r#"const chat = await window.WeftUtils.getChatById({id});
            if (!chat) {{
                const err = new Error('chat not found: ' + {id});
                err.name = 'ChatNotFound';
                throw err;
            }}
            await window.Store.Cmd.muteChat(chat, {{ expiration: {until} }});
            return true;"#,
            id = js_str(chat_id),
        );
        self.run_command(&body, Some(chat_id)).await?;
        Ok(())
    }

    pub async fn unmute_chat(&self, chat_id: &str) -> Result<(), ClientError> {
        let body = format!(
            r#"const chat = await window.WeftUtils.getChatById({id});
            if (!chat) {{
                const err = new Error('chat not found: ' + {id});
                err.name = 'ChatNotFound';
                throw err;
            }}
            await window.Store.Cmd.muteChat(chat, {{ expiration: 0 }});
            return true;"#,
            id = js_str(chat_id),
        );
        self.run_command(&body, Some(chat_id)).await?;
        Ok(())
    }

    /// Set the account's status/about text.
    pub async fn set_status(&self, status: &str) -> Result<(), ClientError> {
        let body = format!(
            "await window.Store.StatusUtils.setMyStatus({});\nreturn true;",
            js_str(status)
        );
        self.run_command(&body, None).await?;
        Ok(())
    }

    /// Set the account's display name.
    pub async fn set_display_name(&self, name: &str) -> Result<bool, ClientError> {
        let body = format!(
            "const result = await window.Store.ProfileUtils.setPushname({});\nreturn !!result;",
            js_str(name)
        );
        let value = self.run_command(&body, None).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn send_presence_available(&self) -> Result<(), ClientError> {
        self.run_command(
            "window.Store.PresenceUtils.sendPresenceAvailable();\nreturn true;",
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn send_presence_unavailable(&self) -> Result<(), ClientError> {
        self.run_command(
            "window.Store.PresenceUtils.sendPresenceUnavailable();\nreturn true;",
            None,
        )
        .await?;
        Ok(())
    }

    /// Request authentication by pairing code instead of QR. `phone_number`
    /// is international format without symbols.
    pub async fn request_pairing_code(
        &self,
        phone_number: &str,
        show_notification: bool,
    ) -> Result<String, ClientError> {
        let body = format!(
            r#"window.AuthStore.PairingCodeLinkUtils.setPairingType('ALT_DEVICE_LINKING');
            await window.AuthStore.PairingCodeLinkUtils.initializeAltDeviceLinking();
            return await window.AuthStore.PairingCodeLinkUtils.startAltLinkingFlow({phone}, {notify});"#,
            phone = js_str(phone_number),
            notify = show_notification,
        );
        let value = self.run_command(&body, None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::BadResponse("pairing code is not a string".into()))
    }

    /// Search messages, optionally within one chat.
    pub async fn search_messages(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MessageData>, ClientError> {
        let chat_id = options
            .chat_id
            .as_deref()
            .map(js_str)
            .unwrap_or_else(|| "null".into());
        let body = format!(
            r#"const results = await window.Store.MsgSearch.searchMessages({query}, {page}, {limit}, {chat_id});
            return results.messages.map((msg) => window.WeftUtils.getMessageModel(msg));"#,
            query = js_str(query),
            page = options.page.unwrap_or(1),
            limit = options.limit.unwrap_or(20),
        );
        let value = self.run_command(&body, options.chat_id.as_deref()).await?;
        self.decode("search results", value)
    }

    /// Details of a group invite code.
    pub async fn get_invite_info(&self, invite_code: &str) -> Result<Value, ClientError> {
        let body = format!(
            "return await window.Store.GroupInvite.queryGroupInvite({});",
            js_str(invite_code)
        );
        self.run_command(&body, None).await
    }

    /// Join a group by invite code; returns the group chat id.
    pub async fn accept_invite(&self, invite_code: &str) -> Result<String, ClientError> {
        let body = format!(
            r#"const result = await window.Store.GroupInvite.joinGroupViaInvite({});
            return result.gid._serialized;"#,
            js_str(invite_code)
        );
        let value = self.run_command(&body, None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::BadResponse("joined group id is not a string".into()))
    }

    /// Ship a local file into the page and run media processing, leaving the
    /// prepared data under a handle for [`Client::send_message`].
    ///
    /// The returned handle equals the page-side input element's id. The
    /// cancellation signal races the page-side processing; on cancel (or any
    /// outcome) the input element is removed before returning, and a fired
    /// signal surfaces as [`ClientError::Cancelled`].
    pub async fn prepare_media(
        &self,
        path: &Path,
        unique_id: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<String, ClientError> {
        let input_id = format!("weft-upload-{}", sanitize_handle(unique_id));
        let bytes = tokio::fs::read(path).await?;
        let mime = guess_mime(path);
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload");

        self.page
            .evaluate(&scripts::create_upload_input(&input_id))
            .await?;

        let process = scripts::process_media(&input_id, &B64.encode(&bytes), mime, filename);
        let cancelled = async {
            loop {
                if *cancel.borrow() {
                    break;
                }
                if cancel.changed().await.is_err() {
                    // Sender gone without firing: never cancel.
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = cancelled => {
                tracing::info!(input_id = %input_id, "media preparation cancelled");
                let _ = self
                    .page
                    .evaluate(&scripts::remove_upload_input(&input_id))
                    .await;
                Err(ClientError::Cancelled)
            }
            result = self.page.evaluate(&process) => {
                // The processing script removes the input in its own
                // `finally`; sweep again in case it failed before that.
                let _ = self
                    .page
                    .evaluate(&scripts::remove_upload_input(&input_id))
                    .await;
                let value = result?;
                if let Some(err) = value.get("error") {
                    if !err.is_null() {
                        return Err(ClientError::command_failed(err, None));
                    }
                }
                Ok(input_id)
            }
        }
    }
}
