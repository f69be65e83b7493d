//! Telegram adapter (MTProto user session).
//!
//! This crate implements the `tcx-core` ChannelPort with `grammers-client`.
//! A user session can page through a channel's full history, which the Bot
//! API cannot. Login happens once; the session file is reused afterwards.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;

use grammers_client::{
    types::{Chat, Message},
    Client, Config as ClientConfig, InitParams, InputMessage, SignInError,
};
use grammers_session::{PackedChat, Session};

pub mod convert;

use tcx_core::{
    domain::{ChannelHandle, ChannelId, ChannelMessage, MediaRef},
    errors::Error,
    ports::{ChannelPort, Page, PageCursor},
    sanitize::sanitize_filename,
    Result,
};

/// Messages per history request.
pub const PAGE_SIZE: usize = 100;

/// Login and session settings.
#[derive(Clone, Debug)]
pub struct TelegramSettings {
    pub api_id: i32,
    pub api_hash: String,
    pub session_file: PathBuf,
    /// Only needed when the session is not authorized yet.
    pub phone: Option<String>,
    /// Two-step verification password; prompted for when missing.
    pub password: Option<String>,
}

pub struct TelegramChannel {
    client: Client,
    chats: Mutex<HashMap<i64, PackedChat>>,
    /// Raw messages of the last fetched page, for downloads and edits.
    page: Mutex<HashMap<i32, Message>>,
}

fn external(e: impl std::fmt::Display) -> Error {
    Error::External(format!("telegram error: {e}"))
}

impl TelegramChannel {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            chats: Mutex::new(HashMap::new()),
            page: Mutex::new(HashMap::new()),
        }
    }

    /// Connect and make sure the session is authorized.
    ///
    /// `prompt` is asked for the login code (and the 2FA password when it is
    /// not configured) on first login only.
    pub async fn connect(
        settings: &TelegramSettings,
        prompt: impl Fn(&str) -> io::Result<String>,
    ) -> Result<Self> {
        let session = Session::load_file_or_create(&settings.session_file).map_err(|e| {
            Error::Config(format!(
                "cannot open session file {}: {e}",
                settings.session_file.display()
            ))
        })?;

        let client = Client::connect(ClientConfig {
            session,
            api_id: settings.api_id,
            api_hash: settings.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(external)?;

        if !client.is_authorized().await.map_err(external)? {
            sign_in(&client, settings, &prompt).await?;
            client.session().save_to_file(&settings.session_file)?;
            tracing::info!("telegram session saved to {}", settings.session_file.display());
        }

        Ok(Self::new(client))
    }

    fn packed(&self, channel: &ChannelHandle) -> Result<PackedChat> {
        self.chats
            .lock()
            .ok()
            .and_then(|chats| chats.get(&channel.id.0).copied())
            .ok_or_else(|| Error::External(format!("channel {} was not resolved", channel.id.0)))
    }

    fn msg_id(message: &ChannelMessage) -> Result<i32> {
        i32::try_from(message.id.0)
            .map_err(|_| Error::External(format!("message id {} out of range", message.id)))
    }

    fn cached(&self, id: i32) -> Option<Message> {
        self.page.lock().ok()?.get(&id).cloned()
    }

    /// The raw message, from the current page or fetched by id.
    async fn raw_message(&self, channel: &ChannelHandle, id: i32) -> Result<Message> {
        if let Some(m) = self.cached(id) {
            return Ok(m);
        }
        let packed = self.packed(channel)?;
        self.client
            .get_messages_by_id(packed, &[id])
            .await
            .map_err(external)?
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| Error::External(format!("message {id} not found")))
    }

    async fn find_dialog(&self, id: i64) -> Result<Chat> {
        let bare = bare_chat_id(id);
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(external)? {
            if dialog.chat().id() == bare {
                return Ok(dialog.chat().clone());
            }
        }
        Err(Error::External(format!(
            "chat {id} is not among this account's dialogs"
        )))
    }
}

async fn sign_in(
    client: &Client,
    settings: &TelegramSettings,
    prompt: &impl Fn(&str) -> io::Result<String>,
) -> Result<()> {
    let phone = settings.phone.as_deref().ok_or_else(|| {
        Error::Config(
            "telegram session is not authorized; set telegram.phone (or TELEGRAM_PHONE) to log in"
                .to_string(),
        )
    })?;

    let token = client.request_login_code(phone).await.map_err(external)?;
    let code = prompt("Telegram login code: ")?;

    match client.sign_in(&token, code.trim()).await {
        Ok(_) => Ok(()),
        Err(SignInError::PasswordRequired(password_token)) => {
            let password = match &settings.password {
                Some(p) => p.clone(),
                None => prompt(&format!(
                    "Two-step verification password (hint: {}): ",
                    password_token.hint().unwrap_or("none")
                ))?,
            };
            client
                .check_password(password_token, password.trim())
                .await
                .map_err(external)?;
            Ok(())
        }
        Err(e) => Err(external(e)),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelRef {
    Username(String),
    Id(i64),
}

/// `@name`, `name`, `t.me/name` and numeric ids are accepted.
pub fn parse_reference(reference: &str) -> Result<ChannelRef> {
    let r = reference
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("t.me/")
        .trim_end_matches('/');
    if r.is_empty() {
        return Err(Error::Config("channel reference is empty".to_string()));
    }
    if let Ok(id) = r.parse::<i64>() {
        return Ok(ChannelRef::Id(id));
    }
    Ok(ChannelRef::Username(r.trim_start_matches('@').to_string()))
}

/// MTProto ids are bare; Bot API style `-100…` ids are accepted too.
pub fn bare_chat_id(id: i64) -> i64 {
    const CHANNEL_PREFIX: i64 = -1_000_000_000_000;
    if id < CHANNEL_PREFIX {
        CHANNEL_PREFIX - id
    } else {
        id.abs()
    }
}

/// History is read newest first, so the next page starts below the oldest id
/// seen. A short page is the last one.
pub fn next_cursor(ids: &[i32], page_size: usize) -> Option<PageCursor> {
    if ids.len() < page_size {
        return None;
    }
    ids.iter().min().map(|&oldest| PageCursor(i64::from(oldest)))
}

fn page_offset(cursor: Option<PageCursor>) -> Result<Option<i32>> {
    cursor
        .map(|c| {
            i32::try_from(c.0)
                .map_err(|_| Error::External(format!("page cursor {} out of range", c.0)))
        })
        .transpose()
}

/// Message id encoded in a `MediaRef::file_id`.
fn media_message_id(file_id: &str) -> Result<i32> {
    file_id
        .split_once('-')
        .and_then(|(id, _)| id.parse().ok())
        .ok_or_else(|| Error::External(format!("unknown media reference {file_id}")))
}

/// Local file name: the file id plus the original name when there is one.
fn media_file_name(media: &MediaRef) -> String {
    match media.file_name.as_deref().map(sanitize_filename) {
        Some(name) if !name.is_empty() => format!("{}_{name}", media.file_id),
        _ => format!("{}.{}", media.file_id, media.kind.default_extension()),
    }
}

fn is_not_modified(err: &str) -> bool {
    err.contains("MESSAGE_NOT_MODIFIED")
}

#[async_trait]
impl ChannelPort for TelegramChannel {
    async fn resolve(&self, reference: &str) -> Result<ChannelHandle> {
        let chat = match parse_reference(reference)? {
            ChannelRef::Username(name) => self
                .client
                .resolve_username(&name)
                .await
                .map_err(external)?
                .ok_or_else(|| Error::External(format!("channel @{name} not found")))?,
            ChannelRef::Id(id) => self.find_dialog(id).await?,
        };

        if let Ok(mut chats) = self.chats.lock() {
            chats.insert(chat.id(), chat.pack());
        }
        Ok(ChannelHandle {
            id: ChannelId(chat.id()),
            title: Some(chat.name().to_string()),
        })
    }

    async fn fetch_page(
        &self,
        channel: &ChannelHandle,
        cursor: Option<PageCursor>,
    ) -> Result<Page> {
        let packed = self.packed(channel)?;
        let offset = page_offset(cursor)?;

        let mut iter = self.client.iter_messages(packed).limit(PAGE_SIZE);
        if let Some(offset) = offset {
            iter = iter.offset_id(offset);
        }
        let mut fetched = Vec::with_capacity(PAGE_SIZE);
        while let Some(message) = iter.next().await.map_err(external)? {
            fetched.push(message);
        }

        let ids: Vec<i32> = fetched.iter().map(Message::id).collect();
        let next = next_cursor(&ids, PAGE_SIZE);
        let messages = fetched.iter().map(convert::channel_message).collect();

        if let Ok(mut page) = self.page.lock() {
            page.clear();
            page.extend(fetched.into_iter().map(|m| (m.id(), m)));
        }

        tracing::debug!(count = ids.len(), ?next, "fetched channel history");
        Ok(Page { messages, next })
    }

    async fn download_media(&self, media: &MediaRef, dir: &Path) -> Result<PathBuf> {
        let id = media_message_id(&media.file_id)?;
        let message = self
            .cached(id)
            .ok_or_else(|| Error::External(format!("message {id} is not in the current page")))?;

        let path = dir.join(media_file_name(media));
        let present = message.download_media(&path).await.map_err(|e| {
            Error::External(format!("telegram download error for {}: {e}", media.file_id))
        })?;
        if !present {
            return Err(Error::External(format!("message {id} has no downloadable media")));
        }
        Ok(path)
    }

    async fn edit_text(
        &self,
        channel: &ChannelHandle,
        message: &ChannelMessage,
        text: &str,
    ) -> Result<()> {
        let id = Self::msg_id(message)?;
        let original = self.raw_message(channel, id).await?;
        // The new text only appends, so the original spans still line up.
        let entities = original.fmt_entities().cloned().unwrap_or_default();

        match original
            .edit(InputMessage::text(text).fmt_entities(entities))
            .await
        {
            Err(e) if is_not_modified(&e.to_string()) => {
                tracing::debug!(id, "edit was a no-op");
                Ok(())
            }
            other => other.map_err(external),
        }
    }
}
