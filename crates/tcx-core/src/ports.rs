use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    domain::{ChannelHandle, ChannelMessage, MediaRef},
    Result,
};

/// Opaque pagination token handed back to the adapter on the next fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageCursor(pub i64);

/// One page of channel history.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub messages: Vec<ChannelMessage>,
    /// `None` once the history is exhausted.
    pub next: Option<PageCursor>,
}

/// Hexagonal port for the remote channel.
///
/// Telegram is the only implementation; fakes live in the core test modules.
#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// Resolve `@username` or a numeric id into a channel handle.
    async fn resolve(&self, reference: &str) -> Result<ChannelHandle>;

    /// Fetch the next page of history. `cursor` is `None` for the first page.
    async fn fetch_page(
        &self,
        channel: &ChannelHandle,
        cursor: Option<PageCursor>,
    ) -> Result<Page>;

    /// Download an attachment into `dir` and return the local path.
    async fn download_media(&self, media: &MediaRef, dir: &Path) -> Result<PathBuf>;

    /// Replace the text (or caption) of an existing message.
    ///
    /// `text` always extends the original body, so adapters may reuse the
    /// original formatting spans unchanged.
    async fn edit_text(
        &self,
        channel: &ChannelHandle,
        message: &ChannelMessage,
        text: &str,
    ) -> Result<()>;
}

/// Hexagonal port for a text-completion backend.
#[async_trait]
pub trait CompletionPort: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}
