use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChannelHandle, ChannelMessage, MediaRef},
    ports::{ChannelPort, Page, PageCursor},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* two API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between message edits (Telegram ~1 edit/sec per chat).
    pub edit_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            edit_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// ChannelPort decorator that spaces out outbound calls.
///
/// Best-effort defense against Telegram 429s during long walks; the adapter
/// still sleeps through `FLOOD_WAIT` responses on its own.
pub struct ThrottledChannel {
    inner: Arc<dyn ChannelPort>,
    global: Mutex<IntervalLimiter>,
    edits: Mutex<IntervalLimiter>,
}

impl ThrottledChannel {
    pub fn new(inner: Arc<dyn ChannelPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            edits: Mutex::new(IntervalLimiter::new(cfg.edit_min_interval)),
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }

    async fn throttle_edit(&self) {
        let global_wait = { self.global.lock().await.reserve() };
        let edit_wait = { self.edits.lock().await.reserve() };
        let wait = global_wait.max(edit_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl ChannelPort for ThrottledChannel {
    async fn resolve(&self, reference: &str) -> Result<ChannelHandle> {
        self.throttle_global().await;
        self.inner.resolve(reference).await
    }

    async fn fetch_page(
        &self,
        channel: &ChannelHandle,
        cursor: Option<PageCursor>,
    ) -> Result<Page> {
        self.throttle_global().await;
        self.inner.fetch_page(channel, cursor).await
    }

    async fn download_media(&self, media: &MediaRef, dir: &Path) -> Result<PathBuf> {
        self.throttle_global().await;
        self.inner.download_media(media, dir).await
    }

    async fn edit_text(
        &self,
        channel: &ChannelHandle,
        message: &ChannelMessage,
        text: &str,
    ) -> Result<()> {
        self.throttle_edit().await;
        self.inner.edit_text(channel, message, text).await
    }
}
