//! Lazy walk over a channel's history.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use crate::{
    domain::{ChannelHandle, ChannelMessage, MessageId},
    ports::{ChannelPort, PageCursor},
    processor::{MessageProcessor, Outcome},
    retry::{with_backoff, RetryPolicy},
    Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkOptions {
    /// Drop messages with `id <= min_id` (resume from a cursor).
    pub min_id: Option<MessageId>,
    /// Yield only this message, then stop.
    pub only_id: Option<MessageId>,
}

pub struct ChannelWalker {
    port: Arc<dyn ChannelPort>,
    channel: ChannelHandle,
    opts: WalkOptions,
    retry: RetryPolicy,

    buffer: VecDeque<ChannelMessage>,
    seen: HashSet<MessageId>,
    next_page: Option<PageCursor>,
    exhausted: bool,
    done: bool,
}

impl ChannelWalker {
    /// Resolve `reference` and prepare a walk. No history is fetched yet.
    pub async fn start(
        port: Arc<dyn ChannelPort>,
        reference: &str,
        opts: WalkOptions,
    ) -> Result<Self> {
        let channel = port.resolve(reference).await?;
        tracing::info!(
            "resolved channel {} ({})",
            reference,
            channel.title.as_deref().unwrap_or("untitled")
        );
        Ok(Self {
            port,
            channel,
            opts,
            retry: RetryPolicy::none(),
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            next_page: None,
            exhausted: false,
            done: false,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// Next message in walk order, `None` once the history (or the target) is done.
    pub async fn next(&mut self) -> Result<Option<ChannelMessage>> {
        loop {
            if self.done {
                return Ok(None);
            }

            if let Some(message) = self.buffer.pop_front() {
                if self.opts.min_id.is_some_and(|min| message.id <= min) {
                    continue;
                }
                // A message is yielded once per walk, even if a page repeats it.
                if !self.seen.insert(message.id) {
                    tracing::debug!(id = %message.id, "duplicate message in history; skipping");
                    continue;
                }
                match self.opts.only_id {
                    Some(only) if message.id != only => continue,
                    Some(_) => self.done = true,
                    None => {}
                }
                return Ok(Some(message));
            }

            if self.exhausted {
                self.done = true;
                continue;
            }

            let port = &self.port;
            let channel = &self.channel;
            let cursor = self.next_page.clone();
            let page = with_backoff(self.retry, "history fetch", || {
                port.fetch_page(channel, cursor.clone())
            })
            .await?;

            // Empty pages are fine; only a missing cursor ends the walk.
            self.exhausted = page.next.is_none();
            self.next_page = page.next;
            self.buffer.extend(page.messages);
        }
    }
}

/// Counters for one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub exported: usize,
    pub tagged: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn seen(&self) -> usize {
        self.exported + self.tagged + self.updated + self.skipped + self.failed
    }
}

/// Feed every walked message to the processor.
///
/// Per-message failures are logged and counted; a history fetch failure ends the
/// run with an error.
pub async fn run(walker: &mut ChannelWalker, processor: &MessageProcessor) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    while let Some(message) = walker.next().await? {
        match processor.process(&message).await {
            Ok(Outcome::Skipped) => summary.skipped += 1,
            Ok(Outcome::Exported { .. }) => summary.exported += 1,
            Ok(Outcome::Tagged { .. }) => summary.tagged += 1,
            Ok(Outcome::Updated { .. }) => summary.updated += 1,
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(id = %message.id, "failed to process message: {e}");
            }
        }
    }

    if let Some(only) = walker.opts.only_id {
        if summary.seen() == 0 {
            tracing::warn!(id = %only, "message not found in channel history");
        }
    }

    Ok(summary)
}
