//! Per-message pipeline: convert → write → tag → edit → record.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    config::Config,
    domain::{ChannelHandle, ChannelMessage, MessageId},
    entities::convert_entities_to_markdown,
    ledger::TagLedger,
    ports::ChannelPort,
    retry::{with_backoff, RetryPolicy},
    sanitize::export_file_name,
    tagging::TagGenerator,
    Result,
};

/// What a run does after a document is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Tag every message and record it in the ledger; never touch the channel.
    Extract,
    /// Tag messages newer than the cursor and append the tags to the channel post.
    Update,
}

#[derive(Clone, Debug)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    /// Where attachments go; `None` disables media download.
    pub media_dir: Option<PathBuf>,
    pub mode: Mode,
    pub retry: RetryPolicy,
}

impl ExportSettings {
    pub fn from_config(cfg: &Config, mode: Mode) -> Self {
        Self {
            output_dir: cfg.output_dir.clone(),
            media_dir: cfg.download_media.then(|| cfg.media_dir.clone()),
            mode,
            retry: cfg.retry,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// No text body; nothing was written.
    Skipped,
    /// Document written, no tags attached.
    Exported { path: PathBuf },
    /// Document written with tags and recorded in the ledger.
    Tagged { path: PathBuf, tags: Vec<String> },
    /// As `Tagged`, and the channel post was edited to carry the tags.
    Updated { path: PathBuf, tags: Vec<String> },
}

pub struct MessageProcessor {
    settings: ExportSettings,
    port: Arc<dyn ChannelPort>,
    channel: ChannelHandle,
    tagger: TagGenerator,
    ledger: TagLedger,
    cursor: MessageId,
}

impl MessageProcessor {
    /// Build a processor. The ledger cursor is read once here and held for the run.
    pub fn new(
        settings: ExportSettings,
        port: Arc<dyn ChannelPort>,
        channel: ChannelHandle,
        tagger: TagGenerator,
        ledger: TagLedger,
    ) -> Result<Self> {
        let cursor = ledger.last_processed_id()?;
        Ok(Self {
            settings,
            port,
            channel,
            tagger,
            ledger,
            cursor,
        })
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    /// Highest message id that was already tagged when the run started.
    pub fn cursor(&self) -> MessageId {
        self.cursor
    }

    pub async fn process(&self, message: &ChannelMessage) -> Result<Outcome> {
        let Some(text) = message.body() else {
            tracing::debug!(id = %message.id, "no text body; skipping");
            return Ok(Outcome::Skipped);
        };

        let markdown = convert_entities_to_markdown(text, &message.annotations)?;
        let media = self.fetch_media(message).await?;

        let path = self.settings.output_dir.join(export_file_name(message));
        fs::write(&path, render_document(&markdown, media.as_deref(), &[]))?;
        tracing::info!(id = %message.id, "saved {}", path.display());

        if self.settings.mode == Mode::Update && message.id <= self.cursor {
            tracing::debug!(id = %message.id, cursor = %self.cursor, "already tagged");
            return Ok(Outcome::Exported { path });
        }

        let tags = self.tagger.generate(text).await?;
        if tags.is_empty() {
            return Ok(Outcome::Exported { path });
        }

        let edited = match self.settings.mode {
            Mode::Extract => false,
            Mode::Update => {
                let new_text = append_tags(text, &tags);
                with_backoff(self.settings.retry, "message edit", || {
                    self.port.edit_text(&self.channel, message, &new_text)
                })
                .await?;
                true
            }
        };

        fs::write(&path, render_document(&markdown, media.as_deref(), &tags))?;
        self.ledger.record(message.id, &tags, message.date)?;
        tracing::info!(id = %message.id, tags = %tags.join(" "), edited, "tagged");

        Ok(if edited {
            Outcome::Updated { path, tags }
        } else {
            Outcome::Tagged { path, tags }
        })
    }

    /// Download the attachment (if any, and if enabled); returns the Markdown link target.
    async fn fetch_media(&self, message: &ChannelMessage) -> Result<Option<String>> {
        let (Some(media), Some(dir)) = (&message.media, &self.settings.media_dir) else {
            return Ok(None);
        };

        let local = with_backoff(self.settings.retry, "media download", || {
            self.port.download_media(media, dir)
        })
        .await?;

        Ok(Some(relative_link(&local, &self.settings.output_dir)))
    }
}

/// Text to send back to the channel: the original body plus the tag line.
pub fn append_tags(text: &str, tags: &[String]) -> String {
    format!("{}\n\n{}", text.trim_end(), tags.join(" "))
}

/// Exported document layout: body, then optional media link, then optional tag line.
pub fn render_document(markdown: &str, media: Option<&str>, tags: &[String]) -> String {
    let mut out = markdown.to_string();
    if let Some(link) = media {
        out.push_str(&format!("\n\n![Media]({link})"));
    }
    if !tags.is_empty() {
        out.push_str("\n\n");
        out.push_str(&tags.join(" "));
    }
    out
}

fn relative_link(path: &Path, base: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        domain::{Annotation, AnnotationKind, ChannelId, MediaKind, MediaRef},
        errors::Error,
        ports::{Page, PageCursor},
        tagging::{tests::ScriptedCompletion, BaseVocabulary},
    };

    /// In-memory channel: serves fixed pages and records side effects.
    #[derive(Default)]
    pub(crate) struct FakeChannel {
        pub pages: Vec<Vec<ChannelMessage>>,
        pub fetches: Mutex<usize>,
        /// Number of upcoming `fetch_page` calls that fail.
        pub failing_fetches: Mutex<u32>,
        pub edits: Mutex<Vec<(MessageId, String)>>,
        pub downloads: Mutex<Vec<String>>,
        pub fail_edits: bool,
    }

    impl FakeChannel {
        pub fn with_pages(pages: Vec<Vec<ChannelMessage>>) -> Self {
            Self {
                pages,
                ..Self::default()
            }
        }

        pub fn edits(&self) -> Vec<(MessageId, String)> {
            self.edits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelPort for FakeChannel {
        async fn resolve(&self, reference: &str) -> Result<ChannelHandle> {
            if reference == "@missing" {
                return Err(Error::External("chat not found".to_string()));
            }
            Ok(ChannelHandle {
                id: ChannelId(-100),
                title: Some(reference.to_string()),
            })
        }

        async fn fetch_page(
            &self,
            _channel: &ChannelHandle,
            cursor: Option<PageCursor>,
        ) -> Result<Page> {
            *self.fetches.lock().unwrap() += 1;
            {
                let mut failing = self.failing_fetches.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(Error::External("flood wait".to_string()));
                }
            }
            let idx = cursor.map(|c| c.0 as usize).unwrap_or(0);
            let messages = self.pages.get(idx).cloned().unwrap_or_default();
            let next = (idx + 1 < self.pages.len()).then(|| PageCursor(idx as i64 + 1));
            Ok(Page { messages, next })
        }

        async fn download_media(&self, media: &MediaRef, dir: &Path) -> Result<PathBuf> {
            self.downloads.lock().unwrap().push(media.file_id.clone());
            let path = dir.join(format!("{}.{}", media.file_id, media.kind.default_extension()));
            fs::write(&path, b"bytes")?;
            Ok(path)
        }

        async fn edit_text(
            &self,
            _channel: &ChannelHandle,
            message: &ChannelMessage,
            text: &str,
        ) -> Result<()> {
            if self.fail_edits {
                return Err(Error::External("message can't be edited".to_string()));
            }
            self.edits
                .lock()
                .unwrap()
                .push((message.id, text.to_string()));
            Ok(())
        }
    }

    pub(crate) fn msg(id: i64, text: &str) -> ChannelMessage {
        ChannelMessage {
            id: MessageId(id),
            date: Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap(),
            text: Some(text.to_string()),
            annotations: Vec::new(),
            media: None,
        }
    }

    fn tagger(answers: Vec<&str>) -> (Arc<ScriptedCompletion>, TagGenerator) {
        let backend = Arc::new(ScriptedCompletion::answering(
            answers.into_iter().map(|a| Ok(a.to_string())).collect(),
        ));
        let gen = TagGenerator::new(
            Some(backend.clone()),
            BaseVocabulary::default(),
            RetryPolicy::none(),
        );
        (backend, gen)
    }

    struct Harness {
        dir: tempfile::TempDir,
        channel: Arc<FakeChannel>,
    }

    impl Harness {
        fn new(channel: FakeChannel) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("media")).unwrap();
            Self {
                dir,
                channel: Arc::new(channel),
            }
        }

        fn ledger(&self) -> TagLedger {
            TagLedger::new(
                self.dir.path().join("tags.json"),
                self.dir.path().join("unique_tags.txt"),
            )
        }

        fn processor(&self, mode: Mode, tagger: TagGenerator) -> MessageProcessor {
            let settings = ExportSettings {
                output_dir: self.dir.path().to_path_buf(),
                media_dir: Some(self.dir.path().join("media")),
                mode,
                retry: RetryPolicy::none(),
            };
            MessageProcessor::new(
                settings,
                self.channel.clone(),
                ChannelHandle {
                    id: ChannelId(-100),
                    title: None,
                },
                tagger,
                self.ledger(),
            )
            .unwrap()
        }
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn document_layout() {
        let tags = vec!["#a".to_string(), "#b".to_string()];
        assert_eq!(render_document("body", None, &[]), "body");
        assert_eq!(
            render_document("body", Some("media/1.jpg"), &tags),
            "body\n\n![Media](media/1.jpg)\n\n#a #b"
        );
        assert_eq!(append_tags("post\n", &tags), "post\n\n#a #b");
    }

    #[tokio::test]
    async fn media_only_message_is_skipped() {
        let h = Harness::new(FakeChannel::default());
        let p = h.processor(Mode::Extract, TagGenerator::disabled());
        let mut m = msg(1, "");
        m.text = None;
        assert_eq!(p.process(&m).await.unwrap(), Outcome::Skipped);
        assert!(h.channel.downloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_empty_text_is_skipped() {
        let h = Harness::new(FakeChannel::default());
        let p = h.processor(Mode::Extract, TagGenerator::disabled());
        assert_eq!(p.process(&msg(2, "")).await.unwrap(), Outcome::Skipped);

        let Outcome::Exported { path } = p.process(&msg(3, " \n ")).await.unwrap() else {
            panic!("expected a plain export");
        };
        assert_eq!(read(&path), " \n ");
    }

    #[tokio::test]
    async fn exports_markdown_without_backend() {
        let h = Harness::new(FakeChannel::default());
        let p = h.processor(Mode::Extract, TagGenerator::disabled());
        let mut m = msg(7, "Hello world");
        m.annotations = vec![Annotation::new(AnnotationKind::Bold, 0, 5)];

        let Outcome::Exported { path } = p.process(&m).await.unwrap() else {
            panic!("expected a plain export");
        };
        assert_eq!(read(&path), "**Hello** world");
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("7_"));
        assert!(!h.ledger().path().exists());
    }

    #[tokio::test]
    async fn extract_tags_and_records_without_editing() {
        let h = Harness::new(FakeChannel::default());
        let (_, gen) = tagger(vec!["#Rust, #News"]);
        let p = h.processor(Mode::Extract, gen);

        let Outcome::Tagged { path, tags } = p.process(&msg(3, "Rust news")).await.unwrap() else {
            panic!("expected tags");
        };
        assert_eq!(tags, vec!["#rust", "#news"]);
        assert_eq!(read(&path), "Rust news\n\n#rust #news");
        assert!(h.channel.edits().is_empty());
        assert_eq!(h.ledger().last_processed_id().unwrap(), MessageId(3));
    }

    #[tokio::test]
    async fn media_link_is_relative_to_output_dir() {
        let h = Harness::new(FakeChannel::default());
        let p = h.processor(Mode::Extract, TagGenerator::disabled());
        let mut m = msg(9, "caption");
        m.media = Some(MediaRef {
            file_id: "AgAD".to_string(),
            kind: MediaKind::Photo,
            file_name: None,
        });

        let Outcome::Exported { path } = p.process(&m).await.unwrap() else {
            panic!("expected a plain export");
        };
        assert_eq!(read(&path), "caption\n\n![Media](media/AgAD.jpg)");
    }

    #[tokio::test]
    async fn update_mode_leaves_messages_at_or_below_cursor_alone() {
        let h = Harness::new(FakeChannel::default());
        h.ledger()
            .record(MessageId(42), &["#old".to_string()], Utc::now())
            .unwrap();

        let (backend, gen) = tagger(vec!["#fresh"]);
        let p = h.processor(Mode::Update, gen);
        assert_eq!(p.cursor(), MessageId(42));

        for id in [40, 42] {
            let out = p.process(&msg(id, "older post")).await.unwrap();
            assert!(matches!(out, Outcome::Exported { .. }), "id {id}: {out:?}");
        }
        assert!(backend.prompts.lock().unwrap().is_empty());
        assert!(h.channel.edits().is_empty());

        let out = p.process(&msg(43, "new post")).await.unwrap();
        assert!(matches!(out, Outcome::Updated { .. }), "{out:?}");
        assert_eq!(
            h.channel.edits(),
            vec![(MessageId(43), "new post\n\n#fresh".to_string())]
        );
        assert_eq!(h.ledger().last_processed_id().unwrap(), MessageId(43));
    }

    #[tokio::test]
    async fn extract_mode_ignores_cursor() {
        let h = Harness::new(FakeChannel::default());
        h.ledger()
            .record(MessageId(42), &["#old".to_string()], Utc::now())
            .unwrap();
        let (_, gen) = tagger(vec!["#again"]);
        let p = h.processor(Mode::Extract, gen);

        let out = p.process(&msg(10, "older post")).await.unwrap();
        assert!(matches!(out, Outcome::Tagged { .. }), "{out:?}");
        assert!(h.channel.edits().is_empty());
    }

    #[tokio::test]
    async fn failed_edit_keeps_export_but_skips_ledger() {
        let h = Harness::new(FakeChannel {
            fail_edits: true,
            ..FakeChannel::default()
        });
        let (_, gen) = tagger(vec!["#x"]);
        let p = h.processor(Mode::Update, gen);

        let err = p.process(&msg(5, "post")).await.unwrap_err();
        assert!(matches!(err, Error::External(_)));
        assert_eq!(h.ledger().last_processed_id().unwrap(), MessageId(0));
        let exported: Vec<_> = fs::read_dir(h.dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".md"))
            .collect();
        assert_eq!(exported.len(), 1);
    }

    #[tokio::test]
    async fn bad_annotation_fails_only_that_message() {
        let h = Harness::new(FakeChannel::default());
        let p = h.processor(Mode::Extract, TagGenerator::disabled());
        let mut m = msg(2, "tiny");
        m.annotations = vec![Annotation::new(AnnotationKind::Italic, 2, 10)];
        assert!(matches!(
            p.process(&m).await.unwrap_err(),
            Error::Annotation(_)
        ));
        assert!(matches!(
            p.process(&msg(3, "fine")).await.unwrap(),
            Outcome::Exported { .. }
        ));
    }
}
