use chrono::{DateTime, Utc};

/// Telegram channel id (numeric, `-100...` for channels).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub i64);

/// Telegram message id (numeric, increasing within a channel).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: ChannelId,
    pub title: Option<String>,
}

/// Formatting applied to a span of a message's plain text.
///
/// `offset` and `length` count chars of the original text, never UTF-16 units;
/// adapters convert before handing messages to the core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub offset: usize,
    pub length: usize,
}

impl Annotation {
    pub fn new(kind: AnnotationKind, offset: usize, length: usize) -> Self {
        Self {
            kind,
            offset,
            length,
        }
    }

    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationKind {
    Bold,
    Italic,
    TextLink { url: String },
    /// Any remote kind without a Markdown rendering (code, mention, spoiler, ...).
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Audio,
    Voice,
    Document,
}

impl MediaKind {
    /// Extension used when the remote side does not provide a file name.
    pub fn default_extension(self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video | MediaKind::Animation => "mp4",
            MediaKind::Audio => "mp3",
            MediaKind::Voice => "ogg",
            MediaKind::Document => "bin",
        }
    }
}

/// Reference to an attachment; opaque to the core and resolved by the channel adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
    pub kind: MediaKind,
    pub file_name: Option<String>,
}

/// A message as read from the channel history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: MessageId,
    pub date: DateTime<Utc>,
    /// Message text, or the caption for media posts.
    pub text: Option<String>,
    pub annotations: Vec<Annotation>,
    pub media: Option<MediaRef>,
}

impl ChannelMessage {
    /// The text body; `None` for posts without text. Whitespace-only text counts.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}
