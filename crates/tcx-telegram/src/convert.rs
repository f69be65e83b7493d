//! MTProto types → core domain types.

use chrono::{DateTime, Utc};
use grammers_client::types::{Media, Message};
use grammers_tl_types as tl;

use tcx_core::domain::{
    Annotation, AnnotationKind, ChannelMessage, MediaKind, MediaRef, MessageId,
};

/// Map a channel post into the core model. Captions count as the text body.
pub fn channel_message(msg: &Message) -> ChannelMessage {
    let entities = msg.fmt_entities().map(Vec::as_slice).unwrap_or_default();
    from_parts(
        msg.id(),
        msg.date(),
        msg.text(),
        entities,
        msg.media().as_ref().and_then(|m| media_ref(msg.id(), m)),
    )
}

pub fn from_parts(
    id: i32,
    date: DateTime<Utc>,
    text: &str,
    entities: &[tl::enums::MessageEntity],
    media: Option<MediaRef>,
) -> ChannelMessage {
    let spans: Vec<Utf16Span> = entities.iter().filter_map(utf16_span).collect();
    ChannelMessage {
        id: MessageId(i64::from(id)),
        date,
        text: (!text.is_empty()).then(|| text.to_string()),
        annotations: annotations_from_utf16(text, &spans),
        media,
    }
}

/// An entity as Telegram reports it: offsets in UTF-16 code units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utf16Span {
    pub kind: AnnotationKind,
    pub offset: usize,
    pub length: usize,
}

fn span(kind: AnnotationKind, offset: i32, length: i32) -> Option<Utf16Span> {
    Some(Utf16Span {
        kind,
        offset: usize::try_from(offset).ok()?,
        length: usize::try_from(length).ok()?,
    })
}

/// Kinds without a Markdown rendering are kept as `Other`; unknown layers are dropped.
fn utf16_span(e: &tl::enums::MessageEntity) -> Option<Utf16Span> {
    use tl::enums::MessageEntity as E;

    match e {
        E::Bold(b) => span(AnnotationKind::Bold, b.offset, b.length),
        E::Italic(i) => span(AnnotationKind::Italic, i.offset, i.length),
        E::TextUrl(t) => span(
            AnnotationKind::TextLink { url: t.url.clone() },
            t.offset,
            t.length,
        ),
        E::Code(c) => span(AnnotationKind::Other("code".to_string()), c.offset, c.length),
        E::Pre(p) => span(AnnotationKind::Other("pre".to_string()), p.offset, p.length),
        E::Url(u) => span(AnnotationKind::Other("url".to_string()), u.offset, u.length),
        E::Mention(m) => span(AnnotationKind::Other("mention".to_string()), m.offset, m.length),
        E::Hashtag(h) => span(AnnotationKind::Other("hashtag".to_string()), h.offset, h.length),
        _ => None,
    }
}

/// Convert entity spans from UTF-16 code units into char offsets.
///
/// Spans pointing past the end of the text map past the end as well, so the
/// converter can reject them.
pub fn annotations_from_utf16(text: &str, spans: &[Utf16Span]) -> Vec<Annotation> {
    // UTF-16 offset at the start of each char, plus the total length.
    let mut starts: Vec<usize> = Vec::with_capacity(text.len() + 1);
    let mut acc = 0usize;
    for c in text.chars() {
        starts.push(acc);
        acc += c.len_utf16();
    }
    starts.push(acc);

    let to_char = |u16_off: usize| -> usize { starts.partition_point(|&s| s < u16_off) };

    spans
        .iter()
        .map(|s| {
            let start = to_char(s.offset);
            let end = to_char(s.offset.saturating_add(s.length));
            Annotation::new(s.kind.clone(), start, end.saturating_sub(start))
        })
        .collect()
}

/// Opaque id the adapter uses to find the message again on download.
pub fn media_file_id(message_id: i32, media_id: i64) -> String {
    format!("{message_id}-{media_id}")
}

fn media_ref(message_id: i32, media: &Media) -> Option<MediaRef> {
    match media {
        Media::Photo(p) => Some(MediaRef {
            file_id: media_file_id(message_id, p.id()),
            kind: MediaKind::Photo,
            file_name: None,
        }),
        Media::Document(d) => {
            let name = d.name();
            Some(MediaRef {
                file_id: media_file_id(message_id, d.id()),
                kind: kind_for_mime(d.mime_type().unwrap_or_default()),
                file_name: (!name.is_empty()).then(|| name.to_string()),
            })
        }
        _ => None,
    }
}

pub fn kind_for_mime(mime: &str) -> MediaKind {
    match mime {
        "video/mp4" | "video/webm" | "video/quicktime" => MediaKind::Video,
        "image/gif" => MediaKind::Animation,
        "audio/ogg" => MediaKind::Voice,
        m if m.starts_with("video/") => MediaKind::Video,
        m if m.starts_with("audio/") => MediaKind::Audio,
        _ => MediaKind::Document,
    }
}
