//! Telegram formatting entities → Markdown.
//!
//! Every edit is positioned against the original text (char offsets), so
//! insertions never shift the spans of other annotations.

use std::cmp::Reverse;

use crate::{
    domain::{Annotation, AnnotationKind},
    errors::Error,
    Result,
};

const BOLD: &str = "**";
const ITALIC: &str = "*";

#[derive(Clone, Copy, Debug)]
struct Span {
    offset: usize,
    end: usize,
}

impl Span {
    fn contains(self, other: Span) -> bool {
        self.offset <= other.offset && other.end <= self.end
    }

    fn crosses(self, other: Span) -> bool {
        self.offset < other.end
            && other.offset < self.end
            && !self.contains(other)
            && !other.contains(self)
    }
}

struct Link<'a> {
    span: Span,
    url: &'a str,
}

struct Style {
    span: Span,
    delim: &'static str,
    rank: usize,
}

/// Convert a message's plain text plus its annotations into Markdown.
///
/// - `Bold` wraps its span in `**`, `Italic` in `*`.
/// - `TextLink` replaces its span with `[span](url)`, where `span` comes from
///   the original text.
/// - Other kinds and zero-length spans are ignored.
///
/// Styles fully inside a link are consumed by it. Styles that cross a link
/// boundary keep only the delimiters that fall outside the link, so the result
/// for such input is unbalanced Markdown.
pub fn convert_entities_to_markdown(text: &str, annotations: &[Annotation]) -> Result<String> {
    if annotations.is_empty() {
        return Ok(text.to_string());
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    if let Some(bad) = annotations.iter().find(|a| a.end() > len) {
        return Err(Error::Annotation(format!(
            "span {}..{} is outside text of {len} chars",
            bad.offset,
            bad.end()
        )));
    }

    // Right-to-left: a later span at the same offset is the inner one.
    let mut ordered: Vec<&Annotation> = annotations.iter().filter(|a| a.length > 0).collect();
    ordered.sort_by_key(|a| (Reverse(a.offset), a.length));

    let mut links: Vec<Link<'_>> = Vec::new();
    let mut styles: Vec<Style> = Vec::new();
    for (rank, a) in ordered.iter().enumerate() {
        let span = Span {
            offset: a.offset,
            end: a.end(),
        };
        match &a.kind {
            AnnotationKind::Bold => styles.push(Style {
                span,
                delim: BOLD,
                rank,
            }),
            AnnotationKind::Italic => styles.push(Style {
                span,
                delim: ITALIC,
                rank,
            }),
            AnnotationKind::TextLink { url } => links.push(Link { span, url }),
            AnnotationKind::Other(_) => {}
        }
    }

    // Drop styles swallowed by a link replacement.
    styles.retain(|s| {
        !links.iter().any(|l| {
            l.span.contains(s.span) && (l.span.offset, l.span.end) != (s.span.offset, s.span.end)
        })
    });

    for s in &styles {
        if let Some(l) = links.iter().find(|l| l.span.crosses(s.span)) {
            tracing::debug!(
                style = s.delim,
                style_span = ?(s.span.offset, s.span.end),
                link_span = ?(l.span.offset, l.span.end),
                "style crosses a link boundary; markdown will be unbalanced"
            );
        }
    }

    let mut hidden = vec![false; len];
    let mut link_at: Vec<Option<String>> = vec![None; len + 1];
    // Longest first: a link inside another link is covered by the outer label.
    let mut by_length: Vec<&Link<'_>> = links.iter().collect();
    by_length.sort_by_key(|l| Reverse(l.span.end - l.span.offset));
    for l in by_length {
        if hidden[l.span.offset] {
            continue;
        }
        let label: String = chars[l.span.offset..l.span.end].iter().collect();
        link_at[l.span.offset] = Some(format!("[{label}]({})", l.url));
        for h in &mut hidden[l.span.offset..l.span.end] {
            *h = true;
        }
    }

    let mut opens: Vec<Vec<(Reverse<usize>, usize, &'static str)>> = vec![Vec::new(); len + 1];
    let mut closes: Vec<Vec<(usize, &'static str)>> = vec![Vec::new(); len + 1];
    for s in &styles {
        if !is_inside_link(&links, s.span.offset) {
            opens[s.span.offset].push((Reverse(s.span.end), s.rank, s.delim));
        }
        if !is_inside_link(&links, s.span.end) {
            closes[s.span.end].push((s.rank, s.delim));
        }
    }

    let mut out = String::with_capacity(text.len() + annotations.len() * 4);
    for pos in 0..=len {
        // Inner spans close first; they were ranked first.
        closes[pos].sort();
        for (_, delim) in &closes[pos] {
            out.push_str(delim);
        }
        // Outer spans open first: furthest end, then latest rank.
        opens[pos].sort_by_key(|(end, rank, _)| (*end, Reverse(*rank)));
        for (_, _, delim) in &opens[pos] {
            out.push_str(delim);
        }
        if let Some(link) = &link_at[pos] {
            out.push_str(link);
        }
        if pos < len && !hidden[pos] {
            out.push(chars[pos]);
        }
    }

    Ok(out)
}

fn is_inside_link(links: &[Link<'_>], pos: usize) -> bool {
    links
        .iter()
        .any(|l| l.span.offset < pos && pos < l.span.end)
}
