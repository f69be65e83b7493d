//! Filesystem-safe names for exported documents.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::ChannelMessage;

const MAX_NAME_LEN: usize = 50;
const SNIPPET_LEN: usize = 30;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_\-. ]").expect("valid regex"))
}

/// Map arbitrary text to a filename fragment.
///
/// Every char outside `[A-Za-z0-9_\-. ]` becomes one `_`; the result is at most
/// 50 chars and never starts or ends with whitespace.
pub fn sanitize_filename(text: &str) -> String {
    let replaced = unsafe_chars().replace_all(text.trim(), "_");
    let truncated: String = replaced.chars().take(MAX_NAME_LEN).collect();
    truncated.trim_end().to_string()
}

/// `{id}_{YYYY-MM-DD_HH-MM}_{snippet}.md`
///
/// The id keeps names unique even for posts sharing a minute and a prefix.
pub fn export_file_name(message: &ChannelMessage) -> String {
    let date = message.date.format("%Y-%m-%d_%H-%M");
    let snippet: String = message
        .text
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(SNIPPET_LEN)
        .collect();
    let snippet = sanitize_filename(&snippet);

    let name = if snippet.is_empty() {
        format!("{}_{date}.md", message.id)
    } else {
        format!("{}_{date}_{snippet}.md", message.id)
    };
    name.replace(' ', "_")
}
