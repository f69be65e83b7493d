//! Topic tags via a text-completion backend.

use std::{collections::BTreeSet, fs, path::Path, sync::Arc};

use crate::{
    ports::CompletionPort,
    retry::{with_backoff, RetryPolicy},
    Result,
};

/// Max tags kept per message.
pub const MAX_TAGS: usize = 3;
/// Max chars of message text embedded in the prompt.
pub const PROMPT_TEXT_LIMIT: usize = 2000;

/// Operator-curated preferred tags (lowercase).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BaseVocabulary(BTreeSet<String>);

impl BaseVocabulary {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            tags.into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Load a base vocabulary: one tag per line, case-insensitive, `#` comment lines skipped.
///
/// A missing file is not an error; it yields an empty vocabulary.
pub fn load_base_vocabulary(path: &Path) -> Result<BaseVocabulary> {
    if !path.exists() {
        tracing::warn!(
            "base hashtag file {} not found; continuing without a vocabulary",
            path.display()
        );
        return Ok(BaseVocabulary::default());
    }

    let txt = fs::read_to_string(path)?;
    let lines = txt.lines().map(str::trim).filter(|l| {
        // `#tag` lines are tags; `# text` lines are comments.
        !l.is_empty() && !l.starts_with("# ") && *l != "#"
    });
    Ok(BaseVocabulary::new(lines))
}

/// Build the instruction sent to the completion backend.
pub fn build_prompt(text: &str, vocabulary: &BaseVocabulary) -> String {
    let snippet: String = text.chars().take(PROMPT_TEXT_LIMIT).collect();
    let base = if vocabulary.is_empty() {
        "(none)".to_string()
    } else {
        vocabulary.iter().collect::<Vec<_>>().join(", ")
    };

    format!(
        "You label posts from a Telegram channel with topic hashtags.\n\
\n\
Preferred hashtags (use these whenever one fits):\n\
{base}\n\
\n\
Only create a new hashtag when none of the preferred ones describes the post.\n\
Return at most {MAX_TAGS} hashtags as a single comma-separated line, for example:\n\
#rust, #release_notes\n\
Do not add any other text.\n\
\n\
Post:\n\
{snippet}"
    )
}

/// Parse a completion into normalized hashtags.
///
/// Tokens are split on commas and newlines, lowercased, have inner whitespace
/// replaced with `_` and get exactly one leading `#`. Empty and repeated tags
/// are dropped and at most [`MAX_TAGS`] are kept.
pub fn parse_tags(completion: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in completion.split([',', '\n']) {
        let word = token.trim().trim_start_matches('#').trim().to_lowercase();
        if word.is_empty() {
            continue;
        }
        let tag = format!(
            "#{}",
            word.split_whitespace().collect::<Vec<_>>().join("_")
        );
        if !out.contains(&tag) {
            out.push(tag);
        }
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}

/// Generates tags for message text. Without a backend every call yields no tags.
#[derive(Clone)]
pub struct TagGenerator {
    backend: Option<Arc<dyn CompletionPort>>,
    vocabulary: BaseVocabulary,
    retry: RetryPolicy,
}

impl TagGenerator {
    pub fn new(
        backend: Option<Arc<dyn CompletionPort>>,
        vocabulary: BaseVocabulary,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            vocabulary,
            retry,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, BaseVocabulary::default(), RetryPolicy::none())
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.as_deref().map_or("none", |b| b.name())
    }

    pub async fn generate(&self, text: &str) -> Result<Vec<String>> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };

        let prompt = build_prompt(text, &self.vocabulary);
        let completion =
            with_backoff(self.retry, "tag completion", || backend.complete(&prompt)).await?;

        let tags = parse_tags(&completion);
        tracing::debug!(backend = backend.name(), ?tags, "generated tags");
        Ok(tags)
    }
}
