//! Persistent record of generated tags per message.
//!
//! Two files are maintained:
//! - the ledger: a JSON object `{ "<message id>": TagRecord, ... }`
//! - the unique tag index: every tag seen in the ledger, sorted, one per line
//!
//! Both are rewritten in full (temp file + rename) on every update, and the
//! index is always derived from the ledger, never edited on its own.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::MessageId, errors::Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub tags: Vec<String>,
    pub post_date: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

pub type TagRecords = BTreeMap<String, TagRecord>;

#[derive(Clone, Debug)]
pub struct TagLedger {
    path: PathBuf,
    index_path: PathBuf,
}

impl TagLedger {
    pub fn new(path: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            index_path: index_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// All records; empty when the ledger does not exist yet.
    pub fn load(&self) -> Result<TagRecords> {
        if !self.path.exists() {
            return Ok(TagRecords::new());
        }
        let txt = fs::read_to_string(&self.path)?;
        if txt.trim().is_empty() {
            return Ok(TagRecords::new());
        }
        let records: TagRecords = serde_json::from_str(&txt)?;
        Ok(records)
    }

    /// Insert or overwrite the record for `id`, then regenerate the unique tag index.
    pub fn record(&self, id: MessageId, tags: &[String], post_date: DateTime<Utc>) -> Result<()> {
        let mut records = self.load()?;
        records.insert(
            id.to_string(),
            TagRecord {
                tags: tags.to_vec(),
                post_date,
                generated_at: Utc::now(),
            },
        );

        let json = serde_json::to_string_pretty(&records)?;
        write_atomic(&self.path, json.as_bytes())?;

        let mut index = unique_tags(&records)
            .into_iter()
            .collect::<Vec<_>>()
            .join("\n");
        if !index.is_empty() {
            index.push('\n');
        }
        write_atomic(&self.index_path, index.as_bytes())?;
        Ok(())
    }

    /// Highest message id in the ledger, `MessageId(0)` when there is none.
    pub fn last_processed_id(&self) -> Result<MessageId> {
        let records = self.load()?;
        let max = records
            .keys()
            .filter_map(|k| k.trim().parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        Ok(MessageId(max))
    }
}

pub fn unique_tags(records: &TagRecords) -> BTreeSet<String> {
    records
        .values()
        .flat_map(|r| r.tags.iter().cloned())
        .collect()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path.file_name().ok_or_else(|| Error::InvalidPath {
        path: path.to_path_buf(),
        reason: "no file name".to_string(),
    })?;
    let tmp = dir.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
