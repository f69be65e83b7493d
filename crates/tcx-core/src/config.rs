use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{errors::Error, retry::RetryPolicy, Result};

const DEFAULT_CONFIG_FILE: &str = "tcx.json";

/// Which completion backend generates tags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    OpenAi,
    /// No backend: tag generation returns no tags.
    #[default]
    None,
}

/// Typed configuration, built once at startup and passed to every component.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram (MTProto user session)
    pub telegram_api_id: i32,
    pub telegram_api_hash: String,
    /// Needed only for the first login; later runs reuse `session_file`.
    pub telegram_phone: Option<String>,
    /// Two-step verification password (env only).
    pub telegram_password: Option<String>,
    pub session_file: PathBuf,
    pub channel: String,

    // Language model
    pub llm_backend: LlmBackend,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_base_url: String,
    pub base_hashtags_file: Option<PathBuf>,

    // Output
    pub output_dir: PathBuf,
    pub media_dir: PathBuf,
    pub download_media: bool,
    pub ledger_file: PathBuf,
    pub unique_tags_file: PathBuf,

    // Network behavior
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub edit_min_interval: Duration,
}

/// On-disk shape of the config document. Every field is optional so env vars can fill gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    telegram: TelegramSection,
    llm: LlmSection,
    base_hashtags_file: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    download_media: Option<bool>,
    ledger_file: Option<PathBuf>,
    unique_tags_file: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
    retry: RetrySection,
    edit_min_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TelegramSection {
    api_id: Option<i32>,
    api_hash: Option<String>,
    phone: Option<String>,
    session_file: Option<PathBuf>,
    channel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LlmSection {
    backend: Option<LlmBackend>,
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetrySection {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
}

impl Config {
    /// Load `.env`, then the JSON config (`TCX_CONFIG` or `./tcx.json`), then env overrides.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let path = env_path("TCX_CONFIG").unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let explicit = env::var_os("TCX_CONFIG").is_some();
        let file = read_file_config(&path, explicit)?;

        Self::resolve(file, env_str)
    }

    /// Parse a config document without consulting the environment.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: FileConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid config document: {e}")))?;
        Self::resolve(file, |_| None)
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_api_id = match env("TELEGRAM_API_ID").and_then(non_empty) {
            Some(raw) => raw.trim().parse::<i32>().map_err(|_| {
                Error::Config(format!("TELEGRAM_API_ID must be an integer, got {raw:?}"))
            })?,
            None => file.telegram.api_id.unwrap_or_default(),
        };
        if telegram_api_id <= 0 {
            return Err(Error::Config(
                "telegram.api_id (or TELEGRAM_API_ID) is required".to_string(),
            ));
        }
        let telegram_api_hash = env("TELEGRAM_API_HASH")
            .and_then(non_empty)
            .or(file.telegram.api_hash.and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("telegram.api_hash (or TELEGRAM_API_HASH) is required".to_string())
            })?;
        let telegram_phone = env("TELEGRAM_PHONE")
            .and_then(non_empty)
            .or(file.telegram.phone.and_then(non_empty));
        let telegram_password = env("TELEGRAM_PASSWORD").and_then(non_empty);
        let session_file = file
            .telegram
            .session_file
            .unwrap_or_else(|| PathBuf::from("tcx.session"));

        let channel = env("TCX_CHANNEL")
            .and_then(non_empty)
            .or(file.telegram.channel)
            .unwrap_or_default();
        if channel.trim().is_empty() {
            return Err(Error::Config(
                "telegram.channel (or TCX_CHANNEL) is required".to_string(),
            ));
        }

        let llm_backend = file.llm.backend.unwrap_or_default();
        let llm_api_key = env("OPENAI_API_KEY")
            .and_then(non_empty)
            .or(file.llm.api_key.and_then(non_empty));
        if llm_backend == LlmBackend::OpenAi && llm_api_key.is_none() {
            return Err(Error::Config(
                "llm.backend is \"openai\" but no llm.api_key (or OPENAI_API_KEY) is set"
                    .to_string(),
            ));
        }
        let llm_model = file.llm.model.unwrap_or_else(|| "gpt-4o-mini".to_string());
        let llm_base_url = file
            .llm
            .base_url
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let output_dir = env("TCX_OUTPUT_DIR")
            .and_then(non_empty)
            .map(PathBuf::from)
            .or(file.output_dir)
            .unwrap_or_else(|| PathBuf::from("output"));
        let media_dir = output_dir.join("media");
        let ledger_file = file
            .ledger_file
            .unwrap_or_else(|| output_dir.join("tags.json"));
        let unique_tags_file = file
            .unique_tags_file
            .unwrap_or_else(|| output_dir.join("unique_tags.txt"));

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: file.retry.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            base_delay: file
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: defaults.max_delay,
        };

        Ok(Self {
            telegram_api_id,
            telegram_api_hash,
            telegram_phone,
            telegram_password,
            session_file,
            channel,
            llm_backend,
            llm_api_key,
            llm_model,
            llm_base_url,
            base_hashtags_file: file.base_hashtags_file,
            output_dir,
            media_dir,
            download_media: file.download_media.unwrap_or(true),
            ledger_file,
            unique_tags_file,
            request_timeout: Duration::from_secs(file.request_timeout_secs.unwrap_or(30)),
            retry,
            edit_min_interval: Duration::from_millis(file.edit_min_interval_ms.unwrap_or(1050)),
        })
    }

    /// Create the output (and media) directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        if self.download_media {
            fs::create_dir_all(&self.media_dir)?;
        }
        Ok(())
    }
}

fn read_file_config(path: &Path, explicit: bool) -> Result<FileConfig> {
    if !path.exists() {
        if explicit {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(FileConfig::default());
    }

    let txt = fs::read_to_string(path)?;
    serde_json::from_str(&txt)
        .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_gets_defaults() {
        let cfg = Config::from_json(
            r#"{ "telegram": { "api_id": 12345, "api_hash": "abc", "channel": "@news" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.channel, "@news");
        assert_eq!(cfg.telegram_api_id, 12345);
        assert_eq!(cfg.telegram_phone, None);
        assert_eq!(cfg.session_file, PathBuf::from("tcx.session"));
        assert_eq!(cfg.llm_backend, LlmBackend::None);
        assert_eq!(cfg.output_dir, PathBuf::from("output"));
        assert_eq!(cfg.media_dir, PathBuf::from("output/media"));
        assert_eq!(cfg.ledger_file, PathBuf::from("output/tags.json"));
        assert_eq!(cfg.unique_tags_file, PathBuf::from("output/unique_tags.txt"));
        assert!(cfg.download_media);
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn full_document_overrides_defaults() {
        let cfg = Config::from_json(
            r#"{
                "telegram": { "api_id": 1, "api_hash": "h", "phone": "+100", "session_file": "s.session", "channel": "-100123" },
                "llm": { "backend": "openai", "api_key": "sk-x", "model": "m", "base_url": "http://localhost:1/v1" },
                "base_hashtags_file": "tags.txt",
                "output_dir": "/tmp/out",
                "download_media": false,
                "request_timeout_secs": 5,
                "retry": { "max_attempts": 0, "base_delay_ms": 10 },
                "edit_min_interval_ms": 0
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.llm_backend, LlmBackend::OpenAi);
        assert_eq!(cfg.telegram_phone.as_deref(), Some("+100"));
        assert_eq!(cfg.session_file, PathBuf::from("s.session"));
        assert_eq!(cfg.llm_model, "m");
        assert_eq!(cfg.base_hashtags_file, Some(PathBuf::from("tags.txt")));
        assert_eq!(cfg.ledger_file, PathBuf::from("/tmp/out/tags.json"));
        assert!(!cfg.download_media);
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.retry.max_attempts, 1);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(10));
        assert_eq!(cfg.edit_min_interval, Duration::ZERO);
    }

    #[test]
    fn missing_channel_is_a_config_error() {
        let err = Config::from_json(r#"{ "telegram": { "api_id": 1, "api_hash": "h" } }"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn openai_without_key_is_a_config_error() {
        let err = Config::from_json(
            r#"{ "telegram": { "api_id": 1, "api_hash": "h", "channel": "c" }, "llm": { "backend": "openai" } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Config::from_json(
            r#"{ "telegram": { "api_id": 1, "api_hash": "h", "channel": "c" }, "outptu_dir": "x" }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn api_credentials_are_required() {
        let err = Config::from_json(r#"{ "telegram": { "api_hash": "h", "channel": "c" } }"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("api_id")));

        let err = Config::from_json(r#"{ "telegram": { "api_id": 1, "channel": "c" } }"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("api_hash")));
    }

    #[test]
    fn env_overrides_file_values() {
        let file: FileConfig = serde_json::from_str(
            r#"{ "telegram": { "api_id": 1, "api_hash": "h", "channel": "@file" } }"#,
        )
        .unwrap();
        let cfg = Config::resolve(file, |key| match key {
            "TELEGRAM_API_ID" => Some("777".to_string()),
            "TCX_CHANNEL" => Some("@env".to_string()),
            "TELEGRAM_PASSWORD" => Some("hunter2".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.telegram_api_id, 777);
        assert_eq!(cfg.channel, "@env");
        assert_eq!(cfg.telegram_password.as_deref(), Some("hunter2"));
    }
}
