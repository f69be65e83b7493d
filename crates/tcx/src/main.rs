//! tcx CLI entry point.

use std::{
    io::{self, BufRead, Write},
    sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, ValueEnum};

use tcx_core::{
    config::{Config, LlmBackend},
    domain::MessageId,
    ledger::TagLedger,
    ports::{ChannelPort, CompletionPort},
    processor::{ExportSettings, MessageProcessor, Mode},
    tagging::{load_base_vocabulary, BaseVocabulary, TagGenerator},
    throttled::{ThrottleConfig, ThrottledChannel},
    walker::{self, ChannelWalker, WalkOptions},
};
use tcx_openai::OpenAiClient;
use tcx_telegram::{TelegramChannel, TelegramSettings};

/// Export a Telegram channel to Markdown files, tagging posts with an LLM.
#[derive(Parser)]
#[command(name = "tcx", version, about, long_about = None)]
struct Cli {
    /// `extract` writes documents and tags locally; `update` also appends
    /// the tags to posts newer than the ledger cursor.
    #[arg(value_enum)]
    mode: CliMode,

    /// Process only this message, then stop.
    #[arg(long, value_name = "ID")]
    post_id: Option<i64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    Extract,
    Update,
}

impl From<CliMode> for Mode {
    fn from(m: CliMode) -> Self {
        match m {
            CliMode::Extract => Mode::Extract,
            CliMode::Update => Mode::Update,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tcx_core::logging::init("tcx")?;

    let cfg = Config::load().context("failed to load configuration")?;
    cfg.ensure_dirs().context("failed to prepare output directories")?;

    let backend: Option<Arc<dyn CompletionPort>> = match cfg.llm_backend {
        LlmBackend::OpenAi => {
            let key = cfg.llm_api_key.clone().unwrap_or_default();
            let client = OpenAiClient::new(key, cfg.llm_model.clone(), cfg.request_timeout)?
                .with_base_url(cfg.llm_base_url.clone());
            Some(Arc::new(client))
        }
        LlmBackend::None => {
            tracing::warn!("no llm backend configured; posts will be exported without tags");
            None
        }
    };

    let vocabulary = match &cfg.base_hashtags_file {
        Some(path) => load_base_vocabulary(path)
            .with_context(|| format!("failed to read base hashtags from {}", path.display()))?,
        None => BaseVocabulary::default(),
    };
    tracing::info!(tags = vocabulary.len(), "base vocabulary loaded");
    let tagger = TagGenerator::new(backend, vocabulary, cfg.retry);
    let tagger_name = tagger.backend_name().to_string();

    let settings = TelegramSettings {
        api_id: cfg.telegram_api_id,
        api_hash: cfg.telegram_api_hash.clone(),
        session_file: cfg.session_file.clone(),
        phone: cfg.telegram_phone.clone(),
        password: cfg.telegram_password.clone(),
    };
    let telegram = TelegramChannel::connect(&settings, ask)
        .await
        .context("failed to connect to telegram")?;
    let raw: Arc<dyn ChannelPort> = Arc::new(telegram);
    let port: Arc<dyn ChannelPort> = Arc::new(ThrottledChannel::new(
        raw,
        ThrottleConfig {
            edit_min_interval: cfg.edit_min_interval,
            ..ThrottleConfig::default()
        },
    ));

    let opts = WalkOptions {
        min_id: None,
        only_id: cli.post_id.map(MessageId),
    };
    let mut walk = ChannelWalker::start(port.clone(), &cfg.channel, opts)
        .await
        .with_context(|| format!("failed to resolve channel {}", cfg.channel))?
        .with_retry(cfg.retry);

    let mode = Mode::from(cli.mode);
    let ledger = TagLedger::new(&cfg.ledger_file, &cfg.unique_tags_file);
    let processor = MessageProcessor::new(
        ExportSettings::from_config(&cfg, mode),
        port,
        walk.channel().clone(),
        tagger,
        ledger,
    )?;

    tracing::info!(
        ?mode,
        cursor = %processor.cursor(),
        tagger = %tagger_name,
        output = %cfg.output_dir.display(),
        "starting run"
    );

    let summary = walker::run(&mut walk, &processor).await?;
    tracing::info!(
        exported = summary.exported,
        tagged = summary.tagged,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.failed,
        "run finished"
    );

    if let Some(id) = cli.post_id {
        if summary.seen() == 0 {
            anyhow::bail!("message {id} was not found in the channel");
        }
    }
    Ok(())
}

/// Read one line from the terminal for interactive login.
fn ask(question: &str) -> io::Result<String> {
    let mut out = io::stdout();
    out.write_all(question.as_bytes())?;
    out.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end().to_string())
}
