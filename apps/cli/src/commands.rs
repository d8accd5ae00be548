//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use contextqa_core::{
    BackendInvoker, CommandRouter, DocumentFetcher, EventKind, InboundEvent, IngestPipeline,
    OutboundMessage, QueryPipeline, ResponseSink, SourceFetcher, WorkspaceManager,
};
use contextqa_shared::{
    AppConfig, BackendConfig, DocumentFormat, DocumentRef, QueryConfig, StoreConfig, UserId,
    WorkspaceConfig, init_config, install_dir, load_config, load_config_from, process_env,
};
use contextqa_storage::UserStore;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Media type used when neither `--mime` nor the extension identifies the file.
const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ContextQA: ask questions about your documents.
#[derive(Parser)]
#[command(
    name = "contextqa",
    version,
    about = "Index documents with an external analysis backend and query them conversationally.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.contextqa/contextqa.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Keep pipeline workspaces for inspection.
    #[arg(long, global = true)]
    pub retain_workspaces: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Send one text command, e.g. `contextqa send --user 1 /ask what is this?`.
    Send {
        /// Requester id.
        #[arg(long)]
        user: i64,

        /// Command text.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Upload a document (local path or http(s) URL) and index it.
    Upload {
        /// Requester id.
        #[arg(long)]
        user: i64,

        /// Declared media type (inferred from the extension when omitted).
        #[arg(long)]
        mime: Option<String>,

        /// Local path or URL of the document.
        source: String,
    },

    /// Interactive session: one command per stdin line, `upload <source>` for files.
    Chat {
        /// Requester id.
        #[arg(long)]
        user: i64,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "contextqa=info",
        1 => "contextqa=debug",
        _ => "contextqa=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if cli.retain_workspaces {
        config.workspace.retain = true;
    }

    match cli.command {
        Command::Send { user, text } => cmd_send(&config, UserId(user), &text.join(" ")).await,
        Command::Upload { user, mime, source } => {
            cmd_upload(&config, UserId(user), mime.as_deref(), &source).await
        }
        Command::Chat { user } => cmd_chat(&config, UserId(user)).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Prints outbound messages to stdout.
struct StdoutSink;

#[async_trait]
impl ResponseSink for StdoutSink {
    async fn send(&self, message: OutboundMessage) -> contextqa_shared::Result<()> {
        match message.reply_to {
            Some(id) => println!("[#{id}] {}", message.text),
            None => println!("{}", message.text),
        }
        Ok(())
    }
}

/// Wire the store, pipelines, and router from resolved configuration.
async fn build_router(config: &AppConfig, sink: Arc<dyn ResponseSink>) -> Result<CommandRouter> {
    let install_root = install_dir()?;
    let store_config = StoreConfig::resolve(config, &install_root, process_env)?;
    let store = Arc::new(UserStore::open(&store_config.path).await?);

    let workspaces = WorkspaceManager::new(WorkspaceConfig::resolve(config));
    let backend = BackendInvoker::new(BackendConfig::resolve(config, &install_root, process_env));
    let fetcher: Arc<dyn DocumentFetcher> = Arc::new(SourceFetcher::new()?);

    info!(
        db = ?store_config.path,
        workspace_root = ?workspaces.root(),
        retain = workspaces.retains(),
        "services ready"
    );

    let ingest = IngestPipeline::new(
        Arc::clone(&store),
        workspaces.clone(),
        backend.clone(),
        fetcher,
    );
    let query = QueryPipeline::new(Arc::clone(&store), workspaces, backend);

    Ok(CommandRouter::new(
        store,
        ingest,
        query,
        QueryConfig::from(config),
        sink,
    ))
}

/// Build a document reference for a local path or URL.
fn document_ref(source: &str, mime: Option<&str>) -> DocumentRef {
    let file_name = Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string());

    let media_type = mime
        .map(String::from)
        .or_else(|| {
            DocumentFormat::from_extension(Path::new(&file_name))
                .map(|f| f.media_type().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_MEDIA_TYPE.to_string());

    DocumentRef {
        file_id: source.to_string(),
        media_type,
        file_name,
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_send(config: &AppConfig, user: UserId, text: &str) -> Result<()> {
    let router = build_router(config, Arc::new(StdoutSink)).await?;
    router
        .handle(InboundEvent {
            user,
            message_id: Some(1),
            kind: EventKind::Text(text.to_string()),
        })
        .await?;
    Ok(())
}

async fn cmd_upload(
    config: &AppConfig,
    user: UserId,
    mime: Option<&str>,
    source: &str,
) -> Result<()> {
    let sink = Arc::new(StdoutSink);
    let router = build_router(config, sink.clone()).await?;
    let document = document_ref(source, mime);
    debug!(?document, "uploading");

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(format!("Indexing {}", document.file_name));
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let replies = router
        .respond(&InboundEvent {
            user,
            message_id: Some(1),
            kind: EventKind::Document(document),
        })
        .await;
    spinner.finish_and_clear();

    for reply in replies {
        sink.send(reply).await?;
    }
    Ok(())
}

async fn cmd_chat(config: &AppConfig, user: UserId) -> Result<()> {
    let router = build_router(config, Arc::new(StdoutSink)).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = Vec::new();
    let mut message_id = 0i64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }
        message_id += 1;

        let kind = match line.strip_prefix("upload ") {
            Some(source) => EventKind::Document(document_ref(source.trim(), None)),
            None => EventKind::Text(line.to_string()),
        };
        tasks.push(router.dispatch(InboundEvent {
            user,
            message_id: Some(message_id),
            kind,
        }));
    }

    for task in tasks {
        task.await?;
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_send_with_hyphen_text() {
        let cli = Cli::try_parse_from([
            "contextqa", "send", "--user", "7", "/ask", "what", "is", "-x?",
        ])
        .unwrap();
        match cli.command {
            Command::Send { user, text } => {
                assert_eq!(user, 7);
                assert_eq!(text.join(" "), "/ask what is -x?");
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "contextqa",
            "upload",
            "--user",
            "1",
            "--retain-workspaces",
            "-vv",
            "notes.txt",
        ])
        .unwrap();
        assert!(cli.retain_workspaces);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn document_ref_infers_media_type() {
        let doc = document_ref("/data/manual.CHM", None);
        assert_eq!(doc.file_name, "manual.CHM");
        assert_eq!(doc.media_type, "application/vnd.ms-htmlhelp");

        let doc = document_ref("https://example.com/files/paper.pdf", None);
        assert_eq!(doc.file_name, "paper.pdf");
        assert_eq!(doc.media_type, "application/pdf");

        let doc = document_ref("notes.md", None);
        assert_eq!(doc.media_type, UNKNOWN_MEDIA_TYPE);

        let doc = document_ref("notes.md", Some("text/plain"));
        assert_eq!(doc.media_type, "text/plain");
    }
}
