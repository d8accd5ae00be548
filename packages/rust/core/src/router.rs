//! Command router: inbound events → store operations and pipelines → replies.
//!
//! The router owns the only mapping from failures to user-facing text. Every
//! inbound event produces at least one outbound message, and error detail
//! (paths, backend output, storage messages) never reaches the sink.

use std::sync::Arc;

use async_trait::async_trait;
use contextqa_shared::{
    ContextQaError, DocumentFormat, DocumentRef, QueryConfig, Result, UserId, is_valid_credential,
};
use contextqa_storage::UserStore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::ingest::IngestPipeline;
use crate::query::{QueryMode, QueryOutput, QueryPipeline};

// ---------------------------------------------------------------------------
// Reply texts
// ---------------------------------------------------------------------------

pub const CREDENTIAL_SET: &str = "Credential was set";
pub const CREDENTIAL_RESET: &str = "Credential was reset";
pub const CREDENTIAL_INVALID_FORMAT: &str = "Credential has invalid format. Try again";
pub const CREDENTIAL_REQUIRED: &str = "You must set a credential first";
pub const VALID_CREDENTIAL_REQUIRED: &str = "You must set a valid credential first";
pub const DOCUMENT_SET: &str = "File was set";
pub const DOCUMENT_RESET: &str = "Current file was deleted";
pub const DOCUMENT_REQUIRED: &str = "You must upload file first";
pub const UNSUPPORTED_FORMAT: &str = "This file type is unsupported";
pub const UNSAFE_INPUT: &str = "Your message contains characters that cannot be processed";
pub const INGEST_FAILED: &str = "Error setting file. Try again";
pub const ANSWER_FAILED: &str = "Error asking for an answer. Try again";
pub const SEARCH_FAILED: &str = "Error searching for similar text. Try again";
pub const GENERIC_FAILURE: &str = "Something went wrong. Try again";
pub const END_OF_RESULTS: &str = "... end.";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An event delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub user: UserId,
    /// Transport message id, used to tag replies.
    pub message_id: Option<i64>,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    /// Free text; the first token is the command name.
    Text(String),
    /// An uploaded document.
    Document(DocumentRef),
}

/// A message for the transport to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub user: UserId,
    pub text: String,
    /// Set when the message answers a specific inbound message.
    pub reply_to: Option<i64>,
}

/// Delivers outbound messages on behalf of the transport.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A parsed text command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    SetCredential(String),
    ResetCredential,
    Ask(String),
    SearchFew(String),
    SearchMany(String),
    ResetDocument,
    Usage,
    Formats,
    Help,
}

impl Command {
    /// Parse free text. Unrecognized input maps to [`Command::Usage`].
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (name, rest) = match text.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (text, ""),
        };
        let name = name.strip_prefix('/').unwrap_or(name).to_ascii_lowercase();

        match name.as_str() {
            "info" => Self::Info,
            "set-credential" | "set_key" => Self::SetCredential(rest.to_string()),
            "reset-credential" | "reset_key" => Self::ResetCredential,
            "ask" => Self::Ask(rest.to_string()),
            "search-few" | "search_few" => Self::SearchFew(rest.to_string()),
            "search-many" | "search_many" => Self::SearchMany(rest.to_string()),
            "reset-document" | "reset_file" => Self::ResetDocument,
            "formats" => Self::Formats,
            "help" => Self::Help,
            _ => Self::Usage,
        }
    }

    /// Name shown in hints, e.g. `/ask`.
    fn display_name(&self) -> &'static str {
        match self {
            Self::Info => "/info",
            Self::SetCredential(_) => "/set-credential",
            Self::ResetCredential => "/reset-credential",
            Self::Ask(_) => "/ask",
            Self::SearchFew(_) => "/search-few",
            Self::SearchMany(_) => "/search-many",
            Self::ResetDocument => "/reset-document",
            Self::Usage => "/usage",
            Self::Formats => "/formats",
            Self::Help => "/help",
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes inbound events. Cheap to clone; clones share all components.
#[derive(Clone)]
pub struct CommandRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    store: Arc<UserStore>,
    ingest: IngestPipeline,
    query: QueryPipeline,
    presets: QueryConfig,
    sink: Arc<dyn ResponseSink>,
}

impl CommandRouter {
    pub fn new(
        store: Arc<UserStore>,
        ingest: IngestPipeline,
        query: QueryPipeline,
        presets: QueryConfig,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                store,
                ingest,
                query,
                presets,
                sink,
            }),
        }
    }

    /// Handle `event` on its own task.
    pub fn dispatch(&self, event: InboundEvent) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            if let Err(e) = router.handle(event).await {
                warn!(error = %e, "failed to deliver reply");
            }
        })
    }

    /// Handle one event and deliver its replies, in order.
    pub async fn handle(&self, event: InboundEvent) -> Result<()> {
        let replies = self.respond(&event).await;
        for reply in replies {
            self.inner.sink.send(reply).await?;
        }
        Ok(())
    }

    /// Compute the replies for one event without delivering them.
    #[instrument(skip(self, event), fields(user = %event.user, message_id = ?event.message_id))]
    pub async fn respond(&self, event: &InboundEvent) -> Vec<OutboundMessage> {
        let user = event.user;
        let plain = |text: String| OutboundMessage {
            user,
            text,
            reply_to: None,
        };
        let reply = |text: String| OutboundMessage {
            user,
            text,
            reply_to: event.message_id,
        };

        let command = match &event.kind {
            EventKind::Document(document) => {
                let text = match self.inner.ingest.run(user, document).await {
                    Ok(_) => DOCUMENT_SET.to_string(),
                    Err(e) => failure_text(&e, INGEST_FAILED, None),
                };
                return vec![plain(text)];
            }
            EventKind::Text(text) => Command::parse(text),
        };

        debug!(command = command.display_name(), "routing command");

        match &command {
            Command::Info => vec![plain(self.store_op(self.inner.store.describe(user).await))],
            Command::SetCredential(value) => {
                if !is_valid_credential(value) {
                    info!("credential rejected: invalid format");
                    return vec![plain(CREDENTIAL_INVALID_FORMAT.to_string())];
                }
                let result = self.inner.store.set_credential(user, value).await;
                vec![plain(self.store_op(result.map(|()| CREDENTIAL_SET.to_string())))]
            }
            Command::ResetCredential => {
                let result = self.inner.store.reset_credential(user).await;
                vec![plain(self.store_op(result.map(|()| CREDENTIAL_RESET.to_string())))]
            }
            Command::ResetDocument => {
                let result = self.inner.store.reset_document(user).await;
                vec![plain(self.store_op(result.map(|()| DOCUMENT_RESET.to_string())))]
            }
            Command::Ask(query) => {
                match self.inner.query.run(user, QueryMode::Answer, query).await {
                    Ok(QueryOutput::Answer(text)) if !text.trim().is_empty() => vec![reply(text)],
                    // Chat transports reject empty message bodies.
                    Ok(_) => vec![plain(ANSWER_FAILED.to_string())],
                    Err(e) => vec![plain(failure_text(&e, ANSWER_FAILED, Some(&command)))],
                }
            }
            Command::SearchFew(query) | Command::SearchMany(query) => {
                let count = if matches!(command, Command::SearchFew(_)) {
                    self.inner.presets.few_passages
                } else {
                    self.inner.presets.many_passages
                };
                match self
                    .inner
                    .query
                    .run(user, QueryMode::Similarity { count }, query)
                    .await
                {
                    Ok(QueryOutput::Passages(passages)) => passages
                        .into_iter()
                        .map(|p| reply(p.page_content))
                        .chain(std::iter::once(plain(END_OF_RESULTS.to_string())))
                        .collect(),
                    Ok(QueryOutput::Answer(_)) => vec![plain(SEARCH_FAILED.to_string())],
                    Err(e) => vec![plain(failure_text(&e, SEARCH_FAILED, Some(&command)))],
                }
            }
            Command::Usage => vec![plain(usage_text(&self.inner.presets))],
            Command::Formats => vec![plain(formats_text())],
            Command::Help => vec![plain(help_text())],
        }
    }

    fn store_op(&self, result: Result<String>) -> String {
        result.unwrap_or_else(|e| failure_text(&e, GENERIC_FAILURE, None))
    }
}

/// Map an error to the one sentence the user sees.
fn failure_text(err: &ContextQaError, fallback: &str, command: Option<&Command>) -> String {
    match err {
        ContextQaError::InvalidCredential => VALID_CREDENTIAL_REQUIRED.to_string(),
        ContextQaError::MissingCredential => CREDENTIAL_REQUIRED.to_string(),
        ContextQaError::UnsupportedFormat { .. } => UNSUPPORTED_FORMAT.to_string(),
        ContextQaError::NoDocument => DOCUMENT_REQUIRED.to_string(),
        ContextQaError::UnsafeArgument { .. } => UNSAFE_INPUT.to_string(),
        ContextQaError::EmptyQuery => {
            let name = command.map(Command::display_name).unwrap_or("/ask");
            format!("Type your query after '{name}' keyword. Example '{name} what is this about'")
        }
        _ => fallback.to_string(),
    }
}

fn usage_text(presets: &QueryConfig) -> String {
    format!(
        "Usage:\n\
         /info             - show your credential and current file\n\
         /set-credential   - set the backend credential\n\
         /reset-credential - reset the backend credential\n\
         /ask              - ask about something in the context of your file\n\
         /search-few       - find a few ({few}) pieces of text similar to your prompt\n\
         /search-many      - find many ({many}) pieces of text similar to your prompt\n\
         /reset-document   - forget the current file\n\
         /usage            - how to use this bot\n\
         /formats          - list of supported formats\n\
         /help             - step-by-step guide",
        few = presets.few_passages,
        many = presets.many_passages,
    )
}

fn formats_text() -> String {
    let list: Vec<String> = DocumentFormat::ALL
        .iter()
        .map(|f| format!("*.{}", f.extension()))
        .collect();
    format!("Supported file formats: {}", list.join(", "))
}

fn help_text() -> String {
    "Basic usage:\n\
     1. Set your credential: /set-credential <key>\n\
     2. Upload your file\n\
     3. Ask your question: /ask <question>\n\
     4. Search something: /search-few <query>\n\
     5. Search in a wider context: /search-many <query>"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(Command::parse("/info"), Command::Info);
        assert_eq!(Command::parse("info"), Command::Info);
        assert_eq!(
            Command::parse("/set_key sk-abc"),
            Command::SetCredential("sk-abc".into())
        );
        assert_eq!(
            Command::parse("set-credential   sk-abc  "),
            Command::SetCredential("sk-abc".into())
        );
        assert_eq!(Command::parse("/reset_key"), Command::ResetCredential);
        assert_eq!(Command::parse("/reset_file"), Command::ResetDocument);
        assert_eq!(Command::parse("/formats"), Command::Formats);
        assert_eq!(Command::parse("/HELP"), Command::Help);
    }

    #[test]
    fn query_keeps_remainder() {
        assert_eq!(
            Command::parse("/ask what is  this\tabout?"),
            Command::Ask("what is  this\tabout?".into())
        );
        assert_eq!(
            Command::parse("search_many  x y"),
            Command::SearchMany("x y".into())
        );
        assert_eq!(Command::parse("/search-few"), Command::SearchFew(String::new()));
    }

    #[test]
    fn unknown_text_is_usage() {
        assert_eq!(Command::parse(""), Command::Usage);
        assert_eq!(Command::parse("hello there"), Command::Usage);
        assert_eq!(Command::parse("/start"), Command::Usage);
    }

    #[test]
    fn failures_never_leak_detail() {
        let err = ContextQaError::io(
            "/tmp/ws-123/sources/secret.txt",
            std::io::Error::other("disk full"),
        );
        let text = failure_text(&err, INGEST_FAILED, None);
        assert_eq!(text, INGEST_FAILED);

        let err = ContextQaError::Storage("database is locked at /var/db".into());
        assert_eq!(failure_text(&err, GENERIC_FAILURE, None), GENERIC_FAILURE);
    }

    #[test]
    fn empty_query_hint_names_the_command() {
        let cmd = Command::SearchMany(String::new());
        let text = failure_text(&ContextQaError::EmptyQuery, SEARCH_FAILED, Some(&cmd));
        assert!(text.contains("'/search-many'"));
    }

    #[test]
    fn static_texts_reflect_configuration() {
        let usage = usage_text(&QueryConfig {
            few_passages: 3,
            many_passages: 12,
        });
        assert!(usage.contains("(3)"));
        assert!(usage.contains("(12)"));
        assert_eq!(formats_text(), "Supported file formats: *.txt, *.chm, *.pdf");
    }
}
