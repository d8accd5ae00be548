//! Core pipeline orchestration for ContextQA.
//!
//! This crate ties the user store, staged workspaces, and the external
//! analysis backend together into the ingestion and query pipelines, and
//! routes inbound command events to them.

pub mod archive;
pub mod backend;
pub mod fetch;
pub mod ingest;
pub mod query;
pub mod router;
pub mod workspace;

pub use backend::{BackendInvoker, BackendOutput, BackendScript};
pub use fetch::{DocumentFetcher, SourceFetcher};
pub use ingest::{IngestOutcome, IngestPipeline, IngestStage};
pub use query::{Passage, QueryMode, QueryOutput, QueryPipeline};
pub use router::{
    Command, CommandRouter, EventKind, InboundEvent, OutboundMessage, ResponseSink,
};
pub use workspace::{Workspace, WorkspaceManager};
