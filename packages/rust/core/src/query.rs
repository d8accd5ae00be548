//! Query pipeline: stored archive → extracted index → backend answer or passages.

use std::sync::Arc;

use contextqa_shared::{ContextQaError, Result, UserId};
use contextqa_storage::UserStore;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::archive;
use crate::backend::{BackendInvoker, BackendScript};
use crate::workspace::{Workspace, WorkspaceManager};

/// What the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Free-form question, one textual response.
    Answer,
    /// Ranked passages, at most `count` of them.
    Similarity { count: u32 },
}

/// One passage returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub page_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutput {
    /// Backend stdout, verbatim.
    Answer(String),
    /// Passages in backend order.
    Passages(Vec<Passage>),
}

/// Runs answer and similarity queries against a user's stored index.
#[derive(Clone)]
pub struct QueryPipeline {
    store: Arc<UserStore>,
    workspaces: WorkspaceManager,
    backend: BackendInvoker,
}

impl QueryPipeline {
    pub fn new(store: Arc<UserStore>, workspaces: WorkspaceManager, backend: BackendInvoker) -> Self {
        Self {
            store,
            workspaces,
            backend,
        }
    }

    #[instrument(skip(self, query), fields(user = %user, mode = ?mode))]
    pub async fn run(&self, user: UserId, mode: QueryMode, query: &str) -> Result<QueryOutput> {
        let result = self.execute(user, mode, query).await;
        match &result {
            Ok(QueryOutput::Answer(text)) => info!(bytes = text.len(), "answer produced"),
            Ok(QueryOutput::Passages(p)) => info!(passages = p.len(), "passages produced"),
            Err(e) if e.is_user_error() => info!(reason = e.reason_code(), "query rejected"),
            Err(e) => error!(reason = e.reason_code(), error = %e, "query failed"),
        }
        result
    }

    async fn execute(&self, user: UserId, mode: QueryMode, query: &str) -> Result<QueryOutput> {
        // Precondition order decides which message the user sees.
        if !self.store.has_document(user).await? {
            return Err(ContextQaError::NoDocument);
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(ContextQaError::EmptyQuery);
        }
        let credential = self.store.get_credential(user).await?;
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(ContextQaError::MissingCredential);
        }

        let workspace = self.workspaces.create()?;
        let result = self
            .query_in(user, mode, query, credential, &workspace)
            .await;
        if let Err(e) = workspace.destroy() {
            warn!(error = %e, "workspace cleanup failed");
        }

        let stdout = result?;
        match mode {
            QueryMode::Answer => Ok(QueryOutput::Answer(stdout)),
            QueryMode::Similarity { .. } => parse_passages(&stdout).map(QueryOutput::Passages),
        }
    }

    /// Restore the index into `workspace` and run the backend; returns stdout.
    async fn query_in(
        &self,
        user: UserId,
        mode: QueryMode,
        query: &str,
        credential: &str,
        workspace: &Workspace,
    ) -> Result<String> {
        let archive_path = workspace.archive_path();
        if !self.store.export_document(user, &archive_path).await? {
            // Reset between the precondition check and the export.
            return Err(ContextQaError::NoDocument);
        }

        archive::unpack(&archive_path, &workspace.index_dir()).await?;

        let output = match mode {
            QueryMode::Answer => {
                self.backend
                    .invoke(
                        BackendScript::Answer,
                        workspace.path(),
                        &[("query", query), ("key", credential)],
                    )
                    .await?
            }
            QueryMode::Similarity { count } => {
                let number = count.to_string();
                self.backend
                    .invoke(
                        BackendScript::Similarity,
                        workspace.path(),
                        &[
                            ("query", query),
                            ("key", credential),
                            ("number", number.as_str()),
                        ],
                    )
                    .await?
            }
        };
        Ok(output.stdout)
    }
}

/// Decode similarity output: a JSON array of `{"page_content": ...}` records.
///
/// Undecodable output is reported instead of being read as zero results.
pub fn parse_passages(stdout: &str) -> Result<Vec<Passage>> {
    serde_json::from_str(stdout.trim())
        .map_err(|e| ContextQaError::index_corrupt(format!("similarity output not decodable: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_passages_in_order() {
        let stdout = r#"
[
  {"page_content": "first", "metadata": {"source": "a.txt"}},
  {"page_content": "second"}
]
"#;
        let passages = parse_passages(stdout).unwrap();
        assert_eq!(
            passages,
            vec![
                Passage { page_content: "first".into() },
                Passage { page_content: "second".into() },
            ]
        );
    }

    #[test]
    fn empty_array_is_zero_passages() {
        assert!(parse_passages("[]\n").unwrap().is_empty());
    }

    #[test]
    fn malformed_output_is_index_corrupt() {
        for bad in ["", "Traceback (most recent call last):", "[{\"text\": 1}]"] {
            let err = parse_passages(bad).unwrap_err();
            assert_eq!(err.reason_code(), "index_corrupt", "input {bad:?}");
        }
    }
}
