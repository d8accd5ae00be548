//! Ingestion pipeline: document → staged workspace → backend index → stored archive.
//!
//! ```text
//! Start → Staged → Downloaded → BackendInvoked → Archived → Persisted → Done
//! ```
//!
//! Each step verifies its own filesystem postcondition before the next one
//! starts. The workspace is destroyed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use contextqa_shared::{
    ContextQaError, DocumentFormat, DocumentRef, Result, UserId, is_valid_credential,
};
use contextqa_storage::UserStore;
use tracing::{error, info, instrument, warn};
use walkdir::WalkDir;

use crate::archive;
use crate::backend::{BackendInvoker, BackendScript};
use crate::fetch::DocumentFetcher;
use crate::workspace::{Workspace, WorkspaceManager};

/// Flat directory the help-format pages are normalized into.
pub const PURE_HTML_DIR: &str = "pure_html";

/// Progress of one ingestion run; reported with every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Start,
    Staged,
    Downloaded,
    BackendInvoked,
    Archived,
    Persisted,
    Done,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Staged => "staged",
            Self::Downloaded => "downloaded",
            Self::BackendInvoked => "backend_invoked",
            Self::Archived => "archived",
            Self::Persisted => "persisted",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Result of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Label the archive was stored under (sanitized original file name).
    pub label: String,
    /// Size of the stored archive.
    pub archive_bytes: u64,
}

/// Orchestrates one document ingestion per call.
#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<UserStore>,
    workspaces: WorkspaceManager,
    backend: BackendInvoker,
    fetcher: Arc<dyn DocumentFetcher>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<UserStore>,
        workspaces: WorkspaceManager,
        backend: BackendInvoker,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Self {
        Self {
            store,
            workspaces,
            backend,
            fetcher,
        }
    }

    /// Run the full pipeline for `document` on behalf of `user`.
    #[instrument(skip(self, document), fields(user = %user, file = %document.file_name, media_type = %document.media_type))]
    pub async fn run(&self, user: UserId, document: &DocumentRef) -> Result<IngestOutcome> {
        let mut stage = IngestStage::Start;
        let result = self.execute(user, document, &mut stage).await;

        match &result {
            Ok(outcome) => info!(
                label = %outcome.label,
                archive_bytes = outcome.archive_bytes,
                "ingestion complete"
            ),
            Err(e) if e.is_user_error() => {
                info!(reason = e.reason_code(), %stage, "ingestion rejected")
            }
            Err(e) => error!(reason = e.reason_code(), %stage, error = %e, "ingestion failed"),
        }
        result
    }

    async fn execute(
        &self,
        user: UserId,
        document: &DocumentRef,
        stage: &mut IngestStage,
    ) -> Result<IngestOutcome> {
        // --- Preconditions: nothing touches the filesystem before these pass ---
        let credential = self.store.get_credential(user).await?;
        let credential = credential.trim();
        if !is_valid_credential(credential) {
            return Err(ContextQaError::InvalidCredential);
        }

        let format = DocumentFormat::from_media_type(&document.media_type).ok_or_else(|| {
            ContextQaError::UnsupportedFormat {
                media_type: document.media_type.clone(),
            }
        })?;

        let file_name = document
            .safe_file_name()
            .ok_or_else(|| ContextQaError::staging("document has no usable file name"))?;

        // --- Stage ---
        let workspace = self.workspaces.create()?;
        *stage = IngestStage::Staged;

        let result = self
            .process(user, document, format, &file_name, credential, &workspace, stage)
            .await;

        if let Err(e) = workspace.destroy() {
            warn!(error = %e, "workspace cleanup failed");
        }
        if result.is_ok() {
            *stage = IngestStage::Done;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn process(
        &self,
        user: UserId,
        document: &DocumentRef,
        format: DocumentFormat,
        file_name: &str,
        credential: &str,
        workspace: &Workspace,
        stage: &mut IngestStage,
    ) -> Result<IngestOutcome> {
        // --- Download ---
        let sources = workspace.sources_dir();
        let staged = sources.join(file_name);
        self.fetcher.fetch(document, &staged).await?;
        if !staged.is_file() {
            return Err(ContextQaError::staging("downloaded document is missing"));
        }
        *stage = IngestStage::Downloaded;

        // --- Pre-process + invoke backend ---
        let script = BackendScript::for_format(format);
        match format {
            DocumentFormat::HtmlHelp => {
                let decompiled = self.backend.decompile(&sources, file_name).await?;
                let pure_html = sources.join(PURE_HTML_DIR);
                let copied = normalize_html_pages(decompiled, pure_html.clone()).await?;
                info!(pages = copied, "help pages normalized");

                let folder = pure_html
                    .to_str()
                    .ok_or_else(|| ContextQaError::staging("workspace path is not valid UTF-8"))?;
                self.backend
                    .invoke(
                        script,
                        workspace.path(),
                        &[("folder", folder), ("key", credential)],
                    )
                    .await?;
            }
            DocumentFormat::PlainText | DocumentFormat::Pdf => {
                self.backend
                    .invoke(
                        script,
                        workspace.path(),
                        &[("filename", file_name), ("key", credential)],
                    )
                    .await?;
            }
        }

        let index_dir = workspace.index_dir();
        if !index_dir.is_dir() {
            return Err(ContextQaError::BackendProducedNoIndex);
        }
        *stage = IngestStage::BackendInvoked;

        // --- Archive ---
        let archive_path = workspace.archive_path();
        archive::pack_dir(&index_dir, &archive_path).await?;
        let archive_bytes = match tokio::fs::metadata(&archive_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(ContextQaError::archive("archive missing after compression")),
        };
        *stage = IngestStage::Archived;

        // --- Persist ---
        self.store
            .set_document(user, file_name, &archive_path)
            .await?;
        *stage = IngestStage::Persisted;

        Ok(IngestOutcome {
            label: file_name.to_string(),
            archive_bytes,
        })
    }
}

/// Copy every `.html`/`.htm` file under `decompiled` (recursively) into the
/// flat `target` directory. Later files overwrite earlier ones with the same
/// name. Returns the number of files copied.
async fn normalize_html_pages(decompiled: PathBuf, target: PathBuf) -> Result<usize> {
    tokio::task::spawn_blocking(move || copy_html_files(&decompiled, &target))
        .await
        .map_err(|e| ContextQaError::staging(format!("normalize task failed: {e}")))?
}

fn copy_html_files(source: &Path, target: &Path) -> Result<usize> {
    std::fs::create_dir_all(target).map_err(|e| ContextQaError::io(target, e))?;

    let mut copied = 0;
    for entry in WalkDir::new(source)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let is_page = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"));
        if !is_page {
            continue;
        }
        let dest = target.join(entry.file_name());
        std::fs::copy(entry.path(), &dest).map_err(|e| ContextQaError::io(&dest, e))?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_snake_case() {
        assert_eq!(IngestStage::BackendInvoked.to_string(), "backend_invoked");
        assert_eq!(IngestStage::Start.to_string(), "start");
    }

    #[test]
    fn copy_html_files_flattens_and_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("decompiled");
        std::fs::create_dir_all(src.join("a/b")).unwrap();
        std::fs::write(src.join("index.html"), "root").unwrap();
        std::fs::write(src.join("a/page.HTM"), "upper").unwrap();
        std::fs::write(src.join("a/b/index.html"), "nested").unwrap();
        std::fs::write(src.join("a/style.css"), "css").unwrap();
        std::fs::write(src.join("a/b/#SYSTEM"), "meta").unwrap();

        let target = tmp.path().join("pure_html");
        let copied = copy_html_files(&src, &target).unwrap();
        assert_eq!(copied, 3);

        let mut names: Vec<String> = std::fs::read_dir(&target)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["index.html", "page.HTM"]);
    }
}
