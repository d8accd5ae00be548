//! Index archive packing and extraction (gzip-compressed tar).
//!
//! Both directions run on the blocking pool.

use std::fs::File;
use std::path::{Path, PathBuf};

use contextqa_shared::{ContextQaError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;

/// Pack the contents of `source_dir` into a `.tar.gz` at `archive_path`.
pub async fn pack_dir(source_dir: &Path, archive_path: &Path) -> Result<()> {
    let source_dir = source_dir.to_path_buf();
    let archive_path = archive_path.to_path_buf();

    tokio::task::spawn_blocking(move || pack_blocking(&source_dir, &archive_path))
        .await
        .map_err(|e| ContextQaError::archive(format!("pack task failed: {e}")))?
}

/// Extract `archive_path` into `dest_dir`, creating it if needed.
///
/// Any entry that would land outside `dest_dir` marks the archive as corrupt.
pub async fn unpack(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let archive_path = archive_path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();

    tokio::task::spawn_blocking(move || unpack_blocking(&archive_path, &dest_dir))
        .await
        .map_err(|e| ContextQaError::index_corrupt(format!("unpack task failed: {e}")))?
}

fn pack_blocking(source_dir: &Path, archive_path: &Path) -> Result<()> {
    let file = File::create(archive_path)
        .map_err(|e| ContextQaError::archive(format!("cannot create archive: {e}")))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    builder
        .append_dir_all(".", source_dir)
        .map_err(|e| ContextQaError::archive(format!("cannot add index files: {e}")))?;

    let encoder = builder
        .into_inner()
        .map_err(|e| ContextQaError::archive(format!("cannot finish tar stream: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ContextQaError::archive(format!("cannot finish gzip stream: {e}")))?;

    debug!(archive = ?archive_path, "index packed");
    Ok(())
}

fn unpack_blocking(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .map_err(|e| ContextQaError::index_corrupt(format!("cannot open archive: {e}")))?;
    std::fs::create_dir_all(dest_dir).map_err(|e| ContextQaError::io(dest_dir, e))?;

    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|e| ContextQaError::index_corrupt(format!("unreadable archive: {e}")))?;

    let mut count = 0usize;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| ContextQaError::index_corrupt(format!("bad archive entry: {e}")))?;
        let name: PathBuf = entry
            .path()
            .map(|p| p.into_owned())
            .unwrap_or_default();
        let inside = entry
            .unpack_in(dest_dir)
            .map_err(|e| ContextQaError::index_corrupt(format!("cannot extract entry: {e}")))?;
        if !inside {
            return Err(ContextQaError::index_corrupt(format!(
                "entry {} escapes the index directory",
                name.display()
            )));
        }
        count += 1;
    }

    debug!(entries = count, dest = ?dest_dir, "index extracted");
    Ok(())
}
