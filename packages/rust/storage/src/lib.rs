//! Embedded libSQL user store.
//!
//! The [`UserStore`] keeps one record per requester (credential) and at most
//! one index archive per requester (the active document).
//!
//! **Concurrency rules:**
//! - Every operation takes the per-user lock for its whole duration, so two
//!   operations on the same user id never interleave.
//! - Every operation opens its own connection; `set_document` replaces the
//!   previous archive inside a single IMMEDIATE transaction, so no reader ever
//!   observes zero or two archives for a user mid-swap.
//! - Different user ids never share a lock.

mod locks;
mod migrations;

use std::path::Path;

use chrono::Utc;
use contextqa_shared::{ContextQaError, Result, UserId, mask_credential};
use libsql::{Connection, Database, TransactionBehavior, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::locks::UserLocks;

/// Sentinel shown by [`UserStore::describe`] for absent values.
pub const NOT_SET: &str = "<not set>";

/// How long a connection waits on a locked database file before failing.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Metadata about a user's active index archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Display name (original upload file name).
    pub label: String,
    /// Hex SHA-256 of the archive bytes.
    pub sha256: String,
    /// Archive size in bytes.
    pub size: u64,
    /// RFC 3339 timestamp of when the archive was stored.
    pub created_at: String,
}

/// Primary storage handle wrapping a libSQL database file.
pub struct UserStore {
    db: Database,
    locks: UserLocks,
}

impl UserStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ContextQaError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let store = Self {
            db,
            locks: UserLocks::new(),
        };

        let conn = store.connect().await?;
        let mut rows = conn
            .query("PRAGMA journal_mode = WAL", params![])
            .await
            .map_err(db_err)?;
        while rows.next().await.map_err(db_err)?.is_some() {}

        store.run_migrations(&conn).await?;
        info!(?path, "user store ready");
        Ok(store)
    }

    /// Open a fresh connection with the busy timeout applied.
    async fn connect(&self) -> Result<Connection> {
        let conn = self.db.connect().map_err(db_err)?;
        let mut rows = conn
            .query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), params![])
            .await
            .map_err(db_err)?;
        while rows.next().await.map_err(db_err)?.is_some() {}
        Ok(conn)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self, conn: &Connection) -> Result<()> {
        let current_version = get_schema_version(conn).await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    ContextQaError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Credential operations
    // -----------------------------------------------------------------------

    /// Stored credential, or an empty string. Creates the record if absent.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn get_credential(&self, user: UserId) -> Result<String> {
        let _guard = self.locks.acquire(user).await;
        let conn = self.connect().await?;
        ensure_user(&conn, user).await?;

        let mut rows = conn
            .query(
                "SELECT credential FROM users WHERE id = ?1",
                params![user.0],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<String>(0).map_err(db_err),
            None => Ok(String::new()),
        }
    }

    /// Upsert the user's credential.
    #[instrument(skip(self, value), fields(user = %user))]
    pub async fn set_credential(&self, user: UserId, value: &str) -> Result<()> {
        let _guard = self.locks.acquire(user).await;
        let conn = self.connect().await?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, credential, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
               credential = excluded.credential,
               updated_at = excluded.updated_at",
            params![user.0, value, now.as_str()],
        )
        .await
        .map_err(db_err)?;
        debug!("credential updated");
        Ok(())
    }

    /// Same as `set_credential(user, "")`.
    pub async fn reset_credential(&self, user: UserId) -> Result<()> {
        self.set_credential(user, "").await
    }

    // -----------------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------------

    /// Replace the user's active archive with the file at `archive_path`.
    ///
    /// Prior archives are deleted and the new one inserted in one transaction.
    #[instrument(skip(self, archive_path), fields(user = %user, label))]
    pub async fn set_document(&self, user: UserId, label: &str, archive_path: &Path) -> Result<()> {
        let content = tokio::fs::read(archive_path)
            .await
            .map_err(|e| ContextQaError::io(archive_path, e))?;
        let sha256 = hex_digest(&content);
        let size = content.len() as i64;

        let _guard = self.locks.acquire(user).await;
        let conn = self.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;

        ensure_user(&tx, user).await?;

        let removed = tx
            .execute("DELETE FROM documents WHERE user_id = ?1", params![user.0])
            .await
            .map_err(db_err)?;

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO documents (id, user_id, label, content, sha256, size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.as_str(),
                user.0,
                label,
                libsql::Value::Blob(content),
                sha256.as_str(),
                size,
                now.as_str()
            ],
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        info!(removed, size, %sha256, "document stored");
        Ok(())
    }

    /// True iff the user has an active archive.
    pub async fn has_document(&self, user: UserId) -> Result<bool> {
        let _guard = self.locks.acquire(user).await;
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT 1 FROM documents WHERE user_id = ?1 LIMIT 1",
                params![user.0],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    /// Delete every archive owned by the user. Succeeds when none existed.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn reset_document(&self, user: UserId) -> Result<()> {
        let _guard = self.locks.acquire(user).await;
        let conn = self.connect().await?;
        let removed = conn
            .execute("DELETE FROM documents WHERE user_id = ?1", params![user.0])
            .await
            .map_err(db_err)?;
        debug!(removed, "documents reset");
        Ok(())
    }

    /// Copy the user's archive to `destination`.
    ///
    /// Returns `false` when the user has no archive or the copy did not
    /// materialize on disk with the stored size.
    #[instrument(skip(self, destination), fields(user = %user))]
    pub async fn export_document(&self, user: UserId, destination: &Path) -> Result<bool> {
        let _guard = self.locks.acquire(user).await;
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT content, size FROM documents WHERE user_id = ?1
                 ORDER BY created_at DESC LIMIT 1",
                params![user.0],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            debug!("no document to export");
            return Ok(false);
        };
        let content: Vec<u8> = row.get(0).map_err(db_err)?;
        let size: i64 = row.get(1).map_err(db_err)?;

        tokio::fs::write(destination, &content)
            .await
            .map_err(|e| ContextQaError::io(destination, e))?;

        match tokio::fs::metadata(destination).await {
            Ok(meta) if meta.is_file() && meta.len() == size as u64 => Ok(true),
            _ => Ok(false),
        }
    }

    /// Metadata for the user's active archive, if any.
    pub async fn document_info(&self, user: UserId) -> Result<Option<DocumentInfo>> {
        let _guard = self.locks.acquire(user).await;
        let conn = self.connect().await?;
        query_document_info(&conn, user).await
    }

    /// Human-readable summary of the user's credential and active document.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn describe(&self, user: UserId) -> Result<String> {
        let _guard = self.locks.acquire(user).await;
        let conn = self.connect().await?;
        ensure_user(&conn, user).await?;

        let mut rows = conn
            .query(
                "SELECT credential FROM users WHERE id = ?1",
                params![user.0],
            )
            .await
            .map_err(db_err)?;
        let credential = match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<String>(0).map_err(db_err)?,
            None => String::new(),
        };

        let credential =
            mask_credential(credential.trim()).unwrap_or_else(|| NOT_SET.to_string());
        let label = query_document_info(&conn, user)
            .await?
            .map(|info| info.label)
            .unwrap_or_else(|| NOT_SET.to_string());

        Ok(format!("Credential: {credential}\nCurrent file: {label}"))
    }

    /// Number of archives stored for a user (always 0 or 1 when observed).
    #[cfg(test)]
    async fn count_documents(&self, user: UserId) -> u64 {
        let conn = self.connect().await.unwrap();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM documents WHERE user_id = ?1",
                params![user.0],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get::<i64>(0).unwrap() as u64
    }
}

/// Get the current schema version, or 0 if no migrations have been applied.
async fn get_schema_version(conn: &Connection) -> u32 {
    let result = conn
        .query("SELECT MAX(version) FROM schema_migrations", params![])
        .await;

    match result {
        Ok(mut rows) => {
            if let Ok(Some(row)) = rows.next().await {
                row.get::<u32>(0).unwrap_or(0)
            } else {
                0
            }
        }
        Err(_) => 0, // Table doesn't exist yet
    }
}

/// Create the user record with an empty credential if it does not exist.
async fn ensure_user(conn: &Connection, user: UserId) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO users (id, credential, created_at, updated_at)
         VALUES (?1, '', ?2, ?2)",
        params![user.0, now.as_str()],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn query_document_info(conn: &Connection, user: UserId) -> Result<Option<DocumentInfo>> {
    let mut rows = conn
        .query(
            "SELECT label, sha256, size, created_at FROM documents
             WHERE user_id = ?1 ORDER BY created_at DESC LIMIT 1",
            params![user.0],
        )
        .await
        .map_err(db_err)?;

    match rows.next().await.map_err(db_err)? {
        Some(row) => Ok(Some(DocumentInfo {
            label: row.get::<String>(0).map_err(db_err)?,
            sha256: row.get::<String>(1).map_err(db_err)?,
            size: row.get::<i64>(2).map_err(db_err)? as u64,
            created_at: row.get::<String>(3).map_err(db_err)?,
        })),
        None => Ok(None),
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn db_err(e: libsql::Error) -> ContextQaError {
    ContextQaError::Storage(e.to_string())
}
