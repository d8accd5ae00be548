//! Shared types, error model, and configuration for ContextQA.
//!
//! This crate is the foundation depended on by all other ContextQA crates.
//! It provides:
//! - [`ContextQaError`]: the unified error type and failure reason codes
//! - Domain types ([`UserId`], [`DocumentRef`], [`DocumentFormat`])
//! - Credential pattern validation ([`is_valid_credential`])
//! - Configuration ([`AppConfig`], runtime configs, config loading)

pub mod config;
pub mod credential;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendConfig, BackendSection, QueryConfig, QuerySection, StorageSection,
    StoreConfig, WorkspaceConfig, WorkspaceSection, config_dir, config_file_path, init_config,
    install_dir, load_config, load_config_from, process_env,
};
pub use credential::{is_valid_credential, mask_credential};
pub use error::{ContextQaError, Result};
pub use types::{DocumentFormat, DocumentRef, UserId};
