//! Application configuration for ContextQA.
//!
//! User config lives at `~/.contextqa/contextqa.toml`.
//! Environment settings override config file values, which override defaults.
//! Resolution turns the file model into explicit runtime structs that are
//! handed to component constructors; nothing downstream reads the process
//! environment on its own.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContextQaError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contextqa.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contextqa";

/// Environment setting for the database directory.
pub const DB_DIR_ENV: &str = "DB_DIR";

/// Environment setting for the database file name.
pub const DB_NAME_ENV: &str = "DB_NAME";

// ---------------------------------------------------------------------------
// Config structs (matching contextqa.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Embedded database location.
    #[serde(default)]
    pub storage: StorageSection,

    /// External analysis backend.
    #[serde(default)]
    pub backend: BackendSection,

    /// Pipeline workspaces.
    #[serde(default)]
    pub workspace: WorkspaceSection,

    /// Similarity-search presets.
    #[serde(default)]
    pub query: QuerySection,
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// Directory holding the database file. Overridden by `DB_DIR`.
    #[serde(default)]
    pub dir: Option<String>,

    /// Database file name. Overridden by `DB_NAME`.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// `[backend]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSection {
    /// Interpreter path. The env var named by `interpreter_env` wins when set.
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Name of the env var holding the interpreter path.
    #[serde(default = "default_interpreter_env")]
    pub interpreter_env: String,

    /// Directory containing the backend scripts.
    #[serde(default = "default_script_dir")]
    pub script_dir: String,

    /// Decompiler used for compiled HTML help documents.
    #[serde(default = "default_decompiler")]
    pub decompiler: String,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            interpreter: None,
            interpreter_env: default_interpreter_env(),
            script_dir: default_script_dir(),
            decompiler: default_decompiler(),
        }
    }
}

fn default_interpreter_env() -> String {
    "PYTHON".into()
}
fn default_script_dir() -> String {
    "scripts".into()
}
fn default_decompiler() -> String {
    "extract_chmLib".into()
}

/// `[workspace]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSection {
    /// Keep workspaces after each run for inspection (debug mode).
    #[serde(default)]
    pub retain: bool,

    /// Root used for workspaces in debug mode.
    #[serde(default = "default_debug_root")]
    pub debug_root: String,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            retain: false,
            debug_root: default_debug_root(),
        }
    }
}

fn default_debug_root() -> String {
    "workspaces".into()
}

/// `[query]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySection {
    /// Passage count for the "few" similarity preset.
    #[serde(default = "default_few")]
    pub few_passages: u32,

    /// Passage count for the "many" similarity preset.
    #[serde(default = "default_many")]
    pub many_passages: u32,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            few_passages: default_few(),
            many_passages: default_many(),
        }
    }
}

fn default_few() -> u32 {
    4
}
fn default_many() -> u32 {
    8
}

// ---------------------------------------------------------------------------
// Runtime configs (resolved from config file + environment)
// ---------------------------------------------------------------------------

/// Resolved location of the user store database.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl StoreConfig {
    /// Resolve the database path. Missing directory or file name is fatal.
    /// A relative directory is taken from `install_root`.
    pub fn resolve(
        config: &AppConfig,
        install_root: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let dir = non_empty(env(DB_DIR_ENV)).or_else(|| non_empty(config.storage.dir.clone()));
        let name =
            non_empty(env(DB_NAME_ENV)).or_else(|| non_empty(config.storage.file_name.clone()));

        match (dir, name) {
            (Some(dir), Some(name)) => Ok(Self {
                path: install_root.join(dir).join(name),
            }),
            _ => Err(ContextQaError::config(format!(
                "{DB_DIR_ENV} or {DB_NAME_ENV} not set"
            ))),
        }
    }
}

/// Resolved backend invocation settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Interpreter path; `None` is reported at invocation time.
    pub interpreter: Option<PathBuf>,
    /// Installation-provided script directory.
    pub script_dir: PathBuf,
    /// Decompiler program for compiled HTML help.
    pub decompiler: PathBuf,
}

impl BackendConfig {
    /// A relative script directory is taken from `install_root`.
    pub fn resolve(
        config: &AppConfig,
        install_root: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let interpreter = non_empty(env(&config.backend.interpreter_env))
            .or_else(|| non_empty(config.backend.interpreter.clone()))
            .map(PathBuf::from);
        Self {
            interpreter,
            script_dir: install_root.join(&config.backend.script_dir),
            decompiler: PathBuf::from(&config.backend.decompiler),
        }
    }
}

/// Resolved workspace settings.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Parent directory for new workspaces.
    pub root: PathBuf,
    /// Keep workspaces instead of deleting them at the end of a run.
    pub retain: bool,
}

impl WorkspaceConfig {
    /// Production uses the volatile temp root; debug uses the fixed root.
    pub fn resolve(config: &AppConfig) -> Self {
        if config.workspace.retain {
            Self {
                root: PathBuf::from(&config.workspace.debug_root),
                retain: true,
            }
        } else {
            Self {
                root: std::env::temp_dir(),
                retain: false,
            }
        }
    }
}

/// Similarity-search presets.
#[derive(Debug, Clone, Copy)]
pub struct QueryConfig {
    pub few_passages: u32,
    pub many_passages: u32,
}

impl From<&AppConfig> for QueryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            few_passages: config.query.few_passages,
            many_passages: config.query.many_passages,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Directory containing the running executable.
pub fn install_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| ContextQaError::config(format!("cannot locate executable: {e}")))?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| ContextQaError::config("executable has no parent directory"))
}

/// Lookup against the real process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contextqa/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ContextQaError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contextqa/contextqa.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ContextQaError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ContextQaError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ContextQaError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ContextQaError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ContextQaError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn root() -> &'static Path {
        Path::new("/opt/contextqa")
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("interpreter_env"));
        assert!(toml_str.contains("PYTHON"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.query.few_passages, 4);
        assert_eq!(parsed.query.many_passages, 8);
        assert_eq!(parsed.backend.decompiler, "extract_chmLib");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[storage]
dir = "/var/lib/contextqa"
file_name = "users.db"

[workspace]
retain = true
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.backend.script_dir, "scripts");
        assert!(config.workspace.retain);
        assert_eq!(config.workspace.debug_root, "workspaces");
    }

    #[test]
    fn store_path_requires_both_settings() {
        let config = AppConfig::default();
        let err = StoreConfig::resolve(&config, root(), env_from(&[("DB_DIR", "/data")]))
            .expect_err("missing DB_NAME must fail");
        assert!(err.to_string().contains("DB_NAME"));

        let store = StoreConfig::resolve(
            &config,
            root(),
            env_from(&[("DB_DIR", "/data"), ("DB_NAME", "bot.db")]),
        )
        .expect("resolve");
        assert_eq!(store.path, PathBuf::from("/data/bot.db"));
    }

    #[test]
    fn env_overrides_file_for_store() {
        let mut config = AppConfig::default();
        config.storage.dir = Some("/from-file".into());
        config.storage.file_name = Some("file.db".into());

        let store = StoreConfig::resolve(&config, root(), env_from(&[("DB_NAME", "env.db")]))
            .expect("resolve");
        assert_eq!(store.path, PathBuf::from("/from-file/env.db"));
    }

    #[test]
    fn blank_env_value_counts_as_missing() {
        let config = AppConfig::default();
        let result =
            StoreConfig::resolve(&config, root(), env_from(&[("DB_DIR", " "), ("DB_NAME", "x")]));
        assert!(result.is_err());
    }

    #[test]
    fn interpreter_is_optional_at_startup() {
        let config = AppConfig::default();
        let backend = BackendConfig::resolve(&config, root(), env_from(&[]));
        assert!(backend.interpreter.is_none());

        let backend =
            BackendConfig::resolve(&config, root(), env_from(&[("PYTHON", "/usr/bin/python3")]));
        assert_eq!(backend.interpreter, Some(PathBuf::from("/usr/bin/python3")));
    }

    #[test]
    fn relative_locations_hang_off_install_root() {
        let bin = Path::new("/opt/contextqa/bin");
        let backend = BackendConfig::resolve(&AppConfig::default(), bin, |_| None);
        assert_eq!(backend.script_dir, PathBuf::from("/opt/contextqa/bin/scripts"));

        let store = StoreConfig::resolve(
            &AppConfig::default(),
            bin,
            env_from(&[("DB_DIR", "data"), ("DB_NAME", "bot.db")]),
        )
        .expect("resolve");
        assert_eq!(store.path, PathBuf::from("/opt/contextqa/bin/data/bot.db"));
    }

    #[test]
    fn absolute_locations_ignore_install_root() {
        let mut config = AppConfig::default();
        config.backend.script_dir = "/usr/share/contextqa/scripts".into();
        let backend = BackendConfig::resolve(&config, root(), |_| None);
        assert_eq!(backend.script_dir, PathBuf::from("/usr/share/contextqa/scripts"));
    }

    #[test]
    fn install_dir_is_absolute() {
        let dir = install_dir().expect("install dir");
        assert!(dir.is_absolute());
    }

    #[test]
    fn workspace_mode_selects_root() {
        let mut config = AppConfig::default();
        let production = WorkspaceConfig::resolve(&config);
        assert!(!production.retain);
        assert_eq!(production.root, std::env::temp_dir());

        config.workspace.retain = true;
        config.workspace.debug_root = "/tmp/inspect".into();
        let debug = WorkspaceConfig::resolve(&config);
        assert!(debug.retain);
        assert_eq!(debug.root, PathBuf::from("/tmp/inspect"));
    }
}
