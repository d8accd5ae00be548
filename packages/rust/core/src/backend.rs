//! External analysis backend invocation.
//!
//! The backend is a set of scripts run by a configured interpreter. Each call
//! copies the script into the run's working directory and launches
//! `<interpreter> <script> --key=value ...` directly, without a shell.
//! Success is judged by the caller from the files the backend leaves behind;
//! the exit status is only logged.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use contextqa_shared::{BackendConfig, ContextQaError, DocumentFormat, Result};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Directory the help-format decompiler writes into.
pub const DECOMPILED_DIR: &str = "decompiled";

/// Backend scripts known to the pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendScript {
    IngestText,
    IngestHtmlHelp,
    IngestPdf,
    Answer,
    Similarity,
}

impl BackendScript {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::IngestText => "create_storage_from_txt.py",
            Self::IngestHtmlHelp => "create_storage_from_htms.py",
            Self::IngestPdf => "create_storage_from_pdf.py",
            Self::Answer => "load_and_ask.py",
            Self::Similarity => "load_and_find_similarity.py",
        }
    }

    /// Ingestion script for a document format.
    pub fn for_format(format: DocumentFormat) -> Self {
        match format {
            DocumentFormat::PlainText => Self::IngestText,
            DocumentFormat::HtmlHelp => Self::IngestHtmlHelp,
            DocumentFormat::Pdf => Self::IngestPdf,
        }
    }
}

impl std::fmt::Display for BackendScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Captured result of one backend run.
#[derive(Debug, Clone)]
pub struct BackendOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
}

/// Launches backend scripts and the help-format decompiler.
#[derive(Debug, Clone)]
pub struct BackendInvoker {
    config: BackendConfig,
}

impl BackendInvoker {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Run `script` inside `workdir` with `--key=value` arguments.
    ///
    /// Arguments are validated before anything is copied or launched.
    #[instrument(skip(self, args), fields(script = %script))]
    pub async fn invoke(
        &self,
        script: BackendScript,
        workdir: &Path,
        args: &[(&str, &str)],
    ) -> Result<BackendOutput> {
        let argv = build_argv(args)?;

        let interpreter = self.config.interpreter.as_ref().ok_or_else(|| {
            ContextQaError::backend_unavailable("interpreter path is not configured")
        })?;

        let source = self.config.script_dir.join(script.file_name());
        if !tokio::fs::metadata(&source)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Err(ContextQaError::backend_unavailable(format!(
                "script {} is not installed",
                script.file_name()
            )));
        }

        let staged = workdir.join(script.file_name());
        tokio::fs::copy(&source, &staged)
            .await
            .map_err(|e| ContextQaError::io(&staged, e))?;

        debug!(interpreter = ?interpreter, args = argv.len(), "launching backend");

        let output = Command::new(interpreter)
            .arg(script.file_name())
            .args(&argv)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ContextQaError::backend_unavailable(format!("failed to launch interpreter: {e}"))
            })?;

        let result = BackendOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        };

        if output.status.success() {
            info!(stdout_bytes = result.stdout.len(), "backend finished");
        } else {
            warn!(status = ?result.status, stderr = %result.stderr.trim(), "backend exited with failure");
        }
        Ok(result)
    }

    /// Decompile a help-format file staged in `sources_dir`.
    ///
    /// Runs `<decompiler> <file_name> decompiled` and returns the output tree.
    #[instrument(skip(self, sources_dir))]
    pub async fn decompile(&self, sources_dir: &Path, file_name: &str) -> Result<PathBuf> {
        check_value("file", file_name)?;

        let output = Command::new(&self.config.decompiler)
            .arg(file_name)
            .arg(DECOMPILED_DIR)
            .current_dir(sources_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ContextQaError::backend_unavailable(format!("failed to launch decompiler: {e}"))
            })?;

        if !output.status.success() {
            warn!(status = ?output.status.code(), "decompiler exited with failure");
        }

        let decompiled = sources_dir.join(DECOMPILED_DIR);
        if !decompiled.is_dir() {
            return Err(ContextQaError::staging("decompiler produced no output"));
        }
        Ok(decompiled)
    }
}

/// Turn `(key, value)` pairs into `--key=value` arguments.
///
/// The `=` form keeps values that start with `-` from being read as options.
fn build_argv(args: &[(&str, &str)]) -> Result<Vec<String>> {
    args.iter()
        .map(|(key, value)| {
            check_key(key)?;
            check_value(key, value)?;
            Ok(format!("--{key}={value}"))
        })
        .collect()
}

fn check_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ContextQaError::unsafe_argument(format!(
            "invalid argument name {key:?}"
        )))
    }
}

fn check_value(key: &str, value: &str) -> Result<()> {
    if value
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t')
    {
        return Err(ContextQaError::unsafe_argument(format!(
            "value for {key} contains control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_names_follow_format() {
        assert_eq!(
            BackendScript::for_format(DocumentFormat::PlainText).file_name(),
            "create_storage_from_txt.py"
        );
        assert_eq!(
            BackendScript::for_format(DocumentFormat::HtmlHelp).file_name(),
            "create_storage_from_htms.py"
        );
        assert_eq!(
            BackendScript::for_format(DocumentFormat::Pdf).file_name(),
            "create_storage_from_pdf.py"
        );
    }

    #[test]
    fn argv_uses_equals_form() {
        let argv = build_argv(&[("query", "--help me; rm -rf /"), ("key", "sk-x")]).unwrap();
        assert_eq!(argv, vec!["--query=--help me; rm -rf /", "--key=sk-x"]);
    }

    #[test]
    fn argv_allows_newlines_and_tabs() {
        assert!(build_argv(&[("query", "line one\n\tline two")]).is_ok());
    }

    #[test]
    fn argv_rejects_control_characters() {
        for bad in ["a\0b", "esc\u{1b}[2J", "cr\rlf"] {
            let err = build_argv(&[("query", bad)]).unwrap_err();
            assert_eq!(err.reason_code(), "unsafe_argument");
        }
    }

    #[test]
    fn argv_rejects_odd_keys() {
        for bad in ["", "Query", "a b", "x=y", "-k"] {
            assert!(build_argv(&[(bad, "v")]).is_err(), "key {bad:?}");
        }
    }

    #[tokio::test]
    async fn missing_interpreter_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = BackendInvoker::new(BackendConfig {
            interpreter: None,
            script_dir: tmp.path().to_path_buf(),
            decompiler: PathBuf::from("extract_chmLib"),
        });
        let err = invoker
            .invoke(BackendScript::Answer, tmp.path(), &[("query", "q")])
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "backend_unavailable");
    }

    #[tokio::test]
    async fn missing_script_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = BackendInvoker::new(BackendConfig {
            interpreter: Some(PathBuf::from("/bin/sh")),
            script_dir: tmp.path().join("nowhere"),
            decompiler: PathBuf::from("extract_chmLib"),
        });
        let err = invoker
            .invoke(BackendScript::Answer, tmp.path(), &[("query", "q")])
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "backend_unavailable");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invoke_copies_script_and_captures_stdout() {
        let scripts = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::write(
            scripts.path().join("load_and_ask.py"),
            "for arg in \"$@\"; do printf '%s|' \"$arg\"; done\n",
        )
        .unwrap();

        let invoker = BackendInvoker::new(BackendConfig {
            interpreter: Some(PathBuf::from("/bin/sh")),
            script_dir: scripts.path().to_path_buf(),
            decompiler: PathBuf::from("extract_chmLib"),
        });
        let out = invoker
            .invoke(
                BackendScript::Answer,
                work.path(),
                &[("query", "what's $HOME"), ("key", "sk-1")],
            )
            .await
            .unwrap();

        assert_eq!(out.stdout, "--query=what's $HOME|--key=sk-1|");
        assert_eq!(out.status, Some(0));
        assert!(work.path().join("load_and_ask.py").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn decompile_without_output_is_staging_error() {
        let work = tempfile::tempdir().unwrap();
        let invoker = BackendInvoker::new(BackendConfig {
            interpreter: Some(PathBuf::from("/bin/sh")),
            script_dir: work.path().to_path_buf(),
            decompiler: PathBuf::from("true"),
        });
        let err = invoker
            .decompile(work.path(), "manual.chm")
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "staging_error");
    }
}
