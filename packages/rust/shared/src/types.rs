//! Core domain types shared by the store, the pipelines and the router.

use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Stable identity of a requester; owner key for credentials and documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

// ---------------------------------------------------------------------------
// DocumentRef
// ---------------------------------------------------------------------------

/// A document reference as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Transport-specific file identifier (URL or local path).
    pub file_id: String,
    /// Declared media type, e.g. `text/plain`.
    pub media_type: String,
    /// Original file name as the user uploaded it.
    pub file_name: String,
}

impl DocumentRef {
    /// The original file name reduced to its final path component.
    ///
    /// Returns `None` when nothing usable remains (empty, `.`, `..`).
    pub fn safe_file_name(&self) -> Option<String> {
        let normalized = self.file_name.replace('\\', "/");
        let name = Path::new(&normalized).file_name()?.to_str()?.trim();
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }
        Some(name.to_string())
    }
}

// ---------------------------------------------------------------------------
// DocumentFormat
// ---------------------------------------------------------------------------

/// Supported document formats, each with its own ingestion script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    PlainText,
    /// Compiled HTML help archive; decompiled before ingestion.
    HtmlHelp,
    Pdf,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 3] = [Self::PlainText, Self::HtmlHelp, Self::Pdf];

    /// Resolve a declared media type. Parameters (`; charset=...`) are ignored.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/plain" => Some(Self::PlainText),
            "application/vnd.ms-htmlhelp" => Some(Self::HtmlHelp),
            "application/pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Guess a format from a file extension (used by the local transport).
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::PlainText),
            "chm" => Some(Self::HtmlHelp),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            Self::PlainText => "text/plain",
            Self::HtmlHelp => "application/vnd.ms-htmlhelp",
            Self::Pdf => "application/pdf",
        }
    }

    /// File extension shown in the supported-formats listing.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::PlainText => "txt",
            Self::HtmlHelp => "chm",
            Self::Pdf => "pdf",
        }
    }
}
