//! Core data model shared across the pipeline.

use serde::{Deserialize, Serialize};

/// Rule id stamped on findings produced by the analysis backend.
///
/// The deduplicator only touches findings carrying this rule; findings from
/// other sources (static checks, linters) pass through untouched.
pub const AI_RULE: &str = "ai.review";

/// Severity of a reported finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Numeric rank used for comparisons (higher is more severe).
    pub fn rank(self) -> u8 {
        match self {
            Severity::Error => 3,
            Severity::Warning => 2,
            Severity::Info => 1,
        }
    }
}

/// Where a review unit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOrigin {
    /// The whole file is the unit.
    WholeFile,
    /// One AST-extracted snippet of a file.
    AstSnippet,
}

/// One piece of source slated for analysis.
///
/// Built by the caller (file loader or AST slicer); immutable once built and
/// consumed exactly once by the planner.
#[derive(Debug, Clone)]
pub struct ReviewUnit {
    /// Repo-relative or absolute file path, as the caller presented it.
    pub file_path: String,
    /// Current file text, or the snippet source for AST units.
    pub content: String,
    /// Inclusive 1-based line range for AST-snippet units.
    pub line_range: Option<(usize, usize)>,
    /// Whole file vs. AST snippet.
    pub origin: UnitOrigin,
}

impl ReviewUnit {
    /// Builds a whole-file unit.
    pub fn whole_file(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            line_range: None,
            origin: UnitOrigin::WholeFile,
        }
    }

    /// Builds an AST-snippet unit covering `start_line..=end_line`.
    pub fn snippet(
        file_path: impl Into<String>,
        content: impl Into<String>,
        start_line: usize,
        end_line: usize,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            line_range: Some((start_line, end_line)),
            origin: UnitOrigin::AstSnippet,
        }
    }
}

/// One `(path, content)` entry inside a batch.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub path: String,
    pub content: String,
}

/// One outbound request's worth of units.
///
/// Ordered and non-empty; the same path may appear in more than one batch
/// (a single file's snippets can exceed one batch's budget), but a given
/// unit instance lands in exactly one batch.
#[derive(Debug, Clone)]
pub struct Batch {
    pub files: Vec<BatchFile>,
}

impl Batch {
    /// Splits the batch in half by file count. Caller ensures `files.len() > 1`.
    pub fn split(self) -> (Batch, Batch) {
        let mid = self.files.len() / 2;
        let mut files = self.files;
        let right = files.split_off(mid.max(1));
        (Batch { files }, Batch { files: right })
    }
}

/// A single reported issue, as it leaves the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// File the finding belongs to.
    pub file: String,
    /// 1-based line.
    pub line: usize,
    /// 0-based column.
    pub column: usize,
    /// Human-readable message.
    pub message: String,
    /// Rule id; backend findings carry [`AI_RULE`].
    pub rule: String,
    /// Effective severity (post-policy).
    pub severity: Severity,
    /// Text the backend quoted; used to relocate the line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Content-derived identity used for suppression lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// True when the finding sits inside a changed range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental: Option<bool>,
    /// Root the finding was produced for; set once at aggregation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,
}
