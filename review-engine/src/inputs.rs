//! Inbound collaborator seams.
//!
//! The engine consumes file contents, AST snippets and editor diagnostics
//! from the surrounding application. Each seam is a small sync trait with a
//! filesystem-backed (or no-op) default, so tests and hosts can plug their
//! own without touching the pipeline.

use std::io;
use std::path::Path;

/// Loads the current text of a file.
pub trait FileLoader {
    fn load(&self, path: &Path) -> io::Result<String>;
}

/// Filesystem-backed loader used by the default wiring.
pub struct FsFileLoader;

impl FileLoader for FsFileLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// One AST-extracted snippet of a file.
#[derive(Debug, Clone)]
pub struct AstSnippet {
    /// Inclusive 1-based start line.
    pub start_line: usize,
    /// Inclusive 1-based end line.
    pub end_line: usize,
    /// Snippet source text.
    pub source: String,
}

/// Provides AST snippets for a file, when an extractor is available.
pub trait SnippetProvider {
    /// `None` when the file has no snippet extraction (fall back to whole-file).
    fn snippets(&self, path: &Path) -> Option<Vec<AstSnippet>>;
}

/// Provider that never yields snippets; every unit stays whole-file.
pub struct NoSnippets;

impl SnippetProvider for NoSnippets {
    fn snippets(&self, _path: &Path) -> Option<Vec<AstSnippet>> {
        None
    }
}

/// An existing editor/compiler diagnostic on a line.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// 1-based line.
    pub line: usize,
    pub message: String,
}

/// Supplies existing diagnostics so same-line AI findings can be dropped.
pub trait DiagnosticsProvider {
    fn diagnostics(&self, path: &Path) -> Vec<Diagnostic>;
}

/// Provider with no known diagnostics.
pub struct NoDiagnostics;

impl DiagnosticsProvider for NoDiagnostics {
    fn diagnostics(&self, _path: &Path) -> Vec<Diagnostic> {
        Vec::new()
    }
}

/// Bundle of the inbound seams, passed through the pipeline together.
pub struct Collaborators<'a> {
    pub loader: &'a dyn FileLoader,
    pub snippets: &'a dyn SnippetProvider,
    pub diagnostics: &'a dyn DiagnosticsProvider,
}
