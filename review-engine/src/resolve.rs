//! Position and severity resolution.
//!
//! Pure functions that (a) relocate a reported snippet to a line/column in
//! the file's current content and (b) reconcile a reported severity against
//! the configured policy action. Both are total: resolution falls back to
//! the reported position, severity mapping covers the whole 3×3 space.

use crate::config::PolicyAction;
use crate::types::{Finding, Severity};

/// Normalizes all line endings to `\n` before any line-based search.
pub fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Locates `snippet` in `content` and returns `(line, column)`: line is
/// 1-based, column is the 0-based offset of the first character of the
/// trimmed snippet text within its line.
///
/// The search is a trimmed exact match per line, using the snippet's first
/// non-empty line as the needle. On no match the reported position is
/// returned verbatim.
pub fn resolve_position(
    content: &str,
    snippet: &str,
    reported: (usize, usize),
) -> (usize, usize) {
    let needle = match snippet.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(n) => n,
        None => return reported,
    };

    for (idx, line) in content.lines().enumerate() {
        if line.trim() == needle {
            let column = line.chars().take_while(|c| c.is_whitespace()).count();
            return (idx + 1, column);
        }
    }
    reported
}

/// Maps a reported severity through the configured policy action.
///
/// - `BlockCommit` never lets a finding fall below warning;
/// - `Warning` caps errors down and floors infos up to warning;
/// - `Log` caps everything to info.
pub fn map_severity(reported: Severity, action: PolicyAction) -> Severity {
    match action {
        PolicyAction::BlockCommit => match reported {
            Severity::Error => Severity::Error,
            Severity::Warning | Severity::Info => Severity::Warning,
        },
        PolicyAction::Warning => Severity::Warning,
        PolicyAction::Log => Severity::Info,
    }
}

/// Applies position and severity resolution to one finding in place.
///
/// `content` is the normalized current text of the finding's file, when the
/// file could be loaded. With `use_diff_line_numbers` the snippet search is
/// skipped entirely and the reported position is trusted.
pub fn resolve_finding(
    finding: &mut Finding,
    content: Option<&str>,
    action: PolicyAction,
    use_diff_line_numbers: bool,
) {
    if !use_diff_line_numbers {
        if let (Some(content), Some(snippet)) = (content, finding.snippet.as_deref()) {
            let (line, column) =
                resolve_position(content, snippet, (finding.line, finding.column));
            finding.line = line;
            finding.column = column;
        }
    }
    finding.severity = map_severity(finding.severity, action);
}
