//! Model-response parsing and truncation recovery.
//!
//! The backend is asked for strict JSON, but long replies get cut off by
//! output limits and local models wrap payloads in fences or prose. Parsing
//! is therefore layered, cheap → tolerant:
//! 1) strip fences/prose, strict `serde_json` parse;
//! 2) on failure, decide whether the reply is truncated (unbalanced
//!    structure, or an unexpected-EOF parser error);
//! 3) repair unescaped backslashes (filesystem paths are the usual offender)
//!    and re-try strict parse when not truncated;
//! 4) best-effort scan for complete `{...}` finding objects, discarding the
//!    incomplete tail; zero salvageable objects is a hard
//!    [`ResponseError::NoExtractableContent`].

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::errors::ResponseError;
use crate::types::{AI_RULE, Finding, Severity};

lazy_static! {
    /// Parser messages that indicate the payload simply stopped early.
    static ref EOF_ERROR: Regex =
        Regex::new(r"(?i)eof while parsing|unexpected end of").expect("valid regex");
}

/// Outcome of parsing one raw response.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub findings: Vec<Finding>,
    /// True when the reply was cut off and a continuation call is warranted.
    pub truncated: bool,
}

/// Accepted payload shapes: the instructed wrapper object or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Wrapped { findings: Vec<RawFinding> },
    Bare(Vec<RawFinding>),
}

impl Payload {
    fn into_findings(self) -> Vec<Finding> {
        let raw = match self {
            Payload::Wrapped { findings } => findings,
            Payload::Bare(findings) => findings,
        };
        raw.into_iter().filter_map(RawFinding::into_finding).collect()
    }
}

/// Lenient finding shape as the backend reports it.
#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default, alias = "path")]
    file: String,
    #[serde(default)]
    line: usize,
    #[serde(default)]
    column: usize,
    #[serde(default)]
    message: String,
    #[serde(default)]
    rule: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    fingerprint: Option<String>,
}

impl RawFinding {
    /// A usable finding needs at least a file and a message.
    fn into_finding(self) -> Option<Finding> {
        if self.file.trim().is_empty() || self.message.trim().is_empty() {
            return None;
        }
        Some(Finding {
            file: self.file,
            line: self.line,
            column: self.column,
            message: self.message,
            rule: self.rule.unwrap_or_else(|| AI_RULE.to_string()),
            severity: parse_severity(self.severity.as_deref()),
            snippet: self.snippet,
            fingerprint: self.fingerprint,
            incremental: None,
            workspace_root: None,
        })
    }
}

/// Tolerant severity mapping; unknown labels land on `warning`.
fn parse_severity(raw: Option<&str>) -> Severity {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("error") | Some("high") | Some("critical") => Severity::Error,
        Some("info") | Some("low") | Some("note") | Some("hint") => Severity::Info,
        _ => Severity::Warning,
    }
}

/// Parses a raw service response into findings.
///
/// # Errors
/// [`ResponseError::NoExtractableContent`] when the payload is malformed and
/// not a single complete finding object can be recovered from it.
pub fn parse_response(raw: &str) -> Result<ParsedResponse, ResponseError> {
    let cleaned = strip_fences(raw);

    let first_err = match serde_json::from_str::<Payload>(&cleaned) {
        Ok(payload) => {
            return Ok(ParsedResponse {
                findings: payload.into_findings(),
                truncated: false,
            });
        }
        Err(e) => e,
    };

    let truncated = ends_unbalanced(&cleaned) || EOF_ERROR.is_match(&first_err.to_string());
    let repaired = repair_escapes(&cleaned);

    if !truncated {
        if let Ok(payload) = serde_json::from_str::<Payload>(&repaired) {
            return Ok(ParsedResponse {
                findings: payload.into_findings(),
                truncated: false,
            });
        }
    }

    let findings = extract_objects(&repaired);
    debug!(
        "response: strict parse failed (truncated={}), extracted {} complete objects",
        truncated,
        findings.len()
    );
    if findings.is_empty() {
        return Err(ResponseError::NoExtractableContent);
    }
    Ok(ParsedResponse {
        findings,
        truncated,
    })
}

/// Merges a continuation response into the prior partial findings.
///
/// A continuation that parsed cleanly is authoritative and replaces the
/// partial list outright; a dirty (still truncated) continuation is unioned
/// with the partial list, deduplicated by `(file, line, message)`.
/// Returns the merged findings and whether the result is complete.
pub fn merge_continuation(
    partial: Vec<Finding>,
    continuation: ParsedResponse,
) -> (Vec<Finding>, bool) {
    if !continuation.truncated {
        return (continuation.findings, true);
    }
    let mut seen: HashSet<(String, usize, String)> = partial
        .iter()
        .map(|f| (f.file.clone(), f.line, f.message.clone()))
        .collect();
    let mut merged = partial;
    for f in continuation.findings {
        if seen.insert((f.file.clone(), f.line, f.message.clone())) {
            merged.push(f);
        }
    }
    (merged, false)
}

/// Removes markdown fences, a BOM, and surrounding prose; keeps the outermost
/// JSON-looking span.
fn strip_fences(raw: &str) -> String {
    let no_fence = raw
        .replace("```json", "")
        .replace("```", "")
        .replace('\u{feff}', "");
    let no_fence = no_fence.trim();

    let start = no_fence.find(['{', '[']);
    let end = no_fence.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if s < e => no_fence[s..=e].to_string(),
        _ => no_fence.to_string(),
    }
}

/// True when the content stops mid-string or with open objects/arrays.
fn ends_unbalanced(s: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for c in s.chars() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => depth -= 1,
            _ => {}
        }
    }
    in_string || depth > 0
}

/// Doubles backslashes that do not begin a valid JSON escape (`\U` in
/// `C:\Users`, `\p` in `\path`), leaving real escapes alone.
fn repair_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\\' if in_string => match chars.peek() {
                Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                }
                _ => out.push_str("\\\\"),
            },
            _ => out.push(c),
        }
    }
    out
}

/// Scans for complete `{...}` fragments that parse as findings, skipping
/// wrapper objects and discarding the incomplete tail.
fn extract_objects(s: &str) -> Vec<Finding> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find('{') {
        let tail = &rest[start..];
        if let Some(frag) = balanced_fragment(tail) {
            if let Ok(raw) = serde_json::from_str::<RawFinding>(frag) {
                if let Some(finding) = raw.into_finding() {
                    out.push(finding);
                    rest = &rest[start + frag.len()..];
                    continue;
                }
            }
        }
        // Not a finding (wrapper, garbage, or unbalanced): step inside.
        rest = &rest[start + 1..];
    }
    out
}

/// Returns the balanced `{...}` fragment starting at byte 0 of `s`, honoring
/// strings and escapes; `None` when it never closes.
fn balanced_fragment(s: &str) -> Option<&str> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding_json(file: &str, line: usize, message: &str) -> String {
        format!(
            "{{\"file\":\"{file}\",\"line\":{line},\"column\":0,\
\"message\":\"{message}\",\"severity\":\"warning\"}}"
        )
    }

    #[test]
    fn strict_parse_of_wrapped_payload() {
        let raw = format!("{{\"findings\":[{}]}}", finding_json("a.rs", 3, "unused variable"));
        let parsed = parse_response(&raw).unwrap();
        assert!(!parsed.truncated);
        assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.findings[0].file, "a.rs");
        assert_eq!(parsed.findings[0].rule, AI_RULE);
    }

    #[test]
    fn bare_array_and_fenced_payloads_parse() {
        let raw = format!(
            "```json\n[{}]\n```",
            finding_json("b.rs", 7, "missing error check")
        );
        let parsed = parse_response(&raw).unwrap();
        assert!(!parsed.truncated);
        assert_eq!(parsed.findings[0].line, 7);
    }

    #[test]
    fn truncated_mid_array_salvages_complete_objects() {
        let raw = format!(
            "{{\"findings\":[{},{},{{\"file\":\"c.rs\",\"li",
            finding_json("a.rs", 1, "first"),
            finding_json("b.rs", 2, "second")
        );
        let parsed = parse_response(&raw).unwrap();
        assert!(parsed.truncated);
        let files: Vec<&str> = parsed.findings.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(files, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn truncation_with_nothing_salvageable_is_an_error() {
        let raw = "{\"findings\":[{\"file\":\"a.rs\",\"mess";
        assert!(matches!(
            parse_response(raw),
            Err(ResponseError::NoExtractableContent)
        ));
    }

    #[test]
    fn windows_paths_survive_escape_repair() {
        let raw = "{\"findings\":[{\"file\":\"C:\\Users\\dev\\main.rs\",\"line\":4,\
\"message\":\"hardcoded path\",\"severity\":\"error\"}]}";
        let parsed = parse_response(raw).unwrap();
        assert!(!parsed.truncated);
        assert_eq!(parsed.findings[0].file, "C:\\Users\\dev\\main.rs");
        assert_eq!(parsed.findings[0].severity, Severity::Error);
    }

    #[test]
    fn clean_continuation_replaces_partial() {
        let partial = parse_response(&format!(
            "{{\"findings\":[{},{{\"file\":\"x",
            finding_json("a.rs", 1, "first")
        ))
        .unwrap();
        assert!(partial.truncated);

        let full = format!(
            "{{\"findings\":[{},{}]}}",
            finding_json("a.rs", 1, "first"),
            finding_json("a.rs", 9, "second")
        );
        let continuation = parse_response(&full).unwrap();
        let (merged, complete) = merge_continuation(partial.findings, continuation);
        assert!(complete);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn dirty_continuation_unions_without_duplicates() {
        let partial = vec![
            parse_response(&format!("[{}]", finding_json("a.rs", 1, "first")))
                .unwrap()
                .findings,
        ]
        .concat();

        let continuation = parse_response(&format!(
            "{{\"findings\":[{},{},{{\"file\":\"t",
            finding_json("a.rs", 1, "first"),
            finding_json("a.rs", 5, "second")
        ))
        .unwrap();
        assert!(continuation.truncated);

        let (merged, complete) = merge_continuation(partial, continuation);
        assert!(!complete);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn two_step_recovery_matches_single_clean_payload() {
        let clean = format!(
            "{{\"findings\":[{},{}]}}",
            finding_json("a.rs", 1, "first"),
            finding_json("b.rs", 2, "second")
        );

        // Single clean pass.
        let direct = parse_response(&clean).unwrap().findings;

        // Truncated pass followed by a clean continuation of the same payload.
        let cut = &clean[..clean.len() - 20];
        let partial = parse_response(cut).unwrap();
        assert!(partial.truncated);
        let (merged, complete) =
            merge_continuation(partial.findings, parse_response(&clean).unwrap());

        assert!(complete);
        assert_eq!(merged, direct);
    }

    #[test]
    fn severity_labels_are_tolerated() {
        assert_eq!(parse_severity(Some("HIGH")), Severity::Error);
        assert_eq!(parse_severity(Some("note")), Severity::Info);
        assert_eq!(parse_severity(Some("weird")), Severity::Warning);
        assert_eq!(parse_severity(None), Severity::Warning);
    }
}
