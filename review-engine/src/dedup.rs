//! Near-duplicate collapsing for AI-sourced findings.
//!
//! Strategy (cheap → wider):
//! 1) Exact pass: drop findings with an identical `(file, line, rule,
//!    message)` key, keeping the first.
//! 2) Same-line pass: findings sharing `(file, line)` whose messages score
//!    above the same-line threshold merge; the higher severity wins, ties
//!    keep the first-seen.
//! 3) Proximity pass: findings in the same file within a ± line window and
//!    above the (lower) proximity threshold merge; severity wins first,
//!    ties follow `same_severity_pick`.
//!
//! Only findings carrying [`AI_RULE`] enter the similarity passes; other
//! rules are untouched. All passes are idempotent: survivors are pairwise
//! dissimilar, so a second run changes nothing.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::{DedupConfig, SameSeverityPick};
use crate::types::{AI_RULE, Finding};

/// Collapses near-duplicates. Never increases any severity beyond the
/// maximum among the findings it merges (the winner of a merge is always
/// the max-severity member).
pub fn dedupe(mut findings: Vec<Finding>, cfg: &DedupConfig) -> Vec<Finding> {
    let before = findings.len();
    exact_pass(&mut findings);
    similarity_pass(&mut findings, cfg, Pass::SameLine);
    similarity_pass(&mut findings, cfg, Pass::Proximity);
    debug!("dedup: {} -> {} findings", before, findings.len());
    findings
}

fn exact_pass(findings: &mut Vec<Finding>) {
    let mut seen: HashSet<(String, usize, String, String)> = HashSet::new();
    findings.retain(|f| {
        seen.insert((
            f.file.clone(),
            f.line,
            f.rule.clone(),
            f.message.clone(),
        ))
    });
}

#[derive(Clone, Copy, PartialEq)]
enum Pass {
    SameLine,
    Proximity,
}

fn similarity_pass(findings: &mut Vec<Finding>, cfg: &DedupConfig, pass: Pass) {
    let threshold = match pass {
        Pass::SameLine => cfg.same_line_threshold,
        Pass::Proximity => cfg.proximity_threshold,
    };

    // Candidate indices per file, AI rule only, in line order (stable on ties).
    let mut by_file: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, f) in findings.iter().enumerate() {
        if f.rule == AI_RULE {
            by_file.entry(f.file.as_str()).or_default().push(i);
        }
    }
    let mut groups: Vec<Vec<usize>> = by_file.into_values().collect();
    for g in &mut groups {
        g.sort_by_key(|&i| (findings[i].line, i));
    }

    let mut keep = vec![true; findings.len()];
    for group in &groups {
        for (a_pos, &a) in group.iter().enumerate() {
            if !keep[a] {
                continue;
            }
            for &b in &group[a_pos + 1..] {
                if !keep[a] {
                    break;
                }
                if !keep[b] {
                    continue;
                }
                let (fa, fb) = (&findings[a], &findings[b]);
                let close = match pass {
                    Pass::SameLine => fa.line == fb.line,
                    Pass::Proximity => fa.line.abs_diff(fb.line) <= cfg.window,
                };
                if !close {
                    continue;
                }
                if similarity(&fa.message, &fb.message) < threshold {
                    continue;
                }
                let winner_is_a = pick_winner(fa, fb, pass, cfg.same_severity_pick);
                if winner_is_a {
                    keep[b] = false;
                } else {
                    keep[a] = false;
                }
            }
        }
    }

    let mut idx = 0;
    findings.retain(|_| {
        let kept = keep[idx];
        idx += 1;
        kept
    });
}

/// True when `a` should survive the merge of `a` and `b` (`a` is first-seen).
fn pick_winner(a: &Finding, b: &Finding, pass: Pass, pick: SameSeverityPick) -> bool {
    if a.severity.rank() != b.severity.rank() {
        return a.severity.rank() > b.severity.rank();
    }
    match pass {
        Pass::SameLine => true,
        Pass::Proximity => match pick {
            SameSeverityPick::First => true,
            SameSeverityPick::Latest => a.line >= b.line,
        },
    }
}

/// Dice coefficient over alphanumeric token sets. Empty token sets fall back
/// to trimmed case-insensitive equality.
fn similarity(a: &str, b: &str) -> f32 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return if a.trim().eq_ignore_ascii_case(b.trim()) {
            1.0
        } else {
            0.0
        };
    }
    let inter = ta.intersection(&tb).count();
    (2.0 * inter as f32) / ((ta.len() + tb.len()) as f32)
}

fn tokens(s: &str) -> HashSet<String> {
    s.to_ascii_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn finding(file: &str, line: usize, message: &str, severity: Severity) -> Finding {
        Finding {
            file: file.into(),
            line,
            column: 0,
            message: message.into(),
            rule: AI_RULE.into(),
            severity,
            snippet: None,
            fingerprint: None,
            incremental: None,
            workspace_root: None,
        }
    }

    #[test]
    fn exact_duplicates_collapse() {
        let cfg = DedupConfig::default();
        let out = dedupe(
            vec![
                finding("a.rs", 3, "unused variable total", Severity::Warning),
                finding("a.rs", 3, "unused variable total", Severity::Warning),
            ],
            &cfg,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn same_line_merge_keeps_higher_severity() {
        let cfg = DedupConfig::default();
        let out = dedupe(
            vec![
                finding("a.rs", 3, "possible null dereference of user", Severity::Warning),
                finding("a.rs", 3, "null dereference possible for user", Severity::Error),
            ],
            &cfg,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::Error);
    }

    #[test]
    fn dissimilar_same_line_findings_both_survive() {
        let cfg = DedupConfig::default();
        let out = dedupe(
            vec![
                finding("a.rs", 3, "unused variable total", Severity::Warning),
                finding("a.rs", 3, "missing error handling branch", Severity::Warning),
            ],
            &cfg,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn proximity_pass_merges_within_window_only() {
        let cfg = DedupConfig::default();
        let msg = "resource handle leaked before early return";
        let out = dedupe(
            vec![
                finding("a.rs", 10, msg, Severity::Warning),
                finding("a.rs", 12, msg, Severity::Warning),
                finding("a.rs", 30, msg, Severity::Warning),
            ],
            &cfg,
        );
        // 10 and 12 merge (window 2, Latest keeps line 12); 30 is out of range.
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|f| f.line == 12));
        assert!(out.iter().any(|f| f.line == 30));
    }

    #[test]
    fn same_severity_pick_first_keeps_lower_line() {
        let cfg = DedupConfig {
            same_severity_pick: SameSeverityPick::First,
            ..DedupConfig::default()
        };
        let msg = "resource handle leaked before early return";
        let out = dedupe(
            vec![
                finding("a.rs", 10, msg, Severity::Warning),
                finding("a.rs", 12, msg, Severity::Warning),
            ],
            &cfg,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line, 10);
    }

    #[test]
    fn non_ai_rules_are_untouched() {
        let cfg = DedupConfig::default();
        let mut a = finding("a.rs", 3, "naming convention violated here", Severity::Warning);
        a.rule = "style.naming".into();
        let mut b = finding("a.rs", 3, "naming convention violated here now", Severity::Warning);
        b.rule = "style.naming".into();
        let out = dedupe(vec![a, b], &cfg);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let cfg = DedupConfig::default();
        let input = vec![
            finding("a.rs", 3, "possible null dereference of user", Severity::Warning),
            finding("a.rs", 3, "null dereference possible for user", Severity::Error),
            finding("a.rs", 5, "possible null dereference of user input", Severity::Warning),
            finding("b.rs", 1, "unused import left behind", Severity::Info),
        ];
        let once = dedupe(input, &cfg);
        let twice = dedupe(once.clone(), &cfg);
        assert_eq!(once, twice);
    }

    #[test]
    fn merged_severity_never_exceeds_members_max() {
        let cfg = DedupConfig::default();
        let out = dedupe(
            vec![
                finding("a.rs", 3, "possible data race on counter", Severity::Warning),
                finding("a.rs", 3, "data race possible on counter", Severity::Warning),
            ],
            &cfg,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::Warning);
    }
}
