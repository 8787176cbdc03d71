//! Core engine of the AI review backend.
//!
//! Single high-level function to run the whole pipeline for one workspace
//! root (plus a multi-root coordinator on top):
//!
//! 1) **Step 1 — Units**
//!    - Load changed files through the [`inputs::FileLoader`] seam
//!    - Slice into AST-snippet units when a provider offers them,
//!      whole-file units otherwise; unreadable files are skipped
//!
//! 2) **Step 2 — Batch planning**
//!    - Group units into ordered batches under the configured budget
//!      (count- or snippet-based, even or contiguous splitting)
//!
//! 3) **Step 3 — Execution**
//!    - Run batches through the bounded worker pool, with pre-send
//!      bisection, size-rejection degradation, truncation continuations
//!      and soft failure accounting (see [`exec`])
//!
//! 4) **Step 4 — Post-processing**
//!    - Relocate snippet positions, reconcile severity against policy
//!    - Drop AI findings that duplicate existing diagnostics
//!    - Collapse near-duplicates, assign fingerprints, sort
//!
//! The pipeline uses `tracing` for debug logging and avoids `async-trait`
//! and heap trait objects on the hot path: the backend seam is a plain
//! RPITIT trait, provider dispatch is enum-based in `llm-gateway`.

pub mod config;
pub mod dedup;
pub mod errors;
pub mod exec;
pub mod inputs;
pub mod multiroot;
pub mod plan;
pub mod prompt;
pub mod resolve;
pub mod response;
pub mod suppress;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use config::{BatchMode, RunContext};
use errors::{EngineResult, Error};
use exec::{AnalysisBackend, RunStats, StatsSnapshot};
use inputs::Collaborators;
use resolve::normalize_newlines;
use types::{AI_RULE, Finding, ReviewUnit};

/// Output of one per-root pipeline run.
#[derive(Debug)]
pub struct RootReview {
    /// All findings for the root, deterministic order, all severities.
    pub findings: Vec<Finding>,
    /// Executor counters for diagnostics.
    pub stats: StatsSnapshot,
}

/// Runs steps 1–4 for a single root and returns its findings.
///
/// Unit-level problems (unreadable files) skip the unit and continue; batch
/// failures degrade softly inside the executor. The only hard failure is an
/// invocation-level one: units existed but no batch could be produced.
pub async fn run_root_review<B: AnalysisBackend>(
    changed: &[PathBuf],
    ctx: &RunContext,
    backend: &B,
    io: &Collaborators<'_>,
) -> EngineResult<RootReview> {
    let t0 = Instant::now();

    // ---------------------------
    // Step 1: review units
    // ---------------------------
    let mut units: Vec<ReviewUnit> = Vec::new();
    let mut contents: HashMap<String, String> = HashMap::new();
    let mut changed_ranges: HashMap<String, Vec<(usize, usize)>> = HashMap::new();

    for path in changed {
        let text = match io.loader.load(path) {
            Ok(t) => normalize_newlines(&t),
            Err(e) => {
                warn!("review: skipping unreadable {}: {}", path.display(), e);
                continue;
            }
        };
        let key = path.to_string_lossy().to_string();
        contents.insert(key.clone(), text.clone());

        match ctx.mode {
            BatchMode::SnippetBased => match io.snippets.snippets(path) {
                Some(snips) if !snips.is_empty() => {
                    for s in snips {
                        changed_ranges
                            .entry(key.clone())
                            .or_default()
                            .push((s.start_line, s.end_line));
                        units.push(ReviewUnit::snippet(
                            key.clone(),
                            s.source,
                            s.start_line,
                            s.end_line,
                        ));
                    }
                }
                _ => units.push(ReviewUnit::whole_file(key.clone(), text)),
            },
            BatchMode::CountBased => units.push(ReviewUnit::whole_file(key.clone(), text)),
        }
    }

    if units.is_empty() {
        info!("review: nothing to analyze under {}", ctx.root.display());
        return Ok(RootReview {
            findings: Vec::new(),
            stats: StatsSnapshot::default(),
        });
    }
    debug!("review: step1 built {} units", units.len());

    // ---------------------------
    // Step 2: batch planning
    // ---------------------------
    let unit_count = units.len();
    let budget = match ctx.mode {
        BatchMode::CountBased => ctx.files_per_batch,
        BatchMode::SnippetBased => ctx.snippet_budget,
    };
    let batches = plan::plan(units, ctx.mode, budget, ctx.strategy, ctx.weight_by);
    if batches.is_empty() {
        return Err(Error::NoBatches(unit_count));
    }
    debug!(
        "review: step2 planned {} batches from {} units",
        batches.len(),
        unit_count
    );

    // ---------------------------
    // Step 3: execution
    // ---------------------------
    let stats = RunStats::new();
    let mut findings = exec::execute(batches, backend, ctx, &stats).await;
    debug!("review: step3 executed, {} raw findings", findings.len());

    // ---------------------------
    // Step 4: post-processing
    // ---------------------------
    for f in &mut findings {
        let content = contents.get(&f.file).map(String::as_str);
        resolve::resolve_finding(f, content, ctx.action, ctx.use_diff_line_numbers);
        if let Some(ranges) = changed_ranges.get(&f.file) {
            f.incremental = Some(ranges.iter().any(|&(s, e)| f.line >= s && f.line <= e));
        }
    }

    // Existing diagnostics win over AI findings on the same line.
    let mut diag_lines: HashMap<String, HashSet<usize>> = HashMap::new();
    for f in &findings {
        if f.rule == AI_RULE && !diag_lines.contains_key(&f.file) {
            let lines = io
                .diagnostics
                .diagnostics(Path::new(&f.file))
                .into_iter()
                .map(|d| d.line)
                .collect();
            diag_lines.insert(f.file.clone(), lines);
        }
    }
    let before = findings.len();
    findings.retain(|f| {
        f.rule != AI_RULE
            || !diag_lines
                .get(&f.file)
                .map(|lines| lines.contains(&f.line))
                .unwrap_or(false)
    });
    if findings.len() < before {
        debug!(
            "review: {} findings dropped for clashing with diagnostics",
            before - findings.len()
        );
    }

    findings = dedup::dedupe(findings, &ctx.dedup);
    suppress::ensure_fingerprints(&mut findings);
    findings.sort_by(|a, b| {
        (&a.file, a.line, a.column, &a.message).cmp(&(&b.file, b.line, b.column, &b.message))
    });

    let snapshot = stats.snapshot();
    info!(
        "review: {} findings for {} ({} requests, {} dropped batches) in {} ms",
        findings.len(),
        ctx.root.display(),
        snapshot.requests,
        snapshot.dropped_batches,
        t0.elapsed().as_millis()
    );

    Ok(RootReview {
        findings,
        stats: snapshot,
    })
}

// -----------------------------------------------------------------------------
// Convenience re-exports for downstream users
// -----------------------------------------------------------------------------

pub use config::{
    BatchMode as ReviewBatchMode, PolicyAction as ReviewPolicyAction, RunContext as ReviewContext,
};
pub use exec::{AnalysisBackend as ReviewBackend, StatsSnapshot as ReviewStats};
pub use multiroot::{
    MultiRootOutcome as ReviewOutcome, RootRequest as ReviewRootRequest, has_repo_marker,
    review_roots,
};
pub use types::{Finding as ReviewFinding, Severity as ReviewSeverity};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SplitStrategy, WeightBy};
    use crate::inputs::{
        AstSnippet, Diagnostic, DiagnosticsProvider, FileLoader, SnippetProvider,
    };
    use crate::types::Severity;
    use llm_gateway::GatewayError;

    struct MapLoader {
        files: HashMap<String, String>,
    }

    impl FileLoader for MapLoader {
        fn load(&self, path: &Path) -> std::io::Result<String> {
            self.files
                .get(path.to_string_lossy().as_ref())
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))
        }
    }

    struct SlicedSnippets {
        per_file: usize,
    }

    impl SnippetProvider for SlicedSnippets {
        fn snippets(&self, _path: &Path) -> Option<Vec<AstSnippet>> {
            Some(
                (0..self.per_file)
                    .map(|i| AstSnippet {
                        start_line: i + 1,
                        end_line: i + 1,
                        source: format!("statement_{i}();"),
                    })
                    .collect(),
            )
        }
    }

    struct LineDiags {
        line: usize,
    }

    impl DiagnosticsProvider for LineDiags {
        fn diagnostics(&self, _path: &Path) -> Vec<Diagnostic> {
            vec![Diagnostic {
                line: self.line,
                message: "already reported".into(),
            }]
        }
    }

    struct NoDiags;

    impl DiagnosticsProvider for NoDiags {
        fn diagnostics(&self, _path: &Path) -> Vec<Diagnostic> {
            Vec::new()
        }
    }

    /// Answers each call with one finding anchored at the first snippet
    /// marker of the request (after the instruction block).
    struct MarkerBackend;

    impl AnalysisBackend for MarkerBackend {
        fn analyze(
            &self,
            prompt: &str,
        ) -> impl std::future::Future<Output = Result<String, GatewayError>> + Send {
            let file_pos = prompt.find("File: ").expect("file section");
            let tail = &prompt[file_pos..];
            let file = tail
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("File: "))
                .unwrap()
                .to_string();
            let marker = tail.find("lines ").expect("marker");
            let line: usize = tail[marker + 6..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap();
            let body = format!(
                "{{\"findings\":[{{\"file\":\"{file}\",\"line\":{line},\"column\":0,\
\"message\":\"chunk starts with issue at line {line}\",\"severity\":\"warning\"}}]}}"
            );
            async move { Ok(body) }
        }
    }

    #[tokio::test]
    async fn snippet_run_combines_per_chunk_results_without_loss() {
        let loader = MapLoader {
            files: HashMap::from([(
                "lib/widget.dart".to_string(),
                "main() {}\n".to_string(),
            )]),
        };
        let snips = SlicedSnippets { per_file: 60 };
        let diags = NoDiags;
        let io = Collaborators {
            loader: &loader,
            snippets: &snips,
            diagnostics: &diags,
        };

        let ctx = RunContext {
            mode: BatchMode::SnippetBased,
            snippet_budget: 25,
            strategy: SplitStrategy::Even,
            weight_by: WeightBy::SnippetCount,
            ..RunContext::default()
        };

        let review = run_root_review(
            &[PathBuf::from("lib/widget.dart")],
            &ctx,
            &MarkerBackend,
            &io,
        )
        .await
        .unwrap();

        // 60 snippets / budget 25, even → 3 chunks starting at 1, 21, 41.
        assert_eq!(review.stats.requests, 3);
        let lines: Vec<usize> = review.findings.iter().map(|f| f.line).collect();
        assert_eq!(lines, vec![1, 21, 41]);
        assert!(review.findings.iter().all(|f| f.incremental == Some(true)));
        assert!(
            review
                .findings
                .iter()
                .all(|f| f.severity == Severity::Warning)
        );
        assert!(review.findings.iter().all(|f| f.fingerprint.is_some()));
    }

    #[tokio::test]
    async fn unreadable_files_are_skipped_not_fatal() {
        let loader = MapLoader {
            files: HashMap::from([("ok.rs".to_string(), "fn ok() {}\n".to_string())]),
        };
        let snips = inputs::NoSnippets;
        let diags = NoDiags;
        let io = Collaborators {
            loader: &loader,
            snippets: &snips,
            diagnostics: &diags,
        };

        struct CleanBackend;
        impl AnalysisBackend for CleanBackend {
            fn analyze(
                &self,
                _prompt: &str,
            ) -> impl std::future::Future<Output = Result<String, GatewayError>> + Send {
                async { Ok("{\"findings\":[]}".to_string()) }
            }
        }

        let ctx = RunContext::default();
        let review = run_root_review(
            &[PathBuf::from("ok.rs"), PathBuf::from("gone.rs")],
            &ctx,
            &CleanBackend,
            &io,
        )
        .await
        .unwrap();

        assert!(review.findings.is_empty());
        assert_eq!(review.stats.requests, 1);
    }

    #[tokio::test]
    async fn same_line_diagnostics_suppress_ai_findings() {
        let loader = MapLoader {
            files: HashMap::from([(
                "lib/widget.dart".to_string(),
                "main() {}\n".to_string(),
            )]),
        };
        let snips = SlicedSnippets { per_file: 3 };
        let diags = LineDiags { line: 1 };
        let io = Collaborators {
            loader: &loader,
            snippets: &snips,
            diagnostics: &diags,
        };

        let ctx = RunContext {
            mode: BatchMode::SnippetBased,
            snippet_budget: 25,
            ..RunContext::default()
        };

        let review = run_root_review(
            &[PathBuf::from("lib/widget.dart")],
            &ctx,
            &MarkerBackend,
            &io,
        )
        .await
        .unwrap();

        // The single chunk's finding lands on line 1, which a diagnostic owns.
        assert!(review.findings.is_empty());
    }

    #[tokio::test]
    async fn empty_change_set_is_a_clean_noop() {
        let loader = MapLoader {
            files: HashMap::new(),
        };
        let snips = inputs::NoSnippets;
        let diags = NoDiags;
        let io = Collaborators {
            loader: &loader,
            snippets: &snips,
            diagnostics: &diags,
        };

        struct PanicBackend;
        impl AnalysisBackend for PanicBackend {
            fn analyze(
                &self,
                _prompt: &str,
            ) -> impl std::future::Future<Output = Result<String, GatewayError>> + Send {
                async { panic!("no calls expected") }
            }
        }

        let ctx = RunContext::default();
        let review = run_root_review(&[], &ctx, &PanicBackend, &io)
            .await
            .unwrap();
        assert!(review.findings.is_empty());
        assert_eq!(review.stats.requests, 0);
    }
}
