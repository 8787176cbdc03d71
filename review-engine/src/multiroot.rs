//! Multi-root concurrency coordinator.
//!
//! Fans the per-root pipeline out across workspace roots under one global
//! concurrency ceiling, attributes every finding to its origin root, keeps
//! suppression lookups isolated per root, and merges the per-root results:
//! `passed` is the logical AND, finding lists concatenate in completion
//! order. This is the only component aware of multiple roots.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::config::RunContext;
use crate::errors::EngineResult;
use crate::exec::{AnalysisBackend, StatsSnapshot};
use crate::inputs::Collaborators;
use crate::suppress::SuppressionStore;
use crate::types::{Finding, Severity};
use crate::{RootReview, run_root_review};

/// One candidate root plus the changed files to review inside it.
#[derive(Debug, Clone)]
pub struct RootRequest {
    pub root: PathBuf,
    pub changed: Vec<PathBuf>,
}

/// Per-root result after attribution and suppression filtering.
#[derive(Debug)]
pub struct RootOutcome {
    pub root: PathBuf,
    /// True when the root yielded no error-severity findings.
    pub passed: bool,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub infos: Vec<Finding>,
    /// Findings hidden by this root's suppression store.
    pub suppressed: usize,
    pub stats: StatsSnapshot,
}

/// Merged result across all reviewed roots.
#[derive(Debug, Default)]
pub struct MultiRootOutcome {
    pub passed: bool,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub infos: Vec<Finding>,
    /// Reviewed roots in completion order.
    pub roots: Vec<PathBuf>,
}

/// Default repository marker: a `.git` directory (or file, for worktrees).
pub fn has_repo_marker(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Runs `worker` over `items` with at most `limit` concurrently in flight.
/// The limit is a property of the whole fan-out, not per item.
pub async fn run_with_global_concurrency<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    worker: F,
) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: std::future::Future<Output = R>,
{
    stream::iter(items.into_iter().map(worker))
        .buffer_unordered(limit.max(1))
        .collect()
        .await
}

/// Reviews every candidate root carrying a repository marker and merges the
/// per-root outcomes.
///
/// # Errors
/// Propagates invocation-level failures (store I/O, no batches producible);
/// batch-level failures have already degraded softly inside the executor.
pub async fn review_roots<B, P>(
    requests: Vec<RootRequest>,
    ctx: &RunContext,
    backend: &B,
    io: &Collaborators<'_>,
    is_repo_root: P,
) -> EngineResult<MultiRootOutcome>
where
    B: AnalysisBackend,
    P: Fn(&Path) -> bool,
{
    let (kept, skipped): (Vec<_>, Vec<_>) = requests
        .into_iter()
        .partition(|r| is_repo_root(&r.root));
    for req in &skipped {
        debug!(
            "multiroot: skipping {} (no repository marker)",
            req.root.display()
        );
    }
    info!(
        "multiroot: reviewing {} roots (limit {})",
        kept.len(),
        ctx.concurrency
    );

    let results: Vec<EngineResult<RootOutcome>> =
        run_with_global_concurrency(kept, ctx.concurrency, |req| {
            review_one_root(req, ctx, backend, io)
        })
        .await;

    let mut merged = MultiRootOutcome {
        passed: true,
        ..MultiRootOutcome::default()
    };
    for result in results {
        let outcome = result?;
        merged.passed &= outcome.passed;
        merged.errors.extend(outcome.errors);
        merged.warnings.extend(outcome.warnings);
        merged.infos.extend(outcome.infos);
        merged.roots.push(outcome.root);
    }
    Ok(merged)
}

async fn review_one_root<B: AnalysisBackend>(
    req: RootRequest,
    ctx: &RunContext,
    backend: &B,
    io: &Collaborators<'_>,
) -> EngineResult<RootOutcome> {
    let root_ctx = ctx.for_root(req.root.clone());
    let RootReview {
        mut findings,
        stats,
    } = run_root_review(&req.changed, &root_ctx, backend, io).await?;

    // Attribution happens exactly once, here; never altered downstream.
    let root_tag = req.root.to_string_lossy().to_string();
    for f in &mut findings {
        f.workspace_root = Some(root_tag.clone());
    }

    // This store never reads or writes another root's entries.
    let store = SuppressionStore::load(&req.root).await?;
    let suppressed = store.filter(&mut findings);

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut infos = Vec::new();
    for f in findings {
        match f.severity {
            Severity::Error => errors.push(f),
            Severity::Warning => warnings.push(f),
            Severity::Info => infos.push(f),
        }
    }
    let passed = errors.is_empty();
    debug!(
        "multiroot: {} done (passed={}, suppressed={})",
        req.root.display(),
        passed,
        suppressed
    );

    Ok(RootOutcome {
        root: req.root,
        passed,
        errors,
        warnings,
        infos,
        suppressed,
        stats,
    })
}
