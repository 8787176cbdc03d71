//! Per-invocation run configuration.
//!
//! [`RunContext`] is created once at the start of a review invocation, read
//! everywhere, and discarded at completion. All knobs are env-overridable in
//! the `REVIEW_*` namespace with conservative defaults.

use std::path::PathBuf;

/// How review units are grouped into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Fixed number of whole files per batch.
    CountBased,
    /// Per-file snippet pools split under a weight budget.
    SnippetBased,
}

/// How a snippet pool is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy {
    /// Minimum number of equal-sized chunks that fit the budget.
    Even,
    /// Greedy in-order fill up to the budget.
    Contiguous,
}

/// What a snippet weighs when packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightBy {
    /// Each snippet weighs 1.
    SnippetCount,
    /// A snippet weighs its character count.
    Chars,
}

/// Configured policy action reconciled against reported severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Findings gate the commit; nothing drops below warning.
    BlockCommit,
    /// Everything is reported as a warning.
    Warning,
    /// Everything is informational.
    Log,
}

/// Tie-break when merged findings share a severity (proximity pass).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSeverityPick {
    /// Keep the finding with the highest line.
    Latest,
    /// Keep the first-seen finding.
    First,
}

/// Dedup pass thresholds and window.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Similarity threshold for findings on the same line.
    pub same_line_threshold: f32,
    /// Similarity threshold for findings within the line window.
    pub proximity_threshold: f32,
    /// Line window (±) for the proximity pass.
    pub window: usize,
    /// Severity tie-break for the proximity pass.
    pub same_severity_pick: SameSeverityPick,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            same_line_threshold: 0.7,
            proximity_threshold: 0.6,
            window: 2,
            same_severity_pick: SameSeverityPick::Latest,
        }
    }
}

/// Per-pipeline-invocation state: root, concurrency, budgets, strategy.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Project root this invocation reviews.
    pub root: PathBuf,
    /// Batch grouping mode.
    pub mode: BatchMode,
    /// Whole files per batch in count mode.
    pub files_per_batch: usize,
    /// Weight budget per chunk in snippet mode.
    pub snippet_budget: usize,
    /// Snippet weighting.
    pub weight_by: WeightBy,
    /// Snippet-pool split strategy.
    pub strategy: SplitStrategy,
    /// Worker-pool size for batch execution.
    pub concurrency: usize,
    /// Serialized request size above which a batch is pre-bisected.
    pub max_request_chars: usize,
    /// Continuation calls allowed per batch on truncation.
    pub continuation_retries: usize,
    /// Retries allowed per batch on rate-limited/transient errors.
    pub transient_retries: usize,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay_ms: u64,
    /// Severity reconciliation policy.
    pub action: PolicyAction,
    /// Skip snippet relocation and trust reported positions verbatim.
    pub use_diff_line_numbers: bool,
    /// Dedup thresholds.
    pub dedup: DedupConfig,
}

impl RunContext {
    /// Builds a context for `root` with defaults overridden from `REVIEW_*`
    /// environment variables.
    pub fn from_env(root: PathBuf) -> Self {
        let mode = match env_str("REVIEW_BATCH_MODE", "count").as_str() {
            "snippet" | "snippets" => BatchMode::SnippetBased,
            _ => BatchMode::CountBased,
        };
        let strategy = match env_str("REVIEW_SPLIT_STRATEGY", "even").as_str() {
            "contiguous" => SplitStrategy::Contiguous,
            _ => SplitStrategy::Even,
        };
        let weight_by = match env_str("REVIEW_WEIGHT_BY", "count").as_str() {
            "chars" => WeightBy::Chars,
            _ => WeightBy::SnippetCount,
        };
        let action = match env_str("REVIEW_POLICY_ACTION", "block_commit").as_str() {
            "warning" => PolicyAction::Warning,
            "log" => PolicyAction::Log,
            _ => PolicyAction::BlockCommit,
        };
        let same_severity_pick = match env_str("REVIEW_DEDUP_PICK", "latest").as_str() {
            "first" => SameSeverityPick::First,
            _ => SameSeverityPick::Latest,
        };

        RunContext {
            root,
            mode,
            files_per_batch: env_parse("REVIEW_FILES_PER_BATCH", 5),
            snippet_budget: env_parse("REVIEW_SNIPPET_BUDGET", 25),
            weight_by,
            strategy,
            concurrency: env_parse("REVIEW_CONCURRENCY", 2),
            max_request_chars: env_parse("REVIEW_MAX_REQUEST_CHARS", 48_000),
            continuation_retries: env_parse("REVIEW_CONTINUATION_RETRIES", 2),
            transient_retries: env_parse("REVIEW_TRANSIENT_RETRIES", 3),
            retry_base_delay_ms: env_parse("REVIEW_RETRY_BASE_DELAY_MS", 500),
            action,
            use_diff_line_numbers: env_str("REVIEW_USE_DIFF_LINES", "false") == "true",
            dedup: DedupConfig {
                same_line_threshold: env_parse("REVIEW_DEDUP_SAME_LINE_THRESHOLD", 0.7),
                proximity_threshold: env_parse("REVIEW_DEDUP_PROXIMITY_THRESHOLD", 0.6),
                window: env_parse("REVIEW_DEDUP_WINDOW", 2),
                same_severity_pick,
            },
        }
    }

    /// Same knobs, different root. Used when fanning out across roots.
    pub fn for_root(&self, root: PathBuf) -> Self {
        let mut ctx = self.clone();
        ctx.root = root;
        ctx
    }
}

impl Default for RunContext {
    fn default() -> Self {
        RunContext {
            root: PathBuf::from("."),
            mode: BatchMode::CountBased,
            files_per_batch: 5,
            snippet_budget: 25,
            weight_by: WeightBy::SnippetCount,
            strategy: SplitStrategy::Even,
            concurrency: 2,
            max_request_chars: 48_000,
            continuation_retries: 2,
            transient_retries: 3,
            retry_base_delay_ms: 500,
            action: PolicyAction::BlockCommit,
            use_diff_line_numbers: false,
            dedup: DedupConfig::default(),
        }
    }
}

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .to_ascii_lowercase()
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
