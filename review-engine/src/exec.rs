//! Concurrent batch executor with adaptive degradation.
//!
//! Batches run through a bounded worker pool (`buffer_unordered`), each
//! worker owning one batch at a time:
//! - oversized serialized requests are recursively bisected by file count
//!   *before* anything is sent;
//! - a size-rejected send degrades the batch to single-file sub-batches,
//!   each retried independently;
//! - truncated replies trigger continuation calls that replay the partial
//!   output, up to the configured budget;
//! - rate-limited/transient errors back off exponentially;
//! - a batch that exhausts its budgets drops softly with its failure class
//!   recorded; the run continues with partial results.
//!
//! Per-batch control flow is the explicit state machine [`BatchState`]
//! {Pending, Sent, Truncated, Retrying, Bisected, Done, Failed}; both
//! bisection paths carry a depth counter capped at [`MAX_SPLIT_DEPTH`], and
//! splitting stops once a batch holds a single file, so degradation always
//! terminates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use llm_gateway::{ErrorClass, GatewayError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RunContext;
use crate::errors::ResponseError;
use crate::prompt::{build_continuation_prompt, build_review_prompt, request_len};
use crate::response::{merge_continuation, parse_response};
use crate::types::{Batch, Finding};

/// Hard cap on bisection generations for one original batch.
pub const MAX_SPLIT_DEPTH: u8 = 6;

/// Lifecycle of one batch inside the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Sent,
    Truncated,
    Retrying,
    Bisected,
    Done,
    Failed,
}

/// Why a batch was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    SizeRejected,
    RateLimited,
    Transient,
    Parse,
    Other,
}

impl From<ErrorClass> for FailureClass {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::SizeRejected => FailureClass::SizeRejected,
            ErrorClass::RateLimited => FailureClass::RateLimited,
            ErrorClass::Transient => FailureClass::Transient,
            ErrorClass::Other => FailureClass::Other,
        }
    }
}

/// Run-scoped accumulator handed explicitly into the executor, so concurrent
/// runs never share counters.
#[derive(Debug, Default)]
pub struct RunStats {
    requests: AtomicU32,
    continuations: AtomicU32,
    bisections: AtomicU32,
    retries: AtomicU32,
    dropped_batches: AtomicU32,
    failed_size: AtomicU32,
    failed_rate_limited: AtomicU32,
    failed_transient: AtomicU32,
    failed_parse: AtomicU32,
    failed_other: AtomicU32,
}

/// Plain copy of the counters for reporting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSnapshot {
    pub requests: u32,
    pub continuations: u32,
    pub bisections: u32,
    pub retries: u32,
    pub dropped_batches: u32,
    pub failed_size: u32,
    pub failed_rate_limited: u32,
    pub failed_transient: u32,
    pub failed_parse: u32,
    pub failed_other: u32,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_failure(&self, class: FailureClass) {
        self.dropped_batches.fetch_add(1, Ordering::Relaxed);
        let counter = match class {
            FailureClass::SizeRejected => &self.failed_size,
            FailureClass::RateLimited => &self.failed_rate_limited,
            FailureClass::Transient => &self.failed_transient,
            FailureClass::Parse => &self.failed_parse,
            FailureClass::Other => &self.failed_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            continuations: self.continuations.load(Ordering::Relaxed),
            bisections: self.bisections.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
            failed_size: self.failed_size.load(Ordering::Relaxed),
            failed_rate_limited: self.failed_rate_limited.load(Ordering::Relaxed),
            failed_transient: self.failed_transient.load(Ordering::Relaxed),
            failed_parse: self.failed_parse.load(Ordering::Relaxed),
            failed_other: self.failed_other.load(Ordering::Relaxed),
        }
    }
}

/// Outbound analysis call, pluggable for tests.
///
/// Implemented for [`llm_gateway::LlmService`]; no `async-trait` and no
/// `Box<dyn ...>`, just plain trait methods returning futures.
pub trait AnalysisBackend: Sync {
    fn analyze(
        &self,
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<String, GatewayError>> + Send;
}

impl AnalysisBackend for llm_gateway::LlmService {
    fn analyze(
        &self,
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<String, GatewayError>> + Send {
        self.complete(prompt)
    }
}

/// Executes all batches under the configured worker-pool size and returns
/// the concatenated findings (not batch-scoped merged).
pub async fn execute<B: AnalysisBackend>(
    batches: Vec<Batch>,
    backend: &B,
    ctx: &RunContext,
    stats: &RunStats,
) -> Vec<Finding> {
    let ready = presplit_oversized(batches, ctx.max_request_chars, stats);
    info!(
        "exec: {} batches ready, concurrency={}",
        ready.len(),
        ctx.concurrency
    );

    let nested: Vec<Vec<Finding>> = stream::iter(
        ready
            .into_iter()
            .map(|batch| run_batch(batch, backend, ctx, stats)),
    )
    .buffer_unordered(ctx.concurrency.max(1))
    .collect()
    .await;

    nested.into_iter().flatten().collect()
}

/// Unconditional preprocessing: halves batches whose serialized request
/// exceeds the budget, until they fit or cannot be split further. The
/// oversized parent is discarded without being sent.
fn presplit_oversized(batches: Vec<Batch>, max_chars: usize, stats: &RunStats) -> Vec<Batch> {
    let mut ready = Vec::new();
    let mut queue: VecDeque<(Batch, u8)> = batches.into_iter().map(|b| (b, 0)).collect();

    while let Some((batch, depth)) = queue.pop_front() {
        if request_len(&batch) > max_chars && batch.files.len() > 1 && depth < MAX_SPLIT_DEPTH {
            stats.bisections.fetch_add(1, Ordering::Relaxed);
            debug!(
                "exec: pre-send bisection of {}-file batch (depth {})",
                batch.files.len(),
                depth
            );
            let (left, right) = batch.split();
            queue.push_back((left, depth + 1));
            queue.push_back((right, depth + 1));
        } else {
            ready.push(batch);
        }
    }
    ready
}

enum BatchOutcome {
    Done(Vec<Finding>),
    NeedsSplit,
    Failed(FailureClass),
}

/// Drives one batch (and any size-rejection sub-batches) to completion.
async fn run_batch<B: AnalysisBackend>(
    batch: Batch,
    backend: &B,
    ctx: &RunContext,
    stats: &RunStats,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut queue: VecDeque<(Batch, u8)> = VecDeque::new();
    queue.push_back((batch, 0));

    while let Some((current, depth)) = queue.pop_front() {
        match attempt_batch(&current, backend, ctx, stats).await {
            BatchOutcome::Done(batch_findings) => findings.extend(batch_findings),
            BatchOutcome::NeedsSplit => {
                if current.files.len() > 1 && depth < MAX_SPLIT_DEPTH {
                    stats.bisections.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "exec: size-rejected {}-file batch degrades to single-file retries",
                        current.files.len()
                    );
                    for file in current.files {
                        queue.push_back((Batch { files: vec![file] }, depth + 1));
                    }
                } else {
                    warn!("exec: batch size-rejected and unsplittable, dropping");
                    stats.record_failure(FailureClass::SizeRejected);
                }
            }
            BatchOutcome::Failed(class) => {
                warn!("exec: batch dropped ({:?})", class);
                stats.record_failure(class);
            }
        }
    }
    findings
}

fn transition(state: &mut BatchState, to: BatchState) {
    debug!("exec: batch {:?} -> {:?}", state, to);
    *state = to;
}

/// One batch through the send/parse/continue loop. Never splits by itself;
/// it only reports that splitting is needed.
async fn attempt_batch<B: AnalysisBackend>(
    batch: &Batch,
    backend: &B,
    ctx: &RunContext,
    stats: &RunStats,
) -> BatchOutcome {
    let mut state = BatchState::Pending;
    let mut prompt = build_review_prompt(batch);
    let mut partial: Vec<Finding> = Vec::new();
    let mut continuations_left = ctx.continuation_retries;
    let mut transient_left = ctx.transient_retries;
    let mut transient_attempt = 0u32;

    loop {
        transition(&mut state, BatchState::Sent);
        stats.requests.fetch_add(1, Ordering::Relaxed);

        let raw = match backend.analyze(&prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                let class = err.class();
                match class {
                    ErrorClass::SizeRejected => {
                        transition(&mut state, BatchState::Bisected);
                        return BatchOutcome::NeedsSplit;
                    }
                    ErrorClass::RateLimited | ErrorClass::Transient if transient_left > 0 => {
                        transient_left -= 1;
                        transient_attempt += 1;
                        stats.retries.fetch_add(1, Ordering::Relaxed);
                        let hint = match &err {
                            GatewayError::RateLimited { retry_after_secs } => *retry_after_secs,
                            _ => None,
                        };
                        let delay =
                            backoff_delay(ctx.retry_base_delay_ms, transient_attempt, hint);
                        warn!("exec: {:?} from backend, retrying in {:?}", class, delay);
                        transition(&mut state, BatchState::Retrying);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    class => {
                        transition(&mut state, BatchState::Failed);
                        return BatchOutcome::Failed(class.into());
                    }
                }
            }
        };

        match parse_response(&raw) {
            Ok(parsed) if !parsed.truncated => {
                // Clean payloads (first try or continuation) are authoritative.
                let (findings, _) = merge_continuation(partial, parsed);
                transition(&mut state, BatchState::Done);
                return BatchOutcome::Done(findings);
            }
            Ok(parsed) => {
                transition(&mut state, BatchState::Truncated);
                let (merged, _) = merge_continuation(std::mem::take(&mut partial), parsed);
                partial = merged;
                if continuations_left == 0 {
                    debug!(
                        "exec: continuation budget spent, keeping {} partial findings",
                        partial.len()
                    );
                    transition(&mut state, BatchState::Done);
                    return BatchOutcome::Done(partial);
                }
                continuations_left -= 1;
                stats.continuations.fetch_add(1, Ordering::Relaxed);
                transition(&mut state, BatchState::Retrying);
                prompt = build_continuation_prompt(batch, &raw);
            }
            Err(ResponseError::NoExtractableContent) => {
                if continuations_left > 0 {
                    transition(&mut state, BatchState::Truncated);
                    continuations_left -= 1;
                    stats.continuations.fetch_add(1, Ordering::Relaxed);
                    transition(&mut state, BatchState::Retrying);
                    prompt = build_continuation_prompt(batch, &raw);
                } else if !partial.is_empty() {
                    transition(&mut state, BatchState::Done);
                    return BatchOutcome::Done(std::mem::take(&mut partial));
                } else {
                    transition(&mut state, BatchState::Failed);
                    return BatchOutcome::Failed(FailureClass::Parse);
                }
            }
        }
    }
}

/// Exponential backoff with a `Retry-After` override and a 30s ceiling.
fn backoff_delay(base_ms: u64, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs.min(60));
    }
    let factor = 1u64 << attempt.saturating_sub(1).min(6);
    Duration::from_millis(base_ms.saturating_mul(factor).min(30_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunContext;
    use crate::types::BatchFile;
    use llm_gateway::StatusCode;

    fn batch(paths: &[&str]) -> Batch {
        Batch {
            files: paths
                .iter()
                .map(|p| BatchFile {
                    path: p.to_string(),
                    content: format!("fn body_of_{}() {{}}\n", p.replace(['/', '.'], "_")),
                })
                .collect(),
        }
    }

    fn finding_json(file: &str, line: usize, message: &str) -> String {
        format!(
            "{{\"file\":\"{file}\",\"line\":{line},\"column\":0,\
\"message\":\"{message}\",\"severity\":\"warning\"}}"
        )
    }

    fn ctx() -> RunContext {
        RunContext {
            retry_base_delay_ms: 1,
            ..RunContext::default()
        }
    }

    struct MockBackend<F> {
        script: F,
        calls: AtomicU32,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
    }

    impl<F> MockBackend<F>
    where
        F: Fn(u32, &str) -> Result<String, GatewayError> + Sync,
    {
        fn new(script: F) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl<F> AnalysisBackend for MockBackend<F>
    where
        F: Fn(u32, &str) -> Result<String, GatewayError> + Sync,
    {
        fn analyze(
            &self,
            prompt: &str,
        ) -> impl std::future::Future<Output = Result<String, GatewayError>> + Send {
            async move {
                let call = self.calls.fetch_add(1, Ordering::Relaxed);
                let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
                self.max_in_flight.fetch_max(now, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(3)).await;
                self.in_flight.fetch_sub(1, Ordering::Relaxed);
                (self.script)(call, prompt)
            }
        }
    }

    #[tokio::test]
    async fn oversized_batch_is_presplit_into_two_calls() {
        let backend = MockBackend::new(|_, _| Ok("{\"findings\":[]}".to_string()));
        let stats = RunStats::new();
        let mut ctx = ctx();
        ctx.max_request_chars = 80;

        let findings = execute(vec![batch(&["a.rs", "b.rs"])], &backend, &ctx, &stats).await;

        assert!(findings.is_empty());
        assert_eq!(backend.calls(), 2);
        assert_eq!(stats.snapshot().bisections, 1);
    }

    #[tokio::test]
    async fn size_rejection_degrades_to_single_file_retries() {
        let backend = MockBackend::new(|_, prompt: &str| {
            let both = prompt.contains("File: a.rs") && prompt.contains("File: b.rs");
            if both {
                return Err(GatewayError::SizeRejected {
                    snippet: "maximum context length exceeded".into(),
                });
            }
            let file = if prompt.contains("File: a.rs") {
                "a.rs"
            } else {
                "b.rs"
            };
            Ok(format!("{{\"findings\":[{}]}}", finding_json(file, 1, "issue")))
        });
        let stats = RunStats::new();

        let findings = execute(vec![batch(&["a.rs", "b.rs"])], &backend, &ctx(), &stats).await;

        assert_eq!(backend.calls(), 3);
        assert_eq!(findings.len(), 2);
        assert_eq!(stats.snapshot().bisections, 1);
        assert_eq!(stats.snapshot().dropped_batches, 0);
    }

    #[tokio::test]
    async fn truncated_reply_is_completed_by_continuation() {
        let first = format!(
            "{{\"findings\":[{},{{\"file\":\"b.rs\",\"li",
            finding_json("a.rs", 1, "pre-truncation issue")
        );
        let full = format!(
            "{{\"findings\":[{},{}]}}",
            finding_json("a.rs", 1, "pre-truncation issue"),
            finding_json("b.rs", 9, "post-truncation issue")
        );
        let backend = MockBackend::new(move |_, prompt: &str| {
            if prompt.contains("cut off") {
                Ok(full.clone())
            } else {
                Ok(first.clone())
            }
        });
        let stats = RunStats::new();

        let findings = execute(vec![batch(&["a.rs", "b.rs"])], &backend, &ctx(), &stats).await;

        assert_eq!(backend.calls(), 2);
        assert_eq!(stats.snapshot().continuations, 1);
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().any(|f| f.message == "pre-truncation issue"));
        assert!(findings.iter().any(|f| f.message == "post-truncation issue"));
    }

    #[tokio::test]
    async fn continuation_budget_exhaustion_keeps_partial_findings() {
        let truncated = format!(
            "{{\"findings\":[{},{{\"file\":\"b.rs\",\"li",
            finding_json("a.rs", 1, "salvaged issue")
        );
        let backend = MockBackend::new(move |_, _| Ok(truncated.clone()));
        let stats = RunStats::new();
        let mut ctx = ctx();
        ctx.continuation_retries = 2;

        let findings = execute(vec![batch(&["a.rs"])], &backend, &ctx, &stats).await;

        // 1 original + 2 continuations, then best-effort partial.
        assert_eq!(backend.calls(), 3);
        assert_eq!(stats.snapshot().continuations, 2);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message, "salvaged issue");
    }

    #[tokio::test]
    async fn transient_error_retries_with_backoff_then_succeeds() {
        let backend = MockBackend::new(|call, _| {
            if call == 0 {
                Err(GatewayError::HttpStatus {
                    status: StatusCode::BAD_GATEWAY,
                    url: "http://backend".into(),
                    snippet: String::new(),
                })
            } else {
                Ok(format!(
                    "{{\"findings\":[{}]}}",
                    finding_json("a.rs", 2, "late but fine")
                ))
            }
        });
        let stats = RunStats::new();

        let findings = execute(vec![batch(&["a.rs"])], &backend, &ctx(), &stats).await;

        assert_eq!(backend.calls(), 2);
        assert_eq!(stats.snapshot().retries, 1);
        assert_eq!(findings.len(), 1);
    }

    #[tokio::test]
    async fn unusable_batches_drop_softly_with_class_recorded() {
        let backend = MockBackend::new(|_, _| Ok("the model rambled, no json here".to_string()));
        let stats = RunStats::new();
        let mut ctx = ctx();
        ctx.continuation_retries = 0;

        let findings = execute(
            vec![batch(&["a.rs"]), batch(&["b.rs"])],
            &backend,
            &ctx,
            &stats,
        )
        .await;

        assert!(findings.is_empty());
        let snap = stats.snapshot();
        assert_eq!(snap.dropped_batches, 2);
        assert_eq!(snap.failed_parse, 2);
    }

    #[tokio::test]
    async fn in_flight_workers_never_exceed_concurrency() {
        let backend = MockBackend::new(|_, _| Ok("{\"findings\":[]}".to_string()));
        let stats = RunStats::new();
        let mut ctx = ctx();
        ctx.concurrency = 2;

        let batches: Vec<Batch> = (0..8)
            .map(|i| Batch {
                files: vec![BatchFile {
                    path: format!("f{i}.rs"),
                    content: "fn x() {}\n".into(),
                }],
            })
            .collect();
        let _ = execute(batches, &backend, &ctx, &stats).await;

        assert_eq!(backend.calls(), 8);
        assert!(backend.max_in_flight.load(Ordering::Relaxed) <= 2);
    }
}
