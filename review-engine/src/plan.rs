//! Unit & batch planner.
//!
//! Groups review units into ordered batches under a size budget:
//! - count mode: fixed-size groups of whole-file units;
//! - snippet mode: each file's snippets form one weighted pool, split into
//!   chunks whose weight stays under the budget. `Even` picks the minimum
//!   number of equal-sized chunks that fit; `Contiguous` fills greedily in
//!   original order.
//!
//! Planning is pure and deterministic: equal inputs always produce the same
//! batch sequence and chunk boundaries.

use tracing::debug;

use crate::config::{BatchMode, SplitStrategy, WeightBy};
use crate::types::{Batch, BatchFile, ReviewUnit};

/// Plans `units` into ordered batches.
///
/// `budget` is files-per-batch in count mode and the per-chunk weight budget
/// in snippet mode. A single unit whose own weight exceeds the budget is
/// still placed alone in its own batch, never dropped.
pub fn plan(
    units: Vec<ReviewUnit>,
    mode: BatchMode,
    budget: usize,
    strategy: SplitStrategy,
    weight_by: WeightBy,
) -> Vec<Batch> {
    if units.is_empty() {
        return Vec::new();
    }
    let budget = budget.max(1);

    let batches = match mode {
        BatchMode::CountBased => plan_count_based(units, budget),
        BatchMode::SnippetBased => plan_snippet_based(units, budget, strategy, weight_by),
    };

    debug!("plan: produced {} batches", batches.len());
    batches
}

/// Fixed-size grouping of whole-file units; the final partial group is kept.
fn plan_count_based(units: Vec<ReviewUnit>, files_per_batch: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<BatchFile> = Vec::with_capacity(files_per_batch);

    for unit in units {
        current.push(BatchFile {
            path: unit.file_path,
            content: unit.content,
        });
        if current.len() == files_per_batch {
            batches.push(Batch {
                files: std::mem::take(&mut current),
            });
        }
    }
    if !current.is_empty() {
        batches.push(Batch { files: current });
    }
    batches
}

/// Per-file snippet pools, one chunk per batch.
fn plan_snippet_based(
    units: Vec<ReviewUnit>,
    budget: usize,
    strategy: SplitStrategy,
    weight_by: WeightBy,
) -> Vec<Batch> {
    let mut batches = Vec::new();

    for (path, pool) in group_by_file(units) {
        let chunks = match strategy {
            SplitStrategy::Even => split_even(&pool, budget, weight_by),
            SplitStrategy::Contiguous => split_contiguous(&pool, budget, weight_by),
        };
        for chunk in chunks {
            batches.push(Batch {
                files: vec![BatchFile {
                    path: path.clone(),
                    content: render_chunk(&path, &pool[chunk.0..chunk.1]),
                }],
            });
        }
    }
    batches
}

/// Groups units by file path, preserving first-seen file order and the
/// original snippet order within each file.
fn group_by_file(units: Vec<ReviewUnit>) -> Vec<(String, Vec<ReviewUnit>)> {
    let mut grouped: Vec<(String, Vec<ReviewUnit>)> = Vec::new();
    for unit in units {
        match grouped.iter_mut().find(|(p, _)| *p == unit.file_path) {
            Some((_, pool)) => pool.push(unit),
            None => grouped.push((unit.file_path.clone(), vec![unit])),
        }
    }
    grouped
}

fn weight(unit: &ReviewUnit, weight_by: WeightBy) -> usize {
    match weight_by {
        WeightBy::SnippetCount => 1,
        WeightBy::Chars => unit.content.chars().count(),
    }
}

/// Splits the pool into the minimum number of equal-sized contiguous chunks
/// whose weight fits the budget. Chunk sizes differ by at most one. When no
/// equal split fits (some single snippet is over budget), every snippet gets
/// its own chunk.
fn split_even(pool: &[ReviewUnit], budget: usize, weight_by: WeightBy) -> Vec<(usize, usize)> {
    let n = pool.len();
    for k in 1..=n {
        let bounds = even_bounds(n, k);
        let fits = bounds.iter().all(|&(start, end)| {
            pool[start..end]
                .iter()
                .map(|u| weight(u, weight_by))
                .sum::<usize>()
                <= budget
        });
        if fits {
            return bounds;
        }
    }
    even_bounds(n, n)
}

/// Contiguous `[start, end)` bounds for `n` items split into `k` chunks,
/// earlier chunks taking the remainder.
fn even_bounds(n: usize, k: usize) -> Vec<(usize, usize)> {
    let base = n / k;
    let extra = n % k;
    let mut bounds = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let size = base + usize::from(i < extra);
        bounds.push((start, start + size));
        start += size;
    }
    bounds
}

/// Greedy in-order fill: each chunk takes snippets while the budget holds.
/// A snippet that alone exceeds the budget still forms its own chunk.
fn split_contiguous(pool: &[ReviewUnit], budget: usize, weight_by: WeightBy) -> Vec<(usize, usize)> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut acc = 0usize;

    for (i, unit) in pool.iter().enumerate() {
        let w = weight(unit, weight_by);
        if i > start && acc + w > budget {
            chunks.push((start, i));
            start = i;
            acc = 0;
        }
        acc += w;
    }
    chunks.push((start, pool.len()));
    chunks
}

/// Concatenates a chunk's snippets with positional markers so the backend
/// can report original line numbers.
fn render_chunk(path: &str, chunk: &[ReviewUnit]) -> String {
    let mut out = String::new();
    for unit in chunk {
        let (start, end) = unit
            .line_range
            .unwrap_or((1, unit.content.lines().count().max(1)));
        out.push_str(&format!("@@ {path} lines {start}-{end} @@\n"));
        out.push_str(&unit.content);
        if !unit.content.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}
