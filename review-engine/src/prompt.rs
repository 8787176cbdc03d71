//! Prompt assembly for review and continuation calls.
//!
//! The backend is instructed to answer with STRICT JSON (one object, no
//! fences, no prose) because everything downstream, from truncation
//! detection to object extraction, assumes a JSON payload.

use crate::types::Batch;

/// Reviewer instructions prepended to every batch request.
const REVIEW_INSTRUCTIONS: &str = "\
You are a strict code reviewer. Analyze the files below and report issues.
Return EXACTLY ONE JSON object of the shape:
{\"findings\":[{\"file\":\"<path>\",\"line\":<1-based>,\"column\":<0-based>,\
\"message\":\"<short imperative>\",\"severity\":\"error|warning|info\",\
\"snippet\":\"<the offending source line, verbatim>\"}]}
Rules:
- Do NOT output markdown, code fences, comments, or any 'thinking' text.
- Report real defects only; do not praise or summarize.
- `line` refers to the original file; honor the `@@ <path> lines A-B @@` markers.
- Use an empty findings array when a file is clean.";

/// Builds the outbound prompt for one batch.
pub fn build_review_prompt(batch: &Batch) -> String {
    let mut out = String::from(REVIEW_INSTRUCTIONS);
    out.push_str("\n\n");
    for file in &batch.files {
        out.push_str(&format!("File: {}\n", file.path));
        out.push_str(&file.content);
        if !file.content.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Builds the follow-up prompt after a truncated reply, replaying the cut-off
/// output so the backend can complete it.
pub fn build_continuation_prompt(batch: &Batch, partial_raw: &str) -> String {
    let mut out = build_review_prompt(batch);
    out.push_str(
        "\nYour previous reply was cut off before the JSON completed. \
This is what you produced so far:\n",
    );
    out.push_str(partial_raw);
    out.push_str("\n\nResend the COMPLETE JSON object with ALL findings, from the beginning.");
    out
}

/// Serialized request size used for pre-send bisection decisions.
pub fn request_len(batch: &Batch) -> usize {
    build_review_prompt(batch).chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BatchFile;

    #[test]
    fn prompt_lists_every_file() {
        let batch = Batch {
            files: vec![
                BatchFile {
                    path: "a.rs".into(),
                    content: "fn a() {}\n".into(),
                },
                BatchFile {
                    path: "b.rs".into(),
                    content: "fn b() {}".into(),
                },
            ],
        };
        let prompt = build_review_prompt(&batch);
        assert!(prompt.contains("File: a.rs"));
        assert!(prompt.contains("File: b.rs"));
        assert_eq!(request_len(&batch), prompt.chars().count());
    }

    #[test]
    fn continuation_replays_partial_output() {
        let batch = Batch {
            files: vec![BatchFile {
                path: "a.rs".into(),
                content: "fn a() {}\n".into(),
            }],
        };
        let cont = build_continuation_prompt(&batch, "{\"findings\":[{\"file\":\"a.rs\"");
        assert!(cont.contains("cut off"));
        assert!(cont.contains("{\"findings\":[{\"file\":\"a.rs\""));
    }
}
