/*
 * Folds per-file summaries (plus an optional seed description of the project) into
 * the final report.
 *
 * When the rendered summaries fit the threshold they are sent in one prompt.
 * Otherwise the text is cut into roughly equal parts, each part is summarized on
 * its own, and the joined part results are folded again. The recursion depth is
 * capped; at the cap the text is truncated to the threshold and summarized once.
 */
use crate::core::config::{CODE_SUMMARIES_PLACEHOLDER, SEED_PLACEHOLDER};
use crate::core::file_node::{SummaryStore, summary_is_present};
use crate::core::llm_client::SummarizerOperations;
use serde_json::Value;

pub const MAX_AGGREGATION_DEPTH: usize = 4;

fn render_summary_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/*
 * Renders every present summary as `[<path>]\n<summary>`, in path order, separated
 * by blank lines.
 */
pub fn render_aggregate(summaries: &SummaryStore) -> String {
    summaries
        .iter()
        .filter(|(_, summary)| summary_is_present(summary))
        .map(|(path, summary)| format!("[{path}]\n{}", render_summary_value(summary)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/*
 * Splits `text` into `ceil(len / threshold)` parts of `len / parts` characters; the
 * last part takes the remainder. Lengths are counted in chars, so multi-byte text is
 * never cut inside a code point.
 */
pub fn split_into_parts(text: &str, threshold: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 || threshold == 0 || len <= threshold {
        return vec![text.to_string()];
    }
    let parts = len.div_ceil(threshold);
    let part_size = len / parts;
    (0..parts)
        .map(|i| {
            let start = i * part_size;
            let end = if i + 1 == parts { len } else { start + part_size };
            chars[start..end].iter().collect()
        })
        .collect()
}

/*
 * Fills the final template with the seed text and the aggregated summaries.
 */
pub fn render_final_prompt(template: &str, seed: &str, code_summaries: &str) -> String {
    template
        .replace(SEED_PLACEHOLDER, seed)
        .replace(CODE_SUMMARIES_PLACEHOLDER, code_summaries)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub struct FinalAggregator<'a> {
    summarizer: &'a dyn SummarizerOperations,
    prompt_template: &'a str,
    threshold: usize,
}

impl<'a> FinalAggregator<'a> {
    pub fn new(
        summarizer: &'a dyn SummarizerOperations,
        prompt_template: &'a str,
        threshold: usize,
    ) -> Self {
        FinalAggregator {
            summarizer,
            prompt_template,
            threshold,
        }
    }

    /*
     * Produces the final report text. An empty string means the last model call
     * failed.
     */
    pub fn aggregate(&self, seed: &str, summaries: &SummaryStore) -> String {
        let aggregate = render_aggregate(summaries);
        log::info!(
            "Aggregator: Folding {} summaries ({} chars, threshold {}).",
            summaries.len(),
            aggregate.chars().count(),
            self.threshold
        );
        self.fold(seed, &aggregate, 0)
    }

    fn summarize_once(&self, seed: &str, text: &str) -> Option<String> {
        self.summarizer
            .summarize(&render_final_prompt(self.prompt_template, seed, text))
    }

    fn fold(&self, seed: &str, text: &str, depth: usize) -> String {
        let len = text.chars().count();
        if len <= self.threshold {
            return self.summarize_once(seed, text).unwrap_or_else(|| {
                log::error!("Aggregator: Final summarization call failed at depth {depth}.");
                String::new()
            });
        }

        if depth >= MAX_AGGREGATION_DEPTH {
            log::warn!(
                "Aggregator: Depth cap {MAX_AGGREGATION_DEPTH} reached with {len} chars left, truncating to {}.",
                self.threshold
            );
            return self
                .summarize_once(seed, truncate_chars(text, self.threshold))
                .unwrap_or_default();
        }

        let parts = split_into_parts(text, self.threshold);
        log::info!(
            "Aggregator: Depth {depth}: {len} chars exceed threshold, splitting into {} parts.",
            parts.len()
        );
        let folded = parts
            .iter()
            .enumerate()
            .map(|(index, part)| {
                self.summarize_once(seed, part).unwrap_or_else(|| {
                    log::error!("Aggregator: Part {index} at depth {depth} failed, continuing without it.");
                    String::new()
                })
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.fold(seed, &folded, depth + 1)
    }
}
