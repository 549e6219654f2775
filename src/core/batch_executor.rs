/*
 * Executes one planned batch: reads the member files, packs them into a single
 * prompt, invokes the summarizer and turns the answer into per-file summaries.
 *
 * Files are packed in batch order, each framed by a `[FILE PATH: ...]` header and
 * `[BEGIN]` / `[END]` markers and separated by `FILE_SEPARATOR`. The model is asked
 * for a JSON object keyed by those paths. Any failure (no response, unparseable
 * answer) yields an outcome with no summaries, which leaves the files pending for a
 * later run.
 */
use crate::core::batch_planner::Batch;
use crate::core::config::BATCH_CONTENT_PLACEHOLDER;
use crate::core::file_node::{SummaryStore, summary_is_present};
use crate::core::llm_client::SummarizerOperations;
use crate::core::tokenizer_utils::TokenCounterOperations;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const FILE_SEPARATOR: &str = "\n===FILE_SEPARATOR===\n";

/*
 * Source of file contents for batch prompts, addressed by project-relative path.
 */
pub trait FileContentReader: Send + Sync {
    fn read_file(&self, relative_path: &str) -> io::Result<String>;
}

pub struct ProjectFileReader {
    root: PathBuf,
}

impl ProjectFileReader {
    pub fn new(root: &Path) -> Self {
        ProjectFileReader {
            root: root.to_path_buf(),
        }
    }
}

impl FileContentReader for ProjectFileReader {
    fn read_file(&self, relative_path: &str) -> io::Result<String> {
        let bytes = fs::read(self.root.join(relative_path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /* Every file in the batch received a summary. */
    Complete,
    /* The answer parsed, but some files were missing from it. */
    Partial,
    NoResponse,
    Unparseable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub batch_index: usize,
    pub paths: Vec<String>,
    pub summaries: SummaryStore,
    pub status: BatchStatus,
    pub prompt_tokens: usize,
}

impl BatchOutcome {
    /*
     * True when the model produced nothing usable for the batch.
     */
    pub fn is_failure(&self) -> bool {
        matches!(self.status, BatchStatus::NoResponse | BatchStatus::Unparseable)
    }
}

#[derive(Debug)]
pub enum ResponseParseError {
    Json(serde_json::Error),
    NotAnObject,
}

impl std::fmt::Display for ResponseParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseParseError::Json(e) => write!(f, "Response is not valid JSON: {e}"),
            ResponseParseError::NotAnObject => write!(f, "Response is not a JSON object"),
        }
    }
}

impl std::error::Error for ResponseParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResponseParseError::Json(e) => Some(e),
            ResponseParseError::NotAnObject => None,
        }
    }
}

/*
 * Packs the given (path, content) pairs into the batch payload, in order.
 */
pub fn build_batch_content(files: &[(String, String)]) -> String {
    files
        .iter()
        .map(|(path, content)| format!("[FILE PATH: {path}]\n[BEGIN]\n{content}\n[END]"))
        .collect::<Vec<_>>()
        .join(FILE_SEPARATOR)
}

/*
 * Substitutes the packed batch into the scenario's batch template.
 */
pub fn render_prompt(template: &str, batch_content: &str) -> String {
    template.replace(BATCH_CONTENT_PLACEHOLDER, batch_content)
}

/*
 * Removes a surrounding Markdown code fence (```json ... ``` or ``` ... ```), which
 * models commonly wrap JSON answers in. A fence on a single line may carry the
 * `json` tag directly before the object.
 */
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start().strip_prefix("json").unwrap_or(rest),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/*
 * Parses a model answer into a path-keyed map. Anything other than a JSON object,
 * fenced or bare, is an error.
 */
pub fn parse_batch_response(
    response: &str,
) -> std::result::Result<serde_json::Map<String, Value>, ResponseParseError> {
    match serde_json::from_str::<Value>(strip_code_fence(response)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ResponseParseError::NotAnObject),
        Err(e) => Err(ResponseParseError::Json(e)),
    }
}

pub struct BatchExecutor<'a> {
    summarizer: &'a dyn SummarizerOperations,
    reader: &'a dyn FileContentReader,
    token_counter: &'a dyn TokenCounterOperations,
    prompt_template: &'a str,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        summarizer: &'a dyn SummarizerOperations,
        reader: &'a dyn FileContentReader,
        token_counter: &'a dyn TokenCounterOperations,
        prompt_template: &'a str,
    ) -> Self {
        BatchExecutor {
            summarizer,
            reader,
            token_counter,
            prompt_template,
        }
    }

    fn read_members(&self, batch: &Batch) -> Vec<(String, String)> {
        batch
            .paths()
            .iter()
            .map(|path| {
                let content = self.reader.read_file(path).unwrap_or_else(|e| {
                    log::warn!("BatchExecutor: Could not read '{path}', sending empty content: {e}");
                    String::new()
                });
                (path.clone(), content)
            })
            .collect()
    }

    /*
     * Runs one model invocation for `batch`. Only entries whose key is a member of
     * the batch and whose value is a present summary are kept.
     */
    pub fn execute(&self, batch_index: usize, batch: &Batch) -> BatchOutcome {
        if batch.is_oversized() {
            log::warn!(
                "BatchExecutor: Batch {batch_index} holds a single file of {} chars, above the batch threshold.",
                batch.char_count()
            );
        }
        let prompt = render_prompt(
            self.prompt_template,
            &build_batch_content(&self.read_members(batch)),
        );
        let prompt_tokens = self.token_counter.count_tokens(&prompt);
        log::debug!(
            "BatchExecutor: Batch {batch_index}: {} files, {} chars, ~{prompt_tokens} tokens.",
            batch.len(),
            batch.char_count()
        );

        let mut outcome = BatchOutcome {
            batch_index,
            paths: batch.paths().to_vec(),
            summaries: SummaryStore::new(),
            status: BatchStatus::NoResponse,
            prompt_tokens,
        };

        let Some(response) = self.summarizer.summarize(&prompt) else {
            log::error!("BatchExecutor: Batch {batch_index} got no response from the model.");
            log::debug!("BatchExecutor: Batch {batch_index} files: {:?}", batch.paths());
            return outcome;
        };

        let parsed = match parse_batch_response(&response) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::error!("BatchExecutor: Batch {batch_index} answer could not be parsed: {e}");
                log::debug!("BatchExecutor: Raw answer for batch {batch_index}:\n{response}");
                outcome.status = BatchStatus::Unparseable;
                return outcome;
            }
        };

        for (path, summary) in parsed {
            if !batch.paths().contains(&path) {
                log::warn!(
                    "BatchExecutor: Batch {batch_index} answer names '{path}', which is not in the batch. Ignoring."
                );
                continue;
            }
            if summary_is_present(&summary) {
                outcome.summaries.insert(path, summary);
            }
        }

        outcome.status = if outcome.summaries.len() == batch.len() {
            BatchStatus::Complete
        } else {
            log::warn!(
                "BatchExecutor: Batch {batch_index} answer covered {}/{} files.",
                outcome.summaries.len(),
                batch.len()
            );
            BatchStatus::Partial
        };
        outcome
    }
}
