/*
 * The summarization capability and its concrete HTTP implementation.
 *
 * The core only depends on `SummarizerOperations`: a synchronous call that turns a
 * prompt into text, or `None` when the call failed in a recoverable way. The
 * `CoreChatClient` talks to an OpenAI-compatible `chat/completions` endpoint and
 * decodes server-sent events when streaming is enabled. Every call can be appended
 * to a dedicated call log for later diagnosis.
 */
use crate::core::config::ApiSettings;
use crate::core::run_state::InvocationBudget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::format_description;

pub const CALL_LOG_FILENAME: &str = "big_model_calls.log";
const SSE_DATA_PREFIX: &str = "data:";
const SSE_DONE_MARKER: &str = "[DONE]";

/*
 * Turns a prompt into model output. Implementations must be shareable across the
 * worker threads that execute batches concurrently.
 */
pub trait SummarizerOperations: Send + Sync {
    fn summarize(&self, prompt: &str) -> Option<String>;
}

#[derive(Debug)]
pub enum LlmClientError {
    Http(reqwest::Error),
    MissingApiKey(String),
}

impl From<reqwest::Error> for LlmClientError {
    fn from(err: reqwest::Error) -> Self {
        LlmClientError::Http(err)
    }
}

impl std::fmt::Display for LlmClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmClientError::Http(e) => write!(f, "HTTP client error: {e}"),
            LlmClientError::MissingApiKey(var) => {
                write!(f, "No API key configured and environment variable {var} is not set")
            }
        }
    }
}

impl std::error::Error for LlmClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LlmClientError::Http(e) => Some(e),
            LlmClientError::MissingApiKey(_) => None,
        }
    }
}

/*
 * Append-only record of every model call (prompt plus response or failure).
 * Writes are serialized through a mutex because batches run on several threads.
 */
pub struct CallLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl CallLog {
    /* Opens `path` for appending, creating it if needed. */
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(CallLog {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /*
     * Appends one timestamped prompt/response entry. Failures to write are logged
     * and otherwise ignored.
     */
    pub fn record(&self, prompt: &str, response: Option<&str>) {
        let stamp = OffsetDateTime::now_local()
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
            .format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .unwrap_or_default();
        let entry = format!(
            "===== {stamp} =====\n--- PROMPT ({} chars) ---\n{prompt}\n--- RESPONSE ---\n{}\n\n",
            prompt.chars().count(),
            response.unwrap_or("<no response>")
        );
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = file.write_all(entry.as_bytes()) {
                    log::warn!("CallLog: Failed to append to {:?}: {e}", self.path);
                }
            }
            Err(_) => log::warn!("CallLog: Lock poisoned, dropping entry."),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

/*
 * Text accumulated from a streamed chat completion. `reasoning` collects the
 * optional "thinking" deltas some providers emit before the answer.
 */
#[derive(Debug, Default, PartialEq)]
pub struct StreamedCompletion {
    pub content: String,
    pub reasoning: String,
}

/*
 * Decodes a server-sent-event stream of chat completion chunks. Lines that are not
 * `data:` events are ignored; malformed chunks are logged and skipped; decoding stops
 * at `data: [DONE]` or end of input.
 */
pub fn decode_event_stream<R: BufRead>(reader: R) -> io::Result<StreamedCompletion> {
    let mut completion = StreamedCompletion::default();
    for line in reader.lines() {
        let line = line?;
        let Some(payload) = line.trim().strip_prefix(SSE_DATA_PREFIX) else {
            continue;
        };
        let payload = payload.trim();
        if payload == SSE_DONE_MARKER {
            break;
        }
        if payload.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(chunk) => {
                let delta = &chunk["choices"][0]["delta"];
                if let Some(reasoning) = delta["reasoning"].as_str() {
                    completion.reasoning.push_str(reasoning);
                }
                if let Some(content) = delta["content"].as_str() {
                    completion.content.push_str(content);
                }
            }
            Err(e) => log::warn!("ChatClient: Skipping malformed stream chunk: {e}"),
        }
    }
    Ok(completion)
}

/*
 * Extracts `choices[0].message.content` from a non-streamed completion body.
 */
pub fn extract_message_content(body: &Value) -> Option<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
}

/*
 * Blocking client for OpenAI-compatible chat completion endpoints.
 */
pub struct CoreChatClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    stream: bool,
    call_log: Option<CallLog>,
}

impl CoreChatClient {
    pub fn new(settings: &ApiSettings, call_log: Option<CallLog>) -> Result<Self, LlmClientError> {
        let api_key = match &settings.api_key {
            Some(key) if !key.trim().is_empty() => key.clone(),
            _ => std::env::var(&settings.api_key_env)
                .map_err(|_| LlmClientError::MissingApiKey(settings.api_key_env.clone()))?,
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        let endpoint = format!("{}/chat/completions", settings.base_url.trim_end_matches('/'));
        log::debug!(
            "ChatClient: Using endpoint {endpoint} with model '{}' (stream: {}).",
            settings.model,
            settings.stream
        );
        Ok(CoreChatClient {
            client,
            endpoint,
            api_key,
            model: settings.model.clone(),
            stream: settings.stream,
            call_log,
        })
    }

    fn request(&self, prompt: &str) -> Option<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: self.stream,
        };

        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .json(&request)
            .send()
        {
            Ok(response) => response,
            Err(e) => {
                log::error!("ChatClient: Request to {} failed: {e}", self.endpoint);
                return None;
            }
        };

        if let Some(trace_id) = response.headers().get("X-Trace-ID") {
            log::info!("ChatClient: Trace ID: {}", trace_id.to_str().unwrap_or("<invalid>"));
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            log::error!("ChatClient: Request failed with status {status}: {body}");
            return None;
        }

        if self.stream {
            match decode_event_stream(BufReader::new(response)) {
                Ok(completion) => {
                    if !completion.reasoning.is_empty() {
                        log::debug!("ChatClient: Model reasoning: {}", completion.reasoning);
                    }
                    Some(completion.content)
                }
                Err(e) => {
                    log::error!("ChatClient: Failed to read response stream: {e}");
                    None
                }
            }
        } else {
            match response.json::<Value>() {
                Ok(body) => {
                    let content = extract_message_content(&body);
                    if content.is_none() {
                        log::error!("ChatClient: Response has no message content: {body}");
                    }
                    content
                }
                Err(e) => {
                    log::error!("ChatClient: Failed to decode response body: {e}");
                    None
                }
            }
        }
    }
}

impl SummarizerOperations for CoreChatClient {
    fn summarize(&self, prompt: &str) -> Option<String> {
        let result = self.request(prompt);
        if let Some(call_log) = &self.call_log {
            call_log.record(prompt, result.as_deref());
        }
        result
    }
}

/*
 * Wraps another summarizer and charges every call against a shared invocation
 * budget. Once the budget is spent, calls fail without reaching the model.
 */
pub struct BudgetedSummarizer<'a> {
    inner: &'a dyn SummarizerOperations,
    budget: &'a InvocationBudget,
}

impl<'a> BudgetedSummarizer<'a> {
    pub fn new(inner: &'a dyn SummarizerOperations, budget: &'a InvocationBudget) -> Self {
        BudgetedSummarizer { inner, budget }
    }
}

impl SummarizerOperations for BudgetedSummarizer<'_> {
    fn summarize(&self, prompt: &str) -> Option<String> {
        if !self.budget.try_acquire() {
            log::warn!(
                "BudgetedSummarizer: Invocation cap of {:?} reached, skipping model call.",
                self.budget.limit()
            );
            return None;
        }
        self.inner.summarize(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    impl SummarizerOperations for CountingSummarizer {
        fn summarize(&self, _prompt: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some("ok".to_string())
        }
    }

    #[test]
    fn test_decode_event_stream_accumulates_content_until_done() {
        let stream = concat!(
            "data: {\"choices\":[{\"delta\":{\"reasoning\":\"thinking\"}}]}\n",
            "\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n",
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n",
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        );
        let completion = decode_event_stream(Cursor::new(stream)).unwrap();
        assert_eq!(completion.content, "Hello, world");
        assert_eq!(completion.reasoning, "thinking");
    }

    #[test]
    fn test_decode_event_stream_skips_malformed_chunks() {
        let stream = "data: {not json}\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n";
        let completion = decode_event_stream(Cursor::new(stream)).unwrap();
        assert_eq!(completion.content, "x");
    }

    #[test]
    fn test_extract_message_content() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "done"}}]});
        assert_eq!(extract_message_content(&body), Some("done".to_string()));
        assert_eq!(extract_message_content(&json!({"choices": []})), None);
    }

    #[test]
    fn test_budgeted_summarizer_stops_at_cap() {
        let inner = CountingSummarizer {
            calls: AtomicUsize::new(0),
        };
        let budget = InvocationBudget::new(Some(2));
        let budgeted = BudgetedSummarizer::new(&inner, &budget);

        assert!(budgeted.summarize("a").is_some());
        assert!(budgeted.summarize("b").is_some());
        assert!(budgeted.summarize("c").is_none());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(budget.issued(), 2);
    }

    #[test]
    fn test_call_log_appends_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CALL_LOG_FILENAME);
        let log = CallLog::open(&path).unwrap();
        log.record("first prompt", Some("first answer"));
        log.record("second prompt", None);

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert!(text.contains("first prompt"));
        assert!(text.contains("first answer"));
        assert!(text.contains("second prompt"));
        assert!(text.contains("<no response>"));
    }

    #[test]
    fn test_client_requires_api_key() {
        let settings = ApiSettings {
            api_key: None,
            api_key_env: "SOURCE_SUMMARIZER_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ApiSettings::default()
        };
        match CoreChatClient::new(&settings, None) {
            Err(LlmClientError::MissingApiKey(var)) => {
                assert_eq!(var, "SOURCE_SUMMARIZER_TEST_KEY_THAT_IS_NEVER_SET")
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("client should not be created without a key"),
        }
    }
}
