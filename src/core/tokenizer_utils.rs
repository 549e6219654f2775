/*
 * Token estimation for prompts sent to the model. Batching itself is driven by
 * character counts; token figures are only reported so a run's cost can be judged
 * from the logs. `CoreTikTokenCounter` uses the `cl100k_base` encoding and loads it
 * once per process.
 */
use log::error;
use std::sync::OnceLock;
use tiktoken_rs::{CoreBPE, cl100k_base};

pub trait TokenCounterOperations: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();

pub struct CoreTikTokenCounter;

impl CoreTikTokenCounter {
    pub fn new() -> Self {
        CoreTikTokenCounter
    }

    fn encoder() -> Option<&'static CoreBPE> {
        CL100K
            .get_or_init(|| match cl100k_base() {
                Ok(bpe) => Some(bpe),
                Err(e) => {
                    error!(
                        "TokenCounter: Failed to initialize cl100k_base: {e:?}. Falling back to whitespace counts."
                    );
                    None
                }
            })
            .as_ref()
    }
}

impl Default for CoreTikTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounterOperations for CoreTikTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        match Self::encoder() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.split_whitespace().count(),
        }
    }
}

/*
 * Whitespace word count. Cheap stand-in where exact token figures do not matter.
 */
pub struct SimpleWhitespaceTokenCounter;

impl TokenCounterOperations for SimpleWhitespaceTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}
