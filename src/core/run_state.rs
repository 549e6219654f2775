/*
 * Progress bookkeeping for a single summarization run.
 *
 * `InvocationBudget` is shared by the batch workers and the final aggregation so the
 * optional `max_invocations` cap covers every model call issued in a run.
 * `RunState` holds the counters reported in the logs; it is reset per run and
 * never persisted.
 */
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct InvocationBudget {
    issued: AtomicUsize,
    limit: Option<usize>,
}

impl InvocationBudget {
    pub fn new(limit: Option<usize>) -> Self {
        InvocationBudget {
            issued: AtomicUsize::new(0),
            limit,
        }
    }

    /*
     * Reserves one invocation. Returns false, without reserving, once the cap has
     * been reached. Safe to call from several worker threads.
     */
    pub fn try_acquire(&self) -> bool {
        match self.limit {
            None => {
                self.issued.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(limit) => self
                .issued
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |issued| {
                    (issued < limit).then_some(issued + 1)
                })
                .is_ok(),
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /* Never true for an unlimited budget. */
    pub fn is_exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.issued() >= limit)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub total_pending: usize,
    pub batches_planned: usize,
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub files_summarized: usize,
    pub invocations_issued: usize,
    pub invocations_allowed: Option<usize>,
    pub prompt_tokens: usize,
}

impl RunState {
    pub fn new(total_pending: usize, batches_planned: usize, allowed: Option<usize>) -> Self {
        RunState {
            total_pending,
            batches_planned,
            invocations_allowed: allowed,
            ..RunState::default()
        }
    }

    /*
     * Percentage of planned work done, counting the final aggregation as one extra
     * step so the figure only reaches 100 once the report is produced.
     */
    pub fn progress_percent(&self, aggregation_done: bool) -> f64 {
        let total_steps = self.batches_planned + 1;
        let done = self.batches_completed + usize::from(aggregation_done);
        (done as f64 / total_steps as f64) * 100.0
    }

    pub fn log_summary(&self) {
        log::info!(
            "RunState: {} pending files, {}/{} batches completed ({} without results), {} files summarized.",
            self.total_pending,
            self.batches_completed,
            self.batches_planned,
            self.batches_failed,
            self.files_summarized
        );
        log::info!(
            "RunState: {} model invocations issued (cap: {}), ~{} prompt tokens sent.",
            self.invocations_issued,
            self.invocations_allowed
                .map_or_else(|| "none".to_string(), |cap| cap.to_string()),
            self.prompt_tokens
        );
    }
}
