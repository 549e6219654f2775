use crate::core::aggregator::FinalAggregator;
use crate::core::batch_executor::{BatchExecutor, BatchOutcome, FileContentReader};
use crate::core::batch_planner::{self, Batch, PlanError};
use crate::core::config::{ConfigError, ResolvedScenario, ScanConfig, SummarizerConfig};
use crate::core::file_node::{ProjectDocument, TreeNode};
use crate::core::file_system::{FileSystemError, FileSystemScannerOperations};
use crate::core::llm_client::{BudgetedSummarizer, LlmClientError, SummarizerOperations};
use crate::core::path_utils;
use crate::core::project_store::{PROJECT_DOCUMENT_FILENAME, ProjectStoreOperations, StoreError};
use crate::core::report_writer;
use crate::core::run_state::{InvocationBudget, RunState};
use crate::core::tokenizer_utils::TokenCounterOperations;
use crate::core::tree_merger;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

pub const APP_NAME: &str = "SourceSummarizer";
pub const DEFAULT_REPORT_NAME: &str = "final_project_summary";
const SEED_FILE_NAME: &str = "readme.md";

/*
 * Paths and names for one invocation of the tool. Built once from the command
 * line and passed to every step; nothing here is global.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub project_root: PathBuf,
    pub project_name: String,
    pub output_dir: PathBuf,
    pub report_name: String,
}

impl RunContext {
    pub fn new(
        project_root: &Path,
        project_name: Option<String>,
        output_dir: Option<PathBuf>,
        report_name: Option<String>,
    ) -> Self {
        let project_name =
            project_name.unwrap_or_else(|| path_utils::project_name_from_root(project_root));
        let output_dir = output_dir
            .unwrap_or_else(|| path_utils::default_output_dir(project_root, &project_name));
        RunContext {
            project_root: project_root.to_path_buf(),
            project_name,
            output_dir,
            report_name: report_name.unwrap_or_else(|| DEFAULT_REPORT_NAME.to_string()),
        }
    }

    /* Location of the persisted project document. */
    pub fn document_path(&self) -> PathBuf {
        self.output_dir.join(PROJECT_DOCUMENT_FILENAME)
    }
}

#[derive(Debug)]
pub enum RunError {
    Config(ConfigError),
    Store(StoreError),
    Scan(FileSystemError),
    Plan(PlanError),
    Io(io::Error),
    Llm(LlmClientError),
}

impl From<ConfigError> for RunError {
    fn from(err: ConfigError) -> Self {
        RunError::Config(err)
    }
}

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        RunError::Store(err)
    }
}

impl From<FileSystemError> for RunError {
    fn from(err: FileSystemError) -> Self {
        RunError::Scan(err)
    }
}

impl From<PlanError> for RunError {
    fn from(err: PlanError) -> Self {
        RunError::Plan(err)
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        RunError::Io(err)
    }
}

impl From<LlmClientError> for RunError {
    fn from(err: LlmClientError) -> Self {
        RunError::Llm(err)
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Config(e) => write!(f, "{e}"),
            RunError::Store(e) => write!(f, "Project document error: {e}"),
            RunError::Scan(e) => write!(f, "Scan failed: {e}"),
            RunError::Plan(e) => write!(f, "Batch planning failed: {e}"),
            RunError::Io(e) => write!(f, "I/O error: {e}"),
            RunError::Llm(e) => write!(f, "Model client error: {e}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Config(e) => Some(e),
            RunError::Store(e) => Some(e),
            RunError::Scan(e) => Some(e),
            RunError::Plan(e) => Some(e),
            RunError::Io(e) => Some(e),
            RunError::Llm(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

/*
 * What a summarization run produced. `report_path` is `None` when no report was
 * written (nothing to aggregate, budget exhausted, or the final call failed).
 */
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub report_path: Option<PathBuf>,
    pub final_summary: String,
    pub state: RunState,
}

/*
 * Pending work for a project as seen before any model call.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunEstimate {
    pub pending_files: usize,
    pub invocations: usize,
}

/*
 * Drives scans and summarization runs. Storage, scanning and token counting are
 * injected so the pipeline can be exercised with mocks; the summarizer and file
 * reader are passed per run.
 */
pub struct SummarizerApp {
    scanner: Arc<dyn FileSystemScannerOperations>,
    store: Arc<dyn ProjectStoreOperations>,
    token_counter: Arc<dyn TokenCounterOperations>,
}

impl SummarizerApp {
    pub fn new(
        scanner: Arc<dyn FileSystemScannerOperations>,
        store: Arc<dyn ProjectStoreOperations>,
        token_counter: Arc<dyn TokenCounterOperations>,
    ) -> Self {
        SummarizerApp {
            scanner,
            store,
            token_counter,
        }
    }

    /*
     * Scans the project, merges the result with any saved document so existing
     * summaries survive, and writes the tree outline and file list.
     */
    pub fn scan(&self, ctx: &RunContext, scan_config: &ScanConfig) -> Result<ProjectDocument> {
        fs::create_dir_all(&ctx.output_dir)?;
        let tree = self.scanner.scan_project(&ctx.project_root, scan_config)?;
        let document = ProjectDocument::new(ctx.project_name.clone(), tree);
        let document = self
            .store
            .save_document_with_merge(&ctx.document_path(), document)?;

        let tree_path = report_writer::write_tree_markdown(&ctx.output_dir, &document.structure)?;
        let list_path = report_writer::write_file_list(&ctx.output_dir, &document.structure)?;
        log::info!(
            "Handler: Scanned '{}': {} files, {} already summarized. Wrote {tree_path:?} and {list_path:?}.",
            document.project_name,
            document.structure.file_paths().len(),
            document.summaries.len()
        );
        Ok(document)
    }

    /*
     * Counts pending files and the batch invocations they will need, without
     * calling the model.
     */
    pub fn estimate(
        &self,
        ctx: &RunContext,
        scenario: &ResolvedScenario,
        skip_extensions: &[String],
    ) -> Result<RunEstimate> {
        let document = self.store.load_document(&ctx.document_path())?;
        let pending = tree_merger::collect_pending(&document.structure, skip_extensions);
        let invocations = batch_planner::estimate_invocations(&pending, scenario.batch_threshold)?;
        log::info!(
            "Handler: {} pending files need {invocations} batch invocations (threshold {}).",
            pending.len(),
            scenario.batch_threshold
        );
        Ok(RunEstimate {
            pending_files: pending.len(),
            invocations,
        })
    }

    /*
     * Summarizes every pending file in batches, persisting after each batch, then
     * folds all summaries into the final report.
     */
    pub fn summarize(
        &self,
        ctx: &RunContext,
        scenario: &ResolvedScenario,
        skip_extensions: &[String],
        summarizer: &dyn SummarizerOperations,
        reader: &dyn FileContentReader,
    ) -> Result<RunReport> {
        let document_path = ctx.document_path();
        let mut document = self.store.load_document(&document_path)?;

        let seed = if scenario.use_seed {
            extract_seed(&document.structure, reader)
        } else {
            String::new()
        };

        let pending = tree_merger::collect_pending(&document.structure, skip_extensions);
        let batches = batch_planner::plan_batches(&pending, scenario.batch_threshold)?;
        let budget = InvocationBudget::new(scenario.max_invocations);
        let mut state = RunState::new(pending.len(), batches.len(), scenario.max_invocations);
        log::info!(
            "Handler: Scenario '{}': {} pending files in {} batches, {} workers.",
            scenario.name,
            pending.len(),
            batches.len(),
            scenario.max_concurrent_requests
        );

        self.execute_batches(
            &batches,
            &mut document,
            &document_path,
            scenario,
            summarizer,
            reader,
            &budget,
            &mut state,
        )?;

        document.need_traverse =
            !tree_merger::collect_pending(&document.structure, skip_extensions).is_empty();
        self.store.save_document(&document_path, &document)?;

        let final_summary = if budget.is_exhausted() {
            log::warn!(
                "Handler: Invocation cap reached during batches, skipping final aggregation. Re-run to continue."
            );
            String::new()
        } else if document.summaries.is_empty() {
            log::warn!("Handler: No file summaries available, skipping final aggregation.");
            String::new()
        } else {
            let budgeted = BudgetedSummarizer::new(summarizer, &budget);
            FinalAggregator::new(&budgeted, &scenario.final_prompt, scenario.batch_threshold)
                .aggregate(&seed, &document.summaries)
        };
        state.invocations_issued = budget.issued();

        let report_path = if final_summary.trim().is_empty() {
            log::warn!("Handler: Final summary is empty, no report written.");
            None
        } else {
            log::info!("Handler: Progress {:.1}%.", state.progress_percent(true));
            Some(report_writer::write_final_report(
                &ctx.output_dir,
                &ctx.report_name,
                &final_summary,
            )?)
        };

        state.log_summary();
        Ok(RunReport {
            report_path,
            final_summary,
            state,
        })
    }

    /*
     * Scan followed by a summarization run.
     */
    pub fn run(
        &self,
        ctx: &RunContext,
        config: &SummarizerConfig,
        scenario: &ResolvedScenario,
        summarizer: &dyn SummarizerOperations,
        reader: &dyn FileContentReader,
    ) -> Result<RunReport> {
        self.scan(ctx, &config.scan)?;
        self.summarize(ctx, scenario, &config.skip_extensions, summarizer, reader)
    }

    /*
     * Worker threads take batches in plan order from a shared index and send their
     * outcomes back over a channel. This thread is the only writer of `document`:
     * it applies each outcome and saves before handling the next one. A failed save
     * stops the workers from taking new batches and is returned once in-flight
     * batches have drained.
     */
    #[allow(clippy::too_many_arguments)]
    fn execute_batches(
        &self,
        batches: &[Batch],
        document: &mut ProjectDocument,
        document_path: &Path,
        scenario: &ResolvedScenario,
        summarizer: &dyn SummarizerOperations,
        reader: &dyn FileContentReader,
        budget: &InvocationBudget,
        state: &mut RunState,
    ) -> Result<()> {
        if batches.is_empty() {
            log::info!("Handler: Nothing pending, all files already summarized.");
            return Ok(());
        }

        let executor = BatchExecutor::new(
            summarizer,
            reader,
            self.token_counter.as_ref(),
            &scenario.batch_prompt,
        );
        let next_batch = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let worker_count = scenario.max_concurrent_requests.clamp(1, batches.len());
        let (tx, rx) = mpsc::channel::<BatchOutcome>();

        thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let tx = tx.clone();
                let executor = &executor;
                let next_batch = &next_batch;
                let stop = &stop;
                scope.spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        let index = next_batch.fetch_add(1, Ordering::SeqCst);
                        let Some(batch) = batches.get(index) else {
                            break;
                        };
                        if !budget.try_acquire() {
                            log::warn!(
                                "Handler: Worker {worker_id}: invocation cap reached, batch {index} left pending."
                            );
                            stop.store(true, Ordering::SeqCst);
                            break;
                        }
                        if tx.send(executor.execute(index, batch)).is_err() {
                            break;
                        }
                    }
                    log::trace!("Handler: Worker {worker_id} finished.");
                });
            }
            drop(tx);

            let mut save_error: Option<StoreError> = None;
            for outcome in rx {
                let applied = tree_merger::apply_batch_results(document, &outcome.summaries);
                state.batches_completed += 1;
                state.files_summarized += applied;
                state.prompt_tokens += outcome.prompt_tokens;
                if outcome.is_failure() {
                    state.batches_failed += 1;
                }

                if save_error.is_none()
                    && let Err(e) = self.store.save_document(document_path, document)
                {
                    log::error!("Handler: Failed to persist after batch {}: {e}", outcome.batch_index);
                    stop.store(true, Ordering::SeqCst);
                    save_error = Some(e);
                }

                log::info!(
                    "Handler: Batch {} finished ({:?}, {}/{} files summarized). Progress {:.1}%.",
                    outcome.batch_index,
                    outcome.status,
                    applied,
                    outcome.paths.len(),
                    state.progress_percent(false)
                );
            }

            match save_error {
                Some(e) => Err(RunError::Store(e)),
                None => Ok(()),
            }
        })
    }
}

/*
 * Reads the project's own description (a `README.md` at the root, any case) to
 * seed the final report. Missing or unreadable descriptions yield an empty seed.
 */
fn extract_seed(tree: &TreeNode, reader: &dyn FileContentReader) -> String {
    let readme = tree.children().iter().find_map(|node| match node {
        TreeNode::File(file) if file.name.eq_ignore_ascii_case(SEED_FILE_NAME) => {
            Some(file.relative_path.as_str())
        }
        _ => None,
    });
    let Some(readme) = readme else {
        log::warn!("Handler: No README.md at the project root, continuing without a seed description.");
        return String::new();
    };
    reader.read_file(readme).unwrap_or_else(|e| {
        log::warn!("Handler: Failed to read seed description '{readme}': {e}");
        String::new()
    })
}
