/*
 * This module consolidates the core logic of the summarizer: the project tree model,
 * scanning, configuration, batch planning and execution, merging results back into
 * the persisted document, and the final aggregation. Abstractions used as seams by
 * the run pipeline (`FileSystemScannerOperations`, `ProjectStoreOperations`,
 * `SummarizerOperations`, `FileContentReader`, `ConfigManagerOperations`,
 * `TokenCounterOperations`) are re-exported here.
 */
pub mod aggregator;
pub mod batch_executor;
pub mod batch_planner;
pub mod checksum_utils;
pub mod config;
pub mod file_node;
pub mod file_system;
pub mod llm_client;
pub mod path_utils;
pub mod project_store;
pub mod report_writer;
pub mod run_state;
pub mod tokenizer_utils;
pub mod tree_merger;

pub use file_node::{FileEntry, ProjectDocument, SummaryStore, TreeNode};

pub use file_system::{CoreFileSystemScanner, FileSystemError, FileSystemScannerOperations};

pub use project_store::{CoreProjectStore, ProjectStoreOperations, StoreError};

pub use config::{
    ConfigError, ConfigManagerOperations, CoreConfigManager, ResolvedScenario, ScanConfig,
    SummarizerConfig,
};

pub use batch_planner::{Batch, PendingFile, PlanError};

pub use batch_executor::{
    BatchExecutor, BatchOutcome, BatchStatus, FileContentReader, ProjectFileReader,
};

pub use llm_client::{
    BudgetedSummarizer, CallLog, CoreChatClient, LlmClientError, SummarizerOperations,
};

pub use aggregator::FinalAggregator;

pub use run_state::{InvocationBudget, RunState};

pub use tokenizer_utils::{CoreTikTokenCounter, TokenCounterOperations};
