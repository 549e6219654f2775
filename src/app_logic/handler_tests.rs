use super::handler::{DEFAULT_REPORT_NAME, RunContext, RunError, RunEstimate, SummarizerApp};

use crate::core::batch_executor::FileContentReader;
use crate::core::config::{ResolvedScenario, ScanConfig, SummarizerConfig};
use crate::core::file_node::{FileEntry, ProjectDocument, TreeNode};
use crate::core::file_system::{FileSystemError, FileSystemScannerOperations};
use crate::core::llm_client::SummarizerOperations;
use crate::core::project_store::{ProjectStoreOperations, StoreError};
use crate::core::report_writer::{FILE_LIST_FILENAME, TREE_MARKDOWN_FILENAME};
use crate::core::tokenizer_utils::SimpleWhitespaceTokenCounter;
use crate::core::tree_merger;

use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{TempDir, tempdir};

/*
 * Unit tests for `SummarizerApp`. Storage, scanning, the model and file contents are
 * all mocked so the tests exercise batching, persistence after each batch, resume
 * behavior, the invocation cap and the final aggregation in isolation.
 */

// --- Mock Structures (ProjectStore, Scanner, Summarizer, FileReader) ---
struct MockProjectStore {
    document: Mutex<Option<ProjectDocument>>,
    save_calls: Mutex<usize>,
    fail_saves: Mutex<bool>,
}

impl MockProjectStore {
    fn new(document: Option<ProjectDocument>) -> Self {
        MockProjectStore {
            document: Mutex::new(document),
            save_calls: Mutex::new(0),
            fail_saves: Mutex::new(false),
        }
    }
    fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }
    fn save_count(&self) -> usize {
        *self.save_calls.lock().unwrap()
    }
    fn current(&self) -> ProjectDocument {
        self.document.lock().unwrap().clone().expect("a saved document")
    }
}

impl ProjectStoreOperations for MockProjectStore {
    fn load_document(&self, path: &Path) -> Result<ProjectDocument, StoreError> {
        self.document
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| StoreError::DocumentNotFound(path.to_path_buf()))
    }

    fn save_document(&self, _path: &Path, document: &ProjectDocument) -> Result<(), StoreError> {
        *self.save_calls.lock().unwrap() += 1;
        if *self.fail_saves.lock().unwrap() {
            return Err(StoreError::Io(io::Error::other("mocked disk full")));
        }
        *self.document.lock().unwrap() = Some(document.clone());
        Ok(())
    }

    fn save_document_with_merge(
        &self,
        path: &Path,
        document: ProjectDocument,
    ) -> Result<ProjectDocument, StoreError> {
        let merged = match self.document.lock().unwrap().as_ref() {
            Some(previous) => tree_merger::merge_documents(previous, document),
            None => document,
        };
        self.save_document(path, &merged)?;
        Ok(merged)
    }
}
// --- End MockProjectStore ---

struct MockScanner {
    tree: Mutex<Result<TreeNode, String>>,
}

impl MockScanner {
    fn new(tree: TreeNode) -> Self {
        MockScanner {
            tree: Mutex::new(Ok(tree)),
        }
    }
    fn failing() -> Self {
        MockScanner {
            tree: Mutex::new(Err("/missing".to_string())),
        }
    }
}

impl FileSystemScannerOperations for MockScanner {
    fn scan_project(&self, _root: &Path, _config: &ScanConfig) -> Result<TreeNode, FileSystemError> {
        self.tree
            .lock()
            .unwrap()
            .clone()
            .map_err(|p| FileSystemError::InvalidPath(PathBuf::from(p)))
    }
}

/*
 * Answers batch prompts with one summary per `[FILE PATH: ...]` header and final
 * prompts with a fixed report. Paths listed in `failing_paths` make the whole batch
 * fail, as a transport error would.
 */
struct MockSummarizer {
    prompts: Mutex<Vec<String>>,
    failing_paths: Vec<String>,
    final_report: Option<String>,
}

impl MockSummarizer {
    fn new() -> Self {
        MockSummarizer {
            prompts: Mutex::new(Vec::new()),
            failing_paths: Vec::new(),
            final_report: Some("FINAL REPORT".to_string()),
        }
    }
    fn failing_for(paths: &[&str]) -> Self {
        MockSummarizer {
            failing_paths: paths.iter().map(|p| p.to_string()).collect(),
            ..MockSummarizer::new()
        }
    }
    fn batch_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with("BATCH"))
            .cloned()
            .collect()
    }
    fn final_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with("FINAL"))
            .cloned()
            .collect()
    }
}

impl SummarizerOperations for MockSummarizer {
    fn summarize(&self, prompt: &str) -> Option<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.starts_with("FINAL") {
            return self.final_report.clone();
        }
        let paths: Vec<&str> = prompt
            .lines()
            .filter_map(|line| line.strip_prefix("[FILE PATH: ")?.strip_suffix(']'))
            .collect();
        if paths.iter().any(|p| self.failing_paths.iter().any(|f| f.as_str() == *p)) {
            return None;
        }
        let answer: serde_json::Map<String, serde_json::Value> = paths
            .iter()
            .map(|p| (p.to_string(), json!(format!("summary of {p}"))))
            .collect();
        Some(format!("```json\n{}\n```", serde_json::Value::Object(answer)))
    }
}

struct MockReader {
    files: HashMap<String, String>,
}

impl MockReader {
    fn new(files: &[(&str, &str)]) -> Self {
        MockReader {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        }
    }
}

impl FileContentReader for MockReader {
    fn read_file(&self, relative_path: &str) -> io::Result<String> {
        self.files
            .get(relative_path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, relative_path.to_string()))
    }
}
// --- End Mock Structures ---

fn project_document(files: &[(&str, usize)]) -> ProjectDocument {
    let children = files
        .iter()
        .map(|(path, count)| TreeNode::File(FileEntry::new_test(path, *count)))
        .collect();
    ProjectDocument::new(
        "demo".into(),
        TreeNode::new_directory("demo".into(), "".into(), children),
    )
}

fn scenario(threshold: usize, workers: usize, cap: Option<usize>) -> ResolvedScenario {
    ResolvedScenario {
        name: "direct".to_string(),
        batch_prompt: "BATCH\n{batch_content}".to_string(),
        final_prompt: "FINAL\nSeed: {initial_summary}\nFiles:\n{code_summaries}".to_string(),
        use_seed: true,
        batch_threshold: threshold,
        max_concurrent_requests: workers,
        max_invocations: cap,
    }
}

fn skip_md() -> Vec<String> {
    vec![".md".to_string()]
}

fn setup_app(
    document: Option<ProjectDocument>,
    scanner: MockScanner,
) -> (SummarizerApp, Arc<MockProjectStore>, RunContext, TempDir) {
    let store = Arc::new(MockProjectStore::new(document));
    let app = SummarizerApp::new(
        Arc::new(scanner),
        store.clone(),
        Arc::new(SimpleWhitespaceTokenCounter),
    );
    let dir = tempdir().unwrap();
    let ctx = RunContext::new(
        Path::new("/mock/demo"),
        Some("demo".to_string()),
        Some(dir.path().join("out")),
        None,
    );
    (app, store, ctx, dir)
}

fn empty_scanner() -> MockScanner {
    MockScanner::new(TreeNode::new_directory("demo".into(), "".into(), Vec::new()))
}

#[test]
fn test_run_context_defaults() {
    let ctx = RunContext::new(Path::new("/work/demo"), Some("demo".into()), None, None);
    assert_eq!(ctx.report_name, DEFAULT_REPORT_NAME);
    assert!(ctx.output_dir.ends_with(".source_summarizer/demo"));
    assert!(ctx.document_path().ends_with("project_structure.json"));
}

#[test]
fn test_summarize_processes_all_batches_and_writes_report() {
    let doc = project_document(&[("README.md", 30), ("a.py", 40), ("b.py", 40), ("c.py", 90)]);
    let (app, store, ctx, _dir) = setup_app(Some(doc), empty_scanner());
    let summarizer = MockSummarizer::new();
    let reader = MockReader::new(&[
        ("README.md", "Demo is a tiny CLI."),
        ("a.py", "import b"),
        ("b.py", "x = 1"),
        ("c.py", "print(x)"),
    ]);

    let report = app
        .summarize(&ctx, &scenario(100, 1, None), &skip_md(), &summarizer, &reader)
        .unwrap();

    let batches = summarizer.batch_prompts();
    assert_eq!(batches.len(), 2, "expected [[a, b], [c]]");
    assert!(batches[0].contains("[FILE PATH: a.py]") && batches[0].contains("[FILE PATH: b.py]"));
    assert!(batches[1].contains("[FILE PATH: c.py]"));
    assert!(batches.iter().all(|p| !p.contains("README.md")));

    let saved = store.current();
    assert_eq!(saved.summaries.len(), 3);
    assert_eq!(saved.summaries["c.py"], json!("summary of c.py"));
    assert!(!saved.need_traverse);
    assert_eq!(store.save_count(), 3, "one save per batch plus the final save");

    let finals = summarizer.final_prompts();
    assert_eq!(finals.len(), 1);
    assert!(finals[0].contains("Seed: Demo is a tiny CLI."));
    assert!(finals[0].contains("[a.py]\nsummary of a.py"));

    assert_eq!(report.final_summary, "FINAL REPORT");
    let report_path = report.report_path.expect("report written");
    assert!(report_path.starts_with(&ctx.output_dir));
    assert_eq!(fs::read_to_string(report_path).unwrap(), "FINAL REPORT");
    assert_eq!(report.state.batches_completed, 2);
    assert_eq!(report.state.files_summarized, 3);
    assert_eq!(report.state.invocations_issued, 3);
}

#[test]
fn test_rerun_only_aggregates_when_everything_is_summarized() {
    let doc = project_document(&[("a.py", 10), ("b.py", 10)]);
    let (app, _store, ctx, _dir) = setup_app(Some(doc), empty_scanner());
    let reader = MockReader::new(&[("a.py", "a"), ("b.py", "b")]);

    let first = MockSummarizer::new();
    app.summarize(&ctx, &scenario(100, 1, None), &skip_md(), &first, &reader)
        .unwrap();
    assert_eq!(first.batch_prompts().len(), 1);

    let second = MockSummarizer::new();
    let report = app
        .summarize(&ctx, &scenario(100, 1, None), &skip_md(), &second, &reader)
        .unwrap();
    assert!(second.batch_prompts().is_empty());
    assert_eq!(second.final_prompts().len(), 1);
    assert!(report.report_path.is_some());
}

#[test]
fn test_failed_batch_leaves_files_pending_for_next_run() {
    let doc = project_document(&[("a.py", 60), ("b.py", 60)]);
    let (app, store, ctx, _dir) = setup_app(Some(doc), empty_scanner());
    let reader = MockReader::new(&[("a.py", "a"), ("b.py", "b")]);

    let summarizer = MockSummarizer::failing_for(&["b.py"]);
    let report = app
        .summarize(&ctx, &scenario(100, 1, None), &skip_md(), &summarizer, &reader)
        .unwrap();

    let saved = store.current();
    assert!(saved.structure.find_file("a.py").unwrap().has_summary());
    let b = saved.structure.find_file("b.py").unwrap();
    assert!(b.need_traverse);
    assert!(!b.has_summary());
    assert!(saved.need_traverse);
    assert_eq!(report.state.batches_failed, 1);

    let retry = MockSummarizer::new();
    app.summarize(&ctx, &scenario(100, 1, None), &skip_md(), &retry, &reader)
        .unwrap();
    let retried = retry.batch_prompts();
    assert_eq!(retried.len(), 1);
    assert!(retried[0].contains("[FILE PATH: b.py]"));
    assert!(!retried[0].contains("[FILE PATH: a.py]"));
    assert!(!store.current().need_traverse);
}

#[test]
fn test_invocation_cap_stops_batches_and_skips_aggregation() {
    let doc = project_document(&[("a.py", 60), ("b.py", 60), ("c.py", 60)]);
    let (app, store, ctx, _dir) = setup_app(Some(doc), empty_scanner());
    let reader = MockReader::new(&[("a.py", "a"), ("b.py", "b"), ("c.py", "c")]);
    let summarizer = MockSummarizer::new();

    let report = app
        .summarize(&ctx, &scenario(100, 1, Some(2)), &skip_md(), &summarizer, &reader)
        .unwrap();

    assert_eq!(summarizer.batch_prompts().len(), 2);
    assert!(summarizer.final_prompts().is_empty());
    assert_eq!(report.report_path, None);
    assert_eq!(report.state.invocations_issued, 2);
    assert_eq!(store.current().summaries.len(), 2);
    assert!(store.current().need_traverse);
}

#[test]
fn test_concurrent_workers_apply_every_batch_once() {
    let names: Vec<String> = (0..12).map(|i| format!("mod_{i}.py")).collect();
    let files: Vec<(&str, usize)> = names.iter().map(|n| (n.as_str(), 70)).collect();
    let contents: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "pass")).collect();
    let (app, store, ctx, _dir) = setup_app(Some(project_document(&files)), empty_scanner());
    let reader = MockReader::new(&contents);
    let summarizer = MockSummarizer::new();

    let report = app
        .summarize(&ctx, &scenario(100, 4, None), &skip_md(), &summarizer, &reader)
        .unwrap();

    assert_eq!(summarizer.batch_prompts().len(), 12);
    assert_eq!(report.state.batches_completed, 12);
    assert_eq!(store.save_count(), 13);
    let saved = store.current();
    assert_eq!(saved.summaries.len(), 12);
    for name in &names {
        assert_eq!(saved.summaries[name], json!(format!("summary of {name}")));
    }
    assert!(report.report_path.is_some());
}

#[test]
fn test_save_failure_is_fatal() {
    let doc = project_document(&[("a.py", 60), ("b.py", 60)]);
    let (app, store, ctx, _dir) = setup_app(Some(doc), empty_scanner());
    store.set_fail_saves(true);
    let reader = MockReader::new(&[("a.py", "a"), ("b.py", "b")]);
    let summarizer = MockSummarizer::new();

    let result = app.summarize(&ctx, &scenario(100, 1, None), &skip_md(), &summarizer, &reader);

    assert!(matches!(result, Err(RunError::Store(StoreError::Io(_)))));
    assert!(summarizer.final_prompts().is_empty());
}

#[test]
fn test_summarize_without_document_fails() {
    let (app, _store, ctx, _dir) = setup_app(None, empty_scanner());
    let result = app.summarize(
        &ctx,
        &scenario(100, 1, None),
        &skip_md(),
        &MockSummarizer::new(),
        &MockReader::new(&[]),
    );
    assert!(matches!(
        result,
        Err(RunError::Store(StoreError::DocumentNotFound(_)))
    ));
}

#[test]
fn test_seed_is_omitted_when_scenario_disables_it() {
    let doc = project_document(&[("README.md", 10), ("a.py", 10)]);
    let (app, _store, ctx, _dir) = setup_app(Some(doc), empty_scanner());
    let reader = MockReader::new(&[("README.md", "SEED TEXT"), ("a.py", "a")]);
    let summarizer = MockSummarizer::new();
    let no_seed = ResolvedScenario {
        use_seed: false,
        ..scenario(100, 1, None)
    };

    app.summarize(&ctx, &no_seed, &skip_md(), &summarizer, &reader)
        .unwrap();

    let finals = summarizer.final_prompts();
    assert_eq!(finals.len(), 1);
    assert!(!finals[0].contains("SEED TEXT"));
}

#[test]
fn test_empty_final_summary_writes_no_report() {
    let doc = project_document(&[("a.py", 10)]);
    let (app, _store, ctx, _dir) = setup_app(Some(doc), empty_scanner());
    let reader = MockReader::new(&[("a.py", "a")]);
    let summarizer = MockSummarizer {
        final_report: None,
        ..MockSummarizer::new()
    };

    let report = app
        .summarize(&ctx, &scenario(100, 1, None), &skip_md(), &summarizer, &reader)
        .unwrap();
    assert_eq!(report.final_summary, "");
    assert_eq!(report.report_path, None);
}

#[test]
fn test_estimate_counts_pending_batches() {
    let doc = project_document(&[("a.py", 40), ("b.py", 40), ("c.py", 90), ("notes.md", 5)]);
    let (app, _store, ctx, _dir) = setup_app(Some(doc), empty_scanner());

    let estimate = app.estimate(&ctx, &scenario(100, 1, None), &skip_md()).unwrap();
    assert_eq!(
        estimate,
        RunEstimate {
            pending_files: 3,
            invocations: 2
        }
    );
}

#[test]
fn test_scan_merges_with_saved_document_and_writes_outputs() {
    let mut previous = project_document(&[("a.py", 10)]);
    previous
        .structure
        .find_file_mut("a.py")
        .unwrap()
        .mark_summarized(json!("old summary"));
    previous
        .summaries
        .insert("a.py".into(), json!("old summary"));

    let fresh_tree = project_document(&[("a.py", 10), ("b.py", 20)]).structure;
    let (app, store, ctx, _dir) = setup_app(Some(previous), MockScanner::new(fresh_tree));

    let document = app.scan(&ctx, &ScanConfig::default()).unwrap();

    assert_eq!(document.summaries.len(), 1);
    assert!(!document.structure.find_file("a.py").unwrap().need_traverse);
    assert!(document.structure.find_file("b.py").unwrap().need_traverse);
    assert_eq!(store.current(), document);
    assert_eq!(
        fs::read_to_string(ctx.output_dir.join(FILE_LIST_FILENAME)).unwrap(),
        "a.py\nb.py"
    );
    assert!(ctx.output_dir.join(TREE_MARKDOWN_FILENAME).exists());
}

#[test]
fn test_scan_error_is_reported() {
    let (app, _store, ctx, _dir) = setup_app(None, MockScanner::failing());
    assert!(matches!(
        app.scan(&ctx, &ScanConfig::default()),
        Err(RunError::Scan(FileSystemError::InvalidPath(_)))
    ));
}

#[test]
fn test_run_scans_then_summarizes() {
    let tree = project_document(&[("a.py", 10), ("b.py", 10)]).structure;
    let (app, store, ctx, _dir) = setup_app(None, MockScanner::new(tree));
    let reader = MockReader::new(&[("a.py", "a"), ("b.py", "b")]);
    let summarizer = MockSummarizer::new();
    let config = SummarizerConfig::default();

    let report = app
        .run(&ctx, &config, &scenario(100, 2, None), &summarizer, &reader)
        .unwrap();

    assert_eq!(store.current().summaries.len(), 2);
    assert_eq!(report.final_summary, "FINAL REPORT");
}
