use crate::core::checksum_utils;
use crate::core::config::ScanConfig;
use crate::core::file_node::{FileEntry, TreeNode};
use crate::core::path_utils::{self, OUTPUT_DIR_NAME};
use glob::Pattern;
use ignore::{DirEntry, WalkBuilder};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/*
 * Scans a project directory into the tree model persisted in the project document.
 * Traversal respects ignore files (like .gitignore), skips hidden entries unless the
 * configuration asks for them, and prunes excluded directories. Each file is
 * classified (language, category, text or binary) and, for text files, its character
 * count and content checksum are recorded.
 */

#[derive(Debug)]
pub enum FileSystemError {
    Io(io::Error),
    InvalidPath(PathBuf),
}

impl From<io::Error> for FileSystemError {
    fn from(err: io::Error) -> Self {
        FileSystemError::Io(err)
    }
}

impl std::fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSystemError::Io(e) => write!(f, "I/O error: {e}"),
            FileSystemError::InvalidPath(p) => write!(f, "Invalid path: {p:?}"),
        }
    }
}

impl std::error::Error for FileSystemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileSystemError::Io(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FileSystemError>;

pub trait FileSystemScannerOperations: Send + Sync {
    /*
     * Scans `root_path` recursively and returns the root directory node. The root's
     * relative path is empty; every other node's relative path is `/`-separated.
     * Children are sorted with directories first, then by name.
     */
    fn scan_project(&self, root_path: &Path, config: &ScanConfig) -> Result<TreeNode>;
}

pub struct CoreFileSystemScanner {}

impl CoreFileSystemScanner {
    pub fn new() -> Self {
        CoreFileSystemScanner {}
    }
}

impl Default for CoreFileSystemScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn lowercase_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

fn detect_language(name: &str, config: &ScanConfig) -> String {
    let Some(ext) = lowercase_extension(name) else {
        return "unknown".to_string();
    };
    config
        .languages
        .iter()
        .find(|(_, extensions)| extensions.iter().any(|e| e.to_lowercase() == ext))
        .map_or_else(|| "unknown".to_string(), |(language, _)| language.clone())
}

fn detect_category(name: &str, config: &ScanConfig) -> String {
    config
        .file_categories
        .iter()
        .find(|(_, names)| names.iter().any(|n| n == name))
        .map_or_else(|| "code".to_string(), |(category, _)| category.clone())
}

fn is_binary_name(name: &str, config: &ScanConfig) -> bool {
    lowercase_extension(name).is_some_and(|ext| {
        config
            .binary_extensions
            .iter()
            .any(|b| b.to_lowercase() == ext)
    })
}

/*
 * Builds the file node for `path`. Text files are read once to obtain both the
 * character count and the checksum; files that are not valid UTF-8 keep
 * `character_count: None`.
 */
fn classify_file(path: &Path, name: String, relative_path: String, config: &ScanConfig) -> FileEntry {
    let mut entry = FileEntry::new(name, relative_path);
    entry.language = detect_language(&entry.name, config);
    entry.category = detect_category(&entry.name, config);

    if is_binary_name(&entry.name, config) {
        entry.is_text = false;
        return entry;
    }

    match fs::read(path) {
        Ok(bytes) => {
            entry.checksum = Some(checksum_utils::sha256_hex(&bytes));
            match std::str::from_utf8(&bytes) {
                Ok(text) => entry.character_count = Some(text.chars().count()),
                Err(_) => log::debug!(
                    "FileSystemScanner: {path:?} is not valid UTF-8, character count unknown."
                ),
            }
        }
        Err(e) => log::warn!("FileSystemScanner: Failed to read {path:?}: {e}"),
    }
    entry
}

fn compile_exclude_patterns(exclude_dirs: &[String]) -> Vec<Pattern> {
    exclude_dirs
        .iter()
        .filter_map(|raw| match Pattern::new(raw.trim()) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                log::warn!("FileSystemScanner: Invalid exclude pattern '{raw}': {e}");
                None
            }
        })
        .collect()
}

fn sort_children_recursively(node: &mut TreeNode) {
    if let TreeNode::Directory(dir) = node {
        dir.children.sort_by(|a, b| {
            b.is_dir()
                .cmp(&a.is_dir())
                .then_with(|| a.name().cmp(b.name()))
        });
        for child in dir.children.iter_mut() {
            sort_children_recursively(child);
        }
    }
}

/*
 * Rebuilds the directory tree from walker output. Entries the walker could not read
 * (permission denied, broken links) are logged and skipped.
 */
fn build_tree(
    root_path: &Path,
    entries: impl IntoIterator<Item = std::result::Result<DirEntry, ignore::Error>>,
    config: &ScanConfig,
) -> TreeNode {
    let root_name = path_utils::project_name_from_root(root_path);
    let mut nodes_map: HashMap<PathBuf, TreeNode> = HashMap::new();
    let mut entry_paths_in_discovery_order: Vec<PathBuf> = Vec::new();
    let mut file_count = 0usize;

    for entry_result in entries {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("FileSystemScanner: Skipping unreadable entry: {e}");
                continue;
            }
        };
        let path = entry.path().to_path_buf();
        if path == root_path {
            continue;
        }
        let Some(relative_path) = path_utils::to_relative_path_string(root_path, &path) else {
            log::warn!("FileSystemScanner: {path:?} is outside {root_path:?}, skipping.");
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let node = if entry.file_type().is_some_and(|ft| ft.is_dir()) {
            TreeNode::new_directory(name, relative_path, Vec::new())
        } else {
            file_count += 1;
            TreeNode::File(classify_file(&path, name, relative_path, config))
        };
        nodes_map.insert(path.clone(), node);
        entry_paths_in_discovery_order.push(path);
    }

    // Attach leaves first so each subtree is complete before it moves into its parent.
    let mut top_level: Vec<TreeNode> = Vec::new();
    for child_path in entry_paths_in_discovery_order.iter().rev() {
        let Some(child) = nodes_map.remove(child_path) else {
            continue;
        };
        let parent = child_path
            .parent()
            .filter(|parent| *parent != root_path)
            .and_then(|parent| nodes_map.get_mut(parent));
        match parent {
            Some(TreeNode::Directory(dir)) => dir.children.push(child),
            _ => top_level.push(child),
        }
    }

    let mut root = TreeNode::new_directory(root_name, String::new(), top_level);
    sort_children_recursively(&mut root);
    log::debug!(
        "FileSystemScanner: Scan complete, {file_count} files under {root_path:?}."
    );
    root
}

impl FileSystemScannerOperations for CoreFileSystemScanner {
    fn scan_project(&self, root_path: &Path, config: &ScanConfig) -> Result<TreeNode> {
        if !root_path.is_dir() {
            return Err(FileSystemError::InvalidPath(root_path.to_path_buf()));
        }
        log::debug!(
            "FileSystemScanner: Scanning {root_path:?} (hidden entries: {}).",
            config.scan_hidden
        );

        let exclude_patterns = compile_exclude_patterns(&config.exclude_dirs);
        let mut walker_builder = WalkBuilder::new(root_path);
        walker_builder
            .standard_filters(true)
            .parents(true)
            .git_global(false)
            .git_ignore(true)
            .git_exclude(true)
            .ignore(true)
            .hidden(!config.scan_hidden)
            .sort_by_file_path(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name();
                if name == OsStr::new(OUTPUT_DIR_NAME) {
                    return false;
                }
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                let name = name.to_string_lossy();
                !(is_dir && exclude_patterns.iter().any(|p| p.matches(&name)))
            });

        Ok(build_tree(root_path, walker_builder.build(), config))
    }
}
