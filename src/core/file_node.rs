use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/*
 * Flat index of per-file summaries keyed by relative path. Mirrors the `summaries`
 * payload stored on each file node so the final aggregation can walk summaries
 * without traversing the tree. A `BTreeMap` keeps serialization and aggregation
 * order deterministic.
 */
pub type SummaryStore = BTreeMap<String, Value>;

fn default_true() -> bool {
    true
}

fn default_unknown() -> String {
    "unknown".to_string()
}

fn default_code() -> String {
    "code".to_string()
}

/*
 * Returns true when a summary payload carries actual content. Null, empty strings,
 * empty objects and empty arrays all count as "no summary yet", which matches how
 * freshly scanned nodes are initialized (`{}`).
 */
pub fn summary_is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/*
 * A node in the project tree. Directories own their children; files carry the
 * classification metadata produced at scan time plus the summarization state.
 * Serialized with a `"type"` tag (`"dir"` / `"file"`) so persisted documents stay
 * readable by other tools.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeNode {
    #[serde(rename = "dir")]
    Directory(DirectoryNode),
    #[serde(rename = "file")]
    File(FileEntry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    pub relative_path: String,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

/*
 * Metadata and summarization state for a single file.
 * `character_count` is `None` for binary files and for text files that could not be
 * decoded. `need_traverse` stays true until a summary has been written back.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub relative_path: String,
    #[serde(default = "default_unknown")]
    pub language: String,
    #[serde(default = "default_code")]
    pub category: String,
    #[serde(default = "default_true")]
    pub is_text: bool,
    #[serde(default)]
    pub character_count: Option<usize>,
    #[serde(default = "default_true")]
    pub need_traverse: bool,
    #[serde(default)]
    pub summaries: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl FileEntry {
    pub fn new(name: String, relative_path: String) -> Self {
        FileEntry {
            name,
            relative_path,
            language: default_unknown(),
            category: default_code(),
            is_text: true,
            character_count: None,
            need_traverse: true,
            summaries: Value::Object(serde_json::Map::new()),
            checksum: None,
        }
    }

    /* A summary is present when it is neither null nor empty. */
    pub fn has_summary(&self) -> bool {
        summary_is_present(&self.summaries)
    }

    /*
     * Stores a summary on the node and marks it as no longer needing traversal.
     */
    pub fn mark_summarized(&mut self, summary: Value) {
        self.summaries = summary;
        self.need_traverse = false;
    }

    pub fn has_extension_in(&self, extensions: &[String]) -> bool {
        let lower_name = self.name.to_lowercase();
        extensions
            .iter()
            .any(|ext| !ext.is_empty() && lower_name.ends_with(&ext.to_lowercase()))
    }

    #[cfg(test)]
    pub fn new_test(relative_path: &str, character_count: usize) -> Self {
        let name = relative_path
            .rsplit('/')
            .next()
            .unwrap_or(relative_path)
            .to_string();
        let mut entry = FileEntry::new(name, relative_path.to_string());
        entry.character_count = Some(character_count);
        entry
    }
}

impl TreeNode {
    pub fn new_directory(name: String, relative_path: String, children: Vec<TreeNode>) -> Self {
        TreeNode::Directory(DirectoryNode {
            name,
            relative_path,
            children,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            TreeNode::Directory(dir) => &dir.name,
            TreeNode::File(file) => &file.name,
        }
    }

    pub fn relative_path(&self) -> &str {
        match self {
            TreeNode::Directory(dir) => &dir.relative_path,
            TreeNode::File(file) => &file.relative_path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, TreeNode::Directory(_))
    }

    pub fn children(&self) -> &[TreeNode] {
        match self {
            TreeNode::Directory(dir) => &dir.children,
            TreeNode::File(_) => &[],
        }
    }

    /*
     * Visits every file node depth-first, in child order.
     */
    pub fn for_each_file<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&'a FileEntry),
    {
        match self {
            TreeNode::File(file) => visit(file),
            TreeNode::Directory(dir) => {
                for child in &dir.children {
                    child.for_each_file(visit);
                }
            }
        }
    }

    pub fn for_each_file_mut<F>(&mut self, visit: &mut F)
    where
        F: FnMut(&mut FileEntry),
    {
        match self {
            TreeNode::File(file) => visit(file),
            TreeNode::Directory(dir) => {
                for child in dir.children.iter_mut() {
                    child.for_each_file_mut(visit);
                }
            }
        }
    }

    /*
     * Depth-first search for the file node with the given relative path.
     */
    pub fn find_file(&self, relative_path: &str) -> Option<&FileEntry> {
        match self {
            TreeNode::File(file) if file.relative_path == relative_path => Some(file),
            TreeNode::File(_) => None,
            TreeNode::Directory(dir) => dir
                .children
                .iter()
                .find_map(|child| child.find_file(relative_path)),
        }
    }

    /*
     * Depth-first search for the file node with the given relative path.
     */
    pub fn find_file_mut(&mut self, relative_path: &str) -> Option<&mut FileEntry> {
        match self {
            TreeNode::File(file) => {
                if file.relative_path == relative_path {
                    Some(file)
                } else {
                    None
                }
            }
            TreeNode::Directory(dir) => dir
                .children
                .iter_mut()
                .find_map(|child| child.find_file_mut(relative_path)),
        }
    }

    /*
     * Relative paths of all files, in tree order.
     */
    pub fn file_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.for_each_file(&mut |file| paths.push(file.relative_path.clone()));
        paths
    }
}

/*
 * The persisted project document. This is the JSON written after every batch and
 * read back on later runs: the tree, the flat summary index, and a project-level
 * traversal flag.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub project_name: String,
    pub structure: TreeNode,
    #[serde(default)]
    pub summaries: SummaryStore,
    #[serde(default = "default_true")]
    pub need_traverse: bool,
}

impl ProjectDocument {
    pub fn new(project_name: String, structure: TreeNode) -> Self {
        ProjectDocument {
            project_name,
            structure,
            summaries: SummaryStore::new(),
            need_traverse: true,
        }
    }
}
