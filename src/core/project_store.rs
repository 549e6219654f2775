/*
 * Persistence for the project document (tree plus summaries) as pretty-printed JSON.
 *
 * The document is rewritten after every batch, so each save goes to a temporary
 * sibling file that is then renamed over the target. An interrupted run therefore
 * leaves either the previous or the new document on disk, never a truncated one.
 *
 * `ProjectStoreOperations` is the seam the run pipeline depends on; tests replace it
 * with an in-memory mock.
 */
use crate::core::file_node::ProjectDocument;
use crate::core::tree_merger;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const PROJECT_DOCUMENT_FILENAME: &str = "project_structure.json";
const TEMP_SUFFIX: &str = "tmp";

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Serde(serde_json::Error),
    DocumentNotFound(PathBuf),
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serde(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
            StoreError::Serde(e) => write!(f, "Serialization/Deserialization error: {e}"),
            StoreError::DocumentNotFound(path) => {
                write!(f, "Project document not found: {path:?}. Run a scan first.")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Serde(e) => Some(e),
            StoreError::DocumentNotFound(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub trait ProjectStoreOperations: Send + Sync {
    fn load_document(&self, path: &Path) -> Result<ProjectDocument>;
    fn save_document(&self, path: &Path, document: &ProjectDocument) -> Result<()>;
    /*
     * Saves a freshly scanned document, first carrying over summaries from the
     * document already at `path` (if any). Returns what was written.
     */
    fn save_document_with_merge(
        &self,
        path: &Path,
        document: ProjectDocument,
    ) -> Result<ProjectDocument>;
}

pub struct CoreProjectStore {}

impl CoreProjectStore {
    pub fn new() -> Self {
        CoreProjectStore {}
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".");
        temp.push(TEMP_SUFFIX);
        PathBuf::from(temp)
    }
}

impl Default for CoreProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectStoreOperations for CoreProjectStore {
    fn load_document(&self, path: &Path) -> Result<ProjectDocument> {
        if !path.exists() {
            return Err(StoreError::DocumentNotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let document: ProjectDocument = serde_json::from_reader(BufReader::new(file))?;
        log::debug!(
            "CoreProjectStore: Loaded document for '{}' from {path:?}.",
            document.project_name
        );
        Ok(document)
    }

    fn save_document(&self, path: &Path, document: &ProjectDocument) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let temp_path = Self::temp_path_for(path);
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, document)?;
            writer.flush()?;
        }
        fs::rename(&temp_path, path)?;
        log::trace!("CoreProjectStore: Saved document to {path:?}.");
        Ok(())
    }

    fn save_document_with_merge(
        &self,
        path: &Path,
        document: ProjectDocument,
    ) -> Result<ProjectDocument> {
        let merged = if path.exists() {
            match self.load_document(path) {
                Ok(previous) => {
                    log::info!(
                        "CoreProjectStore: Merging scan with {} existing summaries.",
                        previous.summaries.len()
                    );
                    tree_merger::merge_documents(&previous, document)
                }
                Err(e) => {
                    log::warn!(
                        "CoreProjectStore: Existing document {path:?} could not be read ({e}), overwriting it."
                    );
                    document
                }
            }
        } else {
            document
        };
        self.save_document(path, &merged)?;
        Ok(merged)
    }
}
