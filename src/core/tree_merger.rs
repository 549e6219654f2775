/*
 * Writes batch results back into the project document and reconciles a fresh scan
 * with a previously saved document.
 *
 * Summaries are only ever added for files that exist in the tree, and writing the
 * same results twice leaves the document unchanged, so resuming after an
 * interruption is safe.
 */
use crate::core::batch_planner::PendingFile;
use crate::core::checksum_utils::content_changed;
use crate::core::file_node::{FileEntry, ProjectDocument, SummaryStore, TreeNode};
use serde_json::Value;
use std::collections::HashMap;

/*
 * Stores `summary` on the file node at `relative_path`. Returns false when no such
 * file exists in the tree.
 */
pub fn apply_summary(tree: &mut TreeNode, relative_path: &str, summary: Value) -> bool {
    match tree.find_file_mut(relative_path) {
        Some(file) => {
            file.mark_summarized(summary);
            true
        }
        None => false,
    }
}

/*
 * Applies one batch's summaries to both the tree and the flat summary index.
 * Entries naming paths that are not in the tree are skipped. Returns the number of
 * files updated.
 */
pub fn apply_batch_results(document: &mut ProjectDocument, results: &SummaryStore) -> usize {
    let mut applied = 0;
    for (path, summary) in results {
        if apply_summary(&mut document.structure, path, summary.clone()) {
            document.summaries.insert(path.clone(), summary.clone());
            applied += 1;
        } else {
            log::warn!("TreeMerger: No file node for '{path}', summary not applied.");
        }
    }
    applied
}

/*
 * Carries summaries and `need_traverse = false` from `old` into `new` for files
 * present in both trees. The two are carried independently, so a file excluded by
 * hand stays excluded without ever having been summarized. A file whose checksum
 * changed is left pending instead.
 */
pub fn merge_trees(old: &TreeNode, mut new: TreeNode) -> TreeNode {
    let mut old_files: HashMap<&str, &FileEntry> = HashMap::new();
    old.for_each_file(&mut |file| {
        old_files.insert(file.relative_path.as_str(), file);
    });

    new.for_each_file_mut(&mut |file| {
        let Some(previous) = old_files.get(file.relative_path.as_str()) else {
            return;
        };
        if !previous.has_summary() && previous.need_traverse {
            return;
        }
        if content_changed(previous.checksum.as_deref(), file.checksum.as_deref()) {
            log::debug!(
                "TreeMerger: '{}' changed since the last run, marking for re-summarization.",
                file.relative_path
            );
            return;
        }
        if previous.has_summary() {
            file.summaries = previous.summaries.clone();
        }
        if !previous.need_traverse {
            file.need_traverse = false;
        }
    });
    new
}

/*
 * Merges a freshly scanned document with the saved one. The new tree's shape wins;
 * the flat summary index is rebuilt from the merged tree so it never references
 * files that no longer exist.
 */
pub fn merge_documents(old: &ProjectDocument, new: ProjectDocument) -> ProjectDocument {
    let structure = merge_trees(&old.structure, new.structure);
    let mut summaries = SummaryStore::new();
    structure.for_each_file(&mut |file| {
        if file.has_summary() {
            summaries.insert(file.relative_path.clone(), file.summaries.clone());
        }
    });
    ProjectDocument {
        project_name: new.project_name,
        need_traverse: !collect_pending(&structure, &[]).is_empty(),
        structure,
        summaries,
    }
}

/*
 * Files that still need a summary, in tree order: text files flagged for traversal
 * that carry no summary and whose extension is not skipped. Unknown character counts
 * are treated as 0.
 */
pub fn collect_pending(tree: &TreeNode, skip_extensions: &[String]) -> Vec<PendingFile> {
    let mut pending = Vec::new();
    tree.for_each_file(&mut |file| {
        if file.is_text
            && file.need_traverse
            && !file.has_summary()
            && !file.has_extension_in(skip_extensions)
        {
            pending.push(PendingFile::new(
                file.relative_path.clone(),
                file.character_count.unwrap_or(0),
            ));
        }
    });
    pending
}
