/*
 * Output files written next to the project document: the timestamped final report,
 * a Markdown outline of the scanned tree and a plain list of file paths.
 */
use crate::core::file_node::TreeNode;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;

pub const TREE_MARKDOWN_FILENAME: &str = "project_tree.md";
pub const FILE_LIST_FILENAME: &str = "project_files.txt";
pub const REPORT_EXTENSION: &str = "md";

/*
 * `<base>_YYYYmmdd_HHMMSS.md`, so repeated runs never overwrite earlier reports.
 */
pub fn report_file_name(base_name: &str, timestamp: OffsetDateTime) -> String {
    let stamp = timestamp
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string());
    format!("{base_name}_{stamp}.{REPORT_EXTENSION}")
}

/*
 * Writes the report as `<base_name>_<timestamp>.md` in `output_dir`, using local
 * time when available. Returns the path written.
 */
pub fn write_final_report(output_dir: &Path, base_name: &str, report: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let path = output_dir.join(report_file_name(base_name, now));
    fs::write(&path, report)?;
    log::info!("ReportWriter: Final report written to {path:?}.");
    Ok(path)
}

fn push_tree_lines(node: &TreeNode, depth: usize, lines: &mut Vec<String>) {
    let indent = " ".repeat(depth * 4);
    match node {
        TreeNode::Directory(dir) => {
            lines.push(format!("{indent}- **{}**", dir.name));
            for child in &dir.children {
                push_tree_lines(child, depth + 1, lines);
            }
        }
        TreeNode::File(file) => lines.push(format!("{indent}- {}", file.name)),
    }
}

/*
 * Nested Markdown list of the tree: four spaces per level, directories in bold.
 */
pub fn render_tree_markdown(tree: &TreeNode) -> String {
    let mut lines = Vec::new();
    push_tree_lines(tree, 0, &mut lines);
    lines.join("\n")
}

/*
 * Writes `project_tree.md` next to the project document.
 */
pub fn write_tree_markdown(output_dir: &Path, tree: &TreeNode) -> io::Result<PathBuf> {
    let path = output_dir.join(TREE_MARKDOWN_FILENAME);
    fs::write(&path, render_tree_markdown(tree))?;
    Ok(path)
}

/* One relative path per line. */
pub fn write_file_list(output_dir: &Path, tree: &TreeNode) -> io::Result<PathBuf> {
    let path = output_dir.join(FILE_LIST_FILENAME);
    fs::write(&path, tree.file_paths().join("\n"))?;
    Ok(path)
}
