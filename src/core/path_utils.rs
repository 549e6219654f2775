/*
 * Path helpers shared by the scanner, the config loader and the CLI: where the
 * per-user configuration lives, where run artifacts go, and how file system paths
 * are turned into the `/`-separated relative paths stored in project documents.
 */
use directories::ProjectDirs;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const OUTPUT_DIR_NAME: &str = ".source_summarizer";

/*
 * Retrieves (and creates if needed) the application's local configuration
 * directory, e.g. `~/.config/<app_name>` on Linux. Returns `None` when the platform
 * offers no such directory or it cannot be created.
 */
pub fn get_base_app_config_local_dir(app_name: &str) -> Option<PathBuf> {
    ProjectDirs::from("", "", app_name).and_then(|proj_dirs| {
        let config_path = proj_dirs.config_local_dir();
        if !config_path.exists() {
            if let Err(e) = fs::create_dir_all(config_path) {
                log::error!("PathUtils: Failed to create config directory {config_path:?}: {e}");
                return None;
            }
            log::debug!("PathUtils: Created config directory: {config_path:?}");
        }
        Some(config_path.to_path_buf())
    })
}

/*
 * Default location for a project's artifacts: `<project_root>/.source_summarizer/<name>`.
 */
pub fn default_output_dir(project_root: &Path, project_name: &str) -> PathBuf {
    project_root.join(OUTPUT_DIR_NAME).join(project_name)
}

/*
 * Project name derived from the last component of the project root, falling back
 * to "project" for roots such as `/` or `.` that have no usable name.
 */
pub fn project_name_from_root(project_root: &Path) -> String {
    let canonical = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    canonical
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "project".to_string())
}

/*
 * Relative path of `path` under `root`, joined with `/` regardless of platform.
 * Returns `None` when `path` is not inside `root`.
 */
pub fn to_relative_path_string(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}
