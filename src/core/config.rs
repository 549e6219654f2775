/*
 * Loads and validates the summarizer configuration.
 *
 * Configuration is a JSON document holding the context budget, concurrency limits,
 * the model endpoint, scanner classification tables and named prompt scenarios.
 * Every field has a default, so a partial file (or no file at all) yields a usable
 * configuration. A project may carry its own `source_summarizer.json` whose
 * top-level keys replace the global ones.
 *
 * Validation happens once, before any model call: the chosen scenario must exist,
 * its templates must be present and contain their placeholders, and the budgets
 * must be positive.
 */
use crate::core::path_utils;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "config.json";
pub const PROJECT_CONFIG_FILENAME: &str = "source_summarizer.json";
pub const DEFAULT_SCENARIO: &str = "direct";
pub const BATCH_CONTENT_PLACEHOLDER: &str = "{batch_content}";
pub const SEED_PLACEHOLDER: &str = "{initial_summary}";
pub const CODE_SUMMARIES_PLACEHOLDER: &str = "{code_summaries}";

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Serde(serde_json::Error),
    NotFound(PathBuf),
    UnknownScenario(String),
    MissingTemplate {
        scenario: String,
        field: &'static str,
    },
    MissingPlaceholder {
        scenario: String,
        field: &'static str,
        placeholder: &'static str,
    },
    NonPositiveContextLength,
    NoWorkers,
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serde(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {e}"),
            ConfigError::Serde(e) => write!(f, "Configuration parse error: {e}"),
            ConfigError::NotFound(p) => write!(f, "Configuration file not found: {p:?}"),
            ConfigError::UnknownScenario(name) => {
                write!(f, "Scenario '{name}' is not defined in the configuration")
            }
            ConfigError::MissingTemplate { scenario, field } => {
                write!(f, "Scenario '{scenario}' has an empty {field}")
            }
            ConfigError::MissingPlaceholder {
                scenario,
                field,
                placeholder,
            } => write!(
                f,
                "Scenario '{scenario}': {field} must contain the {placeholder} placeholder"
            ),
            ConfigError::NonPositiveContextLength => {
                write!(f, "max_context_length must be at least 2")
            }
            ConfigError::NoWorkers => write!(f, "max_concurrent_requests must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub model: String,
    pub stream: bool,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            api_key_env: "SUMMARIZER_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            stream: true,
            timeout_secs: 60,
        }
    }
}

/*
 * Classification tables and filters used when scanning a project.
 * `languages` maps a language tag to file extensions (with leading dot);
 * `file_categories` maps a category to exact file names. Files matching no
 * category are "code".
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub scan_hidden: bool,
    pub languages: BTreeMap<String, Vec<String>>,
    pub file_categories: BTreeMap<String, Vec<String>>,
    pub exclude_dirs: Vec<String>,
    pub binary_extensions: Vec<String>,
}

fn string_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ScanConfig {
    fn default() -> Self {
        let languages = [
            ("python", &[".py"][..]),
            ("javascript", &[".js", ".jsx"]),
            ("typescript", &[".ts", ".tsx"]),
            ("go", &[".go"]),
            ("java", &[".java"]),
            ("c", &[".c", ".h"]),
            ("cpp", &[".cpp", ".hpp", ".cc", ".cxx"]),
            ("rust", &[".rs"]),
            ("ruby", &[".rb"]),
            ("php", &[".php"]),
            ("swift", &[".swift"]),
            ("kotlin", &[".kt"]),
            ("scala", &[".scala"]),
            ("r", &[".r"]),
            ("csharp", &[".cs"]),
            ("objective-c", &[".m", ".mm"]),
        ]
        .into_iter()
        .map(|(lang, exts)| (lang.to_string(), string_list(exts)))
        .collect();

        let file_categories = [
            (
                "config",
                &[
                    "package.json",
                    "requirements.txt",
                    "Pipfile",
                    "yarn.lock",
                    "Makefile",
                    "webpack.config.js",
                    "next.config.js",
                    ".babelrc",
                    ".eslintrc",
                    ".prettierrc",
                ][..],
            ),
            (
                "dependency",
                &["pom.xml", "build.gradle", "Cargo.toml", "composer.json"],
            ),
            ("runtime", &["next.config.js", ".env"]),
        ]
        .into_iter()
        .map(|(category, names)| (category.to_string(), string_list(names)))
        .collect();

        ScanConfig {
            scan_hidden: false,
            languages,
            file_categories,
            exclude_dirs: string_list(&["node_modules", "dist", "build", ".git", "__pycache__", "target"]),
            binary_extensions: string_list(&[
                ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".pdf", ".mp4", ".avi", ".exe", ".dll",
                ".zip", ".rar",
            ]),
        }
    }
}

fn default_use_seed() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub batch_summary_prompt: String,
    #[serde(default)]
    pub final_summary_prompt: String,
    #[serde(default = "default_use_seed")]
    pub use_seed: bool,
}

const DIRECT_BATCH_PROMPT: &str = "You will receive the contents of several source files. \
Each file starts with a [FILE PATH: ...] line, its content sits between [BEGIN] and [END], \
and files are separated by ===FILE_SEPARATOR===.\n\
Summarize every file. Reply with a single JSON object and nothing else: each key is a file \
path exactly as given, each value is an object with the fields \"summary\" (what the file does), \
\"key_elements\" (important types and functions) and \"dependencies\" (notable imports).\n\n\
{batch_content}";

const DIRECT_FINAL_PROMPT: &str = "Below is a preliminary description of a project followed by \
summaries of its source files.\n\n\
Preliminary description:\n{initial_summary}\n\n\
File summaries:\n{code_summaries}\n\n\
Write the final project report in Markdown. Include a title and overview of the functionality, \
a walkthrough of the main components, technology tags, keywords, the build and runtime \
environment, and notes on where the code differs from the preliminary description.";

const USAGE_BATCH_PROMPT: &str = "Summarize how each of the following source files is meant to \
be used by a developer (entry points, public API, configuration). Files are separated by \
===FILE_SEPARATOR===. Reply with a single JSON object mapping each file path exactly as given \
to an object with the fields \"usage\" and \"public_api\".\n\n{batch_content}";

const USAGE_FINAL_PROMPT: &str = "Using the per-file usage notes below, write a practical usage \
guide for the project in Markdown: installation, configuration, main commands or entry points, \
and examples.\n\n{code_summaries}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub max_context_length: usize,
    pub max_concurrent_requests: usize,
    pub max_invocations: Option<usize>,
    pub skip_extensions: Vec<String>,
    pub api: ApiSettings,
    pub scan: ScanConfig,
    pub scenarios: BTreeMap<String, ScenarioConfig>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        let mut scenarios = BTreeMap::new();
        scenarios.insert(
            DEFAULT_SCENARIO.to_string(),
            ScenarioConfig {
                batch_summary_prompt: DIRECT_BATCH_PROMPT.to_string(),
                final_summary_prompt: DIRECT_FINAL_PROMPT.to_string(),
                use_seed: true,
            },
        );
        scenarios.insert(
            "usage".to_string(),
            ScenarioConfig {
                batch_summary_prompt: USAGE_BATCH_PROMPT.to_string(),
                final_summary_prompt: USAGE_FINAL_PROMPT.to_string(),
                use_seed: false,
            },
        );
        SummarizerConfig {
            max_context_length: 100_000,
            max_concurrent_requests: 1,
            max_invocations: None,
            skip_extensions: string_list(&[".md"]),
            api: ApiSettings::default(),
            scan: ScanConfig::default(),
            scenarios,
        }
    }
}

/*
 * A scenario that passed validation, together with the budgets derived from the
 * global settings. This is what the run pipeline consumes.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScenario {
    pub name: String,
    pub batch_prompt: String,
    pub final_prompt: String,
    pub use_seed: bool,
    pub batch_threshold: usize,
    pub max_concurrent_requests: usize,
    pub max_invocations: Option<usize>,
}

impl SummarizerConfig {
    /*
     * Budget for a single combined prompt's file or summary content: half of the
     * model context, leaving the other half for the template and the answer.
     */
    pub fn batch_threshold(&self) -> usize {
        self.max_context_length / 2
    }

    /*
     * Checks the budgets and the named scenario and returns the templates a run
     * needs. Fails before any model call is made.
     */
    pub fn validate(&self, name: &str) -> Result<ResolvedScenario> {
        if self.batch_threshold() == 0 {
            return Err(ConfigError::NonPositiveContextLength);
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::NoWorkers);
        }
        let scenario = self
            .scenarios
            .get(name)
            .ok_or_else(|| ConfigError::UnknownScenario(name.to_string()))?;

        let checks: [(&'static str, &str, &'static str); 2] = [
            (
                "batch_summary_prompt",
                &scenario.batch_summary_prompt,
                BATCH_CONTENT_PLACEHOLDER,
            ),
            (
                "final_summary_prompt",
                &scenario.final_summary_prompt,
                CODE_SUMMARIES_PLACEHOLDER,
            ),
        ];
        for (field, template, placeholder) in checks {
            if template.trim().is_empty() {
                return Err(ConfigError::MissingTemplate {
                    scenario: name.to_string(),
                    field,
                });
            }
            if !template.contains(placeholder) {
                return Err(ConfigError::MissingPlaceholder {
                    scenario: name.to_string(),
                    field,
                    placeholder,
                });
            }
        }
        if scenario.use_seed && !scenario.final_summary_prompt.contains(SEED_PLACEHOLDER) {
            log::warn!(
                "Config: Scenario '{name}' uses a seed description but its final_summary_prompt has no {SEED_PLACEHOLDER} placeholder."
            );
        }

        Ok(ResolvedScenario {
            name: name.to_string(),
            batch_prompt: scenario.batch_summary_prompt.clone(),
            final_prompt: scenario.final_summary_prompt.clone(),
            use_seed: scenario.use_seed,
            batch_threshold: self.batch_threshold(),
            max_concurrent_requests: self.max_concurrent_requests,
            max_invocations: self.max_invocations,
        })
    }
}

/*
 * Shallow merge: every top-level key of `overrides` replaces the same key of `base`.
 */
fn merge_top_level(base: &mut Value, overrides: Value) {
    if let (Value::Object(base_map), Value::Object(override_map)) = (base, overrides) {
        for (key, value) in override_map {
            base_map.insert(key, value);
        }
    }
}

fn read_json_value(path: &Path) -> Result<Value> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub trait ConfigManagerOperations: Send + Sync {
    /*
     * Loads the effective configuration: the explicit file if given (it must exist),
     * otherwise the per-user config file if present, otherwise the built-in defaults;
     * then applies the project-level override file found under `project_root`.
     */
    fn load_config(
        &self,
        explicit_path: Option<&Path>,
        project_root: Option<&Path>,
    ) -> Result<SummarizerConfig>;
}

pub struct CoreConfigManager {
    app_name: String,
}

impl CoreConfigManager {
    pub fn new(app_name: &str) -> Self {
        CoreConfigManager {
            app_name: app_name.to_string(),
        }
    }

    fn user_config_path(&self) -> Option<PathBuf> {
        path_utils::get_base_app_config_local_dir(&self.app_name)
            .map(|dir| dir.join(CONFIG_FILENAME))
    }
}

impl ConfigManagerOperations for CoreConfigManager {
    fn load_config(
        &self,
        explicit_path: Option<&Path>,
        project_root: Option<&Path>,
    ) -> Result<SummarizerConfig> {
        let mut merged = serde_json::to_value(SummarizerConfig::default())?;

        match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                merge_top_level(&mut merged, read_json_value(path)?);
                log::info!("Config: Loaded configuration from {path:?}.");
            }
            None => match self.user_config_path() {
                Some(path) if path.exists() => {
                    merge_top_level(&mut merged, read_json_value(&path)?);
                    log::info!("Config: Loaded user configuration from {path:?}.");
                }
                _ => log::info!("Config: No configuration file found, using built-in defaults."),
            },
        }

        if let Some(root) = project_root {
            let project_config = root.join(PROJECT_CONFIG_FILENAME);
            if project_config.exists() {
                match read_json_value(&project_config) {
                    Ok(overrides) => {
                        merge_top_level(&mut merged, overrides);
                        log::info!("Config: Applied project configuration {project_config:?}.");
                    }
                    Err(e) => log::error!(
                        "Config: Failed to load project configuration {project_config:?}, ignoring it: {e}"
                    ),
                }
            }
        }

        Ok(serde_json::from_value(merged)?)
    }
}
