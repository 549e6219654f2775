mod app_logic;
mod core;

use crate::app_logic::handler::{APP_NAME, RunContext, RunError, SummarizerApp};
use crate::core::config::DEFAULT_SCENARIO;
use crate::core::llm_client::CALL_LOG_FILENAME;
use crate::core::{
    CallLog, ConfigManagerOperations, CoreChatClient, CoreConfigManager, CoreFileSystemScanner,
    CoreProjectStore, CoreTikTokenCounter, ProjectFileReader,
};
use clap::{Args, Parser, Subcommand};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const DEBUG_LOG_FILENAME: &str = "debug.log";

/// Summarizes a source tree with a language model: scans the project, sends files
/// to the model in size-bounded batches, and folds the per-file summaries into a
/// Markdown report. Progress is saved after every batch, so an interrupted run can
/// simply be started again.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct ProjectArgs {
    /// Root directory of the project to summarize.
    #[arg(long)]
    project_path: PathBuf,

    /// Project name. Defaults to the name of the project directory.
    #[arg(long)]
    project_name: Option<String>,

    /// Where the project document, logs and reports are written.
    /// Defaults to `<project_path>/.source_summarizer/<project_name>`.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Configuration file (JSON). Defaults to the per-user config.json, if any.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct SummarizeArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// Prompt scenario from the configuration.
    #[arg(long, default_value = DEFAULT_SCENARIO)]
    scenario: String,

    /// Base name of the report file; a timestamp is appended.
    #[arg(long)]
    report_name: Option<String>,

    /// Only report how many files are pending and how many model calls they need.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the project and update the project document.
    Scan(ProjectArgs),
    /// Summarize pending files of a scanned project and write the report.
    Summarize(SummarizeArgs),
    /// Scan, then summarize.
    Run(SummarizeArgs),
}

impl Command {
    fn project(&self) -> &ProjectArgs {
        match self {
            Command::Scan(project) => project,
            Command::Summarize(args) | Command::Run(args) => &args.project,
        }
    }

    fn report_name(&self) -> Option<String> {
        match self {
            Command::Scan(_) => None,
            Command::Summarize(args) | Command::Run(args) => args.report_name.clone(),
        }
    }
}

/*
 * Logs at Info to the terminal and at Debug to `<output_dir>/debug.log`.
 */
fn initialize_logging(output_dir: &Path) {
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .add_filter_ignore_str("rustls")
        .build();
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        LevelFilter::Info,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    let log_path = output_dir.join(DEBUG_LOG_FILENAME);
    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, file)),
        Err(e) => eprintln!("Could not open debug log {log_path:?}: {e}"),
    }
    if let Err(e) = CombinedLogger::init(loggers) {
        eprintln!("Failed to initialize logging: {e}");
    }
}

fn execute(command: &Command, ctx: &RunContext) -> Result<(), RunError> {
    let config = CoreConfigManager::new(APP_NAME)
        .load_config(command.project().config.as_deref(), Some(&ctx.project_root))?;
    let app = SummarizerApp::new(
        Arc::new(CoreFileSystemScanner::new()),
        Arc::new(CoreProjectStore::new()),
        Arc::new(CoreTikTokenCounter::new()),
    );

    let args = match command {
        Command::Scan(_) => {
            let document = app.scan(ctx, &config.scan)?;
            println!(
                "Scanned {} files into {}",
                document.structure.file_paths().len(),
                ctx.document_path().display()
            );
            return Ok(());
        }
        Command::Summarize(args) | Command::Run(args) => args,
    };
    let scan_first = matches!(command, Command::Run(_));
    let scenario = config.validate(&args.scenario)?;

    if args.dry_run {
        if scan_first {
            app.scan(ctx, &config.scan)?;
        }
        let estimate = app.estimate(ctx, &scenario, &config.skip_extensions)?;
        println!(
            "{} pending files, {} batch invocations (plus the final aggregation).",
            estimate.pending_files, estimate.invocations
        );
        return Ok(());
    }

    let call_log = CallLog::open(&ctx.output_dir.join(CALL_LOG_FILENAME))?;
    log::info!("Main: Recording model calls in {:?}.", call_log.path());
    let client = CoreChatClient::new(&config.api, Some(call_log))?;
    let reader = ProjectFileReader::new(&ctx.project_root);
    let report = if scan_first {
        app.run(ctx, &config, &scenario, &client, &reader)?
    } else {
        app.summarize(ctx, &scenario, &config.skip_extensions, &client, &reader)?
    };

    match &report.report_path {
        Some(path) => println!("Report written to {}", path.display()),
        None => println!(
            "No report written; {} of {} batches completed. Run again to continue.",
            report.state.batches_completed, report.state.batches_planned
        ),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let project = cli.command.project();
    let ctx = RunContext::new(
        &project.project_path,
        project.project_name.clone(),
        project.output_dir.clone(),
        cli.command.report_name(),
    );

    if let Err(e) = fs::create_dir_all(&ctx.output_dir) {
        eprintln!("Cannot create output directory {:?}: {e}", ctx.output_dir);
        return ExitCode::FAILURE;
    }
    initialize_logging(&ctx.output_dir);
    log::info!(
        "Main: Project '{}' at {:?}, output in {:?}.",
        ctx.project_name,
        ctx.project_root,
        ctx.output_dir
    );

    match execute(&cli.command, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Main: {e}");
            ExitCode::FAILURE
        }
    }
}
