//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use paperdisc_core::assembler::PageWrite;
use paperdisc_core::{
    ArxivPageProcessor, ProcessReport, ProgressReporter, RunCoordinator, RunOptions, RunResult,
    report,
};
use paperdisc_shared::{
    ItemId, PaperDiscError, RunError, init_config, load_config_at, validate_config,
};
use paperdisc_storage::{StateBackend, StateStore};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// paperdisc: render the paper discussion page on a schedule.
#[derive(Parser)]
#[command(
    name = "paperdisc",
    version,
    about = "Render new paper discussions into the discussion page, resuming from the last checkpoint.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.paperdisc/paperdisc.toml).
    #[arg(long, global = true, env = "PAPERDISC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Defaults to `run` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process discussions newer than the checkpoint (the scheduled entry point).
    Run(RunArgs),

    /// Inspect the run checkpoint.
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Default)]
pub(crate) struct RunArgs {
    /// Use this id instead of the stored checkpoint as the lower bound, for
    /// this run only.
    #[arg(long, env = "FORCE_SINCE")]
    pub force_since: Option<String>,
}

impl RunArgs {
    /// Arguments of a bare `paperdisc` invocation.
    fn from_env() -> Self {
        Self {
            force_since: std::env::var("FORCE_SINCE").ok(),
        }
    }
}

/// State subcommands.
#[derive(Subcommand)]
pub(crate) enum StateAction {
    /// Print the stored checkpoint.
    Show,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries
/// the run summary.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "paperdisc=info",
        1 => "paperdisc=debug",
        _ => "paperdisc=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        None => Ok(cmd_run(config_path, RunArgs::from_env()).await),
        Some(Command::Run(args)) => Ok(cmd_run(config_path, args).await),
        Some(Command::State { action }) => match action {
            StateAction::Show => cmd_state_show(config_path).await,
        },
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, args: RunArgs) -> ExitCode {
    let result = execute_run(config_path, &args).await;
    ExitCode::from(report(&result))
}

/// Build the coordinator from configuration and run it once. Every failure,
/// including setup, comes back as a classified [`RunResult`].
async fn execute_run(config_path: Option<&Path>, args: &RunArgs) -> RunResult {
    let config = match load_config_at(config_path).and_then(|c| validate_config(&c).map(|_| c)) {
        Ok(c) => c,
        Err(e) => return RunResult::failure(RunError::Configuration(e)),
    };

    let force_since = match parse_force_since(args.force_since.as_deref()) {
        Ok(id) => id,
        Err(e) => return RunResult::failure(RunError::Configuration(e)),
    };

    let store = match StateBackend::open(&config).await {
        Ok(store) => store,
        Err(e) => return RunResult::failure(RunError::StateStore(e)),
    };

    let opts = RunOptions {
        force_since,
        lease_ttl: config
            .lease
            .enabled
            .then(|| Duration::from_secs(config.lease.ttl_secs)),
    };

    info!(
        backend = store.name(),
        state = %config.state.path,
        source = %config.source.csv,
        "starting run"
    );

    let processor = match ArxivPageProcessor::new(config, Box::new(CliProgress::new())) {
        Ok(p) => p,
        Err(e) => return RunResult::failure(RunError::Configuration(e)),
    };

    RunCoordinator::new(store, processor).run(&opts).await
}

/// Parse a `FORCE_SINCE` value. Blank means unset.
fn parse_force_since(raw: Option<&str>) -> std::result::Result<Option<ItemId>, PaperDiscError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<ItemId>().map(Some).map_err(|e| {
            PaperDiscError::config(format!(
                "FORCE_SINCE must be a non-negative integer, got '{value}': {e}"
            ))
        }),
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn rows_loaded(&self, total: usize, new: usize) {
        self.spinner
            .set_message(format!("Loaded {total} discussion rows ({new} new)"));
    }

    fn papers_resolved(&self, cached: usize, fetched: usize) {
        self.spinner
            .set_message(format!("Resolved papers ({cached} cached, {fetched} fetched)"));
    }

    fn done(&self, _report: &ProcessReport, page: &PageWrite) {
        self.spinner.finish_and_clear();
        if let PageWrite::Unchanged { .. } = page {
            info!("page content unchanged");
        }
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

// ---------------------------------------------------------------------------
// state / config
// ---------------------------------------------------------------------------

async fn cmd_state_show(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config_at(config_path)?;
    let store = StateBackend::open(&config).await?;
    match store.load().await? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!(
            "No checkpoint yet ({} store at {}).",
            store.name(),
            config.state.path
        ),
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_config_init() -> Result<ExitCode> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config_at(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(ExitCode::SUCCESS)
}
