mod cmdline;
mod io;
mod logging;
mod nvim;
mod rpc;

#[cfg(test)]
mod test_utils;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

use cmdline::editor::DEFAULT_TAB_WIDTH;
use cmdline::position::Position;
use cmdline::{
    BuiltinParser, CommandRouter, DelegationStatus, Editor, EditorSnapshot, InMemoryEditor,
    NvimDelegate, RouteOutcome, run_cmd_line,
};
use logging::{LogConfig, init_logging};
use nvim::NvimConfigBuilder;
use nvim::config::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Prompt shown when no command is given on the command line
const PROMPT: &str = "Vim command line";

/// Run one Vim command line against a buffer, delegating to Neovim when needed
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Command to run, without the leading ':' (prompts when omitted)
    command: Option<String>,

    /// Text pre-filled in the prompt
    #[arg(long, value_name = "TEXT", default_value = "")]
    initial_text: String,

    /// Editor state as JSON (lines, cursor, selection_start, marks)
    #[arg(long, value_name = "FILE", conflicts_with = "file")]
    state: Option<PathBuf>,

    /// Plain-text buffer content
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Cursor as zero-based LINE:COL (overrides the state file)
    #[arg(long, value_name = "LINE:COL", value_parser = parse_position)]
    cursor: Option<Position>,

    /// Path to nvim executable (overrides NVIM_PATH env var)
    #[arg(long, value_name = "PATH")]
    nvim_path: Option<String>,

    /// Working directory for nvim (defaults to the system temp directory)
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Extra argument passed to nvim (repeatable)
    #[arg(long = "nvim-arg", value_name = "ARG", allow_hyphen_values = true)]
    nvim_args: Vec<String>,

    /// Per-request timeout for nvim calls
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Re-expand indentation tabs to spaces after delegated commands
    #[arg(long)]
    expand_tab: bool,

    /// Tab width used by --expand-tab
    #[arg(long, value_name = "N", default_value_t = DEFAULT_TAB_WIDTH)]
    tab_width: usize,

    /// Print the resulting editor state as JSON
    #[arg(long)]
    json: bool,

    /// Append nvim's stderr to this file
    #[arg(long, value_name = "FILE")]
    nvim_log: Option<PathBuf>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides CMDLINE_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

/// Parse `LINE:COL`
fn parse_position(value: &str) -> Result<Position, String> {
    let (line, column) = value
        .split_once(':')
        .ok_or_else(|| format!("expected LINE:COL, got {value:?}"))?;
    let line = line.trim().parse().map_err(|e| format!("invalid line: {e}"))?;
    let column = column
        .trim()
        .parse()
        .map_err(|e| format!("invalid column: {e}"))?;
    Ok(Position::new(line, column))
}

/// Resulting editor state for --json
#[derive(Debug, Serialize)]
struct Output<'a> {
    #[serde(flatten)]
    snapshot: EditorSnapshot,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
}

fn outcome_name(outcome: Option<&RouteOutcome>) -> &'static str {
    match outcome {
        None => "failed",
        Some(RouteOutcome::Empty) => "empty",
        Some(RouteOutcome::LocalExecuted) => "local",
        Some(RouteOutcome::DelegatedExecuted {
            status: DelegationStatus::Completed(_),
            ..
        }) => "delegated",
        Some(RouteOutcome::DelegatedExecuted {
            status: DelegationStatus::Failed(_),
            ..
        }) => "delegation_failed",
    }
}

/// Load the starting editor state from --state or --file
fn load_snapshot(args: &Args) -> Result<EditorSnapshot, Box<dyn std::error::Error>> {
    let mut snapshot = match (&args.state, &args.file) {
        (Some(path), _) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        (None, Some(path)) => EditorSnapshot::from_text(&std::fs::read_to_string(path)?),
        (None, None) => EditorSnapshot::from_text(""),
    };
    if let Some(cursor) = args.cursor {
        snapshot.cursor = cursor;
        snapshot.selection_start = cursor;
    }
    if !snapshot.contains(snapshot.cursor) {
        return Err(format!(
            "cursor {} is outside the {}-line buffer",
            snapshot.cursor,
            snapshot.lines.len()
        )
        .into());
    }
    Ok(snapshot)
}

/// Show the prompt pre-filled with `initial_text` and read one line
fn prompt_command(initial_text: &str, input: &mut impl BufRead, prompt_out: &mut impl Write) -> std::io::Result<String> {
    write!(prompt_out, "{PROMPT}: :{initial_text}")?;
    prompt_out.flush()?;

    let mut typed = String::new();
    input.read_line(&mut typed)?;
    Ok(format!("{initial_text}{}", typed.trim_end_matches(['\r', '\n'])))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging with configuration from env vars and CLI args
    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let snapshot = load_snapshot(&args)?;
    debug!(
        "Loaded {} lines, cursor {}",
        snapshot.lines.len(),
        snapshot.cursor
    );

    let mut config_builder = NvimConfigBuilder::new().request_timeout(Duration::from_secs(args.timeout_secs));
    if let Some(nvim_path) = &args.nvim_path {
        config_builder = config_builder.nvim_path(nvim_path);
    }
    if let Some(cwd) = &args.cwd {
        config_builder = config_builder.working_directory(cwd);
    }
    for arg in &args.nvim_args {
        config_builder = config_builder.add_arg(arg);
    }
    if let Some(nvim_log) = &args.nvim_log {
        config_builder = config_builder.stderr_log(nvim_log);
    }
    let config = match config_builder.build() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid Neovim configuration: {e}");
            std::process::exit(2);
        }
    };
    info!("Using nvim: {}", config.nvim_path);

    let command = match &args.command {
        Some(command) => command.clone(),
        None => prompt_command(&args.initial_text, &mut std::io::stdin().lock(), &mut std::io::stderr())?,
    };

    let mut editor = InMemoryEditor::new(snapshot).with_expand_tab(args.expand_tab, args.tab_width);
    let router = CommandRouter::new(BuiltinParser::new()?, NvimDelegate::new(config));

    let result = run_cmd_line(&router, &command, &mut editor).await;
    let outcome = result.as_ref().ok();

    if args.json {
        let output = Output {
            snapshot: editor.snapshot(),
            outcome: outcome_name(outcome),
            status: editor.status(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let mut stdout = std::io::stdout().lock();
        for line in editor.lines() {
            writeln!(stdout, "{line}")?;
        }
        if let Some(status) = editor.status() {
            eprintln!("{status}");
        }
    }

    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
