use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};

use crate::{CliJobStatusFilter, CliKillSignal, CliProvider, CliReasoningEffort};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_wait_timeout_ms(value: &str) -> Result<u64, String> {
    let parsed = parse_positive_u64(value)?;
    if parsed > 3_600_000 {
        return Err("value must be in range 1..=3600000".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "sidekick",
    about = "Run codex and gemini CLIs as foreground calls or supervised background jobs",
    version
)]
pub struct Cli {
    #[arg(
        long = "runtime-dir",
        env = "SIDEKICK_RUNTIME_DIR",
        global = true,
        help = "Directory holding job records and logs (default: <cwd>/.sidekick)"
    )]
    pub runtime_dir: Option<PathBuf>,

    #[arg(
        long = "log-dir",
        env = "SIDEKICK_LOG_DIR",
        global = true,
        help = "Directory for JSONL request logs (default: <runtime-dir>/logs)"
    )]
    pub log_dir: Option<PathBuf>,

    #[arg(
        long = "cli-timeout-ms",
        env = "SIDEKICK_CLI_TIMEOUT_MS",
        default_value_t = 600_000,
        value_parser = parse_positive_u64,
        global = true,
        help = "Default wall-clock timeout for provider runs"
    )]
    pub cli_timeout_ms: u64,

    #[arg(
        long = "max-output-bytes",
        env = "SIDEKICK_MAX_OUTPUT_BYTES",
        default_value_t = 1_048_576,
        value_parser = parse_positive_usize,
        global = true,
        help = "Combined stdout+stderr budget per provider run"
    )]
    pub max_output_bytes: usize,

    #[arg(
        long = "kill-grace-ms",
        env = "SIDEKICK_KILL_GRACE_MS",
        value_parser = parse_positive_u64,
        global = true,
        help = "Send SIGKILL when a process outlives SIGTERM by this many milliseconds"
    )]
    pub kill_grace_ms: Option<u64>,

    #[arg(
        long = "log-preview",
        env = "SIDEKICK_LOG_PREVIEW",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        global = true,
        help = "Include 200-character prompt/response previews in request logs"
    )]
    pub log_preview: bool,

    #[arg(
        long = "log-full-text",
        env = "SIDEKICK_LOG_FULL_TEXT",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        global = true,
        help = "Include full prompt/response text in request logs"
    )]
    pub log_full_text: bool,

    #[arg(
        long = "log-rotation-max-bytes",
        env = "SIDEKICK_LOG_ROTATION_MAX_BYTES",
        default_value_t = 10 * 1024 * 1024,
        global = true,
        help = "Rotate the daily request log once it would exceed this size (0 disables)"
    )]
    pub log_rotation_max_bytes: u64,

    #[arg(
        long = "log-rotation-max-files",
        env = "SIDEKICK_LOG_ROTATION_MAX_FILES",
        default_value_t = 5,
        global = true,
        help = "Files kept per daily request log, active file included"
    )]
    pub log_rotation_max_files: usize,

    #[arg(
        long = "codex-bin",
        env = "SIDEKICK_CODEX_BIN",
        default_value = "codex",
        global = true,
        help = "codex executable name or path"
    )]
    pub codex_bin: String,

    #[arg(
        long = "gemini-bin",
        env = "SIDEKICK_GEMINI_BIN",
        default_value = "gemini",
        global = true,
        help = "gemini executable name or path"
    )]
    pub gemini_bin: String,

    #[arg(
        long = "codex-model",
        env = "SIDEKICK_CODEX_DEFAULT_MODEL",
        global = true,
        help = "Model used when a codex request names none"
    )]
    pub codex_model: Option<String>,

    #[arg(
        long = "gemini-model",
        env = "SIDEKICK_GEMINI_DEFAULT_MODEL",
        global = true,
        help = "Model used when a gemini request names none"
    )]
    pub gemini_model: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Serve the MCP tool surface over stdio.
    Serve {
        #[arg(long, value_enum, help = "Expose only this provider's tools")]
        provider: Option<CliProvider>,
    },
    /// Ask a provider directly.
    Ask {
        #[arg(value_enum)]
        provider: CliProvider,
        prompt: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long = "timeout-ms", value_parser = parse_positive_u64)]
        timeout_ms: Option<u64>,
        #[arg(long = "working-directory")]
        working_directory: Option<PathBuf>,
        #[arg(long = "reasoning-effort", value_enum)]
        reasoning_effort: Option<CliReasoningEffort>,
        #[arg(long, help = "Print job metadata immediately and keep supervising until done")]
        background: bool,
    },
    /// Block until a background job is terminal.
    Wait {
        #[arg(value_enum)]
        provider: CliProvider,
        job_id: String,
        #[arg(long = "timeout-ms", value_parser = parse_wait_timeout_ms)]
        timeout_ms: Option<u64>,
    },
    /// Print a job's status record.
    Check {
        #[arg(value_enum)]
        provider: CliProvider,
        job_id: String,
    },
    /// Signal a running job and mark it failed.
    Kill {
        #[arg(value_enum)]
        provider: CliProvider,
        job_id: String,
        #[arg(long, value_enum, default_value = "sigterm")]
        signal: CliKillSignal,
    },
    /// List jobs for a provider, newest first.
    List {
        #[arg(value_enum)]
        provider: CliProvider,
        #[arg(long, value_enum, default_value = "active")]
        status: CliJobStatusFilter,
        #[arg(long, value_parser = parse_positive_usize)]
        limit: Option<usize>,
    },
}
