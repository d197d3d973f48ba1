use std::path::Path;

use sidekick_cli::Cli;
use sidekick_core::LogRotationPolicy;
use sidekick_provider::{Provider, ProviderCatalog, ProviderProfile};
use sidekick_runtime::{
    default_runtime_dir, CliSupervisorConfig, EventLogFlags, RuntimeConfig, DEFAULT_LOG_DIR_NAME,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. Stdout is reserved for protocol frames and
/// command output.
pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn resolve_runtime_config(cli: &Cli, cwd: &Path) -> RuntimeConfig {
    let runtime_dir = cli
        .runtime_dir
        .clone()
        .unwrap_or_else(|| default_runtime_dir(cwd));
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| runtime_dir.join(DEFAULT_LOG_DIR_NAME));
    RuntimeConfig {
        runtime_dir,
        log_dir,
        default_timeout_ms: cli.cli_timeout_ms,
        supervisor: CliSupervisorConfig {
            max_output_bytes: cli.max_output_bytes,
            kill_grace_ms: cli.kill_grace_ms,
        },
        event_log: EventLogFlags {
            preview: cli.log_preview,
            full_text: cli.log_full_text,
        },
        log_rotation: LogRotationPolicy {
            max_bytes: cli.log_rotation_max_bytes,
            max_files: cli.log_rotation_max_files,
        },
    }
}

pub(crate) fn resolve_provider_catalog(cli: &Cli) -> ProviderCatalog {
    let defaults = ProviderCatalog::default();
    ProviderCatalog {
        codex: ProviderProfile {
            executable: cli.codex_bin.clone(),
            default_model: override_model(cli.codex_model.as_deref(), defaults.codex.default_model),
        },
        gemini: ProviderProfile {
            executable: cli.gemini_bin.clone(),
            default_model: override_model(
                cli.gemini_model.as_deref(),
                defaults.gemini.default_model,
            ),
        },
    }
}

fn override_model(requested: Option<&str>, fallback: String) -> String {
    requested
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .map(str::to_string)
        .unwrap_or(fallback)
}

/// Providers exposed by `serve`: the requested one, or all of them.
pub(crate) fn served_providers(requested: Option<Provider>) -> Vec<Provider> {
    match requested {
        Some(provider) => vec![provider],
        None => Provider::ALL.to_vec(),
    }
}
