use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sidekick_cli::{Cli, CliCommand};
use sidekick_provider::{is_executable_available, Provider, ProviderCatalog};
use sidekick_runtime::{JobState, RuntimeConfig};
use sidekick_tools::{is_valid_job_id, prepare_ask_run, serve_mcp_stdio, AskInput, ToolRuntime};

use crate::bootstrap_helpers::{resolve_provider_catalog, resolve_runtime_config, served_providers};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    let config = resolve_runtime_config(&cli, &cwd);
    let catalog = resolve_provider_catalog(&cli);
    tracing::debug!(runtime_dir = %config.runtime_dir.display(), "resolved runtime directory");

    match cli.command {
        CliCommand::Serve { provider } => {
            execute_serve_command(&config, catalog, served_providers(provider.map(Into::into)))
                .await
        }
        CliCommand::Ask {
            provider,
            prompt,
            model,
            timeout_ms,
            working_directory,
            reasoning_effort,
            background,
        } => {
            let input = AskInput {
                prompt,
                model,
                timeout_ms: timeout_ms.unwrap_or(config.default_timeout_ms),
                working_directory,
                reasoning_effort: reasoning_effort.map(Into::into),
            };
            execute_ask_command(&config, &catalog, provider.into(), input, background).await
        }
        CliCommand::Wait {
            provider,
            job_id,
            timeout_ms,
        } => {
            ensure_job_id(&job_id)?;
            let outcome = config
                .query_service()
                .wait(provider.into(), &job_id, timeout_ms)
                .await?;
            match (outcome.status.status, outcome.response_text) {
                (JobState::Completed, Some(text)) => {
                    println!("{text}");
                    Ok(())
                }
                (JobState::Completed, None) => print_json(&outcome.status),
                (state, _) => {
                    print_json(&outcome.status)?;
                    bail!("job {job_id} finished with status {}", state.as_str())
                }
            }
        }
        CliCommand::Check { provider, job_id } => {
            ensure_job_id(&job_id)?;
            let status = config.query_service().check(provider.into(), &job_id).await?;
            print_json(&status)
        }
        CliCommand::Kill {
            provider,
            job_id,
            signal,
        } => {
            ensure_job_id(&job_id)?;
            let status = config
                .query_service()
                .kill(provider.into(), &job_id, signal.into())
                .await?;
            print_json(&status)
        }
        CliCommand::List {
            provider,
            status,
            limit,
        } => {
            let jobs = config
                .query_service()
                .list(provider.into(), status.into(), limit)
                .await?;
            print_json(&jobs)
        }
    }
}

async fn execute_serve_command(
    config: &RuntimeConfig,
    catalog: ProviderCatalog,
    providers: Vec<Provider>,
) -> Result<()> {
    for provider in &providers {
        let executable = catalog.executable(*provider);
        if !is_executable_available(executable) {
            tracing::warn!(
                provider = provider.as_str(),
                executable,
                "provider executable not found; {} calls will fail",
                provider.ask_tool_name()
            );
        }
    }
    let runtime = Arc::new(ToolRuntime::from_config(config, catalog, providers));
    let report = serve_mcp_stdio(runtime).await?;
    tracing::info!(
        processed_frames = report.processed_frames,
        error_count = report.error_count,
        "mcp session closed"
    );
    Ok(())
}

async fn execute_ask_command(
    config: &RuntimeConfig,
    catalog: &ProviderCatalog,
    provider: Provider,
    input: AskInput,
    background: bool,
) -> Result<()> {
    if input.prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }
    let supervisor = config.supervisor();
    let request = prepare_ask_run(catalog, provider, input, supervisor.event_logger());

    if background {
        let (metadata, supervision) = supervisor.spawn_background(request).await?;
        print_json(&metadata)?;
        supervision
            .await
            .context("background supervision task failed")?;
        return Ok(());
    }
    let output = supervisor.run_foreground(&request).await?;
    println!("{}", output.text);
    Ok(())
}

fn ensure_job_id(job_id: &str) -> Result<()> {
    if !is_valid_job_id(job_id) {
        bail!("job id must be 8 lowercase hex characters, got '{job_id}'");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}
