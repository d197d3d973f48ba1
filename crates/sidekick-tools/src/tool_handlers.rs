//! Tool implementations behind the MCP surface: ask, wait, check, kill, list.
//!
//! Argument problems and operation failures become error results rather than
//! protocol errors, so the calling model sees the message as tool output.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Map, Value};
use sidekick_provider::{build_command, AskRequest, Provider, ProviderCatalog, ReasoningEffort};
use sidekick_runtime::{
    new_request_id, CliRunRequest, CliSupervisor, EventLogger, JobListFilter, JobQueryService,
    JobSignal, JobState, RuntimeConfig, RuntimeLogContext, MAX_WAIT_TIMEOUT_MS,
};
use thiserror::Error;

pub const TOOL_WAIT_FOR_JOB: &str = "wait_for_job";
pub const TOOL_CHECK_JOB_STATUS: &str = "check_job_status";
pub const TOOL_KILL_JOB: &str = "kill_job";
pub const TOOL_LIST_JOBS: &str = "list_jobs";
const JOB_ID_LEN: usize = 8;

/// Text payload of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    pub text: String,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    fn json<T: Serialize>(value: &T, is_error: bool) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(text) => Self { text, is_error },
            Err(error) => Self::error(format!("failed to encode tool result: {error}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolCallError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid arguments: {0}")]
struct ToolInputError(String);

/// Name, description, and JSON schema advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolKind {
    Ask(Provider),
    WaitForJob,
    CheckJobStatus,
    KillJob,
    ListJobs,
}

/// One ask call after argument parsing, shared by the MCP tools and the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskInput {
    pub prompt: String,
    pub model: Option<String>,
    pub timeout_ms: u64,
    pub working_directory: Option<PathBuf>,
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// Resolves the provider command line for `input`, records the `request`
/// event, and returns the run request carrying that log context.
///
/// Reasoning effort is dropped for providers that do not take one.
pub fn prepare_ask_run(
    catalog: &ProviderCatalog,
    provider: Provider,
    input: AskInput,
    event_logger: Option<&EventLogger>,
) -> CliRunRequest {
    let command = build_command(
        catalog,
        provider,
        &AskRequest {
            prompt: input.prompt.clone(),
            model: input.model,
            reasoning_effort: input
                .reasoning_effort
                .filter(|_| provider.supports_reasoning_effort()),
        },
    );
    let context = RuntimeLogContext {
        request_id: new_request_id(),
        job_id: None,
        provider,
        tool: provider.ask_tool_name().to_string(),
        model: command.model.clone(),
        timeout_ms: input.timeout_ms,
        cwd: input
            .working_directory
            .as_ref()
            .map(|dir| dir.display().to_string()),
    };
    if let Some(logger) = event_logger {
        logger.log_request(&context, &input.prompt);
    }
    CliRunRequest {
        provider,
        command: command.command,
        args: command.args,
        prompt: input.prompt,
        model: command.model,
        timeout_ms: input.timeout_ms,
        cwd: input.working_directory,
        log_context: Some(context),
    }
}

#[derive(Debug, Clone)]
pub struct ToolRuntime {
    providers: Vec<Provider>,
    catalog: ProviderCatalog,
    supervisor: CliSupervisor,
    query: JobQueryService,
    default_timeout_ms: u64,
}

impl ToolRuntime {
    pub fn new(
        providers: Vec<Provider>,
        catalog: ProviderCatalog,
        supervisor: CliSupervisor,
        query: JobQueryService,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            providers,
            catalog,
            supervisor,
            query,
            default_timeout_ms,
        }
    }

    /// Builds the full service graph from resolved settings.
    pub fn from_config(
        config: &RuntimeConfig,
        catalog: ProviderCatalog,
        providers: Vec<Provider>,
    ) -> Self {
        Self::new(
            providers,
            catalog,
            config.supervisor(),
            config.query_service(),
            config.default_timeout_ms,
        )
    }

    /// Waits for every background job this runtime started to reach a
    /// terminal state. Call before dropping the tokio runtime.
    pub async fn wait_for_background_jobs(&self) {
        let pending = self.supervisor.active_background_jobs();
        if pending > 0 {
            tracing::info!(pending, "waiting for background jobs to finish");
        }
        self.supervisor.wait_for_background_jobs().await;
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut tools = self
            .providers
            .iter()
            .map(|provider| ask_descriptor(*provider))
            .collect::<Vec<_>>();
        let provider_schema = self.provider_argument_schema();
        tools.push(ToolDescriptor {
            name: TOOL_WAIT_FOR_JOB.to_string(),
            description: "Wait for a background job to finish and return its response.".to_string(),
            input_schema: object_schema(
                json!({
                    "job_id": job_id_schema(),
                    "timeout_ms": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_WAIT_TIMEOUT_MS,
                        "description": "Maximum time to wait (default and cap 3600000)"
                    },
                    "provider": provider_schema.clone(),
                }),
                &["job_id"],
            ),
        });
        tools.push(ToolDescriptor {
            name: TOOL_CHECK_JOB_STATUS.to_string(),
            description: "Return the current status record of a background job.".to_string(),
            input_schema: object_schema(
                json!({ "job_id": job_id_schema(), "provider": provider_schema.clone() }),
                &["job_id"],
            ),
        });
        tools.push(ToolDescriptor {
            name: TOOL_KILL_JOB.to_string(),
            description: "Signal a running background job and mark it failed.".to_string(),
            input_schema: object_schema(
                json!({
                    "job_id": job_id_schema(),
                    "signal": { "type": "string", "enum": ["SIGTERM", "SIGINT"] },
                    "provider": provider_schema.clone(),
                }),
                &["job_id"],
            ),
        });
        tools.push(ToolDescriptor {
            name: TOOL_LIST_JOBS.to_string(),
            description: "List background jobs, newest first.".to_string(),
            input_schema: object_schema(
                json!({
                    "status_filter": {
                        "type": "string",
                        "enum": ["active", "completed", "failed", "all"]
                    },
                    "limit": { "type": "integer", "minimum": 1 },
                    "provider": provider_schema,
                }),
                &[],
            ),
        });
        tools
    }

    /// Runs one tool. Only an unknown tool name is a call error; everything
    /// else is reported through the response.
    pub async fn call(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResponse, ToolCallError> {
        let kind = self
            .resolve_tool(name)
            .ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;
        let response = match kind {
            ToolKind::Ask(provider) => self.ask(provider, arguments).await,
            ToolKind::WaitForJob => self.wait_for_job(arguments).await,
            ToolKind::CheckJobStatus => self.check_job_status(arguments).await,
            ToolKind::KillJob => self.kill_job(arguments).await,
            ToolKind::ListJobs => self.list_jobs(arguments).await,
        };
        Ok(response.unwrap_or_else(|error| ToolResponse::error(error.to_string())))
    }

    fn resolve_tool(&self, name: &str) -> Option<ToolKind> {
        if let Some(provider) = self
            .providers
            .iter()
            .copied()
            .find(|provider| provider.ask_tool_name() == name)
        {
            return Some(ToolKind::Ask(provider));
        }
        match name {
            TOOL_WAIT_FOR_JOB => Some(ToolKind::WaitForJob),
            TOOL_CHECK_JOB_STATUS => Some(ToolKind::CheckJobStatus),
            TOOL_KILL_JOB => Some(ToolKind::KillJob),
            TOOL_LIST_JOBS => Some(ToolKind::ListJobs),
            _ => None,
        }
    }

    async fn ask(
        &self,
        provider: Provider,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResponse, ToolInputError> {
        let prompt = required_string(arguments, "prompt")?;
        let model = optional_string(arguments, "model")?;
        let timeout_ms = optional_positive_u64(arguments, "timeout_ms")?.unwrap_or(self.default_timeout_ms);
        let working_directory = optional_string(arguments, "working_directory")?;
        let background = optional_bool(arguments, "background")?.unwrap_or(false);
        let reasoning_effort = if provider.supports_reasoning_effort() {
            optional_string(arguments, "reasoning_effort")?
                .map(|raw| ReasoningEffort::parse(&raw))
                .transpose()
                .map_err(|error| ToolInputError(error.to_string()))?
        } else {
            None
        };

        let request = prepare_ask_run(
            &self.catalog,
            provider,
            AskInput {
                prompt,
                model,
                timeout_ms,
                working_directory: working_directory.map(PathBuf::from),
                reasoning_effort,
            },
            self.supervisor.event_logger(),
        );

        if background {
            return Ok(match self.supervisor.run_background(request).await {
                Ok(metadata) => ToolResponse::json(&metadata, false),
                Err(error) => ToolResponse::error(error.to_string()),
            });
        }
        Ok(match self.supervisor.run_foreground(&request).await {
            Ok(output) => ToolResponse::ok(output.text),
            Err(error) => ToolResponse::error(error.to_string()),
        })
    }

    async fn wait_for_job(&self, arguments: &Map<String, Value>) -> Result<ToolResponse, ToolInputError> {
        let provider = self.job_provider(arguments)?;
        let job_id = required_job_id(arguments)?;
        let timeout_ms = optional_positive_u64(arguments, "timeout_ms")?;
        if timeout_ms.is_some_and(|value| value > MAX_WAIT_TIMEOUT_MS) {
            return Err(ToolInputError(format!(
                "timeout_ms must be at most {MAX_WAIT_TIMEOUT_MS}"
            )));
        }
        Ok(match self.query.wait(provider, &job_id, timeout_ms).await {
            Ok(outcome) => match (outcome.status.status, outcome.response_text) {
                (JobState::Completed, Some(text)) => ToolResponse::ok(text),
                (JobState::Completed, None) => ToolResponse::json(&outcome.status, false),
                _ => ToolResponse::json(&outcome.status, true),
            },
            Err(error) => ToolResponse::error(error.to_string()),
        })
    }

    async fn check_job_status(&self, arguments: &Map<String, Value>) -> Result<ToolResponse, ToolInputError> {
        let provider = self.job_provider(arguments)?;
        let job_id = required_job_id(arguments)?;
        Ok(match self.query.check(provider, &job_id).await {
            Ok(status) => ToolResponse::json(&status, false),
            Err(error) => ToolResponse::error(error.to_string()),
        })
    }

    async fn kill_job(&self, arguments: &Map<String, Value>) -> Result<ToolResponse, ToolInputError> {
        let provider = self.job_provider(arguments)?;
        let job_id = required_job_id(arguments)?;
        let signal = match optional_string(arguments, "signal")?.as_deref() {
            None | Some("SIGTERM") => JobSignal::Term,
            Some("SIGINT") => JobSignal::Int,
            Some(other) => {
                return Err(ToolInputError(format!(
                    "signal must be SIGTERM or SIGINT, got '{other}'"
                )))
            }
        };
        Ok(match self.query.kill(provider, &job_id, signal).await {
            Ok(status) => ToolResponse::json(&status, false),
            Err(error) => ToolResponse::error(error.to_string()),
        })
    }

    async fn list_jobs(&self, arguments: &Map<String, Value>) -> Result<ToolResponse, ToolInputError> {
        let provider = self.job_provider(arguments)?;
        let filter = match optional_string(arguments, "status_filter")? {
            Some(raw) => JobListFilter::parse(&raw).ok_or_else(|| {
                ToolInputError(format!(
                    "status_filter must be one of active, completed, failed, all; got '{raw}'"
                ))
            })?,
            None => JobListFilter::default(),
        };
        let limit = optional_positive_u64(arguments, "limit")?
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(match self.query.list(provider, filter, limit).await {
            Ok(jobs) => ToolResponse::json(&jobs, false),
            Err(error) => ToolResponse::error(error.to_string()),
        })
    }

    /// Provider a job tool applies to: explicit argument, or the only served
    /// provider.
    fn job_provider(&self, arguments: &Map<String, Value>) -> Result<Provider, ToolInputError> {
        match optional_string(arguments, "provider")? {
            Some(raw) => {
                let provider = Provider::parse(&raw).map_err(|error| ToolInputError(error.to_string()))?;
                if !self.providers.contains(&provider) {
                    return Err(ToolInputError(format!("provider '{provider}' is not served here")));
                }
                Ok(provider)
            }
            None => match self.providers.as_slice() {
                [only] => Ok(*only),
                _ => Err(ToolInputError(
                    "provider is required when more than one provider is served".to_string(),
                )),
            },
        }
    }

    fn provider_argument_schema(&self) -> Value {
        json!({
            "type": "string",
            "enum": self.providers.iter().map(|provider| provider.as_str()).collect::<Vec<_>>(),
            "description": "Provider that owns the job (required when several are served)"
        })
    }
}

fn ask_descriptor(provider: Provider) -> ToolDescriptor {
    let mut properties = json!({
        "prompt": { "type": "string", "minLength": 1 },
        "model": { "type": "string", "minLength": 1 },
        "timeout_ms": {
            "type": "integer",
            "minimum": 1,
            "description": "CLI timeout in milliseconds (default 600000; >=300000 recommended)"
        },
        "working_directory": { "type": "string", "minLength": 1 },
        "background": {
            "type": "boolean",
            "description": "Return job metadata immediately and run in the background"
        },
    });
    if provider.supports_reasoning_effort() {
        properties["reasoning_effort"] = json!({
            "type": "string",
            "enum": ["minimal", "low", "medium", "high", "xhigh"]
        });
    }
    ToolDescriptor {
        name: provider.ask_tool_name().to_string(),
        description: format!("Send a prompt to the local {provider} CLI and return its output."),
        input_schema: object_schema(properties, &["prompt"]),
    }
}

fn job_id_schema() -> Value {
    json!({ "type": "string", "pattern": "^[0-9a-f]{8}$" })
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn optional_string(arguments: &Map<String, Value>, key: &str) -> Result<Option<String>, ToolInputError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if value.is_empty() => {
            Err(ToolInputError(format!("{key} must not be empty")))
        }
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ToolInputError(format!("{key} must be a string"))),
    }
}

fn required_string(arguments: &Map<String, Value>, key: &str) -> Result<String, ToolInputError> {
    optional_string(arguments, key)?.ok_or_else(|| ToolInputError(format!("{key} is required")))
}

fn optional_positive_u64(arguments: &Map<String, Value>, key: &str) -> Result<Option<u64>, ToolInputError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_u64() {
            Some(parsed) if parsed > 0 => Ok(Some(parsed)),
            _ => Err(ToolInputError(format!("{key} must be a positive integer"))),
        },
    }
}

fn optional_bool(arguments: &Map<String, Value>, key: &str) -> Result<Option<bool>, ToolInputError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(ToolInputError(format!("{key} must be a boolean"))),
    }
}

fn required_job_id(arguments: &Map<String, Value>) -> Result<String, ToolInputError> {
    let job_id = required_string(arguments, "job_id")?;
    if is_valid_job_id(&job_id) {
        Ok(job_id)
    } else {
        Err(ToolInputError(format!(
            "job_id must be 8 lowercase hex characters, got '{job_id}'"
        )))
    }
}

pub fn is_valid_job_id(raw: &str) -> bool {
    raw.len() == JOB_ID_LEN && raw.chars().all(|ch| matches!(ch, '0'..='9' | 'a'..='f'))
}
