//! Runs provider CLIs and drives background job records to a terminal state.
//!
//! Foreground runs return text directly. Background runs allocate job files,
//! start the process in its own process group, and hand it to a detached task
//! that captures output under a shared byte budget, races it against a
//! timeout timer, and finalizes the job exactly once.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sidekick_core::current_iso_timestamp;
use sidekick_provider::Provider;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::event_log_runtime::{EventLogger, RunStats, RuntimeLogContext};
use crate::job_store_runtime::{
    finalize_job_content, initialize_job_content, read_job_status, write_job_status,
    JobContentRecord, JobContentTerminal, JobFiles, JobState, JobStatusRecord, JobStore,
    JobStoreError,
};
use crate::process_signal_runtime::{is_no_such_process, signal_process_group, JobSignal};

pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "(empty response)";
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const OUTPUT_READ_CHUNK_BYTES: usize = 8 * 1024;
const KILLED_BY_USER_CODE: &str = "killed_by_user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CliSupervisorConfig {
    /// Combined stdout + stderr budget per run.
    pub max_output_bytes: usize,
    /// When set, a process still alive this long after SIGTERM gets SIGKILL.
    pub kill_grace_ms: Option<u64>,
}

impl Default for CliSupervisorConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            kill_grace_ms: None,
        }
    }
}

/// One provider invocation, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliRunRequest {
    pub provider: Provider,
    pub command: String,
    pub args: Vec<String>,
    pub prompt: String,
    pub model: String,
    pub timeout_ms: u64,
    pub cwd: Option<PathBuf>,
    pub log_context: Option<RuntimeLogContext>,
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{command} failed to start: command not found")]
    NotFound { command: String },
    #[error("{command} failed to start: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("{command} output exceeded {limit_bytes} bytes")]
    OutputLimitExceeded { command: String, limit_bytes: usize },
    #[error("{command} exited with code {}: {}", exit_code_label(.code), stderr_label(.stderr))]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("failed to supervise {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl CliRunError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "cli_not_found",
            Self::SpawnFailed { .. } => "cli_spawn_error",
            Self::Timeout { .. } => "cli_timeout",
            Self::OutputLimitExceeded { .. } => "cli_output_limit_exceeded",
            Self::NonZeroExit { .. } => "cli_non_zero_exit",
            Self::Io { .. } => "cli_io_error",
        }
    }

    fn terminal_state(&self) -> JobState {
        match self {
            Self::Timeout { .. } => JobState::Timeout,
            _ => JobState::Failed,
        }
    }
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "null".to_string(), |code| code.to_string())
}

fn stderr_label(stderr: &str) -> &str {
    if stderr.is_empty() {
        "no stderr"
    } else {
        stderr
    }
}

/// Text and measurements of a successful foreground run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliRunOutput {
    pub text: String,
    pub stats: RunStats,
}

/// Spawn metadata returned as soon as a background job is started.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundRunResult {
    pub provider: Provider,
    pub job_id: String,
    pub status: JobState,
    pub content_file: String,
    pub status_file: String,
}

/// Number of supervision tasks still driving a job. Shared by clones of a
/// supervisor so the owner can drain them before its runtime shuts down.
#[derive(Debug, Clone)]
struct ActiveJobs {
    count: Arc<watch::Sender<usize>>,
}

impl Default for ActiveJobs {
    fn default() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }
}

impl ActiveJobs {
    fn enter(&self) -> ActiveJobGuard {
        self.count.send_modify(|count| *count += 1);
        ActiveJobGuard {
            count: Arc::clone(&self.count),
        }
    }

    fn current(&self) -> usize {
        *self.count.borrow()
    }

    async fn wait_idle(&self) {
        let mut receiver = self.count.subscribe();
        // The sender lives as long as `self`, so this only ends at zero.
        let _ = receiver.wait_for(|count| *count == 0).await;
    }
}

struct ActiveJobGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.count
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[derive(Debug, Clone)]
pub struct CliSupervisor {
    store: JobStore,
    config: CliSupervisorConfig,
    event_logger: Option<EventLogger>,
    active: ActiveJobs,
}

impl CliSupervisor {
    pub fn new(store: JobStore, config: CliSupervisorConfig) -> Self {
        Self {
            store,
            config,
            event_logger: None,
            active: ActiveJobs::default(),
        }
    }

    pub fn with_event_logger(mut self, event_logger: EventLogger) -> Self {
        self.event_logger = Some(event_logger);
        self
    }

    pub fn event_logger(&self) -> Option<&EventLogger> {
        self.event_logger.as_ref()
    }

    /// Background jobs whose supervision task has not finished yet.
    pub fn active_background_jobs(&self) -> usize {
        self.active.current()
    }

    /// Resolves once every background job started through this supervisor
    /// (or a clone of it) is terminal and its process has been reaped.
    /// Supervision tasks are plain tokio tasks, so a caller about to drop
    /// its runtime must await this first or those jobs stay `running`.
    pub async fn wait_for_background_jobs(&self) {
        self.active.wait_idle().await;
    }

    /// Runs the command to completion and returns its trimmed stdout. No job
    /// records are written and the process dies with the returned future.
    pub async fn run_foreground(&self, request: &CliRunRequest) -> Result<CliRunOutput, CliRunError> {
        let started = Instant::now();
        let mut output = CapturedOutput::default();
        let result = self.run_attached(request, &mut output).await;
        let stats = output.stats(started, result.as_ref().ok().and(output.exit_code));
        if let (Some(logger), Some(context)) = (&self.event_logger, &request.log_context) {
            report_outcome(logger, context, &result, stats, &output.stderr_text());
        }
        result.map(|text| CliRunOutput { text, stats })
    }

    /// Starts a background job and detaches its supervision.
    pub async fn run_background(
        &self,
        request: CliRunRequest,
    ) -> Result<BackgroundRunResult, JobStoreError> {
        let (result, _handle) = self.spawn_background(request).await?;
        Ok(result)
    }

    /// Starts a background job. The returned handle resolves once the job is
    /// terminal; dropping it does not affect the job.
    pub async fn spawn_background(
        &self,
        request: CliRunRequest,
    ) -> Result<(BackgroundRunResult, JoinHandle<()>), JobStoreError> {
        let files = self.store.allocate(request.provider, &request.prompt).await?;
        let spawned_at = current_iso_timestamp();
        let request_id = request
            .log_context
            .as_ref()
            .map(|context| context.request_id.clone());
        initialize_job_content(
            &files.content_path,
            &JobContentRecord {
                provider: request.provider,
                job_id: files.job_id.clone(),
                request_id: request_id.clone(),
                model: request.model.clone(),
                prompt: request.prompt.clone(),
                response: None,
                spawned_at: spawned_at.clone(),
                completed_at: None,
                error: None,
            },
        )
        .await?;

        let result = BackgroundRunResult {
            provider: request.provider,
            job_id: files.job_id.clone(),
            status: JobState::Spawned,
            content_file: files.content_path.display().to_string(),
            status_file: files.status_path.display().to_string(),
        };
        let mut status = JobStatusRecord {
            provider: request.provider,
            job_id: files.job_id.clone(),
            request_id,
            status: JobState::Spawned,
            pid: None,
            content_file: result.content_file.clone(),
            model: request.model.clone(),
            spawned_at,
            completed_at: None,
            error: None,
            killed_by_user: None,
        };
        let log = self.event_logger.clone().zip(request.log_context.clone().map(|mut context| {
            context.job_id = Some(files.job_id.clone());
            context
        }));
        let started = Instant::now();

        let child = match spawn_child(&request, true) {
            Ok(child) => child,
            Err(error) => {
                tracing::warn!(job_id = %files.job_id, %error, "background job failed to spawn");
                persist_transition(&files.status_path, &status).await;
                let finalizer = JobFinalizer::new(files, status, started, log);
                finalizer
                    .finalize(JobOutcome::from_result(Err(error), CapturedOutput::default()))
                    .await;
                return Ok((result, tokio::spawn(async {})));
            }
        };

        status.pid = child.id();
        persist_transition(&files.status_path, &status).await;
        status.status = JobState::Running;
        persist_transition(&files.status_path, &status).await;
        tracing::debug!(job_id = %files.job_id, pid = ?status.pid, command = %request.command, "background job running");

        let finalizer = Arc::new(JobFinalizer::new(files, status, started, log));
        let supervision = JobSupervision {
            command: request.command.clone(),
            timeout_ms: request.timeout_ms,
            max_output_bytes: self.config.max_output_bytes,
            kill_grace: self.config.kill_grace_ms.map(Duration::from_millis),
        };
        let active = self.active.enter();
        let handle = tokio::spawn(async move {
            let _active = active;
            supervise_job(child, finalizer, supervision).await;
        });
        Ok((result, handle))
    }

    async fn run_attached(
        &self,
        request: &CliRunRequest,
        output: &mut CapturedOutput,
    ) -> Result<String, CliRunError> {
        let mut child = spawn_child(request, false)?;
        let pid = child.id();
        let limit = self.config.max_output_bytes;
        let monitored = tokio::time::timeout(
            Duration::from_millis(request.timeout_ms),
            monitor_child(&mut child, limit, output),
        )
        .await;
        match monitored {
            Err(_) => {
                terminate(pid, JobSignal::Term);
                Err(CliRunError::Timeout {
                    command: request.command.clone(),
                    timeout_ms: request.timeout_ms,
                })
            }
            Ok(Err(source)) => Err(CliRunError::Io {
                command: request.command.clone(),
                source,
            }),
            Ok(Ok(MonitorEnd::OutputLimit)) => {
                terminate(pid, JobSignal::Term);
                Err(CliRunError::OutputLimitExceeded {
                    command: request.command.clone(),
                    limit_bytes: limit,
                })
            }
            Ok(Ok(MonitorEnd::Exited(status))) => exit_result(&request.command, status, output),
        }
    }
}

fn spawn_child(request: &CliRunRequest, detached: bool) -> Result<Child, CliRunError> {
    if let Some(cwd) = request.cwd.as_ref().filter(|cwd| !cwd.is_dir()) {
        return Err(CliRunError::SpawnFailed {
            command: request.command.clone(),
            source: io::Error::new(
                io::ErrorKind::NotFound,
                format!("working directory {} does not exist", cwd.display()),
            ),
        });
    }

    let mut command = Command::new(&request.command);
    command
        .args(&request.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("NO_COLOR", "1")
        .env("FORCE_COLOR", "0")
        .env("TERM", "dumb")
        .kill_on_drop(!detached);
    if let Some(cwd) = &request.cwd {
        command.current_dir(cwd);
    }
    #[cfg(unix)]
    command.process_group(0);

    command.spawn().map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            CliRunError::NotFound {
                command: request.command.clone(),
            }
        } else {
            CliRunError::SpawnFailed {
                command: request.command.clone(),
                source,
            }
        }
    })
}

fn terminate(pid: Option<u32>, signal: JobSignal) {
    let Some(pid) = pid else {
        return;
    };
    if let Err(error) = signal_process_group(pid, signal) {
        if !is_no_such_process(&error) {
            tracing::warn!(pid, signal = %signal, %error, "failed to signal provider process");
        }
    }
}

/// Shared stdout + stderr byte allowance.
#[derive(Debug)]
struct OutputBudget {
    remaining: usize,
    exceeded: bool,
}

impl OutputBudget {
    fn new(limit: usize) -> Self {
        Self {
            remaining: limit,
            exceeded: false,
        }
    }

    /// Returns how many bytes of a `len`-byte chunk fit.
    fn admit(&mut self, len: usize) -> usize {
        if len > self.remaining {
            self.exceeded = true;
            let kept = self.remaining;
            self.remaining = 0;
            kept
        } else {
            self.remaining -= len;
            len
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct CapturedOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
    exit_code: Option<i32>,
}

impl CapturedOutput {
    /// Appends the admitted part of `chunk`. Returns false once the budget is
    /// exhausted; nothing is appended after that.
    fn accept(&mut self, stream: OutputStream, chunk: &[u8], budget: &mut OutputBudget) -> bool {
        if self.truncated {
            return false;
        }
        let kept = budget.admit(chunk.len());
        let target = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        target.extend_from_slice(&chunk[..kept]);
        self.truncated = budget.exceeded;
        !self.truncated
    }

    fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    fn stats(&self, started: Instant, exit_code: Option<i32>) -> RunStats {
        RunStats {
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            exit_code,
            stdout_bytes: self.stdout.len(),
            stderr_bytes: self.stderr.len(),
            truncated: self.truncated,
        }
    }
}

#[derive(Debug)]
enum MonitorEnd {
    Exited(ExitStatus),
    OutputLimit,
}

/// Drains both pipes into `output` until they close, then reaps the child.
/// Stops early, without waiting, when the output budget is exceeded.
async fn monitor_child(
    child: &mut Child,
    max_output_bytes: usize,
    output: &mut CapturedOutput,
) -> io::Result<MonitorEnd> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut budget = OutputBudget::new(max_output_bytes);
    let mut stdout_buf = vec![0u8; OUTPUT_READ_CHUNK_BYTES];
    let mut stderr_buf = vec![0u8; OUTPUT_READ_CHUNK_BYTES];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut stdout_buf), if stdout.is_some() => {
                let read = read?;
                if read == 0 {
                    stdout = None;
                } else if !output.accept(OutputStream::Stdout, &stdout_buf[..read], &mut budget) {
                    return Ok(MonitorEnd::OutputLimit);
                }
            }
            read = read_chunk(&mut stderr, &mut stderr_buf), if stderr.is_some() => {
                let read = read?;
                if read == 0 {
                    stderr = None;
                } else if !output.accept(OutputStream::Stderr, &stderr_buf[..read], &mut budget) {
                    return Ok(MonitorEnd::OutputLimit);
                }
            }
        }
    }

    let status = child.wait().await?;
    output.exit_code = status.code();
    Ok(MonitorEnd::Exited(status))
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

fn exit_result(command: &str, status: ExitStatus, output: &CapturedOutput) -> Result<String, CliRunError> {
    if status.success() {
        return Ok(response_text(&output.stdout));
    }
    Err(CliRunError::NonZeroExit {
        command: command.to_string(),
        code: status.code(),
        stderr: output.stderr_text(),
    })
}

fn response_text(stdout: &[u8]) -> String {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        EMPTY_RESPONSE_PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Captured stdout as text of at most `limit` bytes. A multi-byte character
/// split by the budget clip is dropped rather than replaced.
fn clipped_text(bytes: &[u8], limit: usize) -> String {
    let complete = match std::str::from_utf8(bytes) {
        Err(error) if error.error_len().is_none() => &bytes[..error.valid_up_to()],
        _ => bytes,
    };
    let mut text = String::from_utf8_lossy(complete).into_owned();
    if text.len() > limit {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

fn report_outcome(
    logger: &EventLogger,
    context: &RuntimeLogContext,
    result: &Result<String, CliRunError>,
    stats: RunStats,
    stderr: &str,
) {
    match result {
        Ok(text) => logger.log_response(context, stats, text),
        Err(error) => logger.log_error(
            context,
            stats.duration_ms,
            error.code(),
            &error.to_string(),
            stderr,
        ),
    }
}

/// Writes a non-terminal status unless the on-disk record is already terminal.
async fn persist_transition(path: &Path, record: &JobStatusRecord) {
    if let Ok(current) = read_job_status(path).await {
        if current.status.is_terminal() {
            tracing::debug!(job_id = %record.job_id, current = current.status.as_str(), "status already terminal; skipping transition");
            return;
        }
    }
    if let Err(error) = write_job_status(path, record).await {
        tracing::warn!(job_id = %record.job_id, %error, "failed to persist job status");
    }
}

#[derive(Debug)]
struct JobOutcome {
    result: Result<String, CliRunError>,
    partial_response: Option<String>,
    output: CapturedOutput,
}

impl JobOutcome {
    fn from_result(result: Result<String, CliRunError>, output: CapturedOutput) -> Self {
        Self {
            result,
            partial_response: None,
            output,
        }
    }

    fn output_limit(command: &str, limit_bytes: usize, output: CapturedOutput) -> Self {
        Self {
            result: Err(CliRunError::OutputLimitExceeded {
                command: command.to_string(),
                limit_bytes,
            }),
            partial_response: Some(clipped_text(&output.stdout, limit_bytes)),
            output,
        }
    }

    fn timed_out(command: &str, timeout_ms: u64) -> Self {
        Self::from_result(
            Err(CliRunError::Timeout {
                command: command.to_string(),
                timeout_ms,
            }),
            CapturedOutput::default(),
        )
    }

    fn state(&self) -> JobState {
        match &self.result {
            Ok(_) => JobState::Completed,
            Err(error) => error.terminal_state(),
        }
    }
}

/// Owns the single terminal transition of one background job.
struct JobFinalizer {
    latch: AtomicBool,
    files: JobFiles,
    base: JobStatusRecord,
    started: Instant,
    log: Option<(EventLogger, RuntimeLogContext)>,
}

impl JobFinalizer {
    fn new(
        files: JobFiles,
        base: JobStatusRecord,
        started: Instant,
        log: Option<(EventLogger, RuntimeLogContext)>,
    ) -> Self {
        Self {
            latch: AtomicBool::new(false),
            files,
            base,
            started,
            log,
        }
    }

    fn is_finalized(&self) -> bool {
        self.latch.load(Ordering::Acquire)
    }

    /// Content first, then status, then the event log. Returns false when
    /// another trigger already finalized the job.
    async fn finalize(&self, outcome: JobOutcome) -> bool {
        if self
            .latch
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let completed_at = current_iso_timestamp();
        let exit_code = outcome.result.as_ref().ok().and(outcome.output.exit_code);
        let stats = outcome.output.stats(self.started, exit_code);
        let stderr = outcome.output.stderr_text();

        if let Ok(current) = read_job_status(&self.files.status_path).await {
            if current.status.is_terminal() {
                let error = current
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("job already {}", current.status.as_str()));
                self.write_content(JobContentTerminal {
                    response: None,
                    error: Some(error.clone()),
                    completed_at,
                })
                .await;
                if let Some((logger, context)) = &self.log {
                    logger.log_error(context, stats.duration_ms, KILLED_BY_USER_CODE, &error, &stderr);
                }
                tracing::debug!(job_id = %self.base.job_id, "job was terminated externally; keeping on-disk status");
                return true;
            }
        }

        let state = outcome.state();
        let (response, error) = match &outcome.result {
            Ok(text) => (Some(text.clone()), None),
            Err(error) => (outcome.partial_response.clone(), Some(error.to_string())),
        };
        self.write_content(JobContentTerminal {
            response,
            error: error.clone(),
            completed_at: completed_at.clone(),
        })
        .await;

        let mut status = self.base.clone();
        status.status = state;
        status.completed_at = Some(completed_at);
        status.error = error;
        if let Err(write_error) = write_job_status(&self.files.status_path, &status).await {
            tracing::warn!(job_id = %status.job_id, error = %write_error, "failed to persist terminal job status");
        }

        if let Some((logger, context)) = &self.log {
            report_outcome(logger, context, &outcome.result, stats, &stderr);
        }
        tracing::debug!(job_id = %status.job_id, status = state.as_str(), "background job finalized");
        true
    }

    async fn write_content(&self, terminal: JobContentTerminal) {
        if let Err(error) = finalize_job_content(&self.files.content_path, terminal).await {
            tracing::warn!(job_id = %self.base.job_id, %error, "failed to finalize job content");
        }
    }
}

#[derive(Debug, Clone)]
struct JobSupervision {
    command: String,
    timeout_ms: u64,
    max_output_bytes: usize,
    kill_grace: Option<Duration>,
}

async fn supervise_job(mut child: Child, finalizer: Arc<JobFinalizer>, supervision: JobSupervision) {
    let pid = child.id();
    let exited = Arc::new(AtomicBool::new(false));
    let timer = tokio::spawn(run_timeout_timer(
        Arc::clone(&finalizer),
        pid,
        Arc::clone(&exited),
        supervision.clone(),
    ));

    let mut output = CapturedOutput::default();
    let monitored = monitor_child(&mut child, supervision.max_output_bytes, &mut output).await;
    let outcome = match monitored {
        Ok(MonitorEnd::Exited(status)) => {
            exited.store(true, Ordering::Release);
            let result = exit_result(&supervision.command, status, &output);
            JobOutcome::from_result(result, output)
        }
        Ok(MonitorEnd::OutputLimit) => {
            terminate(pid, JobSignal::Term);
            JobOutcome::output_limit(&supervision.command, supervision.max_output_bytes, output)
        }
        Err(source) => JobOutcome::from_result(
            Err(CliRunError::Io {
                command: supervision.command.clone(),
                source,
            }),
            output,
        ),
    };

    if finalizer.finalize(outcome).await {
        timer.abort();
    } else {
        // The timer owns the terminal write; let it finish.
        let _ = timer.await;
    }

    if !exited.load(Ordering::Acquire) {
        reap_child(&mut child, pid, supervision.kill_grace).await;
        exited.store(true, Ordering::Release);
    }
}

async fn run_timeout_timer(
    finalizer: Arc<JobFinalizer>,
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
    supervision: JobSupervision,
) {
    tokio::time::sleep(Duration::from_millis(supervision.timeout_ms)).await;
    if finalizer.is_finalized() {
        return;
    }
    if !exited.load(Ordering::Acquire) {
        terminate(pid, JobSignal::Term);
    }
    let won = finalizer
        .finalize(JobOutcome::timed_out(&supervision.command, supervision.timeout_ms))
        .await;
    if let (true, Some(pid), Some(grace)) = (won, pid, supervision.kill_grace) {
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !exited.load(Ordering::Acquire) {
                tracing::debug!(pid, "escalating to SIGKILL after grace period");
                terminate(Some(pid), JobSignal::Kill);
            }
        });
    }
}

async fn reap_child(child: &mut Child, pid: Option<u32>, kill_grace: Option<Duration>) {
    if let Some(grace) = kill_grace {
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        terminate(pid, JobSignal::Kill);
    }
    if let Err(error) = child.wait().await {
        tracing::warn!(pid = ?pid, %error, "failed to reap provider process");
    }
}
