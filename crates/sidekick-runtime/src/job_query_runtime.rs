//! Read-side operations over persisted jobs: check, wait, list, and kill.
//!
//! Everything here reads the status directory directly, so any process that
//! shares the runtime root can observe or interrupt a job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use sidekick_core::current_iso_timestamp;
use sidekick_provider::Provider;
use thiserror::Error;
use tokio::time::Instant;

use crate::cli_supervisor_runtime::EMPTY_RESPONSE_PLACEHOLDER;
use crate::job_store_runtime::{
    read_job_content, read_job_status, write_job_status, JobState, JobStatusRecord, JobStore,
    JobStoreError,
};
use crate::process_signal_runtime::{is_no_such_process, send_signal, JobSignal};

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_WAIT_TIMEOUT_MS: u64 = 3_600_000;

/// Adaptive polling schedule used by `wait`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    pub initial_poll_ms: u64,
    pub backoff_factor: f64,
    pub max_poll_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_poll_ms: 250,
            backoff_factor: 1.5,
            max_poll_ms: 5_000,
            max_timeout_ms: MAX_WAIT_TIMEOUT_MS,
        }
    }
}

impl WaitPolicy {
    /// Next poll interval: multiplied by the factor, rounded up, capped.
    pub fn next_poll_ms(&self, current_ms: u64) -> u64 {
        let scaled = (current_ms as f64 * self.backoff_factor).ceil();
        let scaled = if scaled.is_finite() && scaled < u64::MAX as f64 {
            scaled as u64
        } else {
            u64::MAX
        };
        scaled.min(self.max_poll_ms)
    }

    pub fn effective_timeout_ms(&self, requested_ms: Option<u64>) -> u64 {
        requested_ms
            .unwrap_or(self.max_timeout_ms)
            .min(self.max_timeout_ms)
    }
}

/// Status groups accepted by `list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobListFilter {
    /// `spawned` or `running`.
    #[default]
    Active,
    Completed,
    /// `failed` or `timeout`.
    Failed,
    All,
}

impl JobListFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::All => "all",
        }
    }

    pub fn matches(self, state: JobState) -> bool {
        match self {
            Self::Active => matches!(state, JobState::Spawned | JobState::Running),
            Self::Completed => state == JobState::Completed,
            Self::Failed => matches!(state, JobState::Failed | JobState::Timeout),
            Self::All => true,
        }
    }
}

/// Terminal status plus, for completed jobs, the response text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    pub status: JobStatusRecord,
    pub response_text: Option<String>,
}

#[derive(Debug, Error)]
pub enum JobQueryError {
    #[error("job not found: {job_id}")]
    NotFound { job_id: String },
    #[error("job has no pid: {job_id}")]
    NoProcess { job_id: String },
    #[error("wait_for_job timed out after {timeout_ms}ms")]
    WaitTimeout { job_id: String, timeout_ms: u64 },
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("failed to send {signal} to pid {pid}: {source}")]
    Signal {
        pid: u32,
        signal: JobSignal,
        #[source]
        source: std::io::Error,
    },
}

impl JobQueryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NoProcess { .. } => "no_process",
            Self::WaitTimeout { .. } => "wait_timeout",
            Self::Store(error) => error.code(),
            Self::Signal { .. } => "signal_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobQueryService {
    store: JobStore,
    wait_policy: WaitPolicy,
}

impl JobQueryService {
    pub fn new(store: JobStore) -> Self {
        Self::with_wait_policy(store, WaitPolicy::default())
    }

    pub fn with_wait_policy(store: JobStore, wait_policy: WaitPolicy) -> Self {
        Self { store, wait_policy }
    }

    /// Single non-blocking read of the job's status record.
    pub async fn check(&self, provider: Provider, job_id: &str) -> Result<JobStatusRecord, JobQueryError> {
        let (record, _) = self.lookup(provider, job_id).await?;
        Ok(record)
    }

    /// Polls until the job is terminal or the (capped) timeout elapses.
    pub async fn wait(
        &self,
        provider: Provider,
        job_id: &str,
        timeout_ms: Option<u64>,
    ) -> Result<WaitOutcome, JobQueryError> {
        let timeout_ms = self.wait_policy.effective_timeout_ms(timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut poll_ms = self.wait_policy.initial_poll_ms;

        loop {
            let status = self.check(provider, job_id).await?;
            if status.status.is_terminal() {
                let response_text = if status.status == JobState::Completed {
                    completed_response_text(&status).await
                } else {
                    None
                };
                return Ok(WaitOutcome {
                    status,
                    response_text,
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(Duration::from_millis(poll_ms))).await;
            poll_ms = self.wait_policy.next_poll_ms(poll_ms);
        }

        tracing::debug!(job_id, timeout_ms, "wait deadline reached before terminal status");
        Err(JobQueryError::WaitTimeout {
            job_id: job_id.to_string(),
            timeout_ms,
        })
    }

    /// Filters, sorts newest first by `spawnedAt`, and truncates.
    pub async fn list(
        &self,
        provider: Provider,
        filter: JobListFilter,
        limit: Option<usize>,
    ) -> Result<Vec<JobStatusRecord>, JobQueryError> {
        let mut records = self
            .store
            .list_statuses(provider)
            .await?
            .into_iter()
            .filter(|record| filter.matches(record.status))
            .collect::<Vec<_>>();
        records.sort_by(|left, right| right.spawned_at.cmp(&left.spawned_at));
        records.truncate(limit.unwrap_or(DEFAULT_LIST_LIMIT));
        Ok(records)
    }

    /// Signals the job's process and records it as failed by the user. A job
    /// that is already terminal is returned unchanged without signalling.
    pub async fn kill(
        &self,
        provider: Provider,
        job_id: &str,
        signal: JobSignal,
    ) -> Result<JobStatusRecord, JobQueryError> {
        let (record, status_path) = self.lookup(provider, job_id).await?;
        let Some(pid) = record.pid else {
            return Err(JobQueryError::NoProcess {
                job_id: job_id.to_string(),
            });
        };
        if record.status.is_terminal() {
            tracing::debug!(job_id, status = record.status.as_str(), "kill skipped for terminal job");
            return Ok(record);
        }

        match send_signal(pid, signal) {
            Ok(()) => {}
            Err(error) if is_no_such_process(&error) => {
                tracing::debug!(job_id, pid, "process already gone before kill");
            }
            Err(source) => {
                return Err(JobQueryError::Signal {
                    pid,
                    signal,
                    source,
                })
            }
        }

        let updated = JobStatusRecord {
            status: JobState::Failed,
            killed_by_user: Some(true),
            completed_at: Some(current_iso_timestamp()),
            error: Some(format!("killed by user with {signal}")),
            ..record
        };
        write_job_status(&status_path, &updated).await?;
        tracing::info!(job_id, pid, signal = %signal, "job killed by user");
        Ok(updated)
    }

    async fn lookup(
        &self,
        provider: Provider,
        job_id: &str,
    ) -> Result<(JobStatusRecord, PathBuf), JobQueryError> {
        let Some(path) = self.store.find_status_by_job_id(provider, job_id).await? else {
            return Err(JobQueryError::NotFound {
                job_id: job_id.to_string(),
            });
        };
        match read_job_status(&path).await {
            Ok(record) => Ok((record, path)),
            Err(error) if error.is_not_found() => Err(JobQueryError::NotFound {
                job_id: job_id.to_string(),
            }),
            Err(error) => Err(error.into()),
        }
    }
}

/// Response text for a completed job, or `None` when the content record
/// cannot be read.
async fn completed_response_text(status: &JobStatusRecord) -> Option<String> {
    match read_job_content(Path::new(&status.content_file)).await {
        Ok(content) => Some(
            content
                .response
                .unwrap_or_else(|| EMPTY_RESPONSE_PLACEHOLDER.to_string()),
        ),
        Err(error) => {
            tracing::debug!(job_id = %status.job_id, %error, "completed job content unreadable");
            None
        }
    }
}
