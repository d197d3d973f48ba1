//! Filesystem-backed job records.
//!
//! Every background job owns two JSON files under the runtime root:
//! `jobs/{provider}-status-{ts}-{slug}-{jobId}.json` and
//! `prompts/{provider}-content-{ts}-{slug}-{jobId}.json`. Both are always
//! replaced via temp file + rename, so readers never see a partial record.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sidekick_core::{compact_utc_timestamp, write_text_atomic};
use sidekick_provider::Provider;
use thiserror::Error;

pub const JOB_STATUS_DIR: &str = "jobs";
pub const JOB_CONTENT_DIR: &str = "prompts";
const JOB_SLUG_MAX_CHARS: usize = 32;
const JOB_SLUG_FALLBACK: &str = "prompt";
const JOB_ID_ALLOCATION_ATTEMPTS: usize = 8;

/// Lifecycle states persisted in a status record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Records exist; the subprocess may or may not have started.
    Spawned,
    /// Subprocess started and is being supervised.
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawned => "spawned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    /// Returns true when the job cannot transition any further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusRecord {
    pub provider: Provider,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub content_file: String,
    pub model: String,
    pub spawned_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killed_by_user: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobContentRecord {
    pub provider: Provider,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub spawned_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal fields merged into a content record when a job finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobContentTerminal {
    pub response: Option<String>,
    pub error: Option<String>,
    pub completed_at: String,
}

/// Identity and record paths for a freshly allocated job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFiles {
    pub job_id: String,
    pub content_path: PathBuf,
    pub status_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed job record {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode job record: {0}")]
    Encode(#[source] serde_json::Error),
}

impl JobStoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io_error",
            Self::Malformed { .. } => "malformed",
            Self::Encode(_) => "encode_error",
        }
    }

    /// True when the failure is a missing file rather than a damaged one.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Locates and enumerates job records under one runtime root.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn status_dir(&self) -> PathBuf {
        self.root.join(JOB_STATUS_DIR)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join(JOB_CONTENT_DIR)
    }

    /// Creates both record directories and reserves a job identity that no
    /// existing status record for `provider` uses.
    pub async fn allocate(&self, provider: Provider, prompt: &str) -> Result<JobFiles, JobStoreError> {
        let status_dir = self.status_dir();
        let content_dir = self.content_dir();
        tokio::fs::create_dir_all(&status_dir)
            .await
            .map_err(|error| JobStoreError::io("create", &status_dir, error))?;
        tokio::fs::create_dir_all(&content_dir)
            .await
            .map_err(|error| JobStoreError::io("create", &content_dir, error))?;

        let mut job_id = make_job_id();
        for _ in 1..JOB_ID_ALLOCATION_ATTEMPTS {
            if self.find_status_by_job_id(provider, &job_id).await?.is_none() {
                break;
            }
            job_id = make_job_id();
        }

        let timestamp = compact_utc_timestamp();
        let slug = make_slug(prompt);
        let provider = provider.as_str();
        Ok(JobFiles {
            content_path: content_dir.join(format!(
                "{provider}-content-{timestamp}-{slug}-{job_id}.json"
            )),
            status_path: status_dir.join(format!(
                "{provider}-status-{timestamp}-{slug}-{job_id}.json"
            )),
            job_id,
        })
    }

    /// Linear scan of the status directory; a missing directory means no job.
    pub async fn find_status_by_job_id(
        &self,
        provider: Provider,
        job_id: &str,
    ) -> Result<Option<PathBuf>, JobStoreError> {
        let prefix = format!("{}-status-", provider.as_str());
        let suffix = format!("-{job_id}.json");
        let mut matches = self
            .status_paths()
            .await?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(&suffix))
            })
            .collect::<Vec<_>>();
        matches.sort();
        Ok(matches.into_iter().next())
    }

    /// Parses every status record for `provider`, skipping files that cannot
    /// be read or parsed.
    pub async fn list_statuses(
        &self,
        provider: Provider,
    ) -> Result<Vec<JobStatusRecord>, JobStoreError> {
        let prefix = format!("{}-status-", provider.as_str());
        let mut records = Vec::new();
        for path in self.status_paths().await? {
            let belongs_to_provider = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".json"));
            if !belongs_to_provider {
                continue;
            }
            match read_job_status(&path).await {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::debug!(path = %path.display(), %error, "skipping unreadable job status");
                }
            }
        }
        Ok(records)
    }

    async fn status_paths(&self) -> Result<Vec<PathBuf>, JobStoreError> {
        let dir = self.status_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(JobStoreError::io("read", &dir, error)),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| JobStoreError::io("read", &dir, error))?
        {
            paths.push(entry.path());
        }
        Ok(paths)
    }
}

pub async fn write_job_status(path: &Path, record: &JobStatusRecord) -> Result<(), JobStoreError> {
    write_record(path, record).await
}

pub async fn read_job_status(path: &Path) -> Result<JobStatusRecord, JobStoreError> {
    read_record(path).await
}

/// Writes the prompt-side content record at job creation.
pub async fn initialize_job_content(
    path: &Path,
    record: &JobContentRecord,
) -> Result<(), JobStoreError> {
    write_record(path, record).await
}

/// Merges terminal fields into the existing content record. Prompt fields are
/// carried over untouched.
pub async fn finalize_job_content(
    path: &Path,
    terminal: JobContentTerminal,
) -> Result<JobContentRecord, JobStoreError> {
    let mut record = read_job_content(path).await?;
    record.response = terminal.response;
    record.error = terminal.error;
    record.completed_at = Some(terminal.completed_at);
    write_record(path, &record).await?;
    Ok(record)
}

pub async fn read_job_content(path: &Path) -> Result<JobContentRecord, JobStoreError> {
    read_record(path).await
}

/// Random 8-character lowercase hex identity.
pub fn make_job_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// File-name slug: lowercase, runs of anything outside `[a-z0-9]` collapsed
/// to `-`, trimmed, then cut at 32 characters. The cut may leave a trailing
/// `-`.
pub fn make_slug(prompt: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in prompt.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        return JOB_SLUG_FALLBACK.to_string();
    }
    slug.chars().take(JOB_SLUG_MAX_CHARS).collect()
}

async fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<(), JobStoreError> {
    let mut payload = serde_json::to_string_pretty(record).map_err(JobStoreError::Encode)?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .await
        .map_err(|error| JobStoreError::io("write", path, error))
}

async fn read_record<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, JobStoreError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|error| JobStoreError::io("read", path, error))?;
    serde_json::from_str::<T>(&raw).map_err(|source| JobStoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_status(files: &JobFiles, state: JobState) -> JobStatusRecord {
        JobStatusRecord {
            provider: Provider::Codex,
            job_id: files.job_id.clone(),
            request_id: Some("req-1".to_string()),
            status: state,
            pid: Some(4242),
            content_file: files.content_path.display().to_string(),
            model: "gpt-5.3-codex".to_string(),
            spawned_at: "2026-10-19T12:00:00.000Z".to_string(),
            completed_at: None,
            error: None,
            killed_by_user: None,
        }
    }

    fn sample_content(files: &JobFiles) -> JobContentRecord {
        JobContentRecord {
            provider: Provider::Codex,
            job_id: files.job_id.clone(),
            request_id: None,
            model: "gpt-5.3-codex".to_string(),
            prompt: "Explain the borrow checker".to_string(),
            response: None,
            spawned_at: "2026-10-19T12:00:00.000Z".to_string(),
            completed_at: None,
            error: None,
        }
    }

    #[test]
    fn unit_make_job_id_is_eight_lowercase_hex_chars() {
        for _ in 0..32 {
            let id = make_job_id();
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|ch| matches!(ch, '0'..='9' | 'a'..='f')));
        }
    }

    #[test]
    fn unit_make_slug_collapses_and_trims() {
        assert_eq!(make_slug("  Fix the BUG in main.rs!! "), "fix-the-bug-in-main-rs");
        assert_eq!(make_slug("***"), "prompt");
        assert_eq!(make_slug(""), "prompt");
        let long = make_slug("word ".repeat(20).as_str());
        assert_eq!(long, "word-word-word-word-word-word-wo");
    }

    #[test]
    fn regression_make_slug_keeps_dash_left_by_the_length_cut() {
        let slug = make_slug("abc ".repeat(10).as_str());
        assert_eq!(slug.len(), 32);
        assert_eq!(slug, "abc-abc-abc-abc-abc-abc-abc-abc-");
    }

    #[test]
    fn unit_job_state_terminality() {
        assert!(!JobState::Spawned.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Timeout.is_terminal());
    }

    #[tokio::test]
    async fn functional_allocate_creates_directories_and_matching_names() {
        let temp = tempdir().expect("tempdir");
        let store = JobStore::new(temp.path().join("runtime"));
        let files = store
            .allocate(Provider::Gemini, "Summarize README")
            .await
            .expect("allocate");

        assert!(store.status_dir().is_dir());
        assert!(store.content_dir().is_dir());
        let status_name = files.status_path.file_name().and_then(|n| n.to_str()).expect("name");
        let content_name = files.content_path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(status_name.starts_with("gemini-status-"));
        assert!(status_name.ends_with(&format!("-summarize-readme-{}.json", files.job_id)));
        assert!(content_name.starts_with("gemini-content-"));
        assert!(content_name.ends_with(&format!("-{}.json", files.job_id)));
    }

    #[tokio::test]
    async fn functional_records_round_trip_and_omit_absent_fields() {
        let temp = tempdir().expect("tempdir");
        let store = JobStore::new(temp.path());
        let files = store.allocate(Provider::Codex, "hi").await.expect("allocate");
        let status = sample_status(&files, JobState::Running);
        write_job_status(&files.status_path, &status).await.expect("write status");
        assert_eq!(read_job_status(&files.status_path).await.expect("read"), status);

        let raw = std::fs::read_to_string(&files.status_path).expect("raw");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["jobId"], files.job_id.as_str());
        assert_eq!(value["status"], "running");
        assert!(value.get("completedAt").is_none());
        assert!(value.get("killedByUser").is_none());
    }

    #[tokio::test]
    async fn functional_finalize_job_content_preserves_prompt_fields() {
        let temp = tempdir().expect("tempdir");
        let store = JobStore::new(temp.path());
        let files = store.allocate(Provider::Codex, "borrow").await.expect("allocate");
        let initial = sample_content(&files);
        initialize_job_content(&files.content_path, &initial).await.expect("init");

        let finalized = finalize_job_content(
            &files.content_path,
            JobContentTerminal {
                response: Some("Ownership rules".to_string()),
                error: None,
                completed_at: "2026-10-19T12:00:05.000Z".to_string(),
            },
        )
        .await
        .expect("finalize");

        let reread = read_job_content(&files.content_path).await.expect("read");
        assert_eq!(reread, finalized);
        assert_eq!(reread.prompt, initial.prompt);
        assert_eq!(reread.spawned_at, initial.spawned_at);
        assert_eq!(reread.response.as_deref(), Some("Ownership rules"));
    }

    #[tokio::test]
    async fn functional_find_status_by_job_id_matches_provider_and_suffix() {
        let temp = tempdir().expect("tempdir");
        let store = JobStore::new(temp.path());
        assert!(store
            .find_status_by_job_id(Provider::Codex, "deadbeef")
            .await
            .expect("missing dir")
            .is_none());

        let files = store.allocate(Provider::Codex, "find me").await.expect("allocate");
        write_job_status(&files.status_path, &sample_status(&files, JobState::Spawned))
            .await
            .expect("write");

        let found = store
            .find_status_by_job_id(Provider::Codex, &files.job_id)
            .await
            .expect("lookup");
        assert_eq!(found.as_deref(), Some(files.status_path.as_path()));
        assert!(store
            .find_status_by_job_id(Provider::Gemini, &files.job_id)
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn regression_list_statuses_skips_malformed_files() {
        let temp = tempdir().expect("tempdir");
        let store = JobStore::new(temp.path());
        let files = store.allocate(Provider::Codex, "good").await.expect("allocate");
        write_job_status(&files.status_path, &sample_status(&files, JobState::Running))
            .await
            .expect("write");
        std::fs::write(
            store.status_dir().join("codex-status-20261019T120000Z-bad-0badf00d.json"),
            "{not json",
        )
        .expect("write malformed");
        std::fs::write(
            store.status_dir().join("gemini-status-20261019T120000Z-other-00000001.json"),
            "{}",
        )
        .expect("write other provider");

        let records = store.list_statuses(Provider::Codex).await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].job_id, files.job_id);

        let error = read_job_status(
            &store.status_dir().join("codex-status-20261019T120000Z-bad-0badf00d.json"),
        )
        .await
        .expect_err("malformed");
        assert_eq!(error.code(), "malformed");
    }

    #[tokio::test]
    async fn unit_read_missing_status_reports_not_found() {
        let temp = tempdir().expect("tempdir");
        let error = read_job_status(&temp.path().join("absent.json"))
            .await
            .expect_err("missing");
        assert!(error.is_not_found());
        assert_eq!(error.code(), "io_error");
    }
}
