//! Per-request JSONL event log.
//!
//! Each ask produces a `request` event and, once the run finishes, exactly one
//! `response` or `error` event. Lines go to `{log_dir}/sidekick-{date}.jsonl`
//! and are mirrored to `tracing` at info level.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;
use sidekick_core::{
    append_line_with_rotation, current_iso_timestamp, utc_date_part, LogRotationPolicy,
};
use sidekick_provider::Provider;

pub const EVENT_LOG_PREVIEW_CHARS: usize = 200;
const EVENT_LOG_FILE_PREFIX: &str = "sidekick";

/// Identifies the request an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLogContext {
    pub request_id: String,
    pub job_id: Option<String>,
    pub provider: Provider,
    pub tool: String,
    pub model: String,
    pub timeout_ms: u64,
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuntimeLogBase {
    pub ts: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub provider: Provider,
    pub tool: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl RuntimeLogBase {
    fn from_context(context: &RuntimeLogContext) -> Self {
        Self {
            ts: current_iso_timestamp(),
            request_id: context.request_id.clone(),
            job_id: context.job_id.clone(),
            provider: context.provider,
            tool: context.tool.clone(),
            model: context.model.clone(),
            timeout_ms: context.timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeLogEvent {
    Request {
        #[serde(flatten)]
        base: RuntimeLogBase,
        prompt_chars: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_preview: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_text: Option<String>,
    },
    Response {
        #[serde(flatten)]
        base: RuntimeLogBase,
        duration_ms: u64,
        exit_code: Option<i32>,
        stdout_bytes: usize,
        stderr_bytes: usize,
        truncated: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_preview: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_text: Option<String>,
    },
    Error {
        #[serde(flatten)]
        base: RuntimeLogBase,
        duration_ms: u64,
        error_code: String,
        error_message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stderr_preview: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stderr_text: Option<String>,
    },
}

impl RuntimeLogEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Error { .. } => "error",
        }
    }

    pub fn base(&self) -> &RuntimeLogBase {
        match self {
            Self::Request { base, .. } | Self::Response { base, .. } | Self::Error { base, .. } => {
                base
            }
        }
    }
}

/// How much prompt/response text events carry. Full text wins over preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventLogFlags {
    pub preview: bool,
    pub full_text: bool,
}

impl EventLogFlags {
    /// Returns `(preview, full_text)` for `text` according to the flags.
    fn render(self, text: &str) -> (Option<String>, Option<String>) {
        if self.full_text {
            return (None, Some(text.to_string()));
        }
        if self.preview {
            return (Some(preview_text(text)), None);
        }
        (None, None)
    }
}

/// Measurements of a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct EventLogger {
    log_dir: PathBuf,
    flags: EventLogFlags,
    rotation: LogRotationPolicy,
    write_lock: Arc<Mutex<()>>,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>, flags: EventLogFlags, rotation: LogRotationPolicy) -> Self {
        Self {
            log_dir: log_dir.into(),
            flags,
            rotation,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of the log file an event stamped `ts` lands in.
    pub fn log_path_for(&self, ts: &str) -> PathBuf {
        self.log_dir
            .join(format!("{EVENT_LOG_FILE_PREFIX}-{}.jsonl", utc_date_part(ts)))
    }

    pub fn log_request(&self, context: &RuntimeLogContext, prompt: &str) {
        let (prompt_preview, prompt_text) = self.flags.render(prompt);
        self.emit(RuntimeLogEvent::Request {
            base: RuntimeLogBase::from_context(context),
            prompt_chars: prompt.chars().count(),
            cwd: context.cwd.clone(),
            prompt_preview,
            prompt_text,
        });
    }

    pub fn log_response(&self, context: &RuntimeLogContext, stats: RunStats, response: &str) {
        let (response_preview, response_text) = self.flags.render(response);
        self.emit(RuntimeLogEvent::Response {
            base: RuntimeLogBase::from_context(context),
            duration_ms: stats.duration_ms,
            exit_code: stats.exit_code,
            stdout_bytes: stats.stdout_bytes,
            stderr_bytes: stats.stderr_bytes,
            truncated: stats.truncated,
            response_preview,
            response_text,
        });
    }

    pub fn log_error(
        &self,
        context: &RuntimeLogContext,
        duration_ms: u64,
        error_code: &str,
        error_message: &str,
        stderr: &str,
    ) {
        let (stderr_preview, stderr_text) = if stderr.trim().is_empty() {
            (None, None)
        } else {
            self.flags.render(stderr)
        };
        self.emit(RuntimeLogEvent::Error {
            base: RuntimeLogBase::from_context(context),
            duration_ms,
            error_code: error_code.to_string(),
            error_message: error_message.to_string(),
            stderr_preview,
            stderr_text,
        });
    }

    /// Write failures never reach the caller.
    fn emit(&self, event: RuntimeLogEvent) {
        if let Err(error) = self.append(&event) {
            tracing::warn!(%error, kind = event.kind(), "failed to append runtime event");
        }
    }

    fn append(&self, event: &RuntimeLogEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("failed to encode runtime event")?;
        tracing::info!(
            kind = event.kind(),
            request_id = %event.base().request_id,
            provider = %event.base().provider,
            event = %line,
            "runtime event"
        );
        let path = self.log_path_for(&event.base().ts);
        let _guard = lock_unpoisoned(&self.write_lock);
        append_line_with_rotation(&path, &line, self.rotation)
    }
}

/// Random identity for one incoming request.
pub fn new_request_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// First 200 characters of the trimmed text.
pub fn preview_text(text: &str) -> String {
    text.trim().chars().take(EVENT_LOG_PREVIEW_CHARS).collect()
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RuntimeLogContext {
        RuntimeLogContext {
            request_id: "0123456789abcdef".to_string(),
            job_id: Some("deadbeef".to_string()),
            provider: Provider::Codex,
            tool: "ask_codex".to_string(),
            model: "gpt-5.3-codex".to_string(),
            timeout_ms: 600_000,
            cwd: Some("/work".to_string()),
        }
    }

    fn read_events(logger: &EventLogger) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        for entry in std::fs::read_dir(logger.log_dir()).expect("log dir") {
            let raw = std::fs::read_to_string(entry.expect("entry").path()).expect("read");
            for line in raw.lines() {
                events.push(serde_json::from_str(line).expect("json line"));
            }
        }
        events
    }

    #[test]
    fn unit_preview_text_trims_and_caps() {
        assert_eq!(preview_text("  hi  "), "hi");
        assert_eq!(preview_text(&"x".repeat(500)).chars().count(), 200);
    }

    #[test]
    fn unit_flags_full_text_takes_precedence() {
        let flags = EventLogFlags {
            preview: true,
            full_text: true,
        };
        assert_eq!(flags.render("body"), (None, Some("body".to_string())));
        let preview_only = EventLogFlags {
            preview: true,
            full_text: false,
        };
        assert_eq!(preview_only.render(" body "), (Some("body".to_string()), None));
        assert_eq!(EventLogFlags::default().render("body"), (None, None));
    }

    #[test]
    fn functional_request_and_response_events_share_daily_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let logger = EventLogger::new(
            temp.path().join("logs"),
            EventLogFlags {
                preview: true,
                full_text: false,
            },
            LogRotationPolicy::default(),
        );
        logger.log_request(&context(), "Explain lifetimes");
        logger.log_response(
            &context(),
            RunStats {
                duration_ms: 12,
                exit_code: Some(0),
                stdout_bytes: 5,
                stderr_bytes: 0,
                truncated: false,
            },
            "hello",
        );

        let events = read_events(&logger);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "request");
        assert_eq!(events[0]["prompt_chars"], 17);
        assert_eq!(events[0]["prompt_preview"], "Explain lifetimes");
        assert_eq!(events[0]["cwd"], "/work");
        assert!(events[0].get("prompt_text").is_none());
        assert_eq!(events[1]["type"], "response");
        assert_eq!(events[1]["job_id"], "deadbeef");
        assert_eq!(events[1]["exit_code"], 0);
        assert_eq!(events[1]["response_preview"], "hello");
    }

    #[test]
    fn functional_error_event_omits_text_without_flags() {
        let temp = tempfile::tempdir().expect("tempdir");
        let logger = EventLogger::new(
            temp.path(),
            EventLogFlags::default(),
            LogRotationPolicy::default(),
        );
        logger.log_error(&context(), 40, "cli_non_zero_exit", "codex exited with code 2: boom", "boom");

        let events = read_events(&logger);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");
        assert_eq!(events[0]["error_code"], "cli_non_zero_exit");
        assert_eq!(events[0]["timeout_ms"], 600_000);
        assert!(events[0].get("stderr_preview").is_none());
        assert!(events[0].get("stderr_text").is_none());
    }

    #[test]
    fn regression_unwritable_log_dir_is_swallowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").expect("write blocker");
        let logger = EventLogger::new(&blocker, EventLogFlags::default(), LogRotationPolicy::default());
        logger.log_request(&context(), "prompt");
    }

    #[test]
    fn unit_new_request_id_is_hex() {
        let id = new_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
