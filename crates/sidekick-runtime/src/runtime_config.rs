//! Resolved runtime settings and the service graph built from them.

use std::path::{Path, PathBuf};

use sidekick_core::LogRotationPolicy;

use crate::cli_supervisor_runtime::{CliSupervisor, CliSupervisorConfig};
use crate::event_log_runtime::{EventLogFlags, EventLogger};
use crate::job_query_runtime::JobQueryService;
use crate::job_store_runtime::JobStore;

pub const DEFAULT_RUNTIME_DIR_NAME: &str = ".sidekick";
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";
pub const DEFAULT_CLI_TIMEOUT_MS: u64 = 600_000;

/// Settings resolved once per process. Per-request working directories only
/// affect where the provider process runs, never where records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub runtime_dir: PathBuf,
    pub log_dir: PathBuf,
    pub default_timeout_ms: u64,
    pub supervisor: CliSupervisorConfig,
    pub event_log: EventLogFlags,
    pub log_rotation: LogRotationPolicy,
}

impl RuntimeConfig {
    /// Defaults rooted at `runtime_dir`, with logs in `runtime_dir/logs`.
    pub fn for_runtime_dir(runtime_dir: impl Into<PathBuf>) -> Self {
        let runtime_dir = runtime_dir.into();
        Self {
            log_dir: runtime_dir.join(DEFAULT_LOG_DIR_NAME),
            runtime_dir,
            default_timeout_ms: DEFAULT_CLI_TIMEOUT_MS,
            supervisor: CliSupervisorConfig::default(),
            event_log: EventLogFlags::default(),
            log_rotation: LogRotationPolicy::default(),
        }
    }

    pub fn job_store(&self) -> JobStore {
        JobStore::new(&self.runtime_dir)
    }

    pub fn event_logger(&self) -> EventLogger {
        EventLogger::new(&self.log_dir, self.event_log, self.log_rotation)
    }

    pub fn supervisor(&self) -> CliSupervisor {
        CliSupervisor::new(self.job_store(), self.supervisor).with_event_logger(self.event_logger())
    }

    pub fn query_service(&self) -> JobQueryService {
        JobQueryService::new(self.job_store())
    }
}

pub fn default_runtime_dir(cwd: &Path) -> PathBuf {
    cwd.join(DEFAULT_RUNTIME_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::{default_runtime_dir, RuntimeConfig, DEFAULT_CLI_TIMEOUT_MS};
    use std::path::Path;

    #[test]
    fn unit_for_runtime_dir_places_logs_under_root() {
        let config = RuntimeConfig::for_runtime_dir("/srv/project/.sidekick");
        assert_eq!(config.log_dir, Path::new("/srv/project/.sidekick/logs"));
        assert_eq!(config.default_timeout_ms, DEFAULT_CLI_TIMEOUT_MS);
        assert_eq!(config.supervisor.kill_grace_ms, None);
        assert_eq!(config.job_store().status_dir(), Path::new("/srv/project/.sidekick/jobs"));
    }

    #[test]
    fn unit_default_runtime_dir_is_hidden_child_of_cwd() {
        assert_eq!(
            default_runtime_dir(Path::new("/work")),
            Path::new("/work/.sidekick")
        );
    }
}
