use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const DEFAULT_LOG_ROTATION_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_LOG_ROTATION_MAX_FILES: usize = 5;

/// Size-based rotation settings for append-only JSONL logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    /// Rotate before an append would push the active file past this size.
    pub max_bytes: u64,
    /// Total files kept, active file included.
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_LOG_ROTATION_MAX_BYTES,
            max_files: DEFAULT_LOG_ROTATION_MAX_FILES,
        }
    }
}

impl LogRotationPolicy {
    /// Returns true when size-based rotation is enabled.
    pub fn is_enabled(self) -> bool {
        self.max_bytes > 0 && self.max_files > 0
    }
}

/// Append one JSON line to `path`, rotating `path` -> `path.1` -> `path.2` ...
/// first when the policy says the file is full.
pub fn append_line_with_rotation(path: &Path, line: &str, policy: LogRotationPolicy) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if policy.is_enabled() {
        if let Ok(metadata) = std::fs::metadata(path) {
            let incoming = u64::try_from(line.len().saturating_add(1)).unwrap_or(u64::MAX);
            if metadata.len().saturating_add(incoming) > policy.max_bytes {
                rotate_log_file(path, policy)?;
            }
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn rotated_backup_path(path: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{index}", path.display()))
}

fn rotate_log_file(path: &Path, policy: LogRotationPolicy) -> Result<()> {
    let oldest = policy.max_files.saturating_sub(1);
    if oldest == 0 {
        return std::fs::remove_file(path)
            .with_context(|| format!("failed to truncate {}", path.display()));
    }

    let oldest_path = rotated_backup_path(path, oldest);
    if oldest_path.exists() {
        std::fs::remove_file(&oldest_path)
            .with_context(|| format!("failed to prune {}", oldest_path.display()))?;
    }
    for index in (1..oldest).rev() {
        let source = rotated_backup_path(path, index);
        if source.exists() {
            let destination = rotated_backup_path(path, index + 1);
            std::fs::rename(&source, &destination).with_context(|| {
                format!(
                    "failed to shift {} to {}",
                    source.display(),
                    destination.display()
                )
            })?;
        }
    }
    let first_backup = rotated_backup_path(path, 1);
    std::fs::rename(path, &first_backup).with_context(|| {
        format!(
            "failed to rotate {} to {}",
            path.display(),
            first_backup.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{append_line_with_rotation, rotated_backup_path, LogRotationPolicy};

    fn read(path: &std::path::Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn functional_append_rotates_when_size_threshold_exceeded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs/sidekick-2026-10-19.jsonl");
        let policy = LogRotationPolicy {
            max_bytes: 24,
            max_files: 3,
        };

        append_line_with_rotation(&path, r#"{"seq":1,"type":"request"}"#, policy)
            .expect("append first");
        append_line_with_rotation(&path, r#"{"seq":2,"type":"response"}"#, policy)
            .expect("append second");

        let first_backup = rotated_backup_path(&path, 1);
        assert!(read(&first_backup).contains("\"seq\":1"));
        assert!(read(&path).contains("\"seq\":2"));
        assert!(!read(&path).contains("\"seq\":1"));
    }

    #[test]
    fn functional_append_prunes_backups_beyond_max_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("events.jsonl");
        let policy = LogRotationPolicy {
            max_bytes: 18,
            max_files: 2,
        };

        for seq in 1..=6 {
            append_line_with_rotation(&path, &format!(r#"{{"seq":{seq}}}"#), policy)
                .expect("append line");
        }

        assert!(rotated_backup_path(&path, 1).exists());
        assert!(!rotated_backup_path(&path, 2).exists());
        assert!(read(&path).contains("\"seq\":6"));
        assert!(read(&rotated_backup_path(&path, 1)).contains("\"seq\":5"));
    }

    #[test]
    fn unit_disabled_policy_never_rotates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("events.jsonl");
        let policy = LogRotationPolicy {
            max_bytes: 0,
            max_files: 3,
        };
        for seq in 1..=4 {
            append_line_with_rotation(&path, &format!(r#"{{"seq":{seq}}}"#), policy)
                .expect("append line");
        }
        assert_eq!(read(&path).lines().count(), 4);
        assert!(!rotated_backup_path(&path, 1).exists());
    }
}
