//! Foundational low-level utilities shared across Sidekick crates.
//!
//! Provides atomic record writes, ISO-8601 time helpers, and size-rotated
//! JSONL appends used by the job store and the structured event log.

pub mod atomic_io;
pub mod log_rotation;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use log_rotation::{append_line_with_rotation, LogRotationPolicy};
pub use time_utils::{compact_utc_timestamp, current_iso_timestamp, utc_date_part};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_time_helpers_agree_on_the_current_day() {
        let iso = current_iso_timestamp();
        let compact = compact_utc_timestamp();
        let day = utc_date_part(&iso);
        assert_eq!(day.replace('-', ""), &compact[..8]);
    }

    #[tokio::test]
    async fn functional_write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/sample.json");
        write_text_atomic(&path, "{\"ok\":true}")
            .await
            .expect("write");
        let contents = tokio::fs::read_to_string(&path).await.expect("read");
        assert_eq!(contents, "{\"ok\":true}");
    }
}
