use chrono::{SecondsFormat, Utc};

/// Returns the current UTC time as ISO-8601 with millisecond precision,
/// e.g. `2026-10-19T12:00:00.123Z`.
///
/// Fixed width, so lexicographic order of these strings is chronological order.
pub fn current_iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Returns the current UTC time in the compact `YYYYMMDDTHHMMSSZ` form used in
/// record file names.
pub fn compact_utc_timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// Returns the `YYYY-MM-DD` prefix of an ISO-8601 timestamp.
pub fn utc_date_part(iso_timestamp: &str) -> &str {
    iso_timestamp.get(..10).unwrap_or(iso_timestamp)
}

#[cfg(test)]
mod tests {
    use super::{compact_utc_timestamp, current_iso_timestamp, utc_date_part};

    #[test]
    fn unit_iso_timestamp_has_millisecond_precision_and_zulu_suffix() {
        let ts = current_iso_timestamp();
        assert_eq!(ts.len(), "2026-10-19T12:00:00.123Z".len());
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn unit_compact_timestamp_has_no_separators() {
        let ts = compact_utc_timestamp();
        assert_eq!(ts.len(), 16);
        assert!(ts.chars().all(|ch| ch.is_ascii_digit() || ch == 'T' || ch == 'Z'));
    }

    #[test]
    fn unit_utc_date_part_handles_short_input() {
        assert_eq!(utc_date_part("2026-10-19T12:00:00.123Z"), "2026-10-19");
        assert_eq!(utc_date_part("2026"), "2026");
    }
}
