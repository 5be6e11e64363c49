//! Batch filename codec
//!
//! Batch files are named `{YYYYMMDDHHMMSS}_{batch_type}_{batch_id}.jsonl`
//! with the timestamp truncated to UTC seconds. The timestamp prefix
//! makes filenames lexicographically sortable, which the consumer
//! relies on for oldest-first processing.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension of batch data files
pub const DATA_EXTENSION: &str = "jsonl";
/// Extension of the metadata sidecar written next to every data file
pub const META_EXTENSION: &str = "meta";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Components recovered from a batch filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBatchFilename {
    pub timestamp: DateTime<Utc>,
    pub batch_type: String,
    pub batch_id: Uuid,
}

/// Generate the canonical filename for a batch.
///
/// `batch_type` may itself contain underscores; `parse_filename`
/// accounts for that.
pub fn generate_filename(batch_type: &str, batch_id: Uuid, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}.{}",
        timestamp.format(TIMESTAMP_FORMAT),
        batch_type,
        batch_id,
        DATA_EXTENSION
    )
}

/// Parse a batch filename back into its components.
///
/// Returns `None` for anything that is not a well-formed batch name
/// (fewer than three underscore-delimited segments, unparseable
/// timestamp or UUID). `None` is a recoverable "not our file" signal,
/// not an error: the first segment is the timestamp, the last is the
/// UUID, and everything between is the batch type.
pub fn parse_filename(name: &str) -> Option<ParsedBatchFilename> {
    let stem = Path::new(name).file_stem()?.to_str()?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 3 {
        return None;
    }

    let naive = NaiveDateTime::parse_from_str(parts[0], TIMESTAMP_FORMAT).ok()?;
    let batch_id = Uuid::parse_str(parts[parts.len() - 1]).ok()?;
    let batch_type = parts[1..parts.len() - 1].join("_");

    Some(ParsedBatchFilename {
        timestamp: Utc.from_utc_datetime(&naive),
        batch_type,
        batch_id,
    })
}

/// Path of the metadata sidecar belonging to a data file.
pub fn meta_path(data_path: &Path) -> PathBuf {
    data_path.with_extension(META_EXTENSION)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_generate_filename() {
        let id = Uuid::parse_str("b1e3a5c8-f2d7-4c8e-b1a5-c8f2d74c8e0a").unwrap();
        assert_eq!(
            generate_filename("requests", id, ts()),
            "20250115143000_requests_b1e3a5c8-f2d7-4c8e-b1a5-c8f2d74c8e0a.jsonl"
        );
    }

    #[test]
    fn test_round_trip() {
        let id = Uuid::new_v4();
        let parsed = parse_filename(&generate_filename("responses", id, ts())).unwrap();
        assert_eq!(parsed.timestamp, ts());
        assert_eq!(parsed.batch_type, "responses");
        assert_eq!(parsed.batch_id, id);
    }

    #[test]
    fn test_round_trip_batch_type_with_underscores() {
        let id = Uuid::new_v4();
        let parsed = parse_filename(&generate_filename("requests_export", id, ts())).unwrap();
        assert_eq!(parsed.batch_type, "requests_export");
        assert_eq!(parsed.batch_id, id);
    }

    #[test]
    fn test_parse_rejects_short_names() {
        assert!(parse_filename("notes.jsonl").is_none());
        assert!(parse_filename("20250115143000_requests.jsonl").is_none());
        assert!(parse_filename("").is_none());
    }

    #[test]
    fn test_parse_rejects_bad_segments() {
        // Bad timestamp
        assert!(parse_filename("yesterday_requests_b1e3a5c8-f2d7-4c8e-b1a5-c8f2d74c8e0a.jsonl")
            .is_none());
        // Bad UUID
        assert!(parse_filename("20250115143000_requests_not-a-uuid.jsonl").is_none());
    }

    #[test]
    fn test_filenames_sort_chronologically() {
        let id = Uuid::new_v4();
        let older = generate_filename("users", id, ts());
        let newer = generate_filename(
            "users",
            id,
            Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 1).unwrap(),
        );
        assert!(older < newer);
    }

    #[test]
    fn test_meta_path() {
        let path = Path::new("/data/incoming/20250115143000_users_x.jsonl");
        assert_eq!(
            meta_path(path),
            PathBuf::from("/data/incoming/20250115143000_users_x.meta")
        );
    }
}
