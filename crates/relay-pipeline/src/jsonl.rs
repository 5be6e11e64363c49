//! JSONL batch serializer and metadata sidecar
//!
//! A batch data file is UTF-8 text with one compact JSON object per
//! line. Writing goes through a temp file in the same directory plus an
//! atomic rename, so a partially-written file is never visible under
//! the name a consumer scans for. The `.meta` sidecar is written by the
//! producer only after the data file is complete; its presence is the
//! "batch is complete and valid" signal.

use chrono::{DateTime, Utc};
use relay_common::checksum::compute_file_checksum;
use relay_common::error::{RelayError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Write records to `path` as newline-delimited JSON.
///
/// Parent directories are created as needed. The write is all-or-
/// nothing: records are serialized to a hidden temp file first and the
/// temp file is renamed into place only when every record serialized
/// cleanly. Unicode content is preserved unescaped.
pub fn write_jsonl<T: Serialize>(records: &[T], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path)?;
    let result = write_records(records, &tmp_path);
    if result.is_err() {
        // Best effort: never leave a temp file behind on failure.
        let _ = fs::remove_file(&tmp_path);
        return result;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn write_records<T: Serialize>(records: &[T], path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RelayError::Config(format!("invalid batch path: {}", path.display())))?;
    Ok(path.with_file_name(format!(".{}.tmp", file_name)))
}

/// Read an entire JSONL file eagerly.
///
/// Blank and whitespace-only lines are skipped. Any line that is not
/// valid JSON for `T` fails the whole file with a `MalformedBatch`
/// error naming the 1-based line number.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    stream_jsonl(path)?.collect()
}

/// Read a JSONL file lazily, yielding one record at a time.
///
/// Same failure semantics as `read_jsonl`, surfaced at the point of
/// consumption. The stream is restartable only from the beginning.
pub fn stream_jsonl<T: DeserializeOwned>(path: &Path) -> Result<JsonlStream<T>> {
    let file = File::open(path)?;
    Ok(JsonlStream {
        lines: BufReader::new(file).lines(),
        path: path.to_path_buf(),
        line_number: 0,
        _marker: std::marker::PhantomData,
    })
}

/// Lazy JSONL reader returned by [`stream_jsonl`].
pub struct JsonlStream<T> {
    lines: Lines<BufReader<File>>,
    path: PathBuf,
    line_number: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> Iterator for JsonlStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(RelayError::Io(e))),
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            return Some(serde_json::from_str(&line).map_err(|e| RelayError::MalformedBatch {
                path: self.path.clone(),
                line: self.line_number,
                message: e.to_string(),
            }));
        }
    }
}

/// Metadata sidecar accompanying every batch data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: Uuid,
    pub batch_type: String,
    pub record_count: u64,
    pub file_size_bytes: u64,
    pub checksum_sha256: String,
    pub created_at_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_network: Option<String>,
}

impl BatchMetadata {
    /// Build metadata for an already-written data file, computing its
    /// size and checksum from the bytes on disk.
    pub fn for_file(
        batch_id: Uuid,
        batch_type: &str,
        record_count: u64,
        data_path: &Path,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let checksum = compute_file_checksum(data_path)?;
        let file_size = fs::metadata(data_path)?.len();
        Ok(Self {
            batch_id,
            batch_type: batch_type.to_string(),
            record_count,
            file_size_bytes: file_size,
            checksum_sha256: checksum,
            created_at_utc: created_at,
            source_network: None,
            destination_network: None,
        })
    }

    pub fn with_networks(mut self, source: Option<String>, destination: Option<String>) -> Self {
        self.source_network = source;
        self.destination_network = destination;
        self
    }

    /// Write the sidecar next to its data file. Called only after the
    /// data file is fully written.
    pub fn write(&self, meta_path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(meta_path, json)?;
        Ok(())
    }

    /// Read and validate a sidecar.
    pub fn read(meta_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(meta_path)?;
        let meta: Self =
            serde_json::from_str(&content).map_err(|e| RelayError::InvalidMetadata {
                path: meta_path.to_path_buf(),
                message: e.to_string(),
            })?;
        if !is_valid_sha256(&meta.checksum_sha256) {
            return Err(RelayError::InvalidMetadata {
                path: meta_path.to_path_buf(),
                message: format!(
                    "checksum_sha256 is not 64 lowercase hex chars: {}",
                    meta.checksum_sha256
                ),
            });
        }
        Ok(meta)
    }
}

fn is_valid_sha256(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
