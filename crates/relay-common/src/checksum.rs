//! SHA-256 checksum utilities for batch file verification

use crate::error::{RelayError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Compute the SHA-256 checksum of a file, as 64 lowercase hex chars.
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file)
}

/// Compute the SHA-256 checksum of any readable source.
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 checksum of an in-memory byte slice.
pub fn compute_bytes_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Verify that a file matches an expected checksum.
///
/// Returns `ChecksumMismatch` carrying both digests, so the caller can
/// quarantine the file with a reproducible reason.
pub fn verify_file_checksum(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let actual = compute_file_checksum(path)?;
    if actual == expected {
        Ok(())
    } else {
        Err(RelayError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;

    #[test]
    fn test_compute_checksum() {
        let data = b"hello world";
        let mut cursor = Cursor::new(data);
        let checksum = compute_checksum(&mut cursor).unwrap();
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_checksum_is_pure() {
        let bytes = "relay \u{0645}\u{062b}\u{0627}\u{0644}".as_bytes();
        assert_eq!(compute_bytes_checksum(bytes), compute_bytes_checksum(bytes));
    }

    #[test]
    fn test_single_byte_mutation_changes_checksum() {
        let mut bytes = b"batch contents".to_vec();
        let original = compute_bytes_checksum(&bytes);
        bytes[3] ^= 0x01;
        assert_ne!(original, compute_bytes_checksum(&bytes));
    }

    #[test]
    fn test_verify_file_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"hello world").unwrap();

        assert!(verify_file_checksum(
            &path,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        )
        .is_ok());

        let err = verify_file_checksum(&path, "00").unwrap_err();
        assert!(matches!(err, RelayError::ChecksumMismatch { .. }));
    }
}
