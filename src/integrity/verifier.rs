/// Content integrity verification for uploaded payloads
///
/// Pure functions only: no backend access, no I/O. The session controller
/// calls [`verify_payloads`] between upload and execute.
use crate::config::types::{PayloadRef, Result, TeeError};
use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `bytes` as lowercase hex
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Case-insensitive exact comparison of two digests.
/// An empty expected digest never matches.
pub fn verify(expected: &str, actual: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    expected.eq_ignore_ascii_case(actual)
}

/// Expected vs computed digest for one payload. Lives only inside a verify call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub payload: PayloadRef,
    pub expected: String,
    pub computed: String,
}

impl VerificationRecord {
    fn new(payload: PayloadRef, expected: &str, bytes: &[u8]) -> Self {
        Self {
            payload,
            expected: expected.to_string(),
            computed: compute_hash(bytes),
        }
    }

    pub fn matches(&self) -> bool {
        verify(&self.expected, &self.computed)
    }
}

/// Verify the algorithm and every data payload against expected digests.
///
/// The check is all-or-nothing: the first failing record is reported and no
/// partial result escapes.
pub fn verify_payloads<S: AsRef<str>>(
    algorithm: &[u8],
    data: &[Vec<u8>],
    algorithm_hash: &str,
    data_hashes: &[S],
) -> Result<()> {
    if data_hashes.len() != data.len() {
        return Err(TeeError::ArityMismatch {
            expected: data.len(),
            actual: data_hashes.len(),
        });
    }

    let records = std::iter::once(VerificationRecord::new(
        PayloadRef::Algorithm,
        algorithm_hash,
        algorithm,
    ))
    .chain(
        data.iter()
            .zip(data_hashes)
            .enumerate()
            .map(|(idx, (bytes, expected))| {
                VerificationRecord::new(PayloadRef::Data(idx), expected.as_ref(), bytes)
            }),
    );

    for record in records {
        if !record.matches() {
            log::warn!(
                "Integrity check failed for {}: expected {:?}, computed {}",
                record.payload,
                record.expected,
                record.computed
            );
            return Err(TeeError::IntegrityViolation {
                payload: record.payload,
                expected: record.expected,
                computed: record.computed,
            });
        }
        log::debug!("Integrity check passed for {}", record.payload);
    }

    Ok(())
}
