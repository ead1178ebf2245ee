//! One-time codes gating sensitive approval steps.
//!
//! Codes are delivered by the notifier collaborator; steps keep only the
//! SHA-256 digest and the expiry.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::workflow::error::Requirement;
use crate::workflow::types::IssuedOtp;

/// Hashes an OTP code for storage.
#[must_use]
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generates a numeric code of `length` digits.
#[must_use]
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length.max(1))
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

/// Checks a supplied code against the issued OTP at time `at`.
pub fn verify(
    issued: Option<&IssuedOtp>,
    supplied: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), Requirement> {
    let supplied = supplied
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(Requirement::OtpMissing)?;
    let issued = issued.ok_or(Requirement::OtpNotIssued)?;

    if issued.is_expired(at) {
        return Err(Requirement::OtpExpired);
    }
    if hash_code(supplied) != issued.code_hash {
        return Err(Requirement::OtpMismatch);
    }
    Ok(())
}
