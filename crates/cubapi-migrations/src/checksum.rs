//! Script checksums recorded in the ledger.

use sha2::{Digest, Sha256};

/// Length of a rendered checksum in hex characters.
pub const CHECKSUM_LEN: usize = 64;

/// SHA-256 of the script bytes, rendered as lowercase hex.
#[must_use]
pub fn checksum(script: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.as_bytes());
    hex::encode(hasher.finalize())
}
