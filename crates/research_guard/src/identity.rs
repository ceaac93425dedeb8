//! Stable identifiers for research sessions and iteration circuits.
//!
//! Identifiers are hex prefixes of a SHA-256 digest. A 16-char session id
//! keeps 64 bits, a 12-char circuit id keeps 48 bits; with n live circuits
//! the chance of any collision is roughly n^2 / 2^49 (about 2e-7 at 10k).

use sha2::{Digest, Sha256};

/// Client identity used when the caller does not resolve one.
pub const DEFAULT_CLIENT_ID: &str = "default";

/// Hex characters kept for session ids
pub const SESSION_ID_LEN: usize = 16;

/// Hex characters kept for circuit ids
pub const CIRCUIT_ID_LEN: usize = 12;

fn digest_prefix(input: &str, len: usize) -> String {
    let mut hex = hex::encode(Sha256::digest(input.as_bytes()));
    hex.truncate(len);
    hex
}

/// Display id for the research session identified by `topic`.
pub fn derive_session_id(topic: &str) -> String {
    digest_prefix(topic, SESSION_ID_LEN)
}

/// Circuit id for a (topic, section) pair.
///
/// Callers must always derive ids through this function so the same pair
/// lands on the same circuit.
pub fn derive_circuit_id(topic: &str, section_name: &str) -> String {
    digest_prefix(&format!("{}_{}", topic, section_name), CIRCUIT_ID_LEN)
}
