//! Query normalization, fingerprints and KV key layout

use sha2::{Digest, Sha256};

/// Lowercase, trim, collapse whitespace runs to one space
pub fn normalize(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex_digest(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// L1 key: hash of (normalized query, provider, model)
pub fn fingerprint(query: &str, provider: &str, model: &str) -> String {
    hex_digest(&format!("{}\n{}\n{}", normalize(query), provider, model))
}

/// Provider-agnostic state id for the transition graph
pub fn query_hash(query: &str) -> String {
    hex_digest(&normalize(query))
}

pub fn l1_key(fingerprint: &str) -> String {
    format!("l1:{}", fingerprint)
}

pub fn inflight_key(fingerprint: &str) -> String {
    format!("inflight:{}", fingerprint)
}
