//! SHA-256 plan identity hashing.
//!
//! Implements the `PlanHasher` trait from `skillgate-core` using the
//! `sha2` crate (RustCrypto ecosystem).

use sha2::{Digest, Sha256};

use skillgate_core::planner::PlanHasher;

/// SHA-256 implementation of `PlanHasher`.
///
/// Produces lowercase hex digests. Plan ids are this digest with the
/// planner's prefix.
pub struct Sha256PlanHasher;

impl Sha256PlanHasher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Sha256PlanHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanHasher for Sha256PlanHasher {
    fn digest(&self, canonical: &str) -> String {
        let digest = Sha256::digest(canonical.as_bytes());
        format!("{:x}", digest)
    }
}
