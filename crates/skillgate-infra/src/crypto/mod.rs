//! Hashing adapters.

pub mod hash;

pub use hash::Sha256PlanHasher;
