//! Infrastructure layer for Skillgate.
//!
//! Implements the ports defined in `skillgate-core`: the YAML filesystem
//! catalog, JSON-file and SQLite record stores, SHA-256 plan hashing, the
//! `skillgate.toml` loader and the built-in capability table.

pub mod capability;
pub mod config;
pub mod crypto;
pub mod filesystem;
pub mod sqlite;
