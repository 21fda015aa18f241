//! Observability setup for Skillgate binaries.

pub mod tracing_setup;
