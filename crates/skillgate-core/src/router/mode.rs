//! Execution mode detection for multi-part queries.
//!
//! "do X then Y" runs as a pipeline, "do X and Y" as a parallel fan-out.

use skillgate_types::routing::ExecutionMode;

const PIPELINE_CONNECTOR: &str = "then";
const PARALLEL_CONNECTOR: &str = "and";

fn has_word(query: &str, word: &str) -> bool {
    query
        .split_whitespace()
        .any(|w| w.eq_ignore_ascii_case(word))
}

/// Pick a mode from connector words. Pipeline wins over parallel.
pub fn select_mode(query: &str) -> ExecutionMode {
    if has_word(query, PIPELINE_CONNECTOR) {
        ExecutionMode::Pipeline
    } else if has_word(query, PARALLEL_CONNECTOR) {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Single
    }
}

/// Split a query on the connector of `mode`. Parts keep their original
/// casing, are trimmed, and empty parts are dropped.
pub fn split_query(query: &str, mode: ExecutionMode) -> Vec<String> {
    let connector = match mode {
        ExecutionMode::Single => return vec![query.trim().to_string()],
        ExecutionMode::Pipeline => PIPELINE_CONNECTOR,
        ExecutionMode::Parallel => PARALLEL_CONNECTOR,
    };

    let mut parts = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for word in query.split_whitespace() {
        if word.eq_ignore_ascii_case(connector) {
            parts.push(current.join(" "));
            current.clear();
        } else {
            current.push(word);
        }
    }
    parts.push(current.join(" "));
    parts.retain(|p| !p.is_empty());
    parts
}
