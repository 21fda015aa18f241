//! Built-in capabilities compiled into the binary.
//!
//! Entrypoints live in the `builtin` module: `builtin:echo`, `builtin:upper`,
//! `builtin:reverse` and `builtin:slow_echo`. [`seed_builtin_metadata`]
//! writes matching descriptors so a fresh data directory is usable.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Value, json};
use skillgate_core::runtime::{Capability, DispatchTable};
use skillgate_types::skill::{SkillDescriptor, SkillId};

const DEFAULT_SLOW_MS: u64 = 200;

/// Dispatch table holding every built-in capability.
pub fn builtin_capabilities() -> DispatchTable {
    let table = DispatchTable::new();
    table
        .register("builtin:echo", Capability::sync(Ok))
        .register(
            "builtin:upper",
            Capability::sync(|payload| map_text(&payload, |s| s.to_uppercase())),
        )
        .register(
            "builtin:reverse",
            Capability::sync(|payload| map_text(&payload, |s| s.chars().rev().collect())),
        )
        .register("builtin:slow_echo", Capability::future(slow_echo));
    table
}

/// Apply `f` to a string payload, or to `payload.text` for an object.
fn map_text(payload: &Value, f: impl Fn(&str) -> String) -> Result<Value, String> {
    match payload {
        Value::String(s) => Ok(json!(f(s))),
        Value::Object(map) => match map.get("text") {
            Some(Value::String(s)) => Ok(json!(f(s))),
            _ => Err("expected a string payload or an object with a 'text' field".into()),
        },
        other => Err(format!("expected a string payload, got {other}")),
    }
}

/// Echo after `payload.delay_ms` (default 200) milliseconds.
async fn slow_echo(payload: Value) -> Result<Value, String> {
    let delay = payload
        .get("delay_ms")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_SLOW_MS);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    Ok(payload)
}

fn descriptor(id: &str, entrypoint: &str, description: &str, tags: &[&str]) -> anyhow::Result<SkillDescriptor> {
    Ok(SkillDescriptor::new(SkillId::parse(id)?, entrypoint)
        .with_description(description)
        .with_tags(tags.iter().copied()))
}

/// Descriptors for the built-in capabilities.
pub fn builtin_descriptors() -> anyhow::Result<Vec<SkillDescriptor>> {
    Ok(vec![
        descriptor(
            "text/echo",
            "builtin:echo",
            "Echo the payload back unchanged",
            &["text", "demo"],
        )?
        .with_name("Echo"),
        descriptor(
            "text/upper",
            "builtin:upper",
            "Convert text to upper case",
            &["text"],
        )?
        .with_name("Uppercase"),
        descriptor(
            "text/reverse",
            "builtin:reverse",
            "Reverse the characters of text",
            &["text"],
        )?
        .with_name("Reverse"),
        descriptor(
            "demo/slow_echo",
            "builtin:slow_echo",
            "Wait for a while, then echo the payload",
            &["demo"],
        )?
        .with_name("Slow echo"),
    ])
}

/// Write built-in descriptors under `{metadata_dir}/builtin/` unless the
/// metadata directory already exists. Returns the number written.
pub fn seed_builtin_metadata(metadata_dir: &Path) -> anyhow::Result<usize> {
    if metadata_dir.exists() {
        return Ok(0);
    }
    let dir = metadata_dir.join("builtin");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let descriptors = builtin_descriptors()?;
    for descriptor in &descriptors {
        let path = dir.join(format!("{}.yaml", descriptor.id.name()));
        let yaml = serde_yaml_ng::to_string(descriptor)
            .with_context(|| format!("Failed to serialize {}", descriptor.id))?;
        std::fs::write(&path, yaml)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    tracing::info!(dir = %dir.display(), count = descriptors.len(), "seeded built-in skill metadata");
    Ok(descriptors.len())
}
