//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use skillgate_types::skill::{RiskLevel, SkillDescriptor, SkillId};

use crate::catalog::CatalogSnapshot;
use crate::planner::PlanHasher;
use crate::runtime::{Capability, DispatchTable};

/// FNV-1a, good enough to exercise plan identity without a crypto crate.
pub struct FnvHasher;

impl PlanHasher for FnvHasher {
    fn digest(&self, canonical: &str) -> String {
        let hash = canonical.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |acc, b| {
            (acc ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
        format!("{hash:016x}")
    }
}

fn id(raw: &str) -> SkillId {
    SkillId::parse(raw).unwrap()
}

pub fn descriptors() -> Vec<SkillDescriptor> {
    vec![
        SkillDescriptor::new(id("text/echo"), "builtin:echo")
            .with_name("Echo")
            .with_description("Echo the payload back unchanged")
            .with_tags(["text"]),
        SkillDescriptor::new(id("text/upper"), "builtin:upper")
            .with_name("Uppercase")
            .with_description("Convert text to upper case")
            .with_tags(["text"]),
        SkillDescriptor::new(id("text/reverse"), "builtin:reverse")
            .with_name("Reverse")
            .with_description("Reverse the characters of text")
            .with_tags(["text"]),
        SkillDescriptor::new(id("text/fail"), "builtin:fail")
            .with_name("Fail")
            .with_description("Always raises")
            .with_tags(["test"]),
        SkillDescriptor::new(id("admin/purge_cache"), "builtin:echo")
            .with_name("Purge cache")
            .with_description("Purge every cached entry")
            .with_tags(["admin"])
            .with_risk(RiskLevel::High, false),
        SkillDescriptor::new(id("legacy/echo"), "builtin:echo")
            .with_name("Legacy echo")
            .with_description("Old echo")
            .with_tags(["text"])
            .deprecate(Some("superseded"), Some(id("text/echo"))),
    ]
}

pub fn snapshot() -> CatalogSnapshot {
    CatalogSnapshot::new(descriptors())
}

/// Dispatch table for [`descriptors`]. `calls` counts every invocation.
pub fn dispatch_table(calls: Arc<AtomicUsize>) -> DispatchTable {
    let table = DispatchTable::new();
    let counted = move |f: fn(Value) -> Result<Value, String>| {
        let calls = Arc::clone(&calls);
        Capability::sync(move |payload| {
            calls.fetch_add(1, Ordering::SeqCst);
            f(payload)
        })
    };
    table
        .register("builtin:echo", counted(Ok))
        .register(
            "builtin:upper",
            counted(|v| Ok(json!(text(&v).to_uppercase()))),
        )
        .register(
            "builtin:reverse",
            counted(|v| Ok(json!(text(&v).chars().rev().collect::<String>()))),
        )
        .register("builtin:fail", counted(|_| Err("boom".into())));
    table
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
