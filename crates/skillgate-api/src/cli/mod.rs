//! CLI command definitions for the `sgate` binary.
//!
//! Uses clap derive macros. Every command accepts the global `--json` flag
//! and prints pretty JSON to stdout instead of styled text.

pub mod activate;
pub mod budget;
pub mod compose;
pub mod feedback;
pub mod render;
pub mod route;
pub mod run;
pub mod skills;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::Value;
use skillgate_types::composition::StepInput;
use skillgate_types::gate::ApprovalStatus;
use skillgate_types::governance::FeedbackKind;
use skillgate_types::routing::{ExecutionMode, RoutingMode};

use crate::state::StoreKind;

/// Route, govern and run skills.
#[derive(Parser)]
#[command(name = "sgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Record store backend.
    #[arg(long, global = true, value_enum, default_value = "sqlite", env = "SKILLGATE_STORE")]
    pub store: StoreKind,

    /// Emit tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Route a query to the best-matching skill without running it.
    Route(RouteArgs),

    /// Plan a request and preview it, or execute it with --execute.
    Run(RunArgs),

    /// Create or update a composition from ordered steps.
    Compose {
        /// Composition id (namespace/name).
        skill_id: String,

        /// Steps in order. `a/b` runs one skill; `a/b|c/d` runs a parallel group.
        #[arg(required = true)]
        steps: Vec<String>,

        /// Cancel the rest of a step group on the first failure.
        #[arg(long)]
        fail_fast: bool,
    },

    /// Attach a test case to a composition (replaces one with the same name).
    AddTest {
        /// Composition id.
        skill_id: String,

        /// Test name.
        name: String,

        /// Input payload (JSON, or a bare string).
        #[arg(long, default_value = "null")]
        payload: String,

        /// Expected output (JSON, or a bare string).
        #[arg(long)]
        expected: String,
    },

    /// Run a composition's tests and activate it.
    Activate {
        /// Composition id.
        skill_id: String,

        /// Approval status for risk-flagged compositions.
        #[arg(long)]
        approval: Option<ApprovalStatus>,

        /// Approval token, when one is configured.
        #[arg(long)]
        approval_token: Option<String>,

        /// Activate without requiring stored tests.
        #[arg(long)]
        skip_tests: bool,
    },

    /// Record routing feedback for a skill.
    Feedback {
        /// Skill id.
        skill_id: String,

        /// positive or negative.
        kind: FeedbackKind,
    },

    /// Show budget usage against the configured limits.
    Budget,

    /// Show circuit breaker state for a skill.
    Circuit {
        /// Skill id.
        skill_id: String,
    },

    /// Inspect the skill catalog.
    Skills {
        #[command(subcommand)]
        command: skills::SkillsCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Arguments shared by `route` and `run` for routing a query.
#[derive(Args, Clone)]
pub struct RoutingArgs {
    /// Only consider skills carrying one of these tags.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Scoring mode: keyword, semantic or hybrid.
    #[arg(long)]
    pub mode: Option<RoutingMode>,

    /// Consider deprecated skills too.
    #[arg(long)]
    pub include_deprecated: bool,

    /// Tenant for the routing cache.
    #[arg(long, default_value = "default", env = "SKILLGATE_TENANT")]
    pub tenant: String,
}

#[derive(Args)]
pub struct RouteArgs {
    /// Free-text query, or an explicit skill id.
    pub query: String,

    #[command(flatten)]
    pub routing: RoutingArgs,
}

#[derive(Args)]
pub struct RunArgs {
    /// Free-text query. Routed unless --skill is given.
    #[arg(required_unless_present = "skill")]
    pub query: Option<String>,

    /// Run this skill or composition directly, skipping the router.
    #[arg(long)]
    pub skill: Option<String>,

    /// Input payload (JSON, or a bare string).
    #[arg(long, default_value = "null")]
    pub payload: String,

    /// Execute the plan. Without this only a preview is shown.
    #[arg(long)]
    pub execute: bool,

    /// Preview only (the default).
    #[arg(long, conflicts_with = "execute")]
    pub dry_run: bool,

    /// Caller role for permission checks.
    #[arg(long)]
    pub role: Option<String>,

    /// Caller attribute for ABAC rules, as key=value. Repeatable.
    #[arg(long = "attr", value_parser = parse_attribute)]
    pub attributes: Vec<(String, String)>,

    /// Approval status for high-risk requests.
    #[arg(long)]
    pub approval: Option<ApprovalStatus>,

    /// Approval token, when one is configured.
    #[arg(long)]
    pub approval_token: Option<String>,

    /// Override the estimated cost charged to the budget.
    #[arg(long)]
    pub cost: Option<f64>,

    /// Force single, pipeline or parallel execution of a query.
    #[arg(long)]
    pub exec_mode: Option<ExecutionMode>,

    #[command(flatten)]
    pub routing: RoutingArgs,
}

/// Parse `key=value`.
pub fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// Parse a payload argument. Valid JSON is taken as-is; anything else is
/// treated as a plain string.
pub fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parse a composition step: `a/b` or a `|`-separated parallel group.
pub fn parse_step(raw: &str) -> Result<StepInput> {
    let members: Vec<&str> = raw.split('|').map(str::trim).collect();
    if members.iter().any(|m| m.is_empty()) {
        bail!("empty member in step '{raw}'");
    }
    Ok(match members.as_slice() {
        [single] => StepInput::from(*single),
        _ => StepInput::from(members),
    })
}

/// Parse every step argument, reporting the first bad one.
pub fn parse_steps(raw: &[String]) -> Result<Vec<StepInput>> {
    raw.iter()
        .enumerate()
        .map(|(i, s)| parse_step(s).with_context(|| format!("step {}", i + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_attribute() {
        assert_eq!(
            parse_attribute("dept = finance").unwrap(),
            ("dept".to_string(), "finance".to_string())
        );
        assert_eq!(
            parse_attribute("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_attribute("novalue").is_err());
        assert!(parse_attribute("=x").is_err());
    }

    #[test]
    fn test_parse_payload_falls_back_to_string() {
        assert_eq!(parse_payload(r#"{"text":"hi"}"#), json!({"text": "hi"}));
        assert_eq!(parse_payload("42"), json!(42));
        assert_eq!(parse_payload("hello world"), json!("hello world"));
    }

    #[test]
    fn test_parse_steps() {
        let steps = parse_steps(&["text/upper".into(), "text/echo | text/reverse".into()]).unwrap();
        assert_eq!(
            steps,
            vec![
                StepInput::Single("text/upper".into()),
                StepInput::Group(vec!["text/echo".into(), "text/reverse".into()]),
            ]
        );
        let err = parse_steps(&["text/upper".into(), "a/b||c/d".into()]).unwrap_err();
        assert_eq!(err.to_string(), "step 2");
    }

    #[test]
    fn test_run_requires_query_or_skill() {
        assert!(Cli::try_parse_from(["sgate", "run"]).is_err());
        let cli = Cli::try_parse_from([
            "sgate", "run", "--skill", "text/upper", "--payload", "abc", "--execute", "--attr",
            "dept=ops",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.skill.as_deref(), Some("text/upper"));
        assert!(args.execute);
        assert_eq!(args.attributes, vec![("dept".to_string(), "ops".to_string())]);
        assert_eq!(args.routing.tenant, "default");
    }

    #[test]
    fn test_execute_conflicts_with_dry_run() {
        assert!(
            Cli::try_parse_from(["sgate", "run", "q", "--execute", "--dry-run"]).is_err()
        );
    }
}
