//! Styled terminal output shared by several commands.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde::Serialize;
use skillgate_types::gate::AuthorizationOutcome;
use skillgate_types::plan::{ExecutionResult, ExecutionStatus, Preview, StepStatus};
use skillgate_types::routing::{RoutingDecision, RoutingStatus};

/// Print `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn check_mark(ok: bool) -> String {
    if ok {
        format!("{}", style("✓").green())
    } else {
        format!("{}", style("✗").red())
    }
}

fn routing_status(status: RoutingStatus) -> String {
    match status {
        RoutingStatus::Selected => format!("{}", style(status).green()),
        RoutingStatus::LowConfidence | RoutingStatus::Ambiguous => {
            format!("{}", style(status).yellow())
        }
        RoutingStatus::NoSkillFound => format!("{}", style(status).red()),
    }
}

pub fn routing_decision(decision: &RoutingDecision) {
    println!();
    match &decision.skill_id {
        Some(id) => println!(
            "  {} {} ({}, confidence {:.2})",
            style("→").bold(),
            style(id).cyan().bold(),
            routing_status(decision.status),
            decision.confidence
        ),
        None => println!("  {} {}", style("→").bold(), routing_status(decision.status)),
    }

    if decision.candidates.is_empty() {
        println!();
        return;
    }

    let mut table = table();
    table.set_header(vec!["Skill", "Keyword", "Semantic", "Combined", "Confidence"]);
    for c in &decision.candidates {
        let chosen = decision.skill_id.as_ref() == Some(&c.skill_id);
        let id = if chosen {
            Cell::new(&c.skill_id).fg(Color::Cyan)
        } else {
            Cell::new(&c.skill_id)
        };
        table.add_row(vec![
            id,
            Cell::new(format!("{:.2}", c.keyword_score)),
            Cell::new(format!("{:.2}", c.semantic_score)),
            Cell::new(format!("{:.2}", c.combined_score)),
            Cell::new(format!("{:.2}", c.confidence)),
        ]);
    }
    println!();
    println!("{table}");
    println!();
}

pub fn authorization(outcome: &AuthorizationOutcome) {
    let mut table = table();
    table.set_header(vec!["Gate", "", "Policy", "Reason"]);
    for d in &outcome.decisions {
        let mark = if d.allowed {
            Cell::new("allow").fg(Color::Green)
        } else {
            Cell::new("deny").fg(Color::Red)
        };
        let mut reason = d.reason.clone();
        if !d.missing_permissions.is_empty() {
            reason = format!("{reason} (missing: {})", d.missing_permissions.join(", "));
        }
        table.add_row(vec![
            Cell::new(d.gate),
            mark,
            Cell::new(&d.policy_id),
            Cell::new(reason),
        ]);
    }
    println!("{table}");
    println!(
        "  Risk score: {:.2}{}",
        outcome.risk_score,
        if outcome.requires_approval {
            format!("  {}", style("(approval required)").yellow())
        } else {
            String::new()
        }
    );
    if let Some(cost) = outcome.cost {
        println!("  Estimated cost: {cost:.2}");
    }
}

pub fn preview(preview: &Preview) {
    println!();
    println!(
        "  {} Preview of {} {}",
        style("◇").bold(),
        style(&preview.skill_id).cyan().bold(),
        style(format!("[{}]", preview.plan_id)).dim()
    );
    println!();
    if !preview.affected_entities.is_empty() {
        let ids: Vec<String> = preview
            .affected_entities
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("  Would run: {}", ids.join(" → "));
    }
    println!(
        "  {} {}",
        check_mark(preview.authorization.allowed),
        if preview.authorization.allowed {
            "Authorized"
        } else {
            "Would be blocked"
        }
    );
    println!();
    authorization(&preview.authorization);
    println!();
    println!("  {}", style("Nothing was executed. Re-run with --execute.").dim());
    println!();
}

pub fn execution_result(result: &ExecutionResult) {
    let status = match result.status {
        ExecutionStatus::Success => format!("{}", style("success").green().bold()),
        ExecutionStatus::Blocked => format!("{}", style("blocked").yellow().bold()),
        ExecutionStatus::Failed => format!("{}", style("failed").red().bold()),
    };
    println!();
    println!(
        "  {} {} {}",
        style(&result.skill_id).cyan().bold(),
        status,
        style(format!("[{}]", result.plan_id)).dim()
    );
    if let Some(reason) = &result.reason {
        println!("  Reason: {reason}");
    }
    for w in &result.warnings {
        let mut line = format!("{} {}", style("⚠").yellow(), w.code);
        if let Some(replacement) = &w.replacement_id {
            line.push_str(&format!(", use {replacement} instead"));
        }
        if let Some(reason) = &w.reason {
            line.push_str(&format!(" ({reason})"));
        }
        println!("  {line}");
    }

    if !result.steps.is_empty() {
        let mut table = table();
        table.set_header(vec!["#", "Step", "Status", "Duration", "Error"]);
        for s in &result.steps {
            let color = match s.status {
                StepStatus::Success => Color::Green,
                StepStatus::Blocked | StepStatus::Cancelled => Color::Yellow,
                StepStatus::Failed => Color::Red,
            };
            table.add_row(vec![
                Cell::new(s.order),
                Cell::new(&s.step_id),
                Cell::new(s.status.as_str()).fg(color),
                Cell::new(format!("{}ms", s.duration_ms)),
                Cell::new(s.error.as_deref().unwrap_or("")),
            ]);
        }
        println!();
        println!("{table}");
    }

    if !result.output.is_null() {
        println!();
        let output = serde_json::to_string_pretty(&result.output)
            .unwrap_or_else(|_| result.output.to_string());
        for line in output.lines() {
            println!("  {line}");
        }
    }
    println!();
}
