//! `sgate budget` and `sgate circuit`: governance state at a glance.

use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Color};
use console::style;
use skillgate_types::governance::CircuitStatus;
use skillgate_types::skill::SkillId;

use super::render;
use crate::state::AppState;

pub async fn budget(state: &AppState, json: bool) -> Result<()> {
    let usage = state.orchestrator.budget_usage().await?;
    let limits = &state.config.budget;
    let now = Utc::now();
    let day = now.format("%Y-%m-%d").to_string();
    let month = now.format("%Y-%m").to_string();
    let spent_day = usage.day_total(&day);
    let spent_month = usage.month_total(&month);

    if json {
        return render::print_json(&serde_json::json!({
            "day": day,
            "month": month,
            "spent": { "day": spent_day, "month": spent_month },
            "limits": limits,
            "history": usage,
        }));
    }

    let mut table = render::table();
    table.set_header(vec!["Period", "Spent", "Limit", "Remaining"]);
    for (period, spent, limit) in [
        (day.as_str(), spent_day, limits.daily_limit),
        (month.as_str(), spent_month, limits.monthly_limit),
    ] {
        let remaining = (limit - spent).max(0.0);
        let color = if remaining <= 0.0 {
            Color::Red
        } else if remaining < limits.low_remaining_threshold {
            Color::Yellow
        } else {
            Color::Green
        };
        table.add_row(vec![
            Cell::new(period),
            Cell::new(format!("{spent:.2}")),
            Cell::new(format!("{limit:.2}")),
            Cell::new(format!("{remaining:.2}")).fg(color),
        ]);
    }

    println!();
    println!("  {}", style("── Budget ──").dim());
    println!("{table}");
    println!(
        "  Per request: {:.2}   Tiers: standard {:.2}, cheap {:.2} (below {:.2} remaining)",
        limits.per_request_limit, limits.standard_cost, limits.cheap_cost, limits.low_remaining_threshold
    );
    println!();
    Ok(())
}

pub async fn circuit(state: &AppState, skill_id: &str, json: bool) -> Result<()> {
    let skill_id = SkillId::parse(skill_id)?;
    let record = state.orchestrator.circuit_state(&skill_id).await?;

    if json {
        return render::print_json(&serde_json::json!({
            "skill_id": skill_id,
            "circuit": record,
        }));
    }

    let status = match record.status {
        CircuitStatus::Closed => style(record.status).green(),
        CircuitStatus::HalfOpen => style(record.status).yellow(),
        CircuitStatus::Open => style(record.status).red(),
    };
    let cfg = &state.config.circuit;
    println!();
    println!("  {} circuit: {}", style(&skill_id).cyan().bold(), status.bold());
    println!(
        "  Failures in window: {} / {} ({}s window)",
        record.failures.len(),
        cfg.failure_threshold,
        cfg.window_seconds
    );
    if let Some(opened_at) = record.opened_at {
        println!("  Opened at: {}", opened_at.to_rfc3339());
    }
    println!();
    Ok(())
}
