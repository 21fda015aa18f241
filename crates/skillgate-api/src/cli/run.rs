//! `sgate run`: preview or execute a skill, composition or free-text query.
//!
//! Without `--execute` nothing is invoked or charged: a query is routed and
//! the selected skill is previewed. With `--execute`, a query may be split
//! into a pipeline or parallel group before running.

use anyhow::Result;
use console::style;
use serde_json::Value;
use skillgate_core::policy::AuthorizeRequest;
use skillgate_types::plan::PlanOutcome;
use skillgate_types::skill::SkillId;

use super::render;
use super::route::route_request;
use super::{RunArgs, parse_payload};
use crate::state::AppState;

fn authorize_request(query: &str, args: &RunArgs) -> AuthorizeRequest {
    let mut request = AuthorizeRequest::new(query);
    if let Some(role) = &args.role {
        request = request.with_role(role);
    }
    for (key, value) in &args.attributes {
        request = request.with_attribute(key, value);
    }
    if let Some(approval) = args.approval {
        request = request.with_approval(approval);
    }
    if let Some(token) = &args.approval_token {
        request = request.with_token(token);
    }
    request.estimated_cost = args.cost;
    request
}

pub async fn run(state: &AppState, args: &RunArgs, json: bool) -> Result<()> {
    let payload = parse_payload(&args.payload);
    let dry_run = !args.execute;

    if let Some(raw) = &args.skill {
        let skill_id = SkillId::parse(raw.as_str())?;
        let query = args.query.as_deref().unwrap_or(raw);
        let request = authorize_request(query, args);
        return run_skill(state, &skill_id, payload, dry_run, &request, json).await;
    }

    let query = args.query.as_deref().unwrap_or_default();
    let request = authorize_request(query, args);
    let route = route_request(query, &args.routing);

    if dry_run {
        let decision = state.orchestrator.route(&args.routing.tenant, &route);
        if let Some(skill_id) = decision.skill_id.as_ref().filter(|_| decision.is_selected()) {
            tracing::debug!(skill_id = %skill_id, confidence = decision.confidence, "previewing routed skill");
            return run_skill(state, skill_id, payload, true, &request, json).await;
        }
        if json {
            return render::print_json(&decision);
        }
        render::routing_decision(&decision);
        println!("  {}", style("No skill selected; nothing to preview.").yellow());
        println!();
        return Ok(());
    }

    let outcome = state
        .orchestrator
        .run_query(&args.routing.tenant, &route, args.exec_mode, payload, &request)
        .await?;

    if json {
        return render::print_json(&outcome);
    }
    for decision in &outcome.decisions {
        render::routing_decision(decision);
    }
    match &outcome.result {
        Some(result) => render::execution_result(result),
        None => {
            println!(
                "  {}",
                style("Not every part of the query selected a skill; nothing was executed.")
                    .yellow()
            );
            println!();
        }
    }
    Ok(())
}

async fn run_skill(
    state: &AppState,
    skill_id: &SkillId,
    payload: Value,
    dry_run: bool,
    request: &AuthorizeRequest,
    json: bool,
) -> Result<()> {
    match state
        .orchestrator
        .plan(skill_id, payload, dry_run, request)
        .await?
    {
        PlanOutcome::Preview(preview) => {
            if json {
                return render::print_json(&preview);
            }
            render::preview(&preview);
        }
        PlanOutcome::Plan(plan) => {
            let result = state.orchestrator.execute(&plan, request).await?;
            if json {
                return render::print_json(&result);
            }
            render::execution_result(&result);
        }
    }
    Ok(())
}
