//! `sgate compose` and `sgate add-test`.

use anyhow::Result;
use comfy_table::Cell;
use console::style;
use skillgate_types::composition::{CompositionSpec, CompositionStatus, CompositionTest, Step};
use skillgate_types::skill::SkillId;

use super::render;
use super::{parse_payload, parse_steps};
use crate::state::AppState;

pub async fn compose(
    state: &AppState,
    skill_id: &str,
    steps: &[String],
    fail_fast: bool,
    json: bool,
) -> Result<()> {
    let skill_id = SkillId::parse(skill_id)?;
    let steps = parse_steps(steps)?;
    let fail_fast = fail_fast.then_some(true);
    let spec = state
        .orchestrator
        .compose(&skill_id, &steps, fail_fast)
        .await?;

    if json {
        return render::print_json(&spec);
    }
    println!();
    println!(
        "  {} Composed {} v{}",
        style("✓").green().bold(),
        style(&spec.skill_id).cyan().bold(),
        spec.version
    );
    print_spec(&spec);
    println!(
        "  {}",
        style(format!(
            "Add tests with `sgate add-test {}`, then `sgate activate {}`.",
            spec.skill_id, spec.skill_id
        ))
        .dim()
    );
    println!();
    Ok(())
}

pub async fn add_test(
    state: &AppState,
    skill_id: &str,
    name: &str,
    payload: &str,
    expected: &str,
    json: bool,
) -> Result<()> {
    let skill_id = SkillId::parse(skill_id)?;
    let test = CompositionTest {
        name: name.to_string(),
        payload: parse_payload(payload),
        expected: parse_payload(expected),
    };
    let spec = state.orchestrator.add_test(&skill_id, test).await?;

    if json {
        return render::print_json(&spec);
    }
    println!();
    println!(
        "  {} Test '{}' stored on {} ({} total)",
        style("✓").green().bold(),
        name,
        style(&spec.skill_id).cyan(),
        spec.tests.len()
    );
    println!();
    Ok(())
}

fn print_spec(spec: &CompositionSpec) {
    let status = match spec.status {
        CompositionStatus::Active => format!("{}", style("active").green()),
        CompositionStatus::Draft => format!("{}", style("draft").yellow()),
    };
    println!("  Status: {status}");
    if spec.risk_flagged {
        println!("  {}", style("Risk-flagged: activation needs approval").yellow());
    }
    if spec.fail_fast {
        println!("  Fail-fast: on");
    }

    let mut table = render::table();
    table.set_header(vec!["#", "Kind", "Members"]);
    for (i, step) in spec.steps.iter().enumerate() {
        let kind = match step {
            Step::Single(_) => "single",
            Step::Parallel(_) => "parallel",
        };
        let members: Vec<String> = step.members().iter().map(ToString::to_string).collect();
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(kind),
            Cell::new(members.join(", ")),
        ]);
    }
    println!();
    println!("{table}");
    println!();
}
