//! `sgate activate`: test-gated composition activation.

use anyhow::Result;
use console::style;
use skillgate_types::gate::ApprovalStatus;
use skillgate_types::skill::SkillId;

use super::render;
use crate::state::AppState;

pub async fn activate(
    state: &AppState,
    skill_id: &str,
    approval: Option<ApprovalStatus>,
    approval_token: Option<&str>,
    skip_tests: bool,
    json: bool,
) -> Result<()> {
    let skill_id = SkillId::parse(skill_id)?;
    let result = state
        .orchestrator
        .activate(&skill_id, approval, approval_token, !skip_tests)
        .await?;

    if json {
        return render::print_json(&result);
    }

    println!();
    if result.activated {
        println!(
            "  {} {} v{} is active",
            style("✓").green().bold(),
            style(&result.skill_id).cyan().bold(),
            result.version
        );
    } else {
        println!(
            "  {} {} was not activated: {}",
            style("✗").red().bold(),
            style(&result.skill_id).cyan().bold(),
            style(&result.reason).yellow()
        );
        for name in &result.failed_tests {
            println!("    {} {}", style("-").dim(), name);
        }
    }
    println!();
    Ok(())
}
