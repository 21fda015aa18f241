//! `sgate feedback`: adjust routing confidence for a skill.

use anyhow::Result;
use console::style;
use skillgate_types::governance::FeedbackKind;
use skillgate_types::skill::SkillId;

use super::render;
use crate::state::AppState;

pub async fn feedback(state: &AppState, skill_id: &str, kind: FeedbackKind, json: bool) -> Result<()> {
    let skill_id = SkillId::parse(skill_id)?;
    let record = state.orchestrator.record_feedback(&skill_id, kind).await?;

    if json {
        return render::print_json(&serde_json::json!({
            "skill_id": skill_id,
            "feedback": kind,
            "record": record,
        }));
    }

    println!();
    println!(
        "  {} Feedback recorded for {}",
        style("✓").green().bold(),
        style(&skill_id).cyan()
    );
    println!(
        "  Confidence: {:.2}  ({} positive, {} negative)",
        record.confidence, record.positive, record.negative
    );
    println!();
    Ok(())
}
