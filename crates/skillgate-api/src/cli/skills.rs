//! `sgate skills`: browse the catalog.

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use skillgate_types::skill::{RiskLevel, SkillDescriptor, SkillId};

use super::render;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum SkillsCommand {
    /// List catalog skills.
    #[command(alias = "ls")]
    List {
        /// Only skills carrying this tag.
        #[arg(long)]
        tag: Option<String>,

        /// Include deprecated skills.
        #[arg(long)]
        all: bool,
    },

    /// Show one skill descriptor or stored composition.
    Show {
        /// Skill or composition id.
        skill_id: String,
    },

    /// Rescan the metadata directory.
    Reload,
}

pub async fn handle_skills_command(cmd: SkillsCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        SkillsCommand::List { tag, all } => list(state, tag.as_deref(), all, json),
        SkillsCommand::Show { skill_id } => show(state, &skill_id, json).await,
        SkillsCommand::Reload => reload(state, json),
    }
}

fn list(state: &AppState, tag: Option<&str>, all: bool, json: bool) -> Result<()> {
    let snapshot = state.orchestrator.catalog();
    let skills: Vec<&SkillDescriptor> = snapshot
        .list()
        .map(|d| &**d)
        .filter(|d| all || !d.deprecated)
        .filter(|d| tag.is_none_or(|t| d.tags.contains(t)))
        .collect();

    if json {
        return render::print_json(&skills);
    }

    if skills.is_empty() {
        println!();
        println!("  No skills found in {}", style(state.catalog.dir().display()).dim());
        println!();
        return Ok(());
    }

    let mut table = render::table();
    table.set_header(vec!["Id", "Name", "Version", "Risk", "Tags", "Entrypoint"]);
    for d in &skills {
        let risk_color = match d.risk.level {
            RiskLevel::Low => Color::Green,
            RiskLevel::Medium => Color::Yellow,
            RiskLevel::High => Color::Red,
        };
        let mut id = Cell::new(&d.id);
        if d.deprecated {
            id = id.fg(Color::DarkGrey);
        }
        table.add_row(vec![
            id,
            Cell::new(d.display_name()),
            Cell::new(&d.version),
            Cell::new(d.risk.level).fg(risk_color),
            Cell::new(d.tags.iter().cloned().collect::<Vec<_>>().join(", ")),
            Cell::new(&d.contract.entrypoint),
        ]);
    }
    println!();
    println!("{table}");
    println!("  {} skill(s)", skills.len());
    println!();
    Ok(())
}

async fn show(state: &AppState, raw: &str, json: bool) -> Result<()> {
    let skill_id = SkillId::parse(raw)?;

    if let Some(d) = state.orchestrator.catalog().get(&skill_id) {
        if json {
            return render::print_json(&*d);
        }
        println!();
        println!(
            "  {} {} v{}",
            style(&d.id).cyan().bold(),
            style(d.display_name()).bold(),
            d.version
        );
        if !d.description.is_empty() {
            println!("  {}", d.description);
        }
        println!();
        println!("  Entrypoint: {}", d.contract.entrypoint);
        println!(
            "  Risk:       {}{}",
            d.risk.level,
            if d.risk.requires_approval { " (requires approval)" } else { "" }
        );
        if !d.tags.is_empty() {
            println!("  Tags:       {}", d.tags.iter().cloned().collect::<Vec<_>>().join(", "));
        }
        if d.deprecated {
            println!(
                "  {} deprecated{}{}",
                style("⚠").yellow(),
                d.deprecation_reason
                    .as_deref()
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default(),
                d.replacement_id
                    .as_ref()
                    .map(|r| format!(", use {r}"))
                    .unwrap_or_default()
            );
        }
        println!();
        return Ok(());
    }

    match state.orchestrator.composition(&skill_id).await? {
        Some(spec) => {
            if json {
                return render::print_json(&spec);
            }
            println!();
            println!(
                "  {} composition v{} ({}, {} test(s))",
                style(&spec.skill_id).cyan().bold(),
                spec.version,
                if spec.is_active() { "active" } else { "draft" },
                spec.tests.len()
            );
            let members: Vec<String> = spec.member_ids().map(ToString::to_string).collect();
            println!("  Members: {}", members.join(", "));
            println!();
            Ok(())
        }
        None => bail!("Skill '{skill_id}' not found"),
    }
}

fn reload(state: &AppState, json: bool) -> Result<()> {
    let count = state.catalog.reload()?;
    if json {
        return render::print_json(&serde_json::json!({
            "skills": count,
            "metadata_dir": state.catalog.dir(),
            "data_dir": state.data_dir,
        }));
    }
    println!();
    println!(
        "  {} Loaded {} skill(s) from {}",
        style("✓").green().bold(),
        count,
        style(state.catalog.dir().display()).dim()
    );
    println!();
    Ok(())
}
