//! Skillgate CLI entry point.
//!
//! Binary name: `sgate`
//!
//! Parses CLI arguments, sets up tracing, wires the orchestrator to the
//! on-disk catalog and record store, then dispatches to a command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flags when set.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,skillgate_core=debug,skillgate_infra=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    skillgate_observe::tracing_setup::init_tracing_with_filter(filter, cli.json, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "sgate", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(cli.store).await?;
    let result = dispatch(cli.command, &state, cli.json).await;

    skillgate_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(command: Commands, state: &AppState, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Route(args) => cli::route::route(state, &args.query, &args.routing, json).await,
        Commands::Run(args) => cli::run::run(state, &args, json).await,
        Commands::Compose {
            skill_id,
            steps,
            fail_fast,
        } => cli::compose::compose(state, &skill_id, &steps, fail_fast, json).await,
        Commands::AddTest {
            skill_id,
            name,
            payload,
            expected,
        } => cli::compose::add_test(state, &skill_id, &name, &payload, &expected, json).await,
        Commands::Activate {
            skill_id,
            approval,
            approval_token,
            skip_tests,
        } => {
            cli::activate::activate(
                state,
                &skill_id,
                approval,
                approval_token.as_deref(),
                skip_tests,
                json,
            )
            .await
        }
        Commands::Feedback { skill_id, kind } => {
            cli::feedback::feedback(state, &skill_id, kind, json).await
        }
        Commands::Budget => cli::budget::budget(state, json).await,
        Commands::Circuit { skill_id } => cli::budget::circuit(state, &skill_id, json).await,
        Commands::Skills { command } => {
            cli::skills::handle_skills_command(command, state, json).await
        }
        Commands::Completions { .. } => unreachable!("handled before state init"),
    }
}
