#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use magpie::engine::context::StaticEventSource;
use magpie::engine::Engine;
use magpie::memory::SqliteStore;
use magpie::persona::{ProfileProvider, StaticProfileProvider};
use magpie::platform::{DryRunExecutor, TemplateContentGenerator};
use magpie::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "magpie", about = "Autonomous persona behavior engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Persona to operate as. Falls back to the configured default.
    #[arg(long, global = true)]
    persona: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the behavior cycle and dispatcher until interrupted.
    Run,
    /// Run a single cycle and print what it did.
    Tick,
    /// Print the effective persona profile as toml.
    Profile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = Config::load_or_init()?;
    let persona_id = cli
        .persona
        .unwrap_or_else(|| config.engine.persona_id.clone());

    let provider = StaticProfileProvider::new(config.workspace_dir.join("personas"));
    let profile = provider.profile(&persona_id).await?;

    match cli.command {
        Command::Profile => {
            print!("{}", toml::to_string_pretty(&profile)?);
            Ok(())
        }
        Command::Tick => {
            let mut engine = build_engine(profile, config)?;
            let report = engine.tick_once(Utc::now()).await?;
            println!(
                "mode={} backlog={} decisions={} scheduled={} dispatched={}",
                report.mode, report.backlog, report.decisions, report.scheduled, report.dispatched
            );
            Ok(())
        }
        Command::Run => {
            let engine = build_engine(profile, config)?;
            let cancel = CancellationToken::new();

            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown requested");
                    signal_cancel.cancel();
                }
            });

            engine.run(cancel).await;
            Ok(())
        }
    }
}

fn build_engine(profile: magpie::PersonaProfile, config: Config) -> Result<Engine> {
    let store = Arc::new(SqliteStore::new(&config.workspace_dir)?);
    Ok(Engine::new(
        profile,
        config,
        Arc::new(DryRunExecutor::default()),
        Arc::new(TemplateContentGenerator),
        Arc::new(StaticEventSource::new()),
        store,
    ))
}
