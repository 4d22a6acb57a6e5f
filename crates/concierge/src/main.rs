//! concierge - answer requests from stdin, calling tools when needed
//!
//! Each input line is one utterance; each answer is printed as one JSON
//! line on stdout. `/tools` lists the catalogue, `/reset` starts over, and
//! Ctrl-C cancels the turn in progress (or exits when idle).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use concierge::dispatch::{DispatchEngine, DispatchSettings};
use concierge::oracle::OpenAiOracle;
use concierge::remotes::remote_services;
use concierge::session::Session;
use concierge::telemetry;
use concierge::tools::LocalToolSet;
use conciergeconf::ConciergeConfig;

#[derive(Parser)]
#[command(name = "concierge")]
#[command(about = "Conversational assistant with local and remote tools")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./concierge.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = ConciergeConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if cli.show_config {
        for file in &sources.files {
            println!("# loaded: {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env: {}", var);
        }
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let _telemetry = telemetry::init("concierge", &config.telemetry)?;
    tracing::info!(files = ?sources.files, env = ?sources.env_overrides, "configuration loaded");

    let oracle = OpenAiOracle::from_config(&config.oracle)
        .context("Set DEEPSEEK_API_KEY or oracle.api_key")?;
    let local = LocalToolSet::from_config(&config).context("Failed to register local tools")?;
    let engine = DispatchEngine::build(
        Arc::new(oracle),
        local,
        remote_services(&config),
        DispatchSettings::from_config(&config),
    )
    .await
    .context("Failed to build the tool catalogue")?;

    for endpoint in engine.catalog().undiscovered().await {
        tracing::warn!(endpoint = %endpoint, "remote service unreachable; will retry on later turns");
    }

    run(&engine).await
}

async fn run(engine: &DispatchEngine) -> Result<()> {
    let mut session = Session::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!(session.id = %session.id, "session started");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let utterance = line.trim();

        match utterance {
            "" => continue,
            "/reset" => {
                session.clear();
                tracing::info!(session.id = %session.id, "session history cleared");
                continue;
            }
            "/tools" => {
                let tools: Vec<_> = engine.tools().await.iter().map(|d| d.to_tool()).collect();
                println!("{}", serde_json::to_string(&tools)?);
                continue;
            }
            _ => {}
        }

        let cancel = CancellationToken::new();
        let ask = session.ask_cancellable(engine, utterance, &cancel);
        tokio::pin!(ask);
        let turn = tokio::select! {
            turn = &mut ask => turn,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                ask.await
            }
        };

        match turn {
            Some(turn) => println!("{}", serde_json::to_string(turn)?),
            None => eprintln!("(cancelled)"),
        }
    }

    tracing::info!(session.id = %session.id, turns = session.len(), "session ended");
    Ok(())
}
