//! Achievement engine - activity replay binary

use anyhow::Context;
use clap::Parser;
use std::io::Read;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use achievement_engine::{
    config::Args,
    gateway::InMemoryGateway,
    replay::{parse_activity_log, replay},
    GamificationEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging (stderr, stdout carries the report)
    let log_level = args.log_level.clone();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("achievement_engine={},info", log_level).into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let (user_catalog, team_catalog) = args.load_catalogs()?;
    let clock = args.clock()?;
    info!(
        day_offset_minutes = args.day_offset_minutes,
        user_catalog = ?args.user_catalog,
        team_catalog = ?args.team_catalog,
        "Starting achievement engine"
    );

    let gateway = Arc::new(InMemoryGateway::new());
    let engine = Arc::new(
        GamificationEngine::builder(gateway.clone())
            .config(args.engine_config())
            .user_catalog(user_catalog)
            .team_catalog(team_catalog)
            .clock(clock)
            .build(),
    );
    let background = engine.spawn_background_tasks();

    let content = match &args.activity_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading activity file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading activity from stdin")?;
            buf
        }
    };

    let lines = parse_activity_log(&content)?;
    let report = replay(Arc::clone(&engine), lines).await?;

    for handle in background {
        handle.abort();
    }

    let stats = engine.stats();
    let store = gateway.stats();
    info!(
        xp_queued = stats.xp.queued,
        xp_flushes = stats.xp.flushes,
        team_evaluations = stats.team.evaluations,
        team_dropped = stats.team.dedup.dropped,
        team_coalesced = stats.team.batch.coalesced,
        user_writes = store.user_writes,
        workspace_writes = store.workspace_writes,
        "Replay complete"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
