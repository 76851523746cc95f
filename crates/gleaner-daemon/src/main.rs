use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use gleaner_core::GleanerConfig;
use gleaner_scheduler::{NewSchedule, Orchestrator, ScheduleKind, SchedulePatch};
use serde::Serialize;
use tracing::{info, warn};

mod app;

#[derive(Parser)]
#[command(name = "gleaner", version)]
#[command(about = "Turns web pages into FAQ artifacts on a schedule")]
struct Cli {
    /// Config file (default: ~/.gleaner/gleaner.toml)
    #[arg(long, global = true, env = "GLEANER_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm every active schedule and run until interrupted
    Serve,

    /// Create a schedule
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        /// daily, weekly, monthly or custom
        #[arg(long, value_parser = parse_kind)]
        kind: ScheduleKind,
        /// Cron expression, required for --kind custom
        #[arg(long)]
        cron: Option<String>,
        /// Anchor time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long, default_value = "local")]
        owner: String,
        /// Store the schedule without arming it
        #[arg(long)]
        inactive: bool,
    },

    /// List schedules of one owner
    List {
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Edit a schedule
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_parser = parse_kind)]
        kind: Option<ScheduleKind>,
        #[arg(long)]
        cron: Option<String>,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Activate an inactive schedule or deactivate an active one
    Toggle { id: String },

    /// Delete a schedule
    Remove { id: String },

    /// Run a schedule's pipeline once, now
    Run { id: String },

    /// Show run history, newest first
    History {
        /// Only runs of this schedule
        id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn parse_kind(s: &str) -> Result<ScheduleKind, String> {
    s.parse::<ScheduleKind>().map_err(|e| e.to_string())
}

fn patch_from_args(
    name: Option<String>,
    url: Option<String>,
    kind: Option<ScheduleKind>,
    cron: Option<String>,
    at: Option<DateTime<Utc>>,
) -> SchedulePatch {
    SchedulePatch {
        name,
        target_url: url,
        schedule_kind: kind,
        custom_expression: cron.map(Some),
        anchor_time: at,
        is_active: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gleaner_daemon=info,gleaner_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit path > GLEANER_CONFIG env > ~/.gleaner/gleaner.toml
    let config = GleanerConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        GleanerConfig::default()
    });
    let orchestrator = app::build_orchestrator(&config)?;

    match cli.command {
        Commands::Serve => serve(&orchestrator, &config).await?,
        Commands::Add {
            name,
            url,
            kind,
            cron,
            at,
            owner,
            inactive,
        } => {
            let record = orchestrator.create_schedule(NewSchedule {
                owner_id: owner,
                name,
                target_url: url,
                schedule_kind: kind,
                custom_expression: cron,
                anchor_time: at.unwrap_or_else(Utc::now),
                is_active: !inactive,
            })?;
            let trigger = orchestrator.trigger_info(&record.id);
            print_json(&serde_json::json!({ "schedule": record, "trigger": trigger }))?;
        }
        Commands::List { owner } => print_json(&orchestrator.list(&owner)?)?,
        Commands::Update {
            id,
            name,
            url,
            kind,
            cron,
            at,
        } => {
            let patch = patch_from_args(name, url, kind, cron, at);
            if patch.is_empty() {
                anyhow::bail!("nothing to update");
            }
            print_json(&orchestrator.update_schedule(&id, patch)?)?;
        }
        Commands::Toggle { id } => print_json(&orchestrator.toggle_schedule(&id)?)?,
        Commands::Remove { id } => {
            if !orchestrator.delete_schedule(&id)? {
                anyhow::bail!("schedule not found: {id}");
            }
        }
        Commands::Run { id } => print_json(&orchestrator.run_now_by_id(&id).await?)?,
        Commands::History { id, limit } => {
            let runs = match id {
                Some(id) => {
                    let mut runs = orchestrator.history(&id)?;
                    runs.truncate(limit);
                    runs
                }
                None => orchestrator.recent_runs(limit)?,
            };
            print_json(&runs)?;
        }
    }

    orchestrator.shutdown();
    Ok(())
}

async fn serve(orchestrator: &Orchestrator, config: &GleanerConfig) -> anyhow::Result<()> {
    let summary = orchestrator.initialize()?;
    info!(
        armed = summary.armed,
        rejected = summary.failed.len(),
        "gleaner scheduler running"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sync_secs = config.scheduler.sync_interval_secs;
    if sync_secs > 0 {
        let registry = std::sync::Arc::clone(orchestrator.registry());
        tokio::spawn(registry.sync_loop(Duration::from_secs(sync_secs), shutdown_rx));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_parses_kind_and_anchor() {
        let cli = Cli::try_parse_from([
            "gleaner",
            "add",
            "--name",
            "Docs FAQ",
            "--url",
            "https://example.com",
            "--kind",
            "weekly",
            "--at",
            "2026-10-19T09:05:00Z",
        ])
        .unwrap();
        match cli.command {
            Commands::Add { kind, at, owner, .. } => {
                assert_eq!(kind, ScheduleKind::Weekly);
                assert_eq!(at.unwrap().to_rfc3339(), "2026-10-19T09:05:00+00:00");
                assert_eq!(owner, "local");
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected_by_parser() {
        let result = Cli::try_parse_from([
            "gleaner", "add", "--name", "x", "--url", "https://x", "--kind", "hourly",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn update_flags_become_patch() {
        let patch = patch_from_args(
            None,
            None,
            Some(ScheduleKind::Custom),
            Some("*/5 * * * *".into()),
            None,
        );
        assert_eq!(patch.custom_expression, Some(Some("*/5 * * * *".to_string())));
        assert!(patch.touches_trigger());
        assert!(patch_from_args(None, None, None, None, None).is_empty());
    }
}
