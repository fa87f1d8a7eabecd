//! cfwatch: contest activity tracker.
//!
//! `run` starts the cron jobs and blocks until Ctrl-C; the other subcommands
//! perform one operation and print the result as JSON. `schedule set` only
//! persists, and a running daemon picks the change up on its next reload.

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use cfwatch_core::config::{load_dotenv, Config};
use cfwatch_core::{Frequency, NewEntity};
use cfwatch_worker::Tracker;

// ── CLI ─────────────────────────────────────────────────────────────

/// Track contest activity, sync ratings, and remind inactive participants.
#[derive(Parser, Debug)]
#[command(name = "cfwatch", version, about)]
struct Cli {
    /// Config profile; keys are read as {PROFILE}_{KEY} before {KEY}.
    #[arg(long, env = "CFWATCH_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the scheduler and run until interrupted.
    Run,
    /// Sync one entity, or every entity when no id is given.
    Sync {
        #[arg(long)]
        entity: Option<Uuid>,
        /// Take the sync lease even if another sync holds it.
        #[arg(long)]
        force: bool,
    },
    /// Show or change the sync schedule.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// List tracked entities.
    List {
        /// Only entities currently marked inactive.
        #[arg(long)]
        inactive: bool,
    },
    /// Register a new entity.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        handle: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        no_reminders: bool,
    },
    /// Change the provider handle an entity is tracked under and resync it.
    Handle {
        entity: Uuid,
        handle: String,
    },
    /// Enable or disable reminders for an entity.
    Reminders {
        entity: Uuid,
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Send a test reminder to an entity.
    TestReminder { entity: Uuid },
    /// Recent reminders for an entity, newest first.
    History {
        entity: Uuid,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Inactivity and reminder counters.
    Stats,
    /// Check that the SMTP server is reachable.
    VerifyMail,
    /// Print the effective configuration with secrets removed.
    Config,
}

#[derive(Subcommand, Debug)]
enum ScheduleAction {
    Show,
    Set {
        #[arg(long, env = "SYNC_CRON")]
        cron: String,
        #[arg(long, default_value = "daily")]
        frequency: Frequency,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.profile {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    config.log_summary();

    // No store connection needed just to print settings.
    if let Command::Config = cli.command {
        return print_json(&config.redacted_summary());
    }

    let tracker = Tracker::from_config(&config).await?;

    match cli.command {
        Command::Run => {
            let schedule = tracker.start().await?;
            info!(cron = %schedule.cron_expression, enabled = schedule.enabled, "cfwatch running");
            tokio::signal::ctrl_c().await?;
            info!("shutdown requested");
        }
        Command::Sync { entity: Some(id), force } => {
            print_json(&tracker.trigger_sync(id, force).await?)?;
        }
        Command::Sync { entity: None, .. } => {
            print_json(&tracker.trigger_global_sync().await?)?;
        }
        Command::Schedule { action: ScheduleAction::Show } => {
            print_json(&tracker.get_schedule().await?)?;
        }
        Command::Schedule {
            action: ScheduleAction::Set { cron, frequency, enabled },
        } => {
            print_json(&tracker.set_schedule(&cron, frequency, enabled).await?)?;
        }
        Command::List { inactive: false } => {
            print_json(&tracker.list_entities().await?)?;
        }
        Command::List { inactive: true } => {
            print_json(&tracker.inactive_entities().await?)?;
        }
        Command::Register { name, handle, email, no_reminders } => {
            let mut new = NewEntity::new(name, handle);
            new.email = email;
            new.reminders_enabled = !no_reminders;
            print_json(&tracker.register_entity(new).await?)?;
        }
        Command::Handle { entity, handle } => {
            print_json(&tracker.update_handle(entity, &handle).await?)?;
        }
        Command::Reminders { entity, enabled } => {
            print_json(&tracker.toggle_reminders(entity, enabled).await?)?;
        }
        Command::TestReminder { entity } => {
            print_json(&tracker.send_test_reminder(entity).await?)?;
        }
        Command::History { entity, limit } => {
            print_json(&tracker.reminder_history(entity, limit).await?)?;
        }
        Command::Stats => {
            print_json(&tracker.get_inactivity_stats().await?)?;
        }
        Command::VerifyMail => {
            tracker.verify_mailer().await?;
            println!("mail transport OK");
        }
        Command::Config => print_json(&config.redacted_summary())?,
    }

    // Lets a registration or handle change finish its initial sync.
    tracker.shutdown().await;
    Ok(())
}
