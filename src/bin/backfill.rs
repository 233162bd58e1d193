//! Operational membership backfill script.
//!
//! Loads every user and owner profile from the store, plans the backfill, and
//! prints the plan. Dry-run by default: nothing is written unless `--apply`
//! is passed and no conflicts were found. Exits 1 whenever conflicts are
//! present, in both modes. The plan goes to stdout; logs go to stderr.
//!
//! Usage:
//!   cargo run --bin backfill             # dry run, human-readable
//!   cargo run --bin backfill -- --json   # dry run, machine-readable
//!   cargo run --bin backfill -- --apply  # perform the writes

use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cabinshare::backfill::{describe_operation, plan_membership_backfill};
use cabinshare::storage::Storage;

#[derive(Parser)]
#[command(name = "backfill")]
#[command(about = "Reconcile owner profiles with user accounts", long_about = None)]
struct Cli {
    /// Perform the planned writes. Default is a dry run.
    #[arg(long)]
    apply: bool,

    /// Print the plan without writing anything (the default).
    #[arg(long, conflicts_with = "apply")]
    dry_run: bool,

    /// Emit the combined plan (summary, operations, conflicts) as JSON.
    #[arg(long)]
    json: bool,

    /// Store location.
    #[arg(long, default_value = "cabinshare_data", env = "CABINSHARE_DB_PATH")]
    db_path: String,
}

fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let apply = cli.apply && !cli.dry_run;

    // Plan output owns stdout; logs go to stderr without blocking it.
    let (stderr_writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(stderr_writer)
        .init();

    let storage = Storage::open(&cli.db_path)
        .with_context(|| format!("opening store at {}", cli.db_path))?;
    let (owner_profiles, users) = storage.load_snapshot().context("loading snapshot")?;
    tracing::info!(
        profiles = owner_profiles.len(),
        users = users.len(),
        "loaded backfill snapshot"
    );

    let plan = plan_membership_backfill(&owner_profiles, &users);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        for operation in &plan.operations {
            println!("{}", describe_operation(operation));
        }
        for conflict in &plan.conflicts {
            println!(
                "CONFLICT {} ({}): {}",
                conflict.owner_profile_id, conflict.email, conflict.reason
            );
        }
        println!(
            "{} operations, {} conflicts ({} profiles linked, {} memberships, {} invites claimed)",
            plan.operations.len(),
            plan.conflicts.len(),
            plan.linked_profiles,
            plan.memberships_created,
            plan.invites_claimed
        );
    }

    if !plan.conflicts.is_empty() {
        tracing::warn!(
            conflicts = plan.conflicts.len(),
            "conflicts present, nothing will be applied until they are resolved"
        );
        return Ok(ExitCode::from(1));
    }

    if apply {
        storage
            .apply_backfill(&plan.operations, Utc::now())
            .context("applying backfill operations")?;
        storage.flush().context("flushing store")?;
        tracing::info!(operations = plan.operations.len(), "backfill applied");
    } else {
        tracing::info!("dry run, nothing written");
    }

    Ok(ExitCode::SUCCESS)
}
