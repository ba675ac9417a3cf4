//! Offline repair and consistency-check tool.
//!
//! Exposed as two subcommands (`repair`, `chk`) rather than the single
//! bare `repair <cache-dir>` invocation of the daemon it services,
//! because a consistency-only check and a destructive rebuild are
//! different enough operations to deserve different command names; both
//! still honor the same sentinel-gated, single-writer discipline as the
//! daemon.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use runcache_cli::{chk, repair};
use runcache_core::{CacheStore, StoreConfig};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "runcache-repair", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the on-disk index from the untrusted run-directory tree.
    Repair {
        /// Admin directory holding the store, committed runs, and sentinels.
        admin_dir: PathBuf,

        /// Print the deletion/replay plan and stop without touching anything.
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,

        /// Proceed even if the server marker is present (the operator
        /// vouches the daemon is actually dead, e.g. after a hard crash).
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
    /// Walk the store read-only and report any invariant violation.
    Chk {
        /// Admin directory holding the store.
        admin_dir: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("runcache_cli=info".parse().unwrap()),
        )
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Repair { admin_dir, dry_run, force } => run_repair(&admin_dir, dry_run, force),
        Command::Chk { admin_dir } => run_chk(&admin_dir),
    }
}

fn run_repair(admin_dir: &PathBuf, dry_run: bool, force: bool) -> ExitCode {
    if dry_run {
        let plan = match repair::build_plan(admin_dir) {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "failed to build repair plan");
                return ExitCode::from(6);
            }
        };
        println!("{}", plan.describe());
        if plan.is_empty() {
            info!("nothing to do");
        }
        return ExitCode::SUCCESS;
    }

    match repair::run(admin_dir, force) {
        Ok(outcome) => {
            info!(deleted = outcome.deleted, replayed = outcome.replayed, "repair complete");
            ExitCode::SUCCESS
        }
        Err(repair::RepairError::ServerRunning(marker)) => {
            error!(marker = %marker.display(), "a server is running; pass --force to override");
            ExitCode::from(5)
        }
        Err(e) => {
            error!(error = %e, "repair failed");
            ExitCode::from(6)
        }
    }
}

fn run_chk(admin_dir: &PathBuf) -> ExitCode {
    let config = match StoreConfig::load_or_default(admin_dir) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "cannot load config");
            return ExitCode::from(6);
        }
    };
    let store = match CacheStore::open(admin_dir, config, false) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot open store");
            return ExitCode::from(6);
        }
    };

    let report = chk::check(&store);
    if report.ok() {
        info!("store is consistent");
        ExitCode::SUCCESS
    } else {
        for problem in &report.problems {
            eprintln!("{problem}");
        }
        error!(problems = report.problems.len(), "store is inconsistent");
        ExitCode::from(5)
    }
}
