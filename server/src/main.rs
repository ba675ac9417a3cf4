//! Cache daemon binary — thin CLI shell over the [`runcache_daemon`] library
//! crate.

use std::path::PathBuf;

use clap::Parser;
use runcache_daemon::config::Config;
use runcache_daemon::daemon;
use tracing::error;

/// Single-writer build cache daemon over a Unix socket.
#[derive(Parser)]
#[command(name = "runcached", version, about, long_about = None)]
struct Cli {
    /// Admin directory: holds the on-disk store, committed runs, and
    /// sentinel files. Created if it doesn't exist.
    admin_dir: PathBuf,

    /// Unix socket path (default: `{admin-dir}/socket`)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Cache size ceiling in bytes (0 means unbounded)
    #[arg(long)]
    max_sz: Option<u64>,

    /// Eviction rate ceiling; see the eviction engine for bucket semantics
    #[arg(long)]
    max_rate: Option<u64>,

    /// Maximum cached runs retained per job
    #[arg(long)]
    max_runs_per_job: Option<u32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("runcache_daemon=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.admin_dir).unwrap_or_else(|e| {
        eprintln!("cannot create admin directory {}: {e}", cli.admin_dir.display());
        std::process::exit(2);
    });

    let config = match Config::resolve(cli.admin_dir, cli.socket, cli.max_sz, cli.max_rate, cli.max_runs_per_job) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("bad configuration: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = daemon::run(config).await {
        error!(error = %e, "daemon exited with an error");
        std::process::exit(1);
    }
}
