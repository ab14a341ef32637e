//! tided — the tidegrid daemon.
//!
//! Runs one policy handler per policy declared in a TOML policy file and
//! logs every evaluation the handlers emit.
//!
//! # Usage
//!
//! ```text
//! tided run --policies /etc/tidegrid/policies.toml --reconcile-interval 30
//! tided validate --policies /etc/tidegrid/policies.toml
//! ```

mod daemon;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tide_core::PolicyFile;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,tided=debug,tidegrid=debug";

#[derive(Parser)]
#[command(name = "tided", about = "tidegrid policy daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a policy handler for every policy in the file.
    Run {
        /// Policy file to load.
        #[arg(long)]
        policies: PathBuf,

        /// How often each handler re-reads its policy, in seconds.
        #[arg(long, default_value = "10")]
        poll_interval: u64,

        /// How often the set of handlers is synced with the file, in seconds.
        #[arg(long, default_value = "30")]
        reconcile_interval: u64,

        /// Evaluations buffered before handlers block.
        #[arg(long, default_value = "64")]
        eval_buffer: usize,
    },
    /// Parse and validate a policy file, printing the policies as JSON.
    Validate {
        /// Policy file to check.
        #[arg(long)]
        policies: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            policies,
            poll_interval,
            reconcile_interval,
            eval_buffer,
        } => {
            daemon::run(daemon::DaemonConfig {
                policies,
                poll_interval: Duration::from_secs(poll_interval),
                reconcile_interval: Duration::from_secs(reconcile_interval),
                eval_buffer,
            })
            .await
        }
        Command::Validate { policies } => validate(&policies),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let file = PolicyFile::from_file(path)?;
    println!("{}", serde_json::to_string_pretty(&file.policies)?);
    Ok(())
}
