//! # Link Harness CLI (`lnk`)
//!
//! ## Usage
//!
//! ```bash
//! lnk --config ./config/lnk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lnk process <PATHS>...` | Repair and retarget hyperlinks in every document |
//! | `lnk scan <PATHS>...` | List hyperlinks and lookup identifiers (read-only) |
//! | `lnk validate <PATHS>...` | Run the integrity guard (read-only) |
//!
//! Logging is controlled with `LNK_LOG` (an `EnvFilter` directive,
//! default `link_harness=info`) and always goes to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use link_harness::commands::{self, ProcessArgs};
use link_harness::config::{self, Config};
use link_harness::progress::ProgressMode;

/// Link Harness: batch hyperlink repair for word-processing packages.
#[derive(Parser)]
#[command(
    name = "lnk",
    about = "Link Harness: batch hyperlink repair for .docx packages",
    version,
    long_about = "Link Harness opens each document once, prunes invisible hyperlinks, resolves \
    lookup identifiers against the metadata service, retargets and annotates links, validates \
    the package at every stage, and saves or rolls back the result."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lnk.toml`. `validate` falls back to built-in
    /// defaults when the file is missing; `scan` does not read it.
    #[arg(long, global = true, default_value = "./config/lnk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process documents: prune, resolve, mutate, replace, save, verify.
    Process {
        /// Files or directories. Directories are searched recursively.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Include glob for directory inputs (repeatable, default `**/*.docx`).
        #[arg(long)]
        include: Vec<String>,

        /// Exclude glob for directory inputs (repeatable).
        #[arg(long)]
        exclude: Vec<String>,

        /// Progress output on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Write one changelog report per changed document into this directory.
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Do not back up documents before editing them.
        #[arg(long)]
        no_backup: bool,
    },

    /// List hyperlinks with their complete URLs and lookup identifiers.
    Scan {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Validate documents and print remaining and ignored errors.
    Validate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LNK_LOG")
        .unwrap_or_else(|_| EnvFilter::new("link_harness=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Scan { paths } => commands::run_scan(&paths),
        Commands::Validate { paths } => {
            let cfg = if cli.config.exists() {
                config::load_config(&cli.config)?
            } else {
                Config::minimal()
            };
            commands::run_validate(&cfg, &paths)
        }
        Commands::Process {
            paths,
            include,
            exclude,
            progress,
            report_dir,
            no_backup,
        } => {
            let cfg = config::load_config(&cli.config)?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling");
                    on_signal.cancel();
                }
            });
            let args = ProcessArgs {
                inputs: paths,
                include,
                exclude,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
                report_dir,
                no_backup,
            };
            commands::run_process(&cfg, args, &cancel).await
        }
    }
}
