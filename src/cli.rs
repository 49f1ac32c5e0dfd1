use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::mirror::config::load_config;
use crate::mirror::paths::resolve_paths;

#[derive(Debug, Parser)]
#[command(
    name = "chat-mirror",
    version,
    about = "Mirror Claude Code chat session logs into Markdown and JSON exports"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Capture session logs: one full cycle by default, or keep watching.
    Watch {
        /// Run a single capture cycle and exit.
        #[arg(long)]
        once: bool,
        /// Keep watching the source tree until stopped.
        #[arg(long)]
        daemon: bool,
    },
    /// Stop a running capture daemon.
    Stop,
    /// Export one session log file without watching.
    Export {
        /// Path to the `.jsonl` session log.
        file: PathBuf,
    },
    /// Rebuild the index for one project's output directory.
    Index {
        /// Project name under the output root.
        project: String,
    },
    /// Show resolved paths and the effective configuration.
    Status,
}

/// With no subcommand the binary honors the `auto_start` flag: start the
/// capture daemon when it is set, otherwise just report status.
fn run_default() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    if cfg.export.auto_start {
        commands::watch::run(&commands::watch::WatchOptions {
            once: false,
            daemon: true,
        })
    } else {
        commands::status::run()
    }
}

fn print_report(report: &CommandReport) -> Result<()> {
    for detail in &report.details {
        println!("{detail}");
    }
    for issue in &report.issues {
        eprintln!("issue: {issue}");
    }
    if report.ok {
        Ok(())
    } else {
        anyhow::bail!("{} completed with issues", report.command)
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Some(CliCommand::Watch { once, daemon }) => {
            commands::watch::run(&commands::watch::WatchOptions { once, daemon })?
        }
        Some(CliCommand::Stop) => commands::stop::run()?,
        Some(CliCommand::Export { file }) => {
            commands::export::run(&commands::export::ExportOptions { file })?
        }
        Some(CliCommand::Index { project }) => {
            commands::index::run(&commands::index::IndexOptions { project })?
        }
        Some(CliCommand::Status) => commands::status::run()?,
        None => run_default()?,
    };

    print_report(&report)
}
