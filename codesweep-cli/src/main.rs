//! codesweep - automated code review pipeline CLI
//!
//! Submits one trigger to the pipeline, polls its status, and prints the
//! final report. Exits non-zero when the run fails.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codesweep_core::{Config, PipelineCoordinator, RunState, RunStatus, Trigger};

#[derive(Parser, Debug)]
#[command(name = "codesweep")]
#[command(about = "Automated code review pipeline")]
#[command(version)]
struct Args {
    /// Path to config file (default: ~/.config/codesweep/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Review the files changed by one commit
    Push {
        /// Repository owner (user or organization)
        owner: String,
        /// Repository name
        repo: String,
        /// Commit sha to review
        sha: String,
    },
    /// Review every file in the repository tree
    Snapshot {
        /// Repository owner (user or organization)
        owner: String,
        /// Repository name
        repo: String,
        /// Git ref to walk (default: HEAD)
        #[arg(long = "ref", value_name = "REF")]
        reference: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };
    let _log_guard = codesweep_core::logging::init(&config.logging).ok();

    let coordinator =
        PipelineCoordinator::from_config(&config).context("failed to build pipeline")?;

    let trigger = match &args.command {
        Command::Push { owner, repo, sha } => Trigger::push(owner, repo, sha),
        Command::Snapshot {
            owner,
            repo,
            reference,
        } => Trigger::full_snapshot(owner, repo, reference.as_deref()),
    };

    println!(
        "Submitting {} review of {}",
        trigger.mode.as_str(),
        trigger.repo_slug()
    );
    let run_id = coordinator.submit(trigger);
    println!("Run {}", run_id);

    // Poll until the run settles, echoing state changes
    let mut last_state: Option<RunState> = None;
    loop {
        let Some(status) = coordinator.status(run_id) else {
            anyhow::bail!("run {} disappeared from the ledger", run_id);
        };

        if last_state != Some(status.state) {
            match status.state {
                RunState::Analyzing => println!("  {} ({} files)", status.state, status.total),
                _ => println!("  {}", status.state),
            }
            last_state = Some(status.state);
        }

        if status.state.is_terminal() {
            print_outcome(&status);
            // Returning lets _log_guard drop and flush buffered writes
            return Ok(ExitCode::from(exit_code(status.state)));
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn exit_code(state: RunState) -> u8 {
    match state {
        RunState::Failed => 1,
        _ => 0,
    }
}

fn print_outcome(status: &RunStatus) {
    if let Some(report) = &status.report {
        println!();
        println!("{}", report.summary);
        println!();
        for finding in &report.findings {
            let marker = if finding.is_success() { "ok" } else { "FAILED" };
            println!("## {} [{}]", finding.path, marker);
            println!("{}", finding.verdict);
            println!();
        }
        println!(
            "{} reviewed, {} failed, {} skipped",
            report.stats.analyzed, report.stats.failed, report.stats.skipped
        );
    }

    if let Some(error) = &status.error {
        eprintln!("run failed: {}", error);
    }
}
