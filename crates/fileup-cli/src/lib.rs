//! Command-line front end for the fileup upload pipeline.

pub mod cli_args;
pub mod console;

use std::fs;

use fileup_core::{
    DirectoryRepository, Fetcher, Interaction, LoggingDestination, ResumePoint, RunReport,
    Unattended, UploadOrchestrator, init_logging, load_config,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::cli_args::Cli;
use crate::console::ConsoleInteraction;

#[derive(Debug, Deserialize)]
struct SavedReport {
    #[serde(default)]
    resumable: Vec<ResumePoint>,
}

/// Runs one upload session described by `cli`.
pub fn dispatch(cli: Cli) -> Result<(), String> {
    let destination = if cli.is_unattended() {
        LoggingDestination::FileAndStderr
    } else {
        LoggingDestination::FileOnly
    };
    if let Err(err) = init_logging(destination) {
        eprintln!("Warning: logging unavailable: {err}");
    }

    let load = load_config();
    for warning in &load.warnings {
        eprintln!("Warning: {warning}");
        warn!(%warning, "Configuration warning");
    }
    let mut config = load.config;
    cli.apply_repository_overrides(&mut config.repository);
    if cli.max_attempts.is_some() {
        config.fetch.max_attempts = cli.max_attempts.filter(|max| *max > 0);
    }

    let resume_points = match cli.resume_from.as_deref() {
        Some(path) => read_resume_points(path)?,
        None => Vec::new(),
    };
    let request = cli
        .to_request(&config, &resume_points)
        .map_err(|err| err.to_string())?;

    let repository = DirectoryRepository::from_preferences(&config.repository).map_err(|err| {
        format!(
            "Could not open repository {}: {err}",
            config.repository.resolved_root().display()
        )
    })?;
    let fetcher = Fetcher::from_preferences(&config.fetch).map_err(|err| err.to_string())?;
    info!(
        repository = %repository.root().display(),
        sources = request.sources().len(),
        "Starting upload run"
    );

    let report = if cli.is_unattended() {
        run(repository, Unattended, fetcher, &request)?
    } else {
        run(repository, ConsoleInteraction::stdio(), fetcher, &request)?
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&report).map_err(|err| err.to_string())?;
        println!("{json}");
    } else {
        print_summary(&report);
    }

    match report.halted {
        Some(reason) => Err(format!("Run halted: {reason}")),
        None if !report.failed.is_empty() => {
            Err(format!("{} upload(s) failed.", report.failed.len()))
        }
        None => Ok(()),
    }
}

fn run<I: Interaction>(
    repository: DirectoryRepository,
    interaction: I,
    fetcher: Fetcher,
    request: &fileup_core::UploadRequest,
) -> Result<RunReport, String> {
    let mut orchestrator = UploadOrchestrator::new(repository, interaction, fetcher);
    orchestrator.run(request).map_err(|err| err.to_string())
}

fn read_resume_points(path: &str) -> Result<Vec<ResumePoint>, String> {
    let raw = fs::read_to_string(path).map_err(|err| format!("Could not read {path}: {err}"))?;
    let saved: SavedReport =
        serde_json::from_str(&raw).map_err(|err| format!("Could not parse {path}: {err}"))?;
    Ok(saved.resumable)
}

fn print_summary(report: &RunReport) {
    eprintln!(
        "{} succeeded, {} skipped, {} failed.",
        report.succeeded.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for outcome in &report.outcomes {
        if let Some(error) = outcome.error.as_ref() {
            eprintln!("  {}: {error}", outcome.source);
        }
    }
    if !report.not_attempted.is_empty() {
        eprintln!("Not attempted: {}", report.not_attempted.join(", "));
    }
    for point in &report.resumable {
        eprintln!(
            "  {} can be resumed from byte {} (rerun with --resume-from and a --json report)",
            point.source, point.state.bytes_transferred
        );
    }
}
