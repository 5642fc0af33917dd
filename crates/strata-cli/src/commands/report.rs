//! Rendering of build reports for the terminal

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use strata_build::{BuildReport, BuildStatus, ProjectOutcome};

/// Print `report` as JSON or as a human-readable summary
pub fn print(report: &BuildReport, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(report).context("Failed to serialize build report")?;
        println!("{}", rendered);
    } else {
        print_human(report);
    }
    Ok(())
}

pub fn print_human(report: &BuildReport) {
    for outcome in &report.outcomes {
        println!("{}", outcome_line(outcome));
        for diagnostic in &outcome.diagnostics {
            eprintln!("    {}", diagnostic);
        }
    }
    println!("{}", summary_line(report));
}

fn outcome_line(outcome: &ProjectOutcome) -> String {
    let detail = match &outcome.status {
        BuildStatus::NeedsBuild { reason } => format!(" ({})", reason),
        BuildStatus::Failed { reason } => format!(" ({})", reason),
        BuildStatus::Blocked { by } => format!(" (by {})", by.display()),
        _ => String::new(),
    };
    format!(
        "{:>28}  {}{}",
        colorize(&outcome.status),
        outcome.name,
        detail
    )
}

fn colorize(status: &BuildStatus) -> ColoredString {
    let label = status.label();
    match status {
        BuildStatus::Succeeded | BuildStatus::SucceededSurfaceChanged => label.green(),
        BuildStatus::UpToDate => label.dimmed(),
        BuildStatus::NeedsBuild { .. } => label.cyan(),
        BuildStatus::Failed { .. } => label.red().bold(),
        BuildStatus::Blocked { .. } => label.yellow(),
        BuildStatus::Unbuilt | BuildStatus::Building => label.normal(),
    }
}

fn summary_line(report: &BuildReport) -> String {
    let stats = &report.stats;
    let text = format!(
        "{} project(s): {} built, {} up to date, {} failed, {} blocked, {} skipped in {:.2}s",
        stats.total,
        stats.built,
        stats.up_to_date,
        stats.failed,
        stats.blocked,
        stats.skipped,
        stats.elapsed.as_secs_f64()
    );
    if report.has_failures() {
        text.red().to_string()
    } else {
        text.green().to_string()
    }
}
