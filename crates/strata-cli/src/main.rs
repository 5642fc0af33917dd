use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Strata incremental build orchestrator.
///
/// Builds graphs of Strata projects linked by project references, rebuilding
/// only what changed and skipping dependents whose inputs kept the same
/// public surface.
///
/// EXAMPLES:
///     strata build                 Build the project in the current directory
///     strata build app lib         Build several projects and their references
///     strata build --dry-run       Show what would be rebuilt and why
///     strata clean app             Delete outputs and build info
///     strata watch app             Rebuild on every change
///
/// ENVIRONMENT VARIABLES:
///     STRATA_LOG          Log filter (e.g. 'debug', 'strata_build=trace')
///     STRATA_JSON         Set to '1' for JSON reports by default
///     STRATA_FAIL_FAST    Stop after the first failed project
///     STRATA_DEBOUNCE_MS  Watch-mode debounce delay
#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Log progress to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build projects and everything they reference
    ///
    /// Each path is a project directory or a strata.json file.
    ///
    /// EXAMPLES:
    ///     strata build                  Build ./strata.json
    ///     strata build app --force      Rebuild everything
    ///     strata build app --json       Print the report as JSON
    #[command(visible_alias = "b")]
    Build {
        /// Project directories or config files
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
        /// Rebuild every project regardless of build info
        #[arg(long, short = 'f')]
        force: bool,
        /// Stop after the first failed project
        #[arg(long)]
        fail_fast: bool,
        /// Report what would be built without building
        #[arg(long)]
        dry_run: bool,
        /// Print the report as JSON
        #[arg(long, env = "STRATA_JSON")]
        json: bool,
    },

    /// Delete build outputs and build info
    ///
    /// Never invokes the compiler.
    ///
    /// EXAMPLES:
    ///     strata clean                  Clean ./strata.json and its references
    Clean {
        /// Project directories or config files
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
    },

    /// Watch projects and rebuild on change
    ///
    /// EXAMPLES:
    ///     strata watch app                    Watch with the default debounce
    ///     strata watch app --debounce-ms 50   React faster to edits
    #[command(visible_alias = "w")]
    Watch {
        /// Project directories or config files
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
        /// Quiet period after the last change before rebuilding
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Commands::Build {
            paths,
            force,
            fail_fast,
            dry_run,
            json,
        } => commands::build::run(commands::build::BuildArgs {
            paths,
            force,
            fail_fast,
            dry_run,
            json,
        })?,
        Commands::Clean { paths } => commands::clean::run(&paths)?,
        Commands::Watch { paths, debounce_ms } => {
            commands::watch::run(commands::watch::WatchArgs { paths, debounce_ms })?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Install the stderr subscriber; `STRATA_LOG` overrides the default level
fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_defaults_to_current_directory() {
        let cli = Cli::parse_from(["strata", "build"]);
        match cli.command {
            Commands::Build { paths, force, .. } => {
                assert_eq!(paths, vec![PathBuf::from(".")]);
                assert!(!force);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_build_flags() {
        let cli = Cli::parse_from([
            "strata",
            "build",
            "app",
            "lib",
            "--force",
            "--fail-fast",
            "--dry-run",
            "-v",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Build {
                paths,
                force,
                fail_fast,
                dry_run,
                ..
            } => {
                assert_eq!(paths, vec![PathBuf::from("app"), PathBuf::from("lib")]);
                assert!(force && fail_fast && dry_run);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_alias_b_for_build() {
        let cli = Cli::parse_from(["strata", "b"]);
        assert!(matches!(cli.command, Commands::Build { .. }));
    }

    #[test]
    fn test_watch_debounce() {
        let cli = Cli::parse_from(["strata", "w", "app", "--debounce-ms", "40"]);
        match cli.command {
            Commands::Watch { debounce_ms, .. } => assert_eq!(debounce_ms, Some(40)),
            _ => panic!("Expected Watch command"),
        }
    }
}
