//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod definition;
mod recover;
mod run;

pub use definition::DefinitionKeyArgs;
pub use recover::RecoverArgs;
pub use run::RunArgs;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use relay_core::{JobOutcome, JobPhase};

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run one command on a backend and wait for it to finish
    Run(RunArgs),
    /// Reattach in-flight jobs listed in a snapshot file
    Recover(RecoverArgs),
    /// Print the job definition key for a tool and destination
    DefinitionKey(DefinitionKeyArgs),
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run(args) => run::handle_run_command(args, config).await,
        Commands::Recover(args) => recover::handle_recover_command(args, config).await,
        Commands::DefinitionKey(args) => definition::handle_definition_key_command(args, config),
    }
}

/// Parses a `key=value` destination parameter
pub fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Colorize a job phase for display
pub fn colorize_phase(phase: JobPhase) -> ColoredString {
    let phase_str = phase.to_string();
    match phase {
        JobPhase::New | JobPhase::Queued => phase_str.yellow(),
        JobPhase::Running => phase_str.cyan(),
        JobPhase::Ok => phase_str.green(),
        JobPhase::Error => phase_str.red(),
        JobPhase::Deleted | JobPhase::Stopped => phase_str.dimmed(),
    }
}

/// Print the outcome reported for a job
pub fn print_outcome(outcome: &JobOutcome) {
    println!(
        "  {} Job {} {}",
        "▸".cyan(),
        outcome.job_id.to_string().bold(),
        colorize_phase(outcome.phase)
    );
    if let Some(code) = outcome.exit_code {
        println!("    Exit code: {}", code);
    }
    if let Some(message) = &outcome.fail_message {
        println!("    Reason:    {}", message.red());
    }
    println!("    Stdout:    {}", outcome.output_file.display().to_string().dimmed());
    println!("    Stderr:    {}", outcome.error_file.display().to_string().dimmed());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("memory=4G").unwrap(),
            ("memory".to_string(), "4G".to_string())
        );
        assert_eq!(
            parse_param(" queue = short ").unwrap(),
            ("queue".to_string(), "short".to_string())
        );
        assert!(parse_param("memory").is_err());
        assert!(parse_param("=4G").is_err());
    }
}
