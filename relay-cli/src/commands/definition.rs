//! Definition key command handler

use anyhow::Result;
use clap::Args;
use colored::*;
use relay_core::DefinitionKey;
use relay_dispatcher::build_backend;
use std::collections::BTreeMap;

use super::parse_param;
use crate::config::Config;

#[derive(Args)]
pub struct DefinitionKeyArgs {
    /// Tool identifier
    pub tool: String,

    /// Tool version
    pub tool_version: String,

    /// Destination parameter, repeatable (e.g., --param vcpu=2)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

/// Prints the key and remote definition name the batch backend would use
///
/// Parameters are resolved against the configured backend's schema, so
/// defaults take part in the key exactly as they do at submission.
pub fn handle_definition_key_command(args: DefinitionKeyArgs, config: &Config) -> Result<()> {
    let config = config.dispatcher_config()?;
    let backend = build_backend(&config);

    let raw: BTreeMap<String, String> = args.params.into_iter().collect();
    let params = backend.destination_schema().resolve(&raw)?;
    let key = DefinitionKey::derive(&args.tool, &args.tool_version, &params);

    println!("{}", "Job definition:".bold());
    println!("  Backend: {}", backend.name());
    println!("  Tool:    {} {}", args.tool.cyan(), args.tool_version);
    println!("  Digest:  {}", key.digest().dimmed());
    println!("  Name:    {}", key.definition_name().green());

    if !params.is_empty() {
        println!("\n{}", "Parameters:".bold());
        for (name, value) in params.iter() {
            println!("  {} = {}", name.cyan(), serde_json::to_string(value)?);
        }
    }

    Ok(())
}
