//! cdapi - Command-line tool for BMW ConnectedDrive
//!
//! Reads vehicle data or runs a remote service, once, and exits.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use cdapi_client::{ConnectedDriveClient, RemoteService, ResourceKind};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{ArgOverrides, Config};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "cdapi")]
#[command(author, version, about = "BMW ConnectedDrive vehicle data CLI")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CDAPI_CONFIG")]
    config: Option<PathBuf>,

    /// Account user name
    #[arg(short, long, env = "CDAPI_USERNAME")]
    username: Option<String>,

    /// Account password
    #[arg(long, env = "CDAPI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Vehicle identification number
    #[arg(long, env = "CDAPI_VIN")]
    vin: Option<String>,

    /// Regional ConnectedDrive domain
    #[arg(short, long, env = "CDAPI_DOMAIN")]
    domain: Option<String>,

    /// Display name for the car
    #[arg(long)]
    name: Option<String>,

    /// Print all values that were received
    #[arg(short, long)]
    printall: bool,

    /// Execute a service: climate, lock, unlock, light, horn
    #[arg(short, long, value_name = "SERVICE", conflicts_with = "resource")]
    execservice: Option<String>,

    /// Resources to fetch (default: status, vehicles)
    #[arg(short, long, value_name = "KIND", num_args = 1.., value_delimiter = ',')]
    resource: Vec<ResourceKind>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(ArgOverrides {
        username: cli.username,
        password: cli.password,
        vin: cli.vin,
        domain: cli.domain,
        name: cli.name,
        output: cli.output.map(|o| o.as_str().to_string()),
        no_color: cli.no_color,
    });

    let format = OutputFormat::from_str(&merged.output, true)
        .map_err(|e| anyhow::anyhow!("Invalid output format in config: {}", e))?;
    let ctx = OutputContext::new(format, merged.no_color, cli.quiet);

    // Reject unknown services before logging in
    let service = cli
        .execservice
        .as_deref()
        .map(str::parse::<RemoteService>)
        .transpose()?;

    let client = ConnectedDriveClient::connect(merged.to_client_config()?)
        .await
        .context("Failed to log in to ConnectedDrive")?;

    if cli.printall {
        let vehicle = client.vehicle();
        let expires = client
            .session_expires_at()
            .await
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        ctx.print_kv(&[
            ("Vehicle", vehicle.label().to_string()),
            ("VIN", vehicle.vin.clone()),
            ("UTC offset", client.utc_offset_minutes().to_string()),
            ("Token expires", expires),
        ]);
    }

    // Data queries and services are never combined in one run
    if let Some(service) = service {
        let outcome = commands::execute(&client, service, &ctx).await?;
        return Ok(commands::execute::exit_code(&outcome));
    }

    let kinds = if cli.resource.is_empty() {
        commands::fetch::DEFAULT_RESOURCES.to_vec()
    } else {
        cli.resource
    };

    let failures = commands::fetch(&client, &kinds, cli.printall, &ctx).await;
    if failures > 0 {
        ctx.warn(&format!("{} of {} resources failed", failures, kinds.len()));
        return Ok(1);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resource_list_parses() {
        let cli = Cli::try_parse_from(["cdapi", "-r", "status,navigation", "-r", "dealer"]).unwrap();
        assert_eq!(
            cli.resource,
            vec![
                ResourceKind::DynamicStatus,
                ResourceKind::Navigation,
                ResourceKind::ServicePartner
            ]
        );
    }

    #[test]
    fn test_unknown_resource_rejected() {
        assert!(Cli::try_parse_from(["cdapi", "-r", "weather"]).is_err());
    }

    #[test]
    fn test_execservice_conflicts_with_resource() {
        assert!(Cli::try_parse_from(["cdapi", "-e", "lock", "-r", "status"]).is_err());
        assert!(Cli::try_parse_from(["cdapi", "-e", "lock", "-p"]).is_ok());
    }
}
