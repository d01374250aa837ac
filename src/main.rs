// ABOUTME: CLI entry point for pg-schema-porter
// ABOUTME: Parses commands, merges flags over the config file, and routes to handlers

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pg_schema_porter::commands;
use pg_schema_porter::config::{EndpointConfig, ImportMode, MigrationConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pg-schema-porter")]
#[command(about = "Copy one PostgreSQL schema, its data, and its functions between databases", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Endpoint and schema selection shared by every subcommand
#[derive(Args, Clone, Default)]
struct ConnectionArgs {
    /// Source connection URL (overrides [source] in the config file)
    #[arg(long)]
    source: Option<String>,
    /// Target connection URL (overrides [target] in the config file)
    #[arg(long)]
    target: Option<String>,
    /// Schema to copy or compare
    #[arg(long)]
    schema: Option<String>,
    /// Path to a TOML config file
    #[arg(long = "config")]
    config_path: Option<PathBuf>,
    /// Leave functions in the public schema alone
    #[arg(long)]
    no_public_functions: bool,
    /// Report functions that exist only on the target instead of dropping them
    #[arg(long)]
    no_repair: bool,
}

impl ConnectionArgs {
    fn load_config(&self) -> anyhow::Result<MigrationConfig> {
        let mut config = match &self.config_path {
            Some(path) => MigrationConfig::load(path)?,
            None => MigrationConfig::default(),
        };

        if let Some(url) = &self.source {
            config.source = EndpointConfig::from_url(url);
        }
        if let Some(url) = &self.target {
            config.target = EndpointConfig::from_url(url);
        }
        if let Some(schema) = &self.schema {
            config.schema = schema.clone();
        }
        if self.no_public_functions {
            config.include_public_functions = false;
        }
        if self.no_repair {
            config.repair_orphan_functions = false;
        }

        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check both databases are reachable and the target can host the schema
    Validate {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Copy a schema's tables, data and functions from source to target
    Migrate {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// Create tables without copying rows
        #[arg(long)]
        no_data: bool,
        /// How to prepare the target schema
        #[arg(long, value_enum)]
        mode: Option<ImportMode>,
        /// Directory for the temporary .csv.gz data files
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Skip the equivalence check after importing
        #[arg(long)]
        no_verify: bool,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Compare table and function sets between source and target
    Verify {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// Also compare per-table row checksums
        #[arg(long)]
        data: bool,
        /// Print the report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set.
    // stdout is reserved for `verify --json`.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { connection } => {
            let config = connection.load_config()?;
            commands::validate(&config).await
        }
        Commands::Migrate {
            connection,
            no_data,
            mode,
            work_dir,
            no_verify,
            yes,
        } => {
            let mut config = connection.load_config()?;
            if no_data {
                config.copy_data = false;
            }
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(work_dir) = work_dir {
                config.work_dir = work_dir;
            }

            let report = commands::migrate(&config, yes, !no_verify).await?;
            if report.equivalence.is_some() && !report.verified_equal() {
                anyhow::bail!("Migration finished but source and target differ");
            }
            Ok(())
        }
        Commands::Verify {
            connection,
            data,
            json,
        } => {
            let config = connection.load_config()?;
            let report = commands::verify(&config, data).await?;

            if json {
                let output =
                    serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
                println!("{}", output);
            }

            if !report.is_equal() {
                anyhow::bail!("Source and target differ");
            }
            tracing::info!("✓ Verification passed");
            Ok(())
        }
    }
}
