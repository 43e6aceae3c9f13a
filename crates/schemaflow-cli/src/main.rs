//! SchemaFlow Command-Line Interface
//!
//! Manages tenant objects and fields and applies the resulting schema
//! migrations to per-tenant workspaces.

mod commands;
mod config;
mod formatter;
mod worker;

use clap::Parser;
use config::{Args, Command};
use schemaflow_core::{SchemaEngine, TenantId};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schemaflow=info,schemaflow_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let format = args.format;
    let tenant = args.tenant;
    let command = args.command;
    let config = args.engine.into_config();

    tracing::debug!(
        data_path = %config.data_path.display(),
        workspace_path = ?config.workspace_path,
        "Configuration loaded"
    );

    let engine = Arc::new(SchemaEngine::open(config)?);

    if let Command::Worker { interval_ms } = command {
        return worker::run(engine, Duration::from_millis(interval_ms)).await;
    }

    let tenant = TenantId::new(tenant)?;
    let formatter = formatter::create_formatter(format);
    let output = tokio::task::spawn_blocking(move || {
        let output = commands::execute(&engine, &tenant, command, &*formatter);
        engine.flush()?;
        output
    })
    .await??;

    println!("{}", output);
    Ok(())
}
