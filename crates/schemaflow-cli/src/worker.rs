//! Background drain loop.

use schemaflow_core::SchemaEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Drain every tenant with pending migrations each `interval` until Ctrl+C.
pub async fn run(
    engine: Arc<SchemaEngine>,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(interval_ms = interval.as_millis() as u64, "Migration worker started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let engine = engine.clone();
                let drain =
                    tokio::task::spawn_blocking(move || engine.run_all_pending_migrations());
                match drain.await {
                    Ok(Ok(results)) => {
                        for (tenant, result) in results {
                            match result {
                                Ok(report) if !report.is_empty() => info!(
                                    tenant = %tenant,
                                    applied = report.applied.len(),
                                    duration_ms = report.duration.as_millis() as u64,
                                    "Tenant drained"
                                ),
                                Ok(_) => {}
                                Err(e) => {
                                    warn!(tenant = %tenant, error = %e, "Tenant drain failed")
                                }
                            }
                        }
                    }
                    Ok(Err(e)) => error!(error = %e, "Failed to list pending tenants"),
                    Err(e) => error!(error = %e, "Drain task panicked"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for ctrl+c");
                }
                info!("Migration worker stopping");
                break;
            }
        }
    }

    engine.flush()?;
    Ok(())
}
