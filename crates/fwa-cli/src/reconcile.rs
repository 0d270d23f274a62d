//! # Reconcile Subcommand
//!
//! Repairs images whose upload never completed. See
//! [`DurableStore::reconcile`](fwa_store::DurableStore::reconcile).

use std::time::Duration;

use anyhow::{ensure, Result};
use clap::Args;

use crate::context::Services;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Only rows added longer ago than this (e.g. `90m`). Defaults to
    /// `store.reconcile_grace`. Must exceed `store.retry_budget`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub older_than: Option<Duration>,
}

/// Execute `fwa reconcile`. Exits with 1 if some rows could not be repaired.
pub async fn run_reconcile(args: &ReconcileArgs, services: &Services) -> Result<u8> {
    let grace = args
        .older_than
        .unwrap_or(services.config.store.reconcile_grace);
    let budget = services.config.store.retry_budget;
    ensure!(
        grace > budget,
        "--older-than {} must exceed the store retry budget {}",
        humantime::format_duration(grace),
        humantime::format_duration(budget)
    );
    let summary = services.store.reconcile(grace).await?;
    println!(
        "OK: stamped={} removed={} failed={}",
        summary.stamped, summary.removed, summary.failed
    );
    Ok(u8::from(summary.failed > 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwa_core::FwaConfig;

    #[tokio::test]
    async fn test_reconcile_empty_store() {
        let services = Services::connect(FwaConfig::default()).await.unwrap();
        let args = ReconcileArgs { older_than: None };
        assert_eq!(run_reconcile(&args, &services).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_short_grace_rejected() {
        let services = Services::connect(FwaConfig::default()).await.unwrap();
        for older_than in [Duration::ZERO, services.config.store.retry_budget] {
            let args = ReconcileArgs {
                older_than: Some(older_than),
            };
            let err = run_reconcile(&args, &services).await.unwrap_err();
            assert!(err.to_string().contains("retry budget"));
        }
    }
}
