//! Periodic retry sweep
//!
//! Re-dispatches units stuck in PENDING or FAILED whose retry budget is not
//! spent, then re-checks the merge barrier for projects whose current
//! generation has not merged. Failures of one unit never abort the sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::background_ticker;
use super::completion_barrier::CompletionBarrier;
use super::dispatch_orchestrator::DispatchOrchestrator;
use crate::error::DispatchError;
use crate::types::{ProjectStore, UnitStore};

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Units eligible for a retry when the sweep started
    pub candidates: usize,
    /// Units successfully re-dispatched
    pub retried: usize,
    /// Units whose re-dispatch failed again
    pub failed: usize,
    /// Global merges triggered by the barrier re-check
    pub merges: usize,
}

pub struct ReconciliationScheduler {
    units: Arc<dyn UnitStore>,
    projects: Arc<dyn ProjectStore>,
    dispatcher: Arc<DispatchOrchestrator>,
    barrier: Arc<CompletionBarrier>,
    max_retry_count: u32,
}

impl ReconciliationScheduler {
    pub fn new(
        units: Arc<dyn UnitStore>,
        projects: Arc<dyn ProjectStore>,
        dispatcher: Arc<DispatchOrchestrator>,
        barrier: Arc<CompletionBarrier>,
        max_retry_count: u32,
    ) -> Self {
        Self {
            units,
            projects,
            dispatcher,
            barrier,
            max_retry_count,
        }
    }

    /// Run one sweep
    ///
    /// Only a store failure while listing candidates fails the sweep as a
    /// whole; per-unit and per-project errors are logged and counted.
    pub async fn sweep(&self) -> folio_common::Result<SweepReport> {
        let candidates = self.units.list_retry_candidates(self.max_retry_count).await?;
        let mut report = SweepReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        for unit in candidates {
            match self.dispatcher.retry_unit(unit.id).await {
                Ok(_) => report.retried += 1,
                // Changed by a concurrent dispatch or callback since listing
                Err(DispatchError::InFlight(_))
                | Err(DispatchError::AlreadyCompleted(_))
                | Err(DispatchError::RetriesExhausted(_)) => {
                    debug!(unit_id = %unit.id, "Retry candidate no longer needs a dispatch")
                }
                Err(err) => {
                    warn!(
                        unit_id = %unit.id,
                        retry_count = unit.retry_count(),
                        error = %err,
                        "Retry dispatch failed"
                    );
                    report.failed += 1;
                }
            }
        }

        for project in self.projects.list_awaiting_merge().await? {
            match self.barrier.check_and_trigger_merge(project.id).await {
                Ok(true) => report.merges += 1,
                Ok(false) => {}
                Err(err) => warn!(project_id = %project.id, error = %err, "Barrier re-check failed"),
            }
        }

        if report.retried > 0 || report.failed > 0 || report.merges > 0 {
            info!(
                candidates = report.candidates,
                retried = report.retried,
                failed = report.failed,
                merges = report.merges,
                "Reconciliation sweep finished"
            );
        } else {
            debug!(candidates = report.candidates, "Reconciliation sweep found nothing to do");
        }

        Ok(report)
    }

    /// Sweep every `interval` until `cancel` fires
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = background_ticker(interval, "reconciliation");
            info!(interval_secs = interval.as_secs(), "Reconciliation scheduler started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "Reconciliation sweep failed");
                        }
                    }
                }
            }

            info!("Reconciliation scheduler stopped");
        })
    }
}
