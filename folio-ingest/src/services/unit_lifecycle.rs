//! Persisted unit lifecycle
//!
//! Wraps the in-memory state machine on [`NarrativeUnit`] with durable,
//! per-unit serialized writes: load, apply a transition, then
//! compare-and-swap against the version that was loaded. A lost race reloads
//! and re-applies, so the transition is always validated against the latest
//! stored status.

use std::sync::Arc;

use chrono::Utc;
use folio_common::ProgressEvent;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::progress_notifier::ProgressNotifier;
use crate::error::LifecycleError;
use crate::models::{NarrativeUnit, StateTransition, UnitStatus};
use crate::types::UnitStore;

/// Compare-and-swap attempts before giving up with [`LifecycleError::Conflict`]
const MAX_CAS_ATTEMPTS: usize = 5;

pub struct UnitLifecycle {
    units: Arc<dyn UnitStore>,
    notifier: Arc<ProgressNotifier>,
    max_retry_count: u32,
}

impl UnitLifecycle {
    pub fn new(units: Arc<dyn UnitStore>, notifier: Arc<ProgressNotifier>, max_retry_count: u32) -> Self {
        Self {
            units,
            notifier,
            max_retry_count,
        }
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    /// Persist a freshly created unit
    pub async fn create(&self, unit: &NarrativeUnit) -> Result<(), LifecycleError> {
        self.units.insert(unit).await?;
        debug!(unit_id = %unit.id, ordinal = unit.ordinal, kind = unit.kind.as_str(), "Unit created");
        Ok(())
    }

    pub async fn load(&self, unit_id: Uuid) -> Result<NarrativeUnit, LifecycleError> {
        self.units
            .get(unit_id)
            .await?
            .ok_or(LifecycleError::UnitNotFound(unit_id))
    }

    pub async fn mark_pending(&self, unit_id: Uuid) -> Result<NarrativeUnit, LifecycleError> {
        self.apply(unit_id, |unit| unit.mark_pending().map(|t| vec![t])).await
    }

    pub async fn mark_queued(&self, unit_id: Uuid) -> Result<NarrativeUnit, LifecycleError> {
        self.apply(unit_id, |unit| unit.mark_queued().map(|t| vec![t])).await
    }

    pub async fn mark_analyzing(&self, unit_id: Uuid) -> Result<NarrativeUnit, LifecycleError> {
        self.apply(unit_id, |unit| unit.mark_analyzing().map(|t| vec![t])).await
    }

    pub async fn mark_validating(&self, unit_id: Uuid) -> Result<NarrativeUnit, LifecycleError> {
        self.apply(unit_id, |unit| unit.mark_validating().map(|t| vec![t])).await
    }

    pub async fn mark_completed(
        &self,
        unit_id: Uuid,
        duration_ms: u64,
    ) -> Result<NarrativeUnit, LifecycleError> {
        self.apply(unit_id, |unit| unit.mark_completed(duration_ms).map(|t| vec![t]))
            .await
    }

    pub async fn mark_failed(
        &self,
        unit_id: Uuid,
        reason: &str,
    ) -> Result<NarrativeUnit, LifecycleError> {
        self.apply(unit_id, |unit| unit.mark_failed(reason).map(|t| vec![t]))
            .await
    }

    pub async fn reset_for_retry(&self, unit_id: Uuid) -> Result<NarrativeUnit, LifecycleError> {
        self.apply(unit_id, |unit| unit.reset_for_retry().map(|t| vec![t]))
            .await
    }

    /// Walk forward along the happy path up to `target` in one write
    ///
    /// Workers may skip intermediate status announcements; every step taken
    /// is still a legal transition. `target` must be ANALYZING, VALIDATING or
    /// COMPLETED and strictly ahead of the current status, which must be
    /// PENDING or later (a dispatched unit).
    pub async fn advance_to(
        &self,
        unit_id: Uuid,
        target: UnitStatus,
        duration_ms: u64,
    ) -> Result<NarrativeUnit, LifecycleError> {
        self.apply(unit_id, |unit| walk_forward(unit, target, duration_ms))
            .await
    }

    /// Fail fast if `target` is not reachable from the unit's current status
    ///
    /// Nothing is written; the move itself still goes through [`advance_to`](Self::advance_to).
    pub async fn can_advance(&self, unit_id: Uuid, target: UnitStatus) -> Result<NarrativeUnit, LifecycleError> {
        let unit = self.load(unit_id).await?;
        let mut trial = unit.clone();
        if let Err(err) = walk_forward(&mut trial, target, 0) {
            warn!(unit_id = %unit_id, error = %err, "Rejected lifecycle transition");
            return Err(err);
        }
        Ok(unit)
    }

    async fn apply<F>(&self, unit_id: Uuid, op: F) -> Result<NarrativeUnit, LifecycleError>
    where
        F: Fn(&mut NarrativeUnit) -> Result<Vec<StateTransition>, LifecycleError>,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut unit = self.load(unit_id).await?;
            let expected = unit.version();

            let transitions = match op(&mut unit) {
                Ok(transitions) => transitions,
                Err(err) => {
                    if let LifecycleError::IllegalTransition { .. } = err {
                        warn!(unit_id = %unit_id, error = %err, "Rejected lifecycle transition");
                    }
                    return Err(err);
                }
            };

            if self.units.compare_and_swap(&unit, expected).await? {
                for transition in &transitions {
                    debug!(
                        unit_id = %unit_id,
                        from = %transition.old_status,
                        to = %transition.new_status,
                        retry_count = unit.retry_count(),
                        "Unit transitioned"
                    );
                }
                if unit.status() == UnitStatus::Failed {
                    self.report_failure(&unit).await;
                }
                return Ok(unit);
            }

            debug!(unit_id = %unit_id, attempt, "Concurrent unit update, reloading");
        }

        warn!(unit_id = %unit_id, attempts = MAX_CAS_ATTEMPTS, "Gave up on contended unit update");
        Err(LifecycleError::Conflict(unit_id))
    }

    async fn report_failure(&self, unit: &NarrativeUnit) {
        let reason = unit.failure_reason().unwrap_or("unknown").to_string();

        if !unit.is_exhausted(self.max_retry_count) {
            warn!(
                unit_id = %unit.id,
                retry_count = unit.retry_count(),
                max_retry_count = self.max_retry_count,
                reason = %reason,
                "Unit failed, left for reconciliation"
            );
            return;
        }

        error!(
            unit_id = %unit.id,
            project_id = %unit.project_id,
            retry_count = unit.retry_count(),
            reason = %reason,
            "Unit failed permanently, retries exhausted"
        );
        self.notifier
            .publish(
                unit.project_id,
                ProgressEvent::UnitExhausted {
                    project_id: unit.project_id,
                    unit_id: unit.id,
                    retry_count: unit.retry_count(),
                    reason,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
}

fn walk_forward(
    unit: &mut NarrativeUnit,
    target: UnitStatus,
    duration_ms: u64,
) -> Result<Vec<StateTransition>, LifecycleError> {
    let illegal = |unit: &NarrativeUnit| LifecycleError::IllegalTransition {
        unit_id: unit.id,
        from: unit.status(),
        to: target,
    };

    let current_rank = unit.status().happy_path_rank();
    let target_rank = target.happy_path_rank();
    let reachable = matches!(
        target,
        UnitStatus::Analyzing | UnitStatus::Validating | UnitStatus::Completed
    ) && matches!((current_rank, target_rank), (Some(c), Some(t)) if c >= 1 && c < t);

    if !reachable {
        return Err(illegal(&*unit));
    }

    let mut transitions = Vec::new();
    while unit.status() != target {
        let transition = match unit.status() {
            UnitStatus::Pending => unit.mark_queued()?,
            UnitStatus::Queued => unit.mark_analyzing()?,
            UnitStatus::Analyzing => unit.mark_validating()?,
            UnitStatus::Validating => unit.mark_completed(duration_ms)?,
            _ => return Err(illegal(&*unit)),
        };
        transitions.push(transition);
    }
    Ok(transitions)
}
