//! Fan-out of unit analysis work
//!
//! Each dispatch moves a unit to PENDING, builds its `UNIT_ANALYSIS` message,
//! hands it to the work queue and then moves the unit to QUEUED. A send
//! failure marks the unit FAILED with the reason, where reconciliation picks
//! it up; during a bulk publish it is recorded in the report and the
//! remaining units are still dispatched.
//!
//! The in-flight registry guarantees one dispatch per unit at a time across
//! bulk publish, single-unit publish and reconciliation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::load_progress;
use super::progress_notifier::ProgressNotifier;
use super::unit_lifecycle::UnitLifecycle;
use crate::error::{DispatchError, LifecycleError};
use crate::models::{
    AnalysisContext, NarrativeUnit, PublishReport, UnitAnalysisMessage, UnitDispatchFailure,
    UnitStatus, WorkMessage, UNIT_ANALYSIS_PASS,
};
use crate::types::{ProjectStore, UnitStore, WorkQueue};

/// Unit ids with a dispatch currently running
#[derive(Default)]
pub struct InFlightRegistry {
    ids: Mutex<HashSet<Uuid>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `unit_id`; `None` if another dispatch holds it
    pub fn try_claim(self: &Arc<Self>, unit_id: Uuid) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !ids.insert(unit_id) {
            return None;
        }
        Some(InFlightGuard {
            registry: Arc::clone(self),
            unit_id,
        })
    }

    pub fn contains(&self, unit_id: Uuid) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&unit_id)
    }

    pub fn len(&self) -> usize {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the claim on drop
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    unit_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry
            .ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.unit_id);
    }
}

/// What a dispatch does with a FAILED unit whose retries are spent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExhaustedUnits {
    Leave,
    Revive,
}

pub struct DispatchOrchestrator {
    units: Arc<dyn UnitStore>,
    projects: Arc<dyn ProjectStore>,
    queue: Arc<dyn WorkQueue>,
    lifecycle: Arc<UnitLifecycle>,
    notifier: Arc<ProgressNotifier>,
    in_flight: Arc<InFlightRegistry>,
    callback_address: String,
}

impl DispatchOrchestrator {
    pub fn new(
        units: Arc<dyn UnitStore>,
        projects: Arc<dyn ProjectStore>,
        queue: Arc<dyn WorkQueue>,
        lifecycle: Arc<UnitLifecycle>,
        notifier: Arc<ProgressNotifier>,
        callback_address: impl Into<String>,
    ) -> Self {
        Self {
            units,
            projects,
            queue,
            lifecycle,
            notifier,
            in_flight: Arc::new(InFlightRegistry::new()),
            callback_address: callback_address.into(),
        }
    }

    pub fn in_flight(&self) -> &Arc<InFlightRegistry> {
        &self.in_flight
    }

    /// Dispatch every analyzable, not yet completed unit of a project
    ///
    /// Units go out in ordinal order. COMPLETED and in-flight units are
    /// skipped, exhausted units are counted but left FAILED, and other FAILED
    /// units are reset for retry first. Per-unit send failures are collected
    /// in the report, never returned as an error.
    pub async fn publish_for_project(&self, project_id: Uuid) -> Result<PublishReport, DispatchError> {
        if self.projects.get(project_id).await?.is_none() {
            return Err(folio_common::Error::NotFound(format!("Project not found: {}", project_id)).into());
        }

        let mut report = PublishReport {
            project_id,
            ..Default::default()
        };

        let max_retry_count = self.lifecycle.max_retry_count();
        let units = self.units.list_for_project(project_id).await?;
        for unit in units.into_iter().filter(|u| u.kind.is_analyzable()) {
            let status = unit.status();
            if status == UnitStatus::Completed || status.is_in_flight() {
                debug!(unit_id = %unit.id, status = %status, "Skipping unit");
                report.skipped += 1;
                continue;
            }
            if unit.is_exhausted(max_retry_count) {
                debug!(unit_id = %unit.id, retry_count = unit.retry_count(), "Skipping exhausted unit");
                report.exhausted += 1;
                continue;
            }

            let (unit_id, ordinal) = (unit.id, unit.ordinal);
            match self.dispatch(unit_id, ExhaustedUnits::Leave).await {
                Ok(_) => report.dispatched += 1,
                Err(DispatchError::InFlight(_)) | Err(DispatchError::AlreadyCompleted(_)) => {
                    report.skipped += 1
                }
                Err(DispatchError::RetriesExhausted(_)) => report.exhausted += 1,
                Err(err) => {
                    warn!(unit_id = %unit_id, ordinal, error = %err, "Unit dispatch failed");
                    report.failed += 1;
                    report.errors.push(UnitDispatchFailure {
                        unit_id,
                        ordinal,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            project_id = %project_id,
            dispatched = report.dispatched,
            skipped = report.skipped,
            exhausted = report.exhausted,
            failed = report.failed,
            "Project published"
        );

        match load_progress(self.units.as_ref(), self.projects.as_ref(), project_id, max_retry_count).await {
            Ok(progress) => {
                self.notifier
                    .publish_progress(
                        &progress,
                        format!("{} units dispatched, {} skipped", report.dispatched, report.skipped),
                    )
                    .await;
            }
            Err(e) => warn!(project_id = %project_id, error = %e, "Could not load progress"),
        }

        Ok(report)
    }

    /// Dispatch a single unit (targeted re-analysis, reconciliation)
    ///
    /// Legal from CREATED, PENDING and FAILED. A FAILED unit is reset for
    /// retry first, which consumes one retry; this holds for exhausted units
    /// too, as an operator override.
    pub async fn publish_for_unit(&self, unit_id: Uuid) -> Result<NarrativeUnit, DispatchError> {
        self.dispatch(unit_id, ExhaustedUnits::Revive).await
    }

    /// Re-dispatch a retry candidate; an exhausted unit is left FAILED
    pub async fn retry_unit(&self, unit_id: Uuid) -> Result<NarrativeUnit, DispatchError> {
        self.dispatch(unit_id, ExhaustedUnits::Leave).await
    }

    async fn dispatch(&self, unit_id: Uuid, policy: ExhaustedUnits) -> Result<NarrativeUnit, DispatchError> {
        let _guard = self
            .in_flight
            .try_claim(unit_id)
            .ok_or(DispatchError::InFlight(unit_id))?;

        // Status is read under the claim; any earlier snapshot may predate another dispatch
        let unit = self.lifecycle.load(unit_id).await?;
        if !unit.kind.is_analyzable() {
            return Err(DispatchError::NotAnalyzable(unit.id));
        }

        let unit = match unit.status() {
            UnitStatus::Created => self.lifecycle.mark_pending(unit.id).await?,
            UnitStatus::Failed
                if policy == ExhaustedUnits::Leave
                    && unit.is_exhausted(self.lifecycle.max_retry_count()) =>
            {
                return Err(DispatchError::RetriesExhausted(unit.id))
            }
            UnitStatus::Failed => self.lifecycle.reset_for_retry(unit.id).await?,
            UnitStatus::Pending => unit,
            UnitStatus::Completed => return Err(DispatchError::AlreadyCompleted(unit.id)),
            UnitStatus::Queued | UnitStatus::Analyzing | UnitStatus::Validating => {
                return Err(DispatchError::InFlight(unit.id))
            }
        };

        let message = self.build_message(&unit).await?;

        if let Err(err) = self.queue.send(&message).await {
            let reason = format!("dispatch failed: {}", err);
            if let Err(mark_err) = self.lifecycle.mark_failed(unit.id, &reason).await {
                warn!(unit_id = %unit.id, error = %mark_err, "Could not record dispatch failure");
            }
            return Err(err.into());
        }

        match self.lifecycle.mark_queued(unit.id).await {
            Ok(queued) => {
                debug!(unit_id = %unit.id, ordinal = unit.ordinal, trace_id = %unit.trace_id, "Unit queued");
                Ok(queued)
            }
            // Worker reported back before the QUEUED write landed
            Err(LifecycleError::IllegalTransition { from, .. })
                if from.is_in_flight() || from == UnitStatus::Completed =>
            {
                debug!(unit_id = %unit.id, status = %from, "Unit already picked up by worker");
                Ok(self.lifecycle.load(unit.id).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn build_message(&self, unit: &NarrativeUnit) -> Result<WorkMessage, DispatchError> {
        let total_units_in_group = match unit.parent_id {
            Some(parent_id) => self.units.count_in_group(parent_id).await?,
            None => self.units.status_counts(unit.project_id).await?.total(),
        };
        let existing_entities = self.projects.known_entities(unit.project_id).await?;

        Ok(WorkMessage::UnitAnalysis(UnitAnalysisMessage {
            unit_id: unit.id,
            project_id: unit.project_id,
            parent_group_id: unit.parent_id,
            ordinal: unit.ordinal,
            title: unit.title.clone(),
            content: unit.content.clone(),
            total_units_in_group,
            pass_number: UNIT_ANALYSIS_PASS,
            callback_address: self.callback_address.clone(),
            context: AnalysisContext { existing_entities },
            trace_id: unit.trace_id.clone(),
        }))
    }
}
