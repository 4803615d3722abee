//! Narrative unit and its analysis lifecycle state machine
//!
//! Happy path:
//! CREATED → PENDING → QUEUED → ANALYZING → VALIDATING → COMPLETED
//!
//! Failure back-edges:
//! {PENDING, QUEUED, ANALYZING, VALIDATING} → FAILED → PENDING (retry)
//!
//! Status is only reachable through the transition methods below; each one
//! checks that the current status is a legal predecessor and returns
//! [`LifecycleError::IllegalTransition`] otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LifecycleError;

/// Analysis status of a narrative unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    /// Persisted after segmentation, never dispatched
    Created,
    /// Selected for dispatch, message not yet accepted by the queue
    Pending,
    /// Message accepted by the queue
    Queued,
    /// Worker announced it started analysis
    Analyzing,
    /// Worker is validating its own output
    Validating,
    /// Analysis finished successfully (terminal)
    Completed,
    /// Dispatch or analysis failed; retryable below the retry ceiling
    Failed,
}

impl UnitStatus {
    pub const ALL: [UnitStatus; 7] = [
        UnitStatus::Created,
        UnitStatus::Pending,
        UnitStatus::Queued,
        UnitStatus::Analyzing,
        UnitStatus::Validating,
        UnitStatus::Completed,
        UnitStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Created => "CREATED",
            UnitStatus::Pending => "PENDING",
            UnitStatus::Queued => "QUEUED",
            UnitStatus::Analyzing => "ANALYZING",
            UnitStatus::Validating => "VALIDATING",
            UnitStatus::Completed => "COMPLETED",
            UnitStatus::Failed => "FAILED",
        }
    }

    /// Handed to a worker and not yet reported back
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            UnitStatus::Queued | UnitStatus::Analyzing | UnitStatus::Validating
        )
    }

    /// Position on the happy path; `None` for FAILED
    pub fn happy_path_rank(&self) -> Option<u8> {
        match self {
            UnitStatus::Created => Some(0),
            UnitStatus::Pending => Some(1),
            UnitStatus::Queued => Some(2),
            UnitStatus::Analyzing => Some(3),
            UnitStatus::Validating => Some(4),
            UnitStatus::Completed => Some(5),
            UnitStatus::Failed => None,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = folio_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| folio_common::Error::Internal(format!("Unknown unit status: {}", s)))
    }
}

/// Unit kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitKind {
    /// Segmented text sent for analysis
    Narrative,
    /// Parent grouping (part, volume); holds no text, never analyzed
    Group,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Narrative => "NARRATIVE",
            UnitKind::Group => "GROUP",
        }
    }

    pub fn is_analyzable(&self) -> bool {
        matches!(self, UnitKind::Narrative)
    }
}

impl FromStr for UnitKind {
    type Err = folio_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NARRATIVE" => Ok(UnitKind::Narrative),
            "GROUP" => Ok(UnitKind::Group),
            other => Err(folio_common::Error::Internal(format!(
                "Unknown unit kind: {}",
                other
            ))),
        }
    }
}

/// Mutable lifecycle fields of a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleState {
    pub status: UnitStatus,
    pub retry_count: u32,
    pub failure_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<u64>,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            status: UnitStatus::Created,
            retry_count: 0,
            failure_reason: None,
            started_at: None,
            completed_at: None,
            processing_time_ms: None,
        }
    }
}

/// Version used for compare-and-swap persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitVersion {
    pub status: UnitStatus,
    pub retry_count: u32,
}

/// Record of an applied transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub unit_id: Uuid,
    pub old_status: UnitStatus,
    pub new_status: UnitStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// One independently analyzable piece of a manuscript
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeUnit {
    pub id: Uuid,
    pub project_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub kind: UnitKind,
    pub ordinal: u32,
    pub title: String,
    #[serde(skip_serializing)]
    pub content: String,
    pub trace_id: String,
    #[serde(flatten)]
    lifecycle: LifecycleState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NarrativeUnit {
    /// New analyzable unit in CREATED
    pub fn new_narrative(
        project_id: Uuid,
        parent_id: Option<Uuid>,
        ordinal: u32,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            parent_id,
            kind: UnitKind::Narrative,
            ordinal,
            title: title.into(),
            content: content.into(),
            trace_id: Uuid::new_v4().to_string(),
            lifecycle: LifecycleState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// New parent grouping; stays CREATED forever
    pub fn new_group(project_id: Uuid, ordinal: u32, title: impl Into<String>) -> Self {
        let mut unit = Self::new_narrative(project_id, None, ordinal, title, String::new());
        unit.kind = UnitKind::Group;
        unit
    }

    /// Rebuild a unit loaded from storage with its persisted lifecycle
    pub(crate) fn with_lifecycle(mut self, lifecycle: LifecycleState) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn lifecycle(&self) -> &LifecycleState {
        &self.lifecycle
    }

    pub fn status(&self) -> UnitStatus {
        self.lifecycle.status
    }

    pub fn retry_count(&self) -> u32 {
        self.lifecycle.retry_count
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.lifecycle.failure_reason.as_deref()
    }

    pub fn version(&self) -> UnitVersion {
        UnitVersion {
            status: self.lifecycle.status,
            retry_count: self.lifecycle.retry_count,
        }
    }

    /// FAILED with no retries left
    pub fn is_exhausted(&self, max_retry_count: u32) -> bool {
        self.lifecycle.status == UnitStatus::Failed && self.lifecycle.retry_count >= max_retry_count
    }

    /// Eligible for a reconciliation re-dispatch
    pub fn is_retry_candidate(&self, max_retry_count: u32) -> bool {
        self.kind.is_analyzable()
            && matches!(self.lifecycle.status, UnitStatus::Pending | UnitStatus::Failed)
            && self.lifecycle.retry_count < max_retry_count
    }

    /// CREATED → PENDING
    pub fn mark_pending(&mut self) -> Result<StateTransition, LifecycleError> {
        self.transition(&[UnitStatus::Created], UnitStatus::Pending)
    }

    /// PENDING → QUEUED
    pub fn mark_queued(&mut self) -> Result<StateTransition, LifecycleError> {
        self.transition(&[UnitStatus::Pending], UnitStatus::Queued)
    }

    /// QUEUED → ANALYZING
    pub fn mark_analyzing(&mut self) -> Result<StateTransition, LifecycleError> {
        let transition = self.transition(&[UnitStatus::Queued], UnitStatus::Analyzing)?;
        self.lifecycle.started_at = Some(transition.transitioned_at);
        Ok(transition)
    }

    /// ANALYZING → VALIDATING
    pub fn mark_validating(&mut self) -> Result<StateTransition, LifecycleError> {
        self.transition(&[UnitStatus::Analyzing], UnitStatus::Validating)
    }

    /// VALIDATING → COMPLETED
    pub fn mark_completed(&mut self, duration_ms: u64) -> Result<StateTransition, LifecycleError> {
        let transition = self.transition(&[UnitStatus::Validating], UnitStatus::Completed)?;
        self.lifecycle.completed_at = Some(transition.transitioned_at);
        self.lifecycle.processing_time_ms = Some(duration_ms);
        self.lifecycle.failure_reason = None;
        Ok(transition)
    }

    /// {PENDING, QUEUED, ANALYZING, VALIDATING} → FAILED
    pub fn mark_failed(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<StateTransition, LifecycleError> {
        let transition = self.transition(
            &[
                UnitStatus::Pending,
                UnitStatus::Queued,
                UnitStatus::Analyzing,
                UnitStatus::Validating,
            ],
            UnitStatus::Failed,
        )?;
        self.lifecycle.failure_reason = Some(reason.into());
        self.lifecycle.completed_at = Some(transition.transitioned_at);
        Ok(transition)
    }

    /// FAILED → PENDING, consuming one retry
    pub fn reset_for_retry(&mut self) -> Result<StateTransition, LifecycleError> {
        let transition = self.transition(&[UnitStatus::Failed], UnitStatus::Pending)?;
        self.lifecycle.retry_count += 1;
        self.lifecycle.failure_reason = None;
        self.lifecycle.started_at = None;
        self.lifecycle.completed_at = None;
        Ok(transition)
    }

    fn transition(
        &mut self,
        allowed_from: &[UnitStatus],
        to: UnitStatus,
    ) -> Result<StateTransition, LifecycleError> {
        let from = self.lifecycle.status;
        if !self.kind.is_analyzable() || !allowed_from.contains(&from) {
            return Err(LifecycleError::IllegalTransition {
                unit_id: self.id,
                from,
                to,
            });
        }

        let now = Utc::now();
        self.lifecycle.status = to;
        self.updated_at = now;

        Ok(StateTransition {
            unit_id: self.id,
            old_status: from,
            new_status: to,
            transitioned_at: now,
        })
    }
}
