//! Project record, derived progress and dispatch reports

use chrono::{DateTime, Utc};
use folio_common::ProjectStatus;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::UnitStatus;

/// Project owning a set of narrative units
///
/// `generation` identifies the current cohort of units and is bumped every
/// time units are added. `merged_generation` records the last generation
/// whose global merge was dispatched, so the merge fires at most once per
/// generation. A project without units is at generation 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub generation: u32,
    pub merged_generation: u32,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            generation: 0,
            merged_generation: 0,
            created_at: Utc::now(),
        }
    }

    /// Current generation has not been merged yet
    pub fn awaiting_merge(&self) -> bool {
        self.merged_generation < self.generation
    }
}

/// Per-status counts of the analyzable units of a project
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    counts: HashMap<UnitStatus, u32>,
}

impl StatusCounts {
    pub fn add(&mut self, status: UnitStatus, count: u32) {
        *self.counts.entry(status).or_insert(0) += count;
    }

    pub fn get(&self, status: UnitStatus) -> u32 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn completed(&self) -> u32 {
        self.get(UnitStatus::Completed)
    }

    /// Barrier condition: at least one unit and all of them completed
    pub fn all_completed(&self) -> bool {
        let total = self.total();
        total > 0 && self.completed() == total
    }

    /// Units that are pending or with a worker
    pub fn active(&self) -> u32 {
        self.get(UnitStatus::Pending)
            + self.get(UnitStatus::Queued)
            + self.get(UnitStatus::Analyzing)
            + self.get(UnitStatus::Validating)
    }
}

/// Point-in-time progress snapshot of a project
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectProgress {
    pub project_id: Uuid,
    pub status: ProjectStatus,
    pub completed_units: u32,
    pub total_units: u32,
    pub failed_units: u32,
    pub exhausted_units: u32,
    pub generation: u32,
}

impl ProjectProgress {
    pub fn from_counts(project: &Project, counts: &StatusCounts, exhausted_units: u32) -> Self {
        let status = if counts.all_completed() && !project.awaiting_merge() {
            ProjectStatus::Merging
        } else if counts.active() > 0 {
            ProjectStatus::Analyzing
        } else if exhausted_units > 0 {
            ProjectStatus::Stalled
        } else if counts.get(UnitStatus::Failed) > 0 || counts.completed() > 0 {
            // Failures awaiting reconciliation, or completions waiting on a merge retry
            ProjectStatus::Analyzing
        } else {
            ProjectStatus::Idle
        };

        Self {
            project_id: project.id,
            status,
            completed_units: counts.completed(),
            total_units: counts.total(),
            failed_units: counts.get(UnitStatus::Failed),
            exhausted_units,
            generation: project.generation,
        }
    }
}

/// Per-unit failure entry in a publish report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDispatchFailure {
    pub unit_id: Uuid,
    pub ordinal: u32,
    pub error: String,
}

/// Outcome of a bulk publish
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub project_id: Uuid,
    /// Units whose message was accepted by the queue
    pub dispatched: u32,
    /// Units already completed or already in flight
    pub skipped: u32,
    /// FAILED units with no retries left; left untouched
    pub exhausted: u32,
    /// Units whose dispatch failed; left for reconciliation
    pub failed: u32,
    pub errors: Vec<UnitDispatchFailure>,
}
