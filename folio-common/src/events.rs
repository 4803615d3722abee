//! Progress event types pushed to observers of a project
//!
//! Events are serialized as tagged JSON for SSE transmission. Field names use
//! camelCase to match what browser observers consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse analysis status of a project, derived from its unit counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    /// No analyzable units, or none dispatched yet
    Idle,
    /// At least one unit is pending, queued or being analyzed
    Analyzing,
    /// All units completed and the global merge was dispatched
    Merging,
    /// Nothing left in flight but some units failed permanently
    Stalled,
}

/// Event pushed on a project's progress channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    /// Unit lifecycle progress for a project
    #[serde(rename_all = "camelCase")]
    Progress {
        project_id: Uuid,
        status: ProjectStatus,
        completed_units: u32,
        total_units: u32,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Every unit completed; the project-level merge pass was dispatched
    #[serde(rename_all = "camelCase")]
    MergeTriggered {
        project_id: Uuid,
        generation: u32,
        trace_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A unit failed and has no retries left
    #[serde(rename_all = "camelCase")]
    UnitExhausted {
        project_id: Uuid,
        unit_id: Uuid,
        retry_count: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Keep-alive for long-lived connections
    Heartbeat { timestamp: DateTime<Utc> },
}

impl ProgressEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "Progress",
            ProgressEvent::MergeTriggered { .. } => "MergeTriggered",
            ProgressEvent::UnitExhausted { .. } => "UnitExhausted",
            ProgressEvent::Heartbeat { .. } => "Heartbeat",
        }
    }

    /// Project the event belongs to (heartbeats belong to no project)
    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            ProgressEvent::Progress { project_id, .. }
            | ProgressEvent::MergeTriggered { project_id, .. }
            | ProgressEvent::UnitExhausted { project_id, .. } => Some(*project_id),
            ProgressEvent::Heartbeat { .. } => None,
        }
    }

    pub fn heartbeat() -> Self {
        ProgressEvent::Heartbeat {
            timestamp: Utc::now(),
        }
    }
}
