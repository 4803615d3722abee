//! Collaborator traits consumed by the orchestration core
//!
//! The core never touches SQL or HTTP directly. It talks to:
//! - [`UnitStore`]: durable narrative units, by id and by project
//! - [`ProjectStore`]: durable projects, cohort generations, known entities
//! - [`WorkQueue`]: outbound messages to the worker pool (at-least-once)
//!
//! SQLite and in-memory stores live in [`crate::db`]; queue implementations
//! live in [`crate::services::work_queue`].

use folio_common::Result;
use uuid::Uuid;

use crate::error::QueueError;
use crate::models::{
    AnalysisResult, NarrativeUnit, Project, StatusCounts, UnitVersion, WorkMessage,
};

/// Durable narrative unit storage
#[async_trait::async_trait]
pub trait UnitStore: Send + Sync {
    /// Persist a new unit
    async fn insert(&self, unit: &NarrativeUnit) -> Result<()>;

    async fn get(&self, unit_id: Uuid) -> Result<Option<NarrativeUnit>>;

    /// All units of a project (groups included), ordinal ascending
    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<NarrativeUnit>>;

    /// Write the lifecycle of `unit` only if the stored version still equals
    /// `expected`. Returns false when another writer got there first.
    async fn compare_and_swap(&self, unit: &NarrativeUnit, expected: UnitVersion) -> Result<bool>;

    /// Analyzable units in PENDING or FAILED with `retry_count < max_retry_count`
    async fn list_retry_candidates(&self, max_retry_count: u32) -> Result<Vec<NarrativeUnit>>;

    /// Analyzable units of a project in FAILED with `retry_count >= max_retry_count`
    async fn list_exhausted(
        &self,
        project_id: Uuid,
        max_retry_count: u32,
    ) -> Result<Vec<NarrativeUnit>>;

    /// Status counts over analyzable units of a project
    async fn status_counts(&self, project_id: Uuid) -> Result<StatusCounts>;

    /// Analyzable units attached to a parent group
    async fn count_in_group(&self, parent_id: Uuid) -> Result<u32>;

    /// Highest ordinal in a project (0 when empty)
    async fn max_ordinal(&self, project_id: Uuid) -> Result<u32>;

    async fn save_result(&self, unit_id: Uuid, result: &AnalysisResult) -> Result<()>;

    async fn load_result(&self, unit_id: Uuid) -> Result<Option<AnalysisResult>>;
}

/// Durable project storage
#[async_trait::async_trait]
pub trait ProjectStore: Send + Sync {
    async fn insert(&self, project: &Project) -> Result<()>;

    async fn get(&self, project_id: Uuid) -> Result<Option<Project>>;

    /// Start a new cohort after units were added; returns its generation
    async fn advance_cohort(&self, project_id: Uuid) -> Result<u32>;

    /// Atomically mark `generation` as merged. Succeeds at most once per
    /// generation; returns false when already claimed or superseded.
    async fn claim_merge(&self, project_id: Uuid, generation: u32) -> Result<bool>;

    /// Undo a claim whose merge message could not be sent
    async fn release_merge(&self, project_id: Uuid, generation: u32) -> Result<()>;

    /// Projects whose current generation has not merged
    async fn list_awaiting_merge(&self) -> Result<Vec<Project>>;

    async fn record_entities(&self, project_id: Uuid, names: &[String]) -> Result<()>;

    /// Known entity names, sorted
    async fn known_entities(&self, project_id: Uuid) -> Result<Vec<String>>;
}

/// Outbound message queue to the external worker pool
#[async_trait::async_trait]
pub trait WorkQueue: Send + Sync {
    /// Hand a message to the queue. Ok means the queue accepted it, not that
    /// any worker processed it.
    async fn send(&self, message: &WorkMessage) -> std::result::Result<(), QueueError>;
}
