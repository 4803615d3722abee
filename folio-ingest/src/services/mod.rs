//! Services for folio-ingest
//!
//! Segmentation:
//! - `boundary_classifier`: two-phase header recognition
//! - `manuscript_segmenter`: text → ordered sections
//! - `manuscript_ingestor`: sections → persisted units
//!
//! Orchestration:
//! - `unit_lifecycle`: persisted state machine transitions
//! - `dispatch_orchestrator`: fan-out of unit analysis messages
//! - `completion_barrier`: fan-in and the global merge trigger
//! - `reconciliation_scheduler`: periodic retry sweep
//! - `callback_processor`: inbound worker callbacks
//! - `progress_notifier`: per-project progress channels
//! - `work_queue`: outbound queue implementations

pub mod boundary_classifier;
pub mod callback_processor;
pub mod completion_barrier;
pub mod dispatch_orchestrator;
pub mod manuscript_ingestor;
pub mod manuscript_segmenter;
pub mod progress_notifier;
pub mod reconciliation_scheduler;
pub mod unit_lifecycle;
pub mod work_queue;

pub use callback_processor::CallbackProcessor;
pub use completion_barrier::CompletionBarrier;
pub use dispatch_orchestrator::{DispatchOrchestrator, InFlightRegistry};
pub use manuscript_ingestor::ManuscriptIngestor;
pub use manuscript_segmenter::segment;
pub use progress_notifier::ProgressNotifier;
pub use reconciliation_scheduler::{ReconciliationScheduler, SweepReport};
pub use unit_lifecycle::UnitLifecycle;
pub use work_queue::{ChannelWorkQueue, HttpWorkQueue};

use std::time::Duration;

use folio_common::{Error, Result};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::warn;
use uuid::Uuid;

use crate::models::ProjectProgress;
use crate::types::{ProjectStore, UnitStore};

/// Current progress snapshot of a project
pub async fn load_progress(
    units: &dyn UnitStore,
    projects: &dyn ProjectStore,
    project_id: Uuid,
    max_retry_count: u32,
) -> Result<ProjectProgress> {
    let project = projects
        .get(project_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Project not found: {}", project_id)))?;
    let counts = units.status_counts(project_id).await?;
    let exhausted = units.list_exhausted(project_id, max_retry_count).await?.len() as u32;

    Ok(ProjectProgress::from_counts(&project, &counts, exhausted))
}

/// Ticker for background loops; a zero period is raised to one second
pub(crate) fn background_ticker(period: Duration, task: &'static str) -> Interval {
    let period = if period.is_zero() {
        warn!(task, "Zero interval configured, using 1s");
        Duration::from_secs(1)
    } else {
        period
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
