//! Inbound worker callbacks
//!
//! Completion callbacks carry a validated [`AnalysisResult`]; a payload that
//! fails validation fails the unit instead of completing it. Intermediate
//! status updates move the unit forward along the happy path. Every
//! successful completion re-checks the merge barrier.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::completion_barrier::CompletionBarrier;
use super::load_progress;
use super::progress_notifier::ProgressNotifier;
use super::unit_lifecycle::UnitLifecycle;
use crate::error::LifecycleError;
use crate::models::{
    AnalysisResult, CallbackStatus, CompletionCallback, NarrativeUnit, StatusUpdateCallback,
    UnitStatus,
};
use crate::types::{ProjectStore, UnitStore};

pub struct CallbackProcessor {
    units: Arc<dyn UnitStore>,
    projects: Arc<dyn ProjectStore>,
    lifecycle: Arc<UnitLifecycle>,
    barrier: Arc<CompletionBarrier>,
    notifier: Arc<ProgressNotifier>,
}

impl CallbackProcessor {
    pub fn new(
        units: Arc<dyn UnitStore>,
        projects: Arc<dyn ProjectStore>,
        lifecycle: Arc<UnitLifecycle>,
        barrier: Arc<CompletionBarrier>,
        notifier: Arc<ProgressNotifier>,
    ) -> Self {
        Self {
            units,
            projects,
            lifecycle,
            barrier,
            notifier,
        }
    }

    /// Apply a worker's final report for a unit
    pub async fn handle_completion(
        &self,
        callback: CompletionCallback,
    ) -> Result<NarrativeUnit, LifecycleError> {
        let unit_id = callback.unit_id;

        let unit = match callback.status {
            CallbackStatus::Failed => {
                let reason = callback
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "worker reported failure".to_string());
                self.lifecycle.mark_failed(unit_id, &reason).await?
            }
            CallbackStatus::Completed => match validated(callback.result) {
                Ok(result) => {
                    // Result is stored before COMPLETED so a failed write leaves the callback retryable
                    let current = self.lifecycle.can_advance(unit_id, UnitStatus::Completed).await?;
                    self.store_result(&current, &result).await?;
                    let unit = self
                        .lifecycle
                        .advance_to(unit_id, UnitStatus::Completed, callback.processing_time_ms)
                        .await?;
                    info!(
                        unit_id = %unit_id,
                        project_id = %unit.project_id,
                        processing_time_ms = callback.processing_time_ms,
                        "Unit analysis completed"
                    );
                    unit
                }
                Err(reason) => {
                    warn!(unit_id = %unit_id, reason = %reason, "Rejected analysis result");
                    self.lifecycle
                        .mark_failed(unit_id, &format!("invalid result: {}", reason))
                        .await?
                }
            },
        };

        self.publish_progress(&unit).await;

        if unit.status() == UnitStatus::Completed {
            if let Err(err) = self.barrier.check_and_trigger_merge(unit.project_id).await {
                // Reconciliation re-checks the barrier
                warn!(project_id = %unit.project_id, error = %err, "Barrier check failed");
            }
        }

        Ok(unit)
    }

    /// Apply an intermediate status announcement from a worker
    pub async fn handle_status_update(
        &self,
        update: StatusUpdateCallback,
    ) -> Result<NarrativeUnit, LifecycleError> {
        debug!(
            unit_id = %update.unit_id,
            status = %update.status,
            trace_id = update.trace_id.as_deref().unwrap_or("-"),
            "Status update received"
        );

        let unit = match update.status {
            UnitStatus::Failed => {
                self.lifecycle
                    .mark_failed(update.unit_id, "worker reported failure")
                    .await?
            }
            target => self.lifecycle.advance_to(update.unit_id, target, 0).await?,
        };

        self.publish_progress(&unit).await;
        Ok(unit)
    }

    async fn store_result(&self, unit: &NarrativeUnit, result: &AnalysisResult) -> Result<(), LifecycleError> {
        self.units.save_result(unit.id, result).await?;

        let names = result.entity_names();
        if !names.is_empty() {
            self.projects.record_entities(unit.project_id, &names).await?;
        }
        Ok(())
    }

    async fn publish_progress(&self, unit: &NarrativeUnit) {
        let progress = load_progress(
            self.units.as_ref(),
            self.projects.as_ref(),
            unit.project_id,
            self.lifecycle.max_retry_count(),
        )
        .await;

        match progress {
            Ok(progress) => {
                let message = format!("unit {} {}", unit.ordinal, unit.status().as_str().to_lowercase());
                self.notifier.publish_progress(&progress, message).await;
            }
            Err(e) => warn!(project_id = %unit.project_id, error = %e, "Could not load progress"),
        }
    }
}

fn validated(result: Option<AnalysisResult>) -> Result<AnalysisResult, String> {
    let result = result.ok_or_else(|| "missing result".to_string())?;
    result.validate()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryProjectStore, MemoryUnitStore};
    use crate::models::{CharacterMention, Project, StatusCounts, UnitVersion, WorkMessage};
    use crate::services::work_queue::ChannelWorkQueue;
    use folio_common::ProgressEvent;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Memory store whose next `save_result` fails when armed
    struct FlakyResultStore {
        inner: MemoryUnitStore,
        fail_next_save: AtomicBool,
    }

    #[async_trait::async_trait]
    impl UnitStore for FlakyResultStore {
        async fn insert(&self, unit: &NarrativeUnit) -> folio_common::Result<()> {
            self.inner.insert(unit).await
        }

        async fn get(&self, unit_id: Uuid) -> folio_common::Result<Option<NarrativeUnit>> {
            self.inner.get(unit_id).await
        }

        async fn list_for_project(&self, project_id: Uuid) -> folio_common::Result<Vec<NarrativeUnit>> {
            self.inner.list_for_project(project_id).await
        }

        async fn compare_and_swap(&self, unit: &NarrativeUnit, expected: UnitVersion) -> folio_common::Result<bool> {
            self.inner.compare_and_swap(unit, expected).await
        }

        async fn list_retry_candidates(&self, max_retry_count: u32) -> folio_common::Result<Vec<NarrativeUnit>> {
            self.inner.list_retry_candidates(max_retry_count).await
        }

        async fn list_exhausted(
            &self,
            project_id: Uuid,
            max_retry_count: u32,
        ) -> folio_common::Result<Vec<NarrativeUnit>> {
            self.inner.list_exhausted(project_id, max_retry_count).await
        }

        async fn status_counts(&self, project_id: Uuid) -> folio_common::Result<StatusCounts> {
            self.inner.status_counts(project_id).await
        }

        async fn count_in_group(&self, parent_id: Uuid) -> folio_common::Result<u32> {
            self.inner.count_in_group(parent_id).await
        }

        async fn max_ordinal(&self, project_id: Uuid) -> folio_common::Result<u32> {
            self.inner.max_ordinal(project_id).await
        }

        async fn save_result(&self, unit_id: Uuid, result: &AnalysisResult) -> folio_common::Result<()> {
            if self.fail_next_save.swap(false, Ordering::SeqCst) {
                return Err(folio_common::Error::Internal("disk full".to_string()));
            }
            self.inner.save_result(unit_id, result).await
        }

        async fn load_result(&self, unit_id: Uuid) -> folio_common::Result<Option<AnalysisResult>> {
            self.inner.load_result(unit_id).await
        }
    }

    struct Fixture {
        processor: CallbackProcessor,
        lifecycle: Arc<UnitLifecycle>,
        units: Arc<dyn UnitStore>,
        projects: Arc<dyn ProjectStore>,
        notifier: Arc<ProgressNotifier>,
        rx: mpsc::UnboundedReceiver<WorkMessage>,
    }

    fn fixture() -> Fixture {
        fixture_with_store(Arc::new(MemoryUnitStore::new()))
    }

    fn fixture_with_store(units: Arc<dyn UnitStore>) -> Fixture {
        let projects: Arc<dyn ProjectStore> = Arc::new(MemoryProjectStore::new());
        let notifier = Arc::new(ProgressNotifier::new(32, Duration::from_secs(60)));
        let lifecycle = Arc::new(UnitLifecycle::new(Arc::clone(&units), Arc::clone(&notifier), 3));
        let (queue, rx) = ChannelWorkQueue::new();
        let barrier = Arc::new(CompletionBarrier::new(
            Arc::clone(&units),
            Arc::clone(&projects),
            Arc::new(queue),
            Arc::clone(&notifier),
            "http://localhost/callbacks",
            3,
        ));

        Fixture {
            processor: CallbackProcessor::new(
                Arc::clone(&units),
                Arc::clone(&projects),
                Arc::clone(&lifecycle),
                barrier,
                Arc::clone(&notifier),
            ),
            lifecycle,
            units,
            projects,
            notifier,
            rx,
        }
    }

    /// Project with `count` units already queued
    async fn queued_units(fx: &Fixture, count: u32) -> (Project, Vec<NarrativeUnit>) {
        let project = Project::new("Novel");
        fx.projects.insert(&project).await.unwrap();
        let mut units = Vec::new();
        for ordinal in 1..=count {
            let unit = NarrativeUnit::new_narrative(project.id, None, ordinal, format!("Chapter {}", ordinal), "Text.");
            fx.lifecycle.create(&unit).await.unwrap();
            fx.lifecycle.mark_pending(unit.id).await.unwrap();
            fx.lifecycle.mark_queued(unit.id).await.unwrap();
            units.push(unit);
        }
        fx.projects.advance_cohort(project.id).await.unwrap();
        (project, units)
    }

    fn characters(names: &[&str]) -> AnalysisResult {
        AnalysisResult::Characters {
            characters: names
                .iter()
                .map(|name| CharacterMention {
                    name: name.to_string(),
                    aliases: Vec::new(),
                    mention_count: 1,
                })
                .collect(),
        }
    }

    fn completed(unit_id: Uuid, result: Option<AnalysisResult>) -> CompletionCallback {
        CompletionCallback {
            unit_id,
            status: CallbackStatus::Completed,
            error: None,
            result,
            processing_time_ms: 1200,
        }
    }

    #[tokio::test]
    async fn test_completion_without_status_updates() {
        let fx = fixture();
        let (project, units) = queued_units(&fx, 2).await;

        let unit = fx
            .processor
            .handle_completion(completed(units[0].id, Some(characters(&["Mira"]))))
            .await
            .unwrap();
        assert_eq!(unit.status(), UnitStatus::Completed);
        assert_eq!(unit.lifecycle().processing_time_ms, Some(1200));

        assert!(fx.units.load_result(unit.id).await.unwrap().is_some());
        assert_eq!(fx.projects.known_entities(project.id).await.unwrap(), vec!["Mira".to_string()]);
    }

    #[tokio::test]
    async fn test_last_completion_triggers_single_merge() {
        let mut fx = fixture();
        let (project, units) = queued_units(&fx, 2).await;

        for unit in &units {
            fx.processor
                .handle_completion(completed(unit.id, Some(characters(&["Mira"]))))
                .await
                .unwrap();
        }

        let mut merges = 0;
        while let Ok(message) = fx.rx.try_recv() {
            if let WorkMessage::GlobalMerge(msg) = message {
                assert_eq!(msg.project_id, project.id);
                merges += 1;
            }
        }
        assert_eq!(merges, 1);
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_illegal() {
        let mut fx = fixture();
        let (_, units) = queued_units(&fx, 1).await;
        let callback = completed(units[0].id, Some(characters(&["Mira"])));

        fx.processor.handle_completion(callback.clone()).await.unwrap();
        let err = fx.processor.handle_completion(callback).await.unwrap_err();
        assert!(matches!(err, LifecycleError::IllegalTransition { from: UnitStatus::Completed, .. }));

        let mut merges = 0;
        while let Ok(message) = fx.rx.try_recv() {
            if matches!(message, WorkMessage::GlobalMerge(_)) {
                merges += 1;
            }
        }
        assert_eq!(merges, 1);
    }

    #[tokio::test]
    async fn test_invalid_result_fails_unit() {
        let fx = fixture();
        let (_, units) = queued_units(&fx, 1).await;

        let unit = fx
            .processor
            .handle_completion(completed(units[0].id, Some(characters(&["  "]))))
            .await
            .unwrap();
        assert_eq!(unit.status(), UnitStatus::Failed);
        assert!(unit.failure_reason().unwrap().starts_with("invalid result"));

        assert!(fx.units.load_result(units[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_result_fails_unit() {
        let fx = fixture();
        let (_, units) = queued_units(&fx, 1).await;

        let unit = fx.processor.handle_completion(completed(units[0].id, None)).await.unwrap();
        assert_eq!(unit.status(), UnitStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_callback_records_reason() {
        let fx = fixture();
        let (_, units) = queued_units(&fx, 1).await;

        let unit = fx
            .processor
            .handle_completion(CompletionCallback {
                unit_id: units[0].id,
                status: CallbackStatus::Failed,
                error: Some("model timeout".to_string()),
                result: None,
                processing_time_ms: 0,
            })
            .await
            .unwrap();
        assert_eq!(unit.status(), UnitStatus::Failed);
        assert_eq!(unit.failure_reason(), Some("model timeout"));
    }

    #[tokio::test]
    async fn test_status_updates_move_forward_only() {
        let fx = fixture();
        let (_, units) = queued_units(&fx, 1).await;
        let unit_id = units[0].id;

        let update = |status| StatusUpdateCallback {
            unit_id,
            status,
            trace_id: None,
        };

        let unit = fx.processor.handle_status_update(update(UnitStatus::Analyzing)).await.unwrap();
        assert_eq!(unit.status(), UnitStatus::Analyzing);

        let err = fx.processor.handle_status_update(update(UnitStatus::Analyzing)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::IllegalTransition { .. }));

        let err = fx.processor.handle_status_update(update(UnitStatus::Queued)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::IllegalTransition { .. }));

        let unit = fx.processor.handle_status_update(update(UnitStatus::Validating)).await.unwrap();
        assert_eq!(unit.status(), UnitStatus::Validating);
    }

    #[tokio::test]
    async fn test_callback_for_unknown_unit() {
        let fx = fixture();
        let err = fx
            .processor
            .handle_completion(completed(Uuid::new_v4(), Some(characters(&["Mira"]))))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UnitNotFound(_)));
    }

    #[tokio::test]
    async fn test_progress_published_to_observers() {
        let fx = fixture();
        let (project, units) = queued_units(&fx, 2).await;
        let mut events = fx.notifier.subscribe(project.id).await;

        fx.processor
            .handle_completion(completed(units[0].id, Some(characters(&["Mira"]))))
            .await
            .unwrap();

        match events.try_recv() {
            Ok(ProgressEvent::Progress {
                completed_units,
                total_units,
                ..
            }) => {
                assert_eq!(completed_units, 1);
                assert_eq!(total_units, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_result_write_leaves_callback_retryable() {
        let store = Arc::new(FlakyResultStore {
            inner: MemoryUnitStore::new(),
            fail_next_save: AtomicBool::new(true),
        });
        let mut fx = fixture_with_store(store.clone());
        let (_, units) = queued_units(&fx, 1).await;
        let callback = completed(units[0].id, Some(characters(&["Mira"])));

        let err = fx.processor.handle_completion(callback.clone()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Store(_)));
        assert_eq!(fx.lifecycle.load(units[0].id).await.unwrap().status(), UnitStatus::Queued);
        assert!(fx.rx.try_recv().is_err());

        // Worker redelivers the same callback
        let unit = fx.processor.handle_completion(callback).await.unwrap();
        assert_eq!(unit.status(), UnitStatus::Completed);
        assert!(store.load_result(unit.id).await.unwrap().is_some());
        assert!(matches!(fx.rx.try_recv(), Ok(WorkMessage::GlobalMerge(_))));
    }
}
