//! Fan-in of unit completions
//!
//! Once every analyzable unit of a project's current generation is COMPLETED,
//! exactly one `GLOBAL_MERGE` message is sent for that generation. Checks for
//! one project run under a per-project async mutex within this process, and
//! the durable `claim_merge` compare-and-set keeps the trigger at-most-once
//! across processes and restarts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use folio_common::ProgressEvent;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::load_progress;
use super::progress_notifier::ProgressNotifier;
use crate::error::DispatchError;
use crate::models::{GlobalMergeMessage, WorkMessage};
use crate::types::{ProjectStore, UnitStore, WorkQueue};

pub struct CompletionBarrier {
    units: Arc<dyn UnitStore>,
    projects: Arc<dyn ProjectStore>,
    queue: Arc<dyn WorkQueue>,
    notifier: Arc<ProgressNotifier>,
    callback_address: String,
    max_retry_count: u32,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CompletionBarrier {
    pub fn new(
        units: Arc<dyn UnitStore>,
        projects: Arc<dyn ProjectStore>,
        queue: Arc<dyn WorkQueue>,
        notifier: Arc<ProgressNotifier>,
        callback_address: impl Into<String>,
        max_retry_count: u32,
    ) -> Self {
        Self {
            units,
            projects,
            queue,
            notifier,
            callback_address: callback_address.into(),
            max_retry_count,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn project_lock(&self, project_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(project_id).or_default())
    }

    /// Send the global merge if the project's current generation is complete
    ///
    /// Returns true only for the call that actually triggered the merge.
    /// A project with no analyzable units never triggers.
    pub async fn check_and_trigger_merge(&self, project_id: Uuid) -> Result<bool, DispatchError> {
        let lock = self.project_lock(project_id).await;
        let outcome = {
            let _held = lock.lock().await;
            self.check_locked(project_id).await
        };
        self.release_project_lock(project_id, lock).await;
        outcome
    }

    /// Drop the project's entry unless another check holds or awaits it
    async fn release_project_lock(&self, project_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let ours = locks.get(&project_id).is_some_and(|entry| Arc::ptr_eq(entry, &lock));
        // Clones are only taken under the map lock, so the count cannot grow here
        drop(lock);
        if ours && locks.get(&project_id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(&project_id);
        }
    }

    /// Projects with a lock entry
    pub async fn tracked_projects(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn check_locked(&self, project_id: Uuid) -> Result<bool, DispatchError> {
        let Some(project) = self.projects.get(project_id).await? else {
            return Err(folio_common::Error::NotFound(format!("Project not found: {}", project_id)).into());
        };
        if !project.awaiting_merge() {
            debug!(project_id = %project_id, generation = project.generation, "Generation already merged");
            return Ok(false);
        }

        let counts = self.units.status_counts(project_id).await?;
        if !counts.all_completed() {
            debug!(
                project_id = %project_id,
                completed = counts.completed(),
                total = counts.total(),
                "Barrier not reached"
            );
            return Ok(false);
        }

        let generation = project.generation;
        if !self.projects.claim_merge(project_id, generation).await? {
            debug!(project_id = %project_id, generation, "Merge already claimed");
            return Ok(false);
        }

        let trace_id = Uuid::new_v4().to_string();
        let message = WorkMessage::GlobalMerge(GlobalMergeMessage {
            project_id,
            generation,
            callback_address: self.callback_address.clone(),
            trace_id: trace_id.clone(),
        });

        if let Err(err) = self.queue.send(&message).await {
            warn!(
                project_id = %project_id,
                generation,
                error = %err,
                "Merge dispatch failed, releasing claim"
            );
            self.projects.release_merge(project_id, generation).await?;
            return Err(err.into());
        }

        info!(
            project_id = %project_id,
            generation,
            units = counts.total(),
            trace_id = %trace_id,
            "Global merge triggered"
        );

        self.notifier
            .publish(
                project_id,
                ProgressEvent::MergeTriggered {
                    project_id,
                    generation,
                    trace_id,
                    timestamp: Utc::now(),
                },
            )
            .await;

        match load_progress(self.units.as_ref(), self.projects.as_ref(), project_id, self.max_retry_count).await {
            Ok(progress) => {
                self.notifier
                    .publish_progress(&progress, "all units completed, merge dispatched")
                    .await;
            }
            Err(e) => warn!(project_id = %project_id, error = %e, "Could not load progress"),
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryProjectStore, MemoryUnitStore};
    use crate::error::QueueError;
    use crate::models::{NarrativeUnit, Project, UnitStatus};
    use crate::services::unit_lifecycle::UnitLifecycle;
    use crate::services::work_queue::ChannelWorkQueue;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FlakyQueue {
        inner: ChannelWorkQueue,
        down: AtomicBool,
    }

    #[async_trait::async_trait]
    impl WorkQueue for FlakyQueue {
        async fn send(&self, message: &WorkMessage) -> Result<(), QueueError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(QueueError::Unavailable("connection refused".to_string()));
            }
            self.inner.send(message).await
        }
    }

    struct Fixture {
        barrier: Arc<CompletionBarrier>,
        lifecycle: UnitLifecycle,
        units: Arc<dyn UnitStore>,
        projects: Arc<dyn ProjectStore>,
        notifier: Arc<ProgressNotifier>,
        queue: Arc<FlakyQueue>,
        rx: mpsc::UnboundedReceiver<WorkMessage>,
    }

    fn fixture() -> Fixture {
        let units: Arc<dyn UnitStore> = Arc::new(MemoryUnitStore::new());
        let projects: Arc<dyn ProjectStore> = Arc::new(MemoryProjectStore::new());
        let notifier = Arc::new(ProgressNotifier::new(16, Duration::from_secs(60)));
        let (inner, rx) = ChannelWorkQueue::new();
        let queue = Arc::new(FlakyQueue {
            inner,
            down: AtomicBool::new(false),
        });

        Fixture {
            barrier: Arc::new(CompletionBarrier::new(
                Arc::clone(&units),
                Arc::clone(&projects),
                queue.clone(),
                Arc::clone(&notifier),
                "http://localhost/callbacks",
                3,
            )),
            lifecycle: UnitLifecycle::new(Arc::clone(&units), Arc::clone(&notifier), 3),
            units,
            projects,
            notifier,
            queue,
            rx,
        }
    }

    async fn seed(fx: &Fixture, count: u32) -> (Project, Vec<NarrativeUnit>) {
        let project = Project::new("Novel");
        fx.projects.insert(&project).await.unwrap();
        let mut units = Vec::new();
        for ordinal in 1..=count {
            let unit = NarrativeUnit::new_narrative(
                project.id,
                None,
                ordinal,
                format!("Chapter {}", ordinal),
                "Text.",
            );
            fx.units.insert(&unit).await.unwrap();
            units.push(unit);
        }
        fx.projects.advance_cohort(project.id).await.unwrap();
        (project, units)
    }

    async fn complete(fx: &Fixture, unit: &NarrativeUnit) {
        fx.lifecycle.mark_pending(unit.id).await.unwrap();
        fx.lifecycle
            .advance_to(unit.id, UnitStatus::Completed, 5)
            .await
            .unwrap();
    }

    fn merges(rx: &mut mpsc::UnboundedReceiver<WorkMessage>) -> Vec<GlobalMergeMessage> {
        let mut found = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let WorkMessage::GlobalMerge(msg) = message {
                found.push(msg);
            }
        }
        found
    }

    #[tokio::test]
    async fn test_no_merge_until_all_completed() {
        let mut fx = fixture();
        let (project, units) = seed(&fx, 2).await;

        complete(&fx, &units[0]).await;
        assert!(!fx.barrier.check_and_trigger_merge(project.id).await.unwrap());

        complete(&fx, &units[1]).await;
        assert!(fx.barrier.check_and_trigger_merge(project.id).await.unwrap());
        assert!(!fx.barrier.check_and_trigger_merge(project.id).await.unwrap());

        let sent = merges(&mut fx.rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].project_id, project.id);
        assert_eq!(sent[0].generation, 1);
    }

    #[tokio::test]
    async fn test_project_without_units_never_merges() {
        let fx = fixture();
        let project = Project::new("Empty");
        fx.projects.insert(&project).await.unwrap();

        assert!(!fx.barrier.check_and_trigger_merge(project.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_units_rearm_barrier() {
        let mut fx = fixture();
        let (project, units) = seed(&fx, 1).await;
        complete(&fx, &units[0]).await;
        assert!(fx.barrier.check_and_trigger_merge(project.id).await.unwrap());

        let late = NarrativeUnit::new_narrative(project.id, None, 2, "Chapter 2", "More.");
        fx.units.insert(&late).await.unwrap();
        fx.projects.advance_cohort(project.id).await.unwrap();
        assert!(!fx.barrier.check_and_trigger_merge(project.id).await.unwrap());

        complete(&fx, &late).await;
        assert!(fx.barrier.check_and_trigger_merge(project.id).await.unwrap());

        let generations: Vec<u32> = merges(&mut fx.rx).iter().map(|m| m.generation).collect();
        assert_eq!(generations, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_send_releases_claim() {
        let mut fx = fixture();
        let (project, units) = seed(&fx, 1).await;
        complete(&fx, &units[0]).await;

        fx.queue.down.store(true, Ordering::SeqCst);
        assert!(matches!(
            fx.barrier.check_and_trigger_merge(project.id).await,
            Err(DispatchError::Queue(_))
        ));
        assert!(fx.projects.get(project.id).await.unwrap().unwrap().awaiting_merge());

        fx.queue.down.store(false, Ordering::SeqCst);
        assert!(fx.barrier.check_and_trigger_merge(project.id).await.unwrap());
        assert_eq!(merges(&mut fx.rx).len(), 1);
    }

    #[tokio::test]
    async fn test_merge_event_published() {
        let fx = fixture();
        let (project, units) = seed(&fx, 1).await;
        let mut events = fx.notifier.subscribe(project.id).await;
        complete(&fx, &units[0]).await;

        fx.barrier.check_and_trigger_merge(project.id).await.unwrap();

        let mut saw_merge = false;
        while let Ok(event) = events.try_recv() {
            if let ProgressEvent::MergeTriggered { generation, .. } = event {
                assert_eq!(generation, 1);
                saw_merge = true;
            }
        }
        assert!(saw_merge);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_trigger_once() {
        let mut fx = fixture();
        let (project, units) = seed(&fx, 3).await;
        for unit in &units {
            complete(&fx, unit).await;
        }

        let project_id = project.id;
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let barrier = Arc::clone(&fx.barrier);
            tasks.spawn(async move { barrier.check_and_trigger_merge(project_id).await.unwrap() });
        }

        let mut triggered = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                triggered += 1;
            }
        }
        assert_eq!(triggered, 1);
        assert_eq!(merges(&mut fx.rx).len(), 1);
        assert_eq!(fx.barrier.tracked_projects().await, 0);
    }

    #[tokio::test]
    async fn test_project_locks_do_not_accumulate() {
        let fx = fixture();
        for _ in 0..5 {
            let (project, units) = seed(&fx, 1).await;
            assert!(!fx.barrier.check_and_trigger_merge(project.id).await.unwrap());
            complete(&fx, &units[0]).await;
            assert!(fx.barrier.check_and_trigger_merge(project.id).await.unwrap());
        }
        assert_eq!(fx.barrier.tracked_projects().await, 0);

        // Errors release the entry too
        assert!(fx.barrier.check_and_trigger_merge(Uuid::new_v4()).await.is_err());
        assert_eq!(fx.barrier.tracked_projects().await, 0);
    }
}
