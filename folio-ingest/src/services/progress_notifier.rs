//! Per-project progress channels
//!
//! One logical channel per project, each with any number of subscribers
//! (typically one per SSE connection). Publishing is best-effort: a project
//! with no subscribers is not an error, a full subscriber queue drops the
//! event for that subscriber, and a closed subscriber is removed.
//!
//! Channels are owned by the notifier instance (no global registry). A
//! periodic heartbeat keeps connections alive through proxies and closes
//! channels that saw no publish for longer than the idle timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use folio_common::ProgressEvent;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::models::ProjectProgress;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

struct ProjectChannel {
    subscribers: Vec<Subscriber>,
    last_activity: Instant,
}

impl ProjectChannel {
    fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    /// Deliver to every subscriber, dropping closed ones; returns deliveries
    fn deliver(&mut self, project_id: Uuid, event: &ProgressEvent) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    project_id = %project_id,
                    subscriber = subscriber.id,
                    event = event.event_type(),
                    "Progress subscriber lagging, event dropped"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(project_id = %project_id, subscriber = subscriber.id, "Progress subscriber gone");
                false
            }
        });
        delivered
    }
}

/// Registry of live progress channels keyed by project id
pub struct ProgressNotifier {
    channels: RwLock<HashMap<Uuid, ProjectChannel>>,
    capacity: usize,
    idle_timeout: Duration,
    next_subscriber_id: AtomicU64,
}

impl ProgressNotifier {
    pub fn new(capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            idle_timeout,
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.channel_capacity, config.channel_idle_timeout)
    }

    /// Register a new observer of `project_id`
    ///
    /// The receiver yields `None` once the channel is closed (idle timeout,
    /// explicit close or shutdown).
    pub async fn subscribe(&self, project_id: Uuid) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.channels.write().await;
        let channel = channels.entry(project_id).or_insert_with(ProjectChannel::new);
        channel.subscribers.push(Subscriber { id, tx });
        channel.last_activity = Instant::now();

        info!(
            project_id = %project_id,
            subscriber = id,
            subscribers = channel.subscribers.len(),
            "Progress subscriber registered"
        );
        rx
    }

    /// Push an event to every subscriber of a project
    ///
    /// Returns the number of subscribers that received it.
    pub async fn publish(&self, project_id: Uuid, event: ProgressEvent) -> usize {
        let mut channels = self.channels.write().await;
        let Some(channel) = channels.get_mut(&project_id) else {
            debug!(project_id = %project_id, event = event.event_type(), "No progress observers");
            return 0;
        };

        channel.last_activity = Instant::now();
        let delivered = channel.deliver(project_id, &event);
        if channel.subscribers.is_empty() {
            channels.remove(&project_id);
            debug!(project_id = %project_id, "Progress channel removed (no subscribers left)");
        }
        delivered
    }

    /// Publish a `Progress` event built from a snapshot
    pub async fn publish_progress(&self, progress: &ProjectProgress, message: impl Into<String>) -> usize {
        self.publish(
            progress.project_id,
            ProgressEvent::Progress {
                project_id: progress.project_id,
                status: progress.status,
                completed_units: progress.completed_units,
                total_units: progress.total_units,
                message: message.into(),
                timestamp: Utc::now(),
            },
        )
        .await
    }

    /// Send a heartbeat on every live channel and close idle ones
    ///
    /// Returns the number of channels still open afterwards.
    pub async fn heartbeat(&self) -> usize {
        let mut channels = self.channels.write().await;
        let heartbeat = ProgressEvent::heartbeat();

        channels.retain(|project_id, channel| {
            if channel.last_activity.elapsed() >= self.idle_timeout {
                info!(
                    project_id = %project_id,
                    idle_secs = channel.last_activity.elapsed().as_secs(),
                    "Closing idle progress channel"
                );
                return false;
            }

            // Heartbeats do not count as activity
            channel.deliver(*project_id, &heartbeat);
            !channel.subscribers.is_empty()
        });

        channels.len()
    }

    /// Close a project's channel; subscribers see end-of-stream
    pub async fn close(&self, project_id: Uuid) -> bool {
        let removed = self.channels.write().await.remove(&project_id).is_some();
        if removed {
            info!(project_id = %project_id, "Progress channel closed");
        }
        removed
    }

    /// Close every channel
    pub async fn shutdown(&self) {
        let mut channels = self.channels.write().await;
        let count = channels.len();
        channels.clear();
        info!(channels = count, "Progress notifier shut down");
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn subscriber_count(&self, project_id: Uuid) -> usize {
        self.channels
            .read()
            .await
            .get(&project_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    /// Run [`heartbeat`](Self::heartbeat) every `interval` until cancelled
    pub fn spawn_heartbeat(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = super::background_ticker(interval, "progress heartbeat");
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Progress heartbeat stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let open = self.heartbeat().await;
                        debug!(channels = open, "Progress heartbeat sent");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_common::ProjectStatus;

    fn progress_event(project_id: Uuid, completed: u32) -> ProgressEvent {
        ProgressEvent::Progress {
            project_id,
            status: ProjectStatus::Analyzing,
            completed_units: completed,
            total_units: 10,
            message: "unit completed".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_observers_is_not_an_error() {
        let notifier = ProgressNotifier::new(8, Duration::from_secs(60));
        assert_eq!(notifier.publish(Uuid::new_v4(), ProgressEvent::heartbeat()).await, 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let notifier = ProgressNotifier::new(8, Duration::from_secs(60));
        let project_id = Uuid::new_v4();
        let mut first = notifier.subscribe(project_id).await;
        let mut second = notifier.subscribe(project_id).await;

        let event = progress_event(project_id, 1);
        assert_eq!(notifier.publish(project_id, event.clone()).await, 2);
        assert_eq!(first.recv().await, Some(event.clone()));
        assert_eq!(second.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_events_are_scoped_to_project() {
        let notifier = ProgressNotifier::new(8, Duration::from_secs(60));
        let project_a = Uuid::new_v4();
        let project_b = Uuid::new_v4();
        let mut rx_b = notifier.subscribe(project_b).await;

        notifier.subscribe(project_a).await;
        notifier.publish(project_a, progress_event(project_a, 1)).await;

        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed() {
        let notifier = ProgressNotifier::new(8, Duration::from_secs(60));
        let project_id = Uuid::new_v4();
        let rx = notifier.subscribe(project_id).await;
        drop(rx);

        assert_eq!(notifier.publish(project_id, progress_event(project_id, 1)).await, 0);
        assert_eq!(notifier.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_subscriber_is_kept() {
        let notifier = ProgressNotifier::new(1, Duration::from_secs(60));
        let project_id = Uuid::new_v4();
        let mut rx = notifier.subscribe(project_id).await;

        assert_eq!(notifier.publish(project_id, progress_event(project_id, 1)).await, 1);
        assert_eq!(notifier.publish(project_id, progress_event(project_id, 2)).await, 0);
        assert_eq!(notifier.subscriber_count(project_id).await, 1);

        match rx.recv().await {
            Some(ProgressEvent::Progress { completed_units, .. }) => assert_eq!(completed_units, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_live_channels() {
        let notifier = ProgressNotifier::new(8, Duration::from_secs(60));
        let project_id = Uuid::new_v4();
        let mut rx = notifier.subscribe(project_id).await;

        assert_eq!(notifier.heartbeat().await, 1);
        assert!(matches!(rx.recv().await, Some(ProgressEvent::Heartbeat { .. })));
    }

    #[tokio::test]
    async fn test_idle_channel_is_closed_on_heartbeat() {
        let notifier = ProgressNotifier::new(8, Duration::from_millis(30));
        let project_id = Uuid::new_v4();
        let mut rx = notifier.subscribe(project_id).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(notifier.heartbeat().await, 0);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_and_shutdown_end_streams() {
        let notifier = ProgressNotifier::new(8, Duration::from_secs(60));
        let project_a = Uuid::new_v4();
        let project_b = Uuid::new_v4();
        let mut rx_a = notifier.subscribe(project_a).await;
        let mut rx_b = notifier.subscribe(project_b).await;

        assert!(notifier.close(project_a).await);
        assert!(!notifier.close(project_a).await);
        assert_eq!(rx_a.recv().await, None);

        notifier.shutdown().await;
        assert_eq!(rx_b.recv().await, None);
        assert_eq!(notifier.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_spawned_heartbeat_stops_on_cancel() {
        let notifier = Arc::new(ProgressNotifier::new(8, Duration::from_secs(60)));
        let project_id = Uuid::new_v4();
        let mut rx = notifier.subscribe(project_id).await;
        let cancel = CancellationToken::new();

        let handle = Arc::clone(&notifier).spawn_heartbeat(Duration::from_millis(10), cancel.clone());

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(matches!(event, Some(ProgressEvent::Heartbeat { .. })));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
