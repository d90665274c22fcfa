//! Per-task progress fan-out.
//!
//! Each task gets one bounded broadcast channel. Workers publish a snapshot
//! after every committed change; subscribers receive a catch-up snapshot
//! first and then live updates. A slow subscriber lags and skips forward to
//! the oldest retained snapshot (newer snapshots supersede older ones, so
//! dropping stale ones loses nothing) and publishing never blocks the
//! worker.

use std::collections::HashMap;

use scribe_types::{Task, TaskId};
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

use crate::error::CoreError;
use crate::registry::TaskRegistry;

/// Buffered snapshots per subscriber before lag kicks in.
const FEED_CAPACITY: usize = 64;

/// Multicast hub keyed by task id.
#[derive(Debug, Default)]
pub struct ProgressBroadcaster {
    feeds: RwLock<HashMap<TaskId, broadcast::Sender<Task>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a feed exists for `id`. Called at task creation so that
    /// subscribers arriving at any later point find the channel.
    pub async fn open(&self, id: &str) {
        self.feeds
            .write()
            .await
            .entry(id.to_owned())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0);
    }

    /// Fan a committed snapshot out to every current subscriber.
    ///
    /// Missing feed and zero-subscriber cases are fine: publishing is
    /// fire-and-forget and never reports backpressure to the caller.
    pub async fn publish(&self, snapshot: &Task) {
        if let Some(sender) = self.feeds.read().await.get(&snapshot.id) {
            let delivered = sender.send(snapshot.clone()).unwrap_or(0);
            trace!(
                task_id = %snapshot.id,
                revision = snapshot.revision,
                subscribers = delivered,
                "snapshot published"
            );
        }
    }

    /// Close the feed for `id`.
    ///
    /// Called after the terminal snapshot is published (and on deletion).
    /// Subscribers drain whatever is buffered and then see the end of the
    /// stream.
    pub async fn close(&self, id: &str) {
        self.feeds.write().await.remove(id);
    }

    /// Subscribe to a task's snapshots.
    ///
    /// The returned [`TaskFeed`] yields the current snapshot immediately
    /// (catch-up) and live snapshots afterwards, ending once the task is
    /// terminal or its feed closes. Unknown ids fail with
    /// [`CoreError::NotFound`]. Dropping the feed unsubscribes; dropping it
    /// twice is trivially idempotent.
    ///
    /// The receiver is registered before the registry is read so that no
    /// commit can fall between catch-up and the live stream; anything older
    /// than the catch-up snapshot that is already buffered gets filtered by
    /// revision in [`TaskFeed::next`].
    pub async fn subscribe(
        &self,
        registry: &TaskRegistry,
        id: &str,
    ) -> Result<TaskFeed, CoreError> {
        let receiver = {
            let mut feeds = self.feeds.write().await;
            feeds
                .entry(id.to_owned())
                .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
                .subscribe()
        };

        let catch_up = match registry.get(id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                // Unknown or just-deleted id: drop the feed entry this call
                // may have created so bad subscribes cannot grow the map.
                drop(receiver);
                let mut feeds = self.feeds.write().await;
                if feeds
                    .get(id)
                    .is_some_and(|sender| sender.receiver_count() == 0)
                {
                    feeds.remove(id);
                }
                return Err(error);
            }
        };
        let live = if catch_up.is_terminal() {
            // Terminal catch-up is the whole story: exactly one snapshot.
            None
        } else {
            Some(receiver)
        };

        Ok(TaskFeed {
            last_revision: catch_up.revision,
            catch_up: Some(catch_up),
            live,
        })
    }
}

/// A single subscriber's view of one task's snapshot stream.
///
/// Not restartable: once [`next`] returns `None` the feed is finished.
///
/// [`next`]: TaskFeed::next
#[derive(Debug)]
pub struct TaskFeed {
    catch_up: Option<Task>,
    live: Option<broadcast::Receiver<Task>>,
    last_revision: u64,
}

impl TaskFeed {
    /// Next snapshot, or `None` when the stream has ended.
    ///
    /// Snapshots are strictly newer than anything previously yielded; a lag
    /// simply skips the overwritten middle. A terminal snapshot is yielded
    /// and then the stream ends.
    pub async fn next(&mut self) -> Option<Task> {
        if let Some(snapshot) = self.catch_up.take() {
            if snapshot.is_terminal() {
                self.live = None;
            }
            return Some(snapshot);
        }

        let receiver = self.live.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(snapshot) => {
                    if snapshot.revision <= self.last_revision {
                        continue;
                    }
                    self.last_revision = snapshot.revision;
                    if snapshot.is_terminal() {
                        self.live = None;
                    }
                    return Some(snapshot);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "subscriber lagged; skipping stale snapshots");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.live = None;
                    return None;
                }
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_types::TaskStatus;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn commit_and_publish(
        registry: &TaskRegistry,
        broadcaster: &ProgressBroadcaster,
        id: &str,
        mutate: impl FnOnce(&mut Task),
    ) -> Task {
        let snapshot = registry.update(id, mutate).await.unwrap();
        broadcaster.publish(&snapshot).await;
        snapshot
    }

    #[tokio::test]
    async fn subscriber_gets_catch_up_then_live_updates() {
        let registry = TaskRegistry::new();
        let broadcaster = ProgressBroadcaster::new();
        let task = registry.create("a.wav").await;
        broadcaster.open(&task.id).await;

        let mut feed = broadcaster.subscribe(&registry, &task.id).await.unwrap();

        let first = feed.next().await.unwrap();
        assert_eq!(first.status, TaskStatus::Queued);

        commit_and_publish(&registry, &broadcaster, &task.id, |t| {
            t.status = TaskStatus::Running;
            t.advance_progress(0.5);
        })
        .await;

        let second = timeout(Duration::from_secs(1), feed.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, TaskStatus::Running);
        assert!(second.revision > first.revision);
    }

    #[tokio::test]
    async fn subscribe_to_unknown_task_fails() {
        let registry = TaskRegistry::new();
        let broadcaster = ProgressBroadcaster::new();
        let err = broadcaster
            .subscribe(&registry, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn late_subscriber_sees_exactly_one_terminal_snapshot() {
        let registry = TaskRegistry::new();
        let broadcaster = ProgressBroadcaster::new();
        let task = registry.create("a.wav").await;
        broadcaster.open(&task.id).await;

        commit_and_publish(&registry, &broadcaster, &task.id, |t| {
            t.status = TaskStatus::Completed;
            t.advance_progress(1.0);
        })
        .await;
        broadcaster.close(&task.id).await;

        let mut feed = broadcaster.subscribe(&registry, &task.id).await.unwrap();
        let only = feed.next().await.unwrap();
        assert_eq!(only.status, TaskStatus::Completed);
        assert!(timeout(Duration::from_millis(100), feed.next())
            .await
            .expect("stream must end, not block")
            .is_none());
    }

    #[tokio::test]
    async fn terminal_snapshot_ends_a_live_stream() {
        let registry = TaskRegistry::new();
        let broadcaster = ProgressBroadcaster::new();
        let task = registry.create("a.wav").await;
        broadcaster.open(&task.id).await;

        let mut feed = broadcaster.subscribe(&registry, &task.id).await.unwrap();
        feed.next().await.unwrap(); // catch-up

        commit_and_publish(&registry, &broadcaster, &task.id, |t| {
            t.status = TaskStatus::Cancelled;
        })
        .await;
        broadcaster.close(&task.id).await;

        let last = timeout(Duration::from_secs(1), feed.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.status, TaskStatus::Cancelled);
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn snapshots_arrive_in_commit_order_per_subscriber() {
        let registry = TaskRegistry::new();
        let broadcaster = ProgressBroadcaster::new();
        let task = registry.create("a.wav").await;
        broadcaster.open(&task.id).await;

        let mut feed = broadcaster.subscribe(&registry, &task.id).await.unwrap();

        for _ in 0..10 {
            commit_and_publish(&registry, &broadcaster, &task.id, |t| {
                let next = t.progress + 0.05;
                t.advance_progress(next);
            })
            .await;
        }

        let mut last_revision = 0;
        let mut last_progress = -1.0f32;
        for _ in 0..11 {
            let snapshot = timeout(Duration::from_secs(1), feed.next())
                .await
                .unwrap()
                .unwrap();
            assert!(snapshot.revision >= last_revision);
            assert!(snapshot.progress >= last_progress);
            last_revision = snapshot.revision;
            last_progress = snapshot.progress;
        }
    }

    #[tokio::test]
    async fn slow_subscriber_skips_forward_instead_of_stalling() {
        let registry = TaskRegistry::new();
        let broadcaster = ProgressBroadcaster::new();
        let task = registry.create("a.wav").await;
        broadcaster.open(&task.id).await;

        let mut feed = broadcaster.subscribe(&registry, &task.id).await.unwrap();
        feed.next().await.unwrap(); // catch-up

        // Publish far beyond the per-subscriber buffer without reading.
        for _ in 0..(FEED_CAPACITY * 3) {
            commit_and_publish(&registry, &broadcaster, &task.id, |t| {
                let next = t.progress + 0.001;
                t.advance_progress(next);
            })
            .await;
        }

        // The reader lags, skips the overwritten prefix, and still observes
        // strictly increasing revisions.
        let mut last_revision = 0;
        let mut seen = 0;
        while seen < FEED_CAPACITY / 2 {
            let snapshot = timeout(Duration::from_secs(1), feed.next())
                .await
                .unwrap()
                .unwrap();
            assert!(snapshot.revision > last_revision);
            last_revision = snapshot.revision;
            seen += 1;
        }
        assert!(last_revision > FEED_CAPACITY as u64);
    }
}
