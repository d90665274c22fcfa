//! Concurrency-safe table of task records.
//!
//! The registry is the sole source of truth for task state. Every mutation
//! goes through [`TaskRegistry::update`] under the write lock, which makes
//! updates to one task totally ordered (single writer at a time) and lets
//! any number of readers take consistent snapshots concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use scribe_types::{Task, TaskId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CoreError;

/// Shared, clonable handle to the in-memory task table.
///
/// All returned [`Task`] values are snapshots: clones taken under the lock,
/// safe to hold, serialize or publish without further coordination.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `Queued` task for `source` and return its snapshot.
    pub async fn create(&self, source: impl Into<String>) -> Task {
        let task = Task::new(source);
        let snapshot = task.clone();
        self.inner.write().await.insert(task.id.clone(), task);
        debug!(task_id = %snapshot.id, "task created");
        snapshot
    }

    /// Snapshot one task.
    pub async fn get(&self, id: &str) -> Result<Task, CoreError> {
        self.inner
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                task_id: id.to_owned(),
            })
    }

    /// Snapshot every task, newest first.
    pub async fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Apply one atomic state transition and return the resulting snapshot.
    ///
    /// The mutator runs under the write lock; `updated_at` and the commit
    /// counter are bumped afterwards so every committed change is
    /// distinguishable by `revision`.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<Task, CoreError>
    where
        F: FnOnce(&mut Task),
    {
        let mut guard = self.inner.write().await;
        let task = guard.get_mut(id).ok_or_else(|| CoreError::NotFound {
            task_id: id.to_owned(),
        })?;
        mutate(task);
        task.updated_at = chrono::Utc::now();
        task.revision += 1;
        Ok(task.clone())
    }

    /// Remove a task record.
    ///
    /// Refuses with [`CoreError::Conflict`] while the task is still active;
    /// callers that want force semantics cancel the task first (the
    /// dispatcher's delete path does exactly that).
    pub async fn remove(&self, id: &str) -> Result<(), CoreError> {
        let mut guard = self.inner.write().await;
        let task = guard.get(id).ok_or_else(|| CoreError::NotFound {
            task_id: id.to_owned(),
        })?;
        if task.status.is_active() {
            return Err(CoreError::Conflict {
                task_id: id.to_owned(),
            });
        }
        guard.remove(id);
        debug!(task_id = %id, "task removed");
        Ok(())
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_types::{LogKind, TaskStatus};

    #[tokio::test]
    async fn create_then_get_returns_equal_snapshots() {
        let registry = TaskRegistry::new();
        let created = registry.create("a.wav").await;
        let fetched = registry.get(&created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.status, TaskStatus::Queued);
        assert_eq!(fetched.revision, 0);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let registry = TaskRegistry::new();
        let err = registry.get("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_orders_newest_first() {
        let registry = TaskRegistry::new();
        let first = registry.create("one.wav").await;
        let second = registry.create("two.wav").await;
        let third = registry.create("three.wav").await;

        let listed: Vec<TaskId> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(listed, vec![third.id, second.id, first.id]);
    }

    #[tokio::test]
    async fn update_returns_snapshot_and_bumps_revision() {
        let registry = TaskRegistry::new();
        let created = registry.create("a.wav").await;

        let updated = registry
            .update(&created.id, |task| {
                task.status = TaskStatus::Running;
                task.message = "decoding audio".to_owned();
                task.log(LogKind::Info, "started");
            })
            .await
            .unwrap();

        assert_eq!(updated.status, TaskStatus::Running);
        assert_eq!(updated.revision, 1);
        assert!(updated.updated_at >= created.updated_at);

        // The snapshot handed back earlier is unaffected.
        assert_eq!(created.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn updates_to_one_task_are_serialized() {
        let registry = TaskRegistry::new();
        let task = registry.create("a.wav").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let id = task.id.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    registry
                        .update(&id, |t| {
                            t.log(LogKind::Info, "tick");
                        })
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let final_task = registry.get(&task.id).await.unwrap();
        // 400 committed updates plus the creation log entry.
        assert_eq!(final_task.revision, 400);
        assert_eq!(final_task.logs.len(), 401);
    }

    #[tokio::test]
    async fn remove_refuses_active_tasks() {
        let registry = TaskRegistry::new();
        let task = registry.create("busy.wav").await;

        let err = registry.remove(&task.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));

        registry
            .update(&task.id, |t| t.status = TaskStatus::Cancelled)
            .await
            .unwrap();
        registry.remove(&task.id).await.unwrap();
        assert!(registry.is_empty().await);

        let err = registry.remove(&task.id).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }
}
