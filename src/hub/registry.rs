use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use reelforge_common::TaskId;
use tokio::sync::mpsc;

use super::{Command, ProgressHub, Publisher, Subscription};

type HubMap = HashMap<TaskId, (u64, ProgressHub)>;

/// Task id to live hub.
///
/// Hubs are created on first use and remove themselves once they have no
/// subscribers and either delivered a terminal event or have no publisher.
#[derive(Clone, Default)]
pub struct HubRegistry {
    hubs: Arc<Mutex<HubMap>>,
    generations: Arc<std::sync::atomic::AtomicU64>,
}

impl HubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live hub for `task_id`, creating one if needed.
    ///
    /// A hub only checks whether it is idle after a command, so one created
    /// here stays until something registers or publishes on it.
    #[cfg(test)]
    fn get_or_create(&self, task_id: TaskId) -> ProgressHub {
        let mut hubs = self.hubs.lock();
        self.entry(&mut hubs, task_id)
    }

    /// Subscribe to a task's hub.
    ///
    /// The registration is queued while the registry lock is held, so a hub
    /// that is about to evict itself sees it and stays.
    pub fn subscribe(&self, task_id: TaskId, capacity: usize) -> Subscription {
        let mut hubs = self.hubs.lock();
        self.entry(&mut hubs, task_id).register(capacity)
    }

    /// Publisher guard for a task's hub, taken under the registry lock.
    pub fn publisher(&self, task_id: TaskId) -> Publisher {
        let mut hubs = self.hubs.lock();
        self.entry(&mut hubs, task_id).publisher()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.hubs.lock().contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.hubs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs.lock().is_empty()
    }

    fn entry(&self, hubs: &mut HubMap, task_id: TaskId) -> ProgressHub {
        if let Some((_, hub)) = hubs.get(&task_id) {
            return hub.clone();
        }

        let generation = self
            .generations
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let eviction = Eviction {
            hubs: Arc::downgrade(&self.hubs),
            task_id,
            generation,
        };
        let hub = ProgressHub::spawn(task_id, Some(eviction));
        hubs.insert(task_id, (generation, hub.clone()));
        tracing::debug!("Created progress hub for task {}", task_id);
        hub
    }
}

/// A hub's way back into the registry that created it.
pub(crate) struct Eviction {
    hubs: Weak<Mutex<HubMap>>,
    task_id: TaskId,
    generation: u64,
}

impl Eviction {
    /// Remove the hub's entry unless a command slipped in first.
    ///
    /// Anything sent through the registry is sent under its lock, so once
    /// the lock is held and the queue is empty no new registration can
    /// reach this hub. Returns the pending command otherwise.
    pub(super) fn try_evict(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), Option<Command>> {
        let Some(hubs) = self.hubs.upgrade() else {
            // Registry is gone; nothing left to remove from
            return Ok(());
        };
        let mut hubs = hubs.lock();
        if let Ok(command) = commands.try_recv() {
            return Err(Some(command));
        }
        if hubs
            .get(&self.task_id)
            .is_some_and(|(generation, _)| *generation == self.generation)
        {
            hubs.remove(&self.task_id);
            tracing::debug!("Evicted progress hub for task {}", self.task_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelforge_common::{ProgressEvent, TaskStatus};
    use std::time::Duration;

    async fn wait_until_evicted(registry: &HubRegistry, id: TaskId) {
        for _ in 0..200 {
            if !registry.contains(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("hub for {id} was never evicted");
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_hub() {
        let registry = HubRegistry::new();
        let id = TaskId::new();
        let _publisher = registry.publisher(id);

        let a = registry.get_or_create(id);
        let b = registry.get_or_create(id);
        let mut sub = a.register(4);
        b.publish(ProgressEvent::new(id, TaskStatus::Processing, "hello"));

        assert_eq!(sub.recv().await.unwrap().message, "hello");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_hub_evicted_after_last_subscriber() {
        let registry = HubRegistry::new();
        let id = TaskId::new();
        let publisher = registry.publisher(id);
        let mut sub = registry.subscribe(id, 8);

        publisher.publish(ProgressEvent::new(id, TaskStatus::Completed, "done"));
        assert_eq!(sub.recv().await.unwrap().status, TaskStatus::Completed);
        assert!(sub.recv().await.is_none());

        // The publisher is still alive, but the hub is terminal
        wait_until_evicted(&registry, id).await;
        drop(publisher);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_hub_kept_while_publisher_lives() {
        let registry = HubRegistry::new();
        let id = TaskId::new();
        let publisher = registry.publisher(id);

        let sub = registry.subscribe(id, 8);
        drop(sub);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.contains(id));

        drop(publisher);
        wait_until_evicted(&registry, id).await;
    }

    #[tokio::test]
    async fn test_subscriber_without_publisher_is_evicted_on_drop() {
        let registry = HubRegistry::new();
        let id = TaskId::new();

        let sub = registry.subscribe(id, 8);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.contains(id));

        drop(sub);
        wait_until_evicted(&registry, id).await;
    }

    #[tokio::test]
    async fn test_dropped_handles_never_strand_a_hub() {
        let registry = HubRegistry::new();
        let id = TaskId::new();

        drop(registry.publisher(id));
        wait_until_evicted(&registry, id).await;

        drop(registry.subscribe(id, 8));
        wait_until_evicted(&registry, id).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_new_hub_after_eviction() {
        let registry = HubRegistry::new();
        let id = TaskId::new();

        let publisher = registry.publisher(id);
        publisher.publish(ProgressEvent::new(id, TaskStatus::Failed, "boom"));
        wait_until_evicted(&registry, id).await;

        // A fresh hub for the same id accepts subscribers again
        let _publisher = registry.publisher(id);
        let mut sub = registry.subscribe(id, 8);
        registry
            .get_or_create(id)
            .publish(ProgressEvent::new(id, TaskStatus::Processing, "again"));
        assert_eq!(sub.recv().await.unwrap().message, "again");
    }
}
