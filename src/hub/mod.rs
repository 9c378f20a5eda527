//! Per-task progress distribution.
//!
//! Each task gets one [`ProgressHub`]: a small actor whose control loop owns
//! the set of subscriber queues. Callers talk to it over an unbounded
//! command channel, so [`ProgressHub::publish`] never waits, no matter how
//! slow a subscriber is. Every subscriber has its own bounded queue; a
//! subscriber whose queue is full is dropped rather than allowed to hold up
//! the producer or anyone else.
//!
//! A terminal event (completed or failed) is delivered and then every queue
//! is closed, so subscriber streams end on their own.

mod registry;

pub use registry::HubRegistry;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use reelforge_common::{ProgressEvent, TaskId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use registry::Eviction;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

enum Command {
    Register {
        id: u64,
        queue: mpsc::Sender<ProgressEvent>,
    },
    Unregister(u64),
    Publish(ProgressEvent),
    AcquirePublisher,
    ReleasePublisher,
}

/// Handle to one task's hub. Cheap to clone.
#[derive(Clone)]
pub struct ProgressHub {
    task_id: TaskId,
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHub")
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl ProgressHub {
    /// Start a standalone hub that never leaves any registry.
    pub fn new(task_id: TaskId) -> Self {
        Self::spawn(task_id, None)
    }

    pub(crate) fn spawn(task_id: TaskId, eviction: Option<Eviction>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_hub(task_id, rx, eviction));
        Self {
            task_id,
            commands: tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Add a subscriber with a queue of `capacity` events.
    ///
    /// On a hub that already delivered its terminal event the returned
    /// subscription is closed and yields nothing.
    pub fn register(&self, capacity: usize) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        // A stopped hub drops the queue sender, which closes the subscription.
        let _ = self.commands.send(Command::Register { id, queue: tx });
        Subscription {
            id,
            events: rx,
            hub: self.commands.clone(),
        }
    }

    /// Remove a subscriber and close its queue. Unknown ids are ignored.
    pub fn unregister(&self, id: u64) {
        let _ = self.commands.send(Command::Unregister(id));
    }

    /// Deliver an event to every current subscriber without waiting.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.commands.send(Command::Publish(event));
    }

    /// Mark this handle as a producer until the returned guard drops.
    ///
    /// A hub with a live publisher stays registered even while nobody
    /// listens, so late subscribers still find it.
    pub fn publisher(&self) -> Publisher {
        let _ = self.commands.send(Command::AcquirePublisher);
        Publisher { hub: self.clone() }
    }
}

/// Producer side of a hub. Dropping it releases the hub for eviction.
#[derive(Debug)]
pub struct Publisher {
    hub: ProgressHub,
}

impl Publisher {
    pub fn publish(&self, event: ProgressEvent) {
        self.hub.publish(event);
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let _ = self.hub.commands.send(Command::ReleasePublisher);
    }
}

/// One subscriber's view of a hub: a stream of events in publish order.
///
/// Dropping the subscription unregisters it.
pub struct Subscription {
    id: u64,
    events: mpsc::Receiver<ProgressEvent>,
    hub: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }
}

impl Stream for Subscription {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.hub.send(Command::Unregister(self.id));
    }
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<u64, mpsc::Sender<ProgressEvent>>,
    publishers: usize,
    terminal: bool,
}

impl HubState {
    fn apply(&mut self, task_id: TaskId, command: Command) {
        match command {
            Command::Register { id, queue } => {
                if self.terminal {
                    // Dropping the sender closes the new subscription
                    drop(queue);
                } else {
                    self.subscribers.insert(id, queue);
                }
            }
            Command::Unregister(id) => {
                self.subscribers.remove(&id);
            }
            Command::AcquirePublisher => self.publishers += 1,
            Command::ReleasePublisher => self.publishers = self.publishers.saturating_sub(1),
            Command::Publish(event) => {
                if self.terminal {
                    return;
                }
                self.subscribers
                    .retain(|id, queue| match queue.try_send(event.clone()) {
                        Ok(()) => true,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(
                                "Dropping slow progress subscriber {} for task {}",
                                id,
                                task_id
                            );
                            false
                        }
                        Err(TrySendError::Closed(_)) => false,
                    });
                if event.is_terminal() {
                    self.terminal = true;
                    self.subscribers.clear();
                }
            }
        }
    }

    /// Nobody listens and nobody will publish anything that matters.
    fn idle(&self) -> bool {
        self.subscribers.is_empty() && (self.terminal || self.publishers == 0)
    }
}

async fn run_hub(
    task_id: TaskId,
    mut commands: mpsc::UnboundedReceiver<Command>,
    eviction: Option<Eviction>,
) {
    let mut state = HubState::default();
    let mut pending: Option<Command> = None;

    loop {
        let command = match pending.take() {
            Some(command) => command,
            None => match commands.recv().await {
                Some(command) => command,
                None => break,
            },
        };
        state.apply(task_id, command);

        // Standalone hubs live until every handle is gone
        let Some(eviction) = eviction.as_ref().filter(|_| state.idle()) else {
            continue;
        };
        match eviction.try_evict(&mut commands) {
            Ok(()) => break,
            Err(next) => pending = next,
        }
    }

    tracing::debug!("Progress hub for task {} stopped", task_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use reelforge_common::TaskStatus;

    fn event(task_id: TaskId, status: TaskStatus, frame: u64) -> ProgressEvent {
        ProgressEvent::new(task_id, status, format!("frame {frame}")).with_frames(
            frame as f64,
            frame,
            100,
        )
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_publish_order() {
        let id = TaskId::new();
        let hub = ProgressHub::new(id);
        let mut a = hub.register(16);
        let mut b = hub.register(16);

        for frame in 1..=3 {
            hub.publish(event(id, TaskStatus::Processing, frame));
        }

        for sub in [&mut a, &mut b] {
            for frame in 1..=3 {
                assert_eq!(sub.recv().await.unwrap().current_frame, frame);
            }
        }
    }

    #[tokio::test]
    async fn test_terminal_event_closes_streams() {
        let id = TaskId::new();
        let hub = ProgressHub::new(id);
        let sub = hub.register(16);

        hub.publish(event(id, TaskStatus::Processing, 10));
        hub.publish(event(id, TaskStatus::Completed, 100));
        hub.publish(event(id, TaskStatus::Processing, 11));

        let received: Vec<ProgressEvent> = sub.collect().await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_register_after_terminal_is_closed() {
        let id = TaskId::new();
        let hub = ProgressHub::new(id);
        hub.publish(event(id, TaskStatus::Failed, 0));

        let mut late = hub.register(16);
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_only_that_subscriber() {
        let id = TaskId::new();
        let hub = ProgressHub::new(id);
        let mut slow = hub.register(2);
        let mut fast = hub.register(16);

        for frame in 1..=5 {
            hub.publish(event(id, TaskStatus::Processing, frame));
            // The fast subscriber keeps up
            assert_eq!(fast.recv().await.unwrap().current_frame, frame);
        }

        // The slow one got what fit in its queue, then was closed
        assert_eq!(slow.recv().await.unwrap().current_frame, 1);
        assert_eq!(slow.recv().await.unwrap().current_frame, 2);
        assert!(slow.recv().await.is_none());

        hub.publish(event(id, TaskStatus::Processing, 6));
        assert_eq!(fast.recv().await.unwrap().current_frame, 6);
    }

    #[tokio::test]
    async fn test_unregister_closes_queue() {
        let id = TaskId::new();
        let hub = ProgressHub::new(id);
        let mut sub = hub.register(4);

        hub.unregister(sub.id());
        hub.unregister(9999);
        hub.publish(event(id, TaskStatus::Processing, 1));

        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_never_blocks_without_readers() {
        let id = TaskId::new();
        let hub = ProgressHub::new(id);
        let _idle = hub.register(1);

        for frame in 0..10_000 {
            hub.publish(event(id, TaskStatus::Processing, frame));
        }
    }
}
