//! In-process work queue.
//!
//! Shares the lease semantics of the Redis queue but lives entirely in
//! process memory: a single ready deque, a lease table for in-flight items
//! and a dead-letter list. Used by tests and single-process deployments
//! where the gateway and workers share one runtime.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::debug;
use uuid::Uuid;

use super::{LeasedItem, QueueError, QueueStats, WorkItem, WorkQueue};

/// Default lease duration before an unacked item becomes redeliverable.
const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);

struct DeadLetterEntry {
    item: WorkItem,
    error: String,
    moved_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    ready: VecDeque<WorkItem>,
    in_flight: HashMap<Uuid, (WorkItem, DateTime<Utc>)>,
    dead_letter: Vec<DeadLetterEntry>,
}

/// In-memory `WorkQueue` implementation with lease-based redelivery.
pub struct InMemoryWorkQueue {
    state: Mutex<State>,
    notify: Notify,
    lease_ttl: Duration,
}

impl InMemoryWorkQueue {
    /// Creates a queue with the default lease TTL.
    pub fn new() -> Self {
        Self::with_lease_ttl(DEFAULT_LEASE_TTL)
    }

    /// Creates a queue with a custom lease TTL.
    pub fn with_lease_ttl(lease_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            lease_ttl,
        }
    }

    /// Dead-letter entries as `(item, error, moved_at)` triples, oldest
    /// first. Mirrors the fields the Redis dead-letter list records.
    pub async fn dead_letter_entries(&self) -> Vec<(WorkItem, String, DateTime<Utc>)> {
        let state = self.state.lock().await;
        state
            .dead_letter
            .iter()
            .map(|e| (e.item, e.error.clone(), e.moved_at))
            .collect()
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            state.ready.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<LeasedItem>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking state so a concurrent
            // enqueue between the check and the wait cannot be missed.
            let notified = self.notify.notified();

            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.ready.pop_front() {
                    let leased = LeasedItem {
                        item,
                        lease_id: Uuid::new_v4(),
                        deadline: Utc::now()
                            + chrono::Duration::from_std(self.lease_ttl)
                                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
                    };
                    state.in_flight.insert(leased.lease_id, (item, leased.deadline));
                    return Ok(Some(leased));
                }
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn ack(&self, leased: &LeasedItem) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&leased.lease_id)
            .ok_or(QueueError::LeaseNotFound(leased.lease_id))?;
        Ok(())
    }

    async fn fail(&self, leased: &LeasedItem, error: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let (item, _) = state
            .in_flight
            .remove(&leased.lease_id)
            .ok_or(QueueError::LeaseNotFound(leased.lease_id))?;
        state.dead_letter.push(DeadLetterEntry {
            item,
            error: error.to_string(),
            moved_at: Utc::now(),
        });
        Ok(())
    }

    async fn redeliver_expired(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut redelivered = 0;

        {
            let mut state = self.state.lock().await;
            let expired: Vec<Uuid> = state
                .in_flight
                .iter()
                .filter(|(_, (_, deadline))| *deadline <= now)
                .map(|(lease_id, _)| *lease_id)
                .collect();

            for lease_id in expired {
                if let Some((item, _)) = state.in_flight.remove(&lease_id) {
                    debug!(job_id = %item.job_id, stage = %item.stage, "Redelivering expired lease");
                    state.ready.push_back(item);
                    redelivered += 1;
                }
            }
        }

        for _ in 0..redelivered {
            self.notify.notify_one();
        }

        Ok(redelivered)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueStats {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            dead_letter: state.dead_letter.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;

    fn test_item() -> WorkItem {
        WorkItem::new(Uuid::new_v4(), Stage::Ingest)
    }

    #[tokio::test]
    async fn test_enqueue_then_dequeue() {
        let queue = InMemoryWorkQueue::new();
        let item = test_item();

        queue.enqueue(item).await.unwrap();
        let leased = queue
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .expect("item should be delivered");

        assert_eq!(leased.item, item);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.in_flight, 1);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = InMemoryWorkQueue::new();
        let got = queue.dequeue(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_ack_releases_lease() {
        let queue = InMemoryWorkQueue::new();
        queue.enqueue(test_item()).await.unwrap();

        let leased = queue
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        queue.ack(&leased).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.total(), 0);

        // Double ack is an error.
        assert!(matches!(
            queue.ack(&leased).await,
            Err(QueueError::LeaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_moves_to_dead_letter() {
        let queue = InMemoryWorkQueue::new();
        let item = test_item();
        let before = Utc::now();
        queue.enqueue(item).await.unwrap();

        let leased = queue
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        queue.fail(&leased, "job record missing").await.unwrap();

        let entries = queue.dead_letter_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, item);
        assert_eq!(entries[0].1, "job record missing");
        assert!(entries[0].2 >= before);
        assert!(entries[0].2 <= Utc::now());
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = InMemoryWorkQueue::with_lease_ttl(Duration::from_millis(0));
        let item = test_item();
        queue.enqueue(item).await.unwrap();

        let first = queue
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();

        // Lease expired immediately; the sweep must requeue it.
        let redelivered = queue.redeliver_expired().await.unwrap();
        assert_eq!(redelivered, 1);

        let second = queue
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.item, item);
        assert_ne!(second.lease_id, first.lease_id);
    }

    #[tokio::test]
    async fn test_unexpired_lease_is_not_redelivered() {
        let queue = InMemoryWorkQueue::new();
        queue.enqueue(test_item()).await.unwrap();
        let _leased = queue
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(queue.redeliver_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_each_item_delivered_to_one_worker() {
        let queue = std::sync::Arc::new(InMemoryWorkQueue::new());
        for _ in 0..4 {
            queue.enqueue(test_item()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = std::sync::Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                queue.dequeue(Duration::from_millis(100)).await.unwrap()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            let leased = handle.await.unwrap().expect("every worker gets an item");
            assert!(seen.insert(leased.lease_id));
        }
        assert_eq!(seen.len(), 4);
    }
}
