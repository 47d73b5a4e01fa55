//! Redis-backed work queue with lease-based redelivery.
//!
//! # Queue structure
//!
//! Four Redis keys per queue:
//!
//! - `{name}`: main list of ready work items
//! - `{name}:processing`: items currently held by workers
//! - `{name}:leases`: hash of lease id → lease record (item + deadline)
//! - `{name}:dead_letter`: items that must not be redelivered
//!
//! # Reliability
//!
//! `dequeue` uses BRPOPLPUSH to atomically move an item from the main list
//! to the processing list, then records a lease with an expiry deadline. If
//! the worker crashes before acking, the periodic lease sweep finds the
//! expired lease and moves the item back to the main list, so delivery is
//! at-least-once.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LeasedItem, QueueError, QueueStats, WorkItem, WorkQueue};

/// Default lease duration before an unacked item becomes redeliverable.
const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);

/// Lease record stored in the lease hash.
///
/// Keeps the exact serialized payload so the processing-list entry can be
/// removed verbatim on ack or redelivery.
#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    item: WorkItem,
    deadline: DateTime<Utc>,
    payload: String,
}

/// Redis-backed `WorkQueue` implementation.
pub struct RedisWorkQueue {
    /// Connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Main ready list.
    queue_name: String,
    /// Items held by workers.
    processing_key: String,
    /// Lease hash: lease id → `LeaseRecord`.
    leases_key: String,
    /// Dead-letter list.
    dead_letter_key: String,
    /// How long a lease is valid.
    lease_ttl: Duration,
}

impl RedisWorkQueue {
    /// Connects to Redis and creates a new queue.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `queue_name` - Queue name, used as the Redis key prefix
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a queue from an existing connection manager.
    ///
    /// Useful when sharing a connection across components.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        Self {
            redis,
            queue_name: queue_name.to_string(),
            processing_key: format!("{}:processing", queue_name),
            leases_key: format!("{}:leases", queue_name),
            dead_letter_key: format!("{}:dead_letter", queue_name),
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    /// Sets the lease TTL.
    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    /// Returns the queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Fetches and deserializes a lease record, if held.
    async fn get_lease(&self, lease_id: Uuid) -> Result<Option<LeaseRecord>, QueueError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.hget(&self.leases_key, lease_id.to_string()).await?;
        match data {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(&item)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<LeasedItem>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BRPOPLPUSH atomically pops from the main list and pushes to the
        // processing list, so the item survives a crash between here and ack.
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_key)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        let payload = match payload {
            Some(p) => p,
            None => return Ok(None),
        };

        let item: WorkItem = serde_json::from_str(&payload)?;
        let lease_id = Uuid::new_v4();
        let deadline = Utc::now()
            + chrono::Duration::from_std(self.lease_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let record = LeaseRecord {
            item,
            deadline,
            payload,
        };
        conn.hset::<_, _, _, ()>(
            &self.leases_key,
            lease_id.to_string(),
            serde_json::to_string(&record)?,
        )
        .await?;

        Ok(Some(LeasedItem {
            item,
            lease_id,
            deadline,
        }))
    }

    async fn ack(&self, leased: &LeasedItem) -> Result<(), QueueError> {
        let record = self
            .get_lease(leased.lease_id)
            .await?
            .ok_or(QueueError::LeaseNotFound(leased.lease_id))?;

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(&self.processing_key, 1, &record.payload)
            .hdel(&self.leases_key, leased.lease_id.to_string());
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn fail(&self, leased: &LeasedItem, error: &str) -> Result<(), QueueError> {
        let record = self
            .get_lease(leased.lease_id)
            .await?
            .ok_or(QueueError::LeaseNotFound(leased.lease_id))?;

        let entry = serde_json::json!({
            "item": record.item,
            "error": error,
            "moved_at": Utc::now().to_rfc3339(),
        });

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(&self.processing_key, 1, &record.payload)
            .hdel(&self.leases_key, leased.lease_id.to_string())
            .lpush(&self.dead_letter_key, serde_json::to_string(&entry)?);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn redeliver_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let now = Utc::now();
        let mut redelivered = 0;

        let leases: std::collections::HashMap<String, String> =
            conn.hgetall(&self.leases_key).await?;

        for (lease_id, data) in leases {
            let record: LeaseRecord = match serde_json::from_str(&data) {
                Ok(r) => r,
                // An unparseable lease record is dropped rather than left
                // to block the sweep forever.
                Err(_) => {
                    conn.hdel::<_, _, ()>(&self.leases_key, &lease_id).await?;
                    continue;
                }
            };

            if record.deadline <= now {
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .lrem(&self.processing_key, 1, &record.payload)
                    .rpush(&self.queue_name, &record.payload)
                    .hdel(&self.leases_key, &lease_id);
                pipe.query_async::<_, ()>(&mut conn).await?;
                redelivered += 1;
            }
        }

        Ok(redelivered)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.redis.clone();
        let ready: usize = conn.llen(&self.queue_name).await?;
        let in_flight: usize = conn.hlen(&self.leases_key).await?;
        let dead_letter: usize = conn.llen(&self.dead_letter_key).await?;

        Ok(QueueStats {
            ready,
            in_flight,
            dead_letter,
        })
    }
}
