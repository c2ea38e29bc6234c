use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_NAMESPACE: &str = "label_detect";

// Pop the next message into the processing list and lease it until ARGV[1].
const RECEIVE_SCRIPT: &str = r#"
local body = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if body then
  redis.call('ZADD', KEYS[3], ARGV[1], body)
end
return body
"#;

// Move every message whose lease ended before ARGV[1] back to the queue head.
const REQUEUE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, body in ipairs(expired) do
  redis.call('ZREM', KEYS[1], body)
  if redis.call('LREM', KEYS[2], 1, body) > 0 then
    redis.call('RPUSH', KEYS[3], body)
  end
end
return #expired
"#;

/// Processing request carried from intake to the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMessage {
    pub job_id: Uuid,
    pub source_key: String,
    pub store_ref: String,
    pub max_labels: i32,
    pub min_confidence: f64,
}

/// Why a delivered body could not be turned into a [`JobMessage`].
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedMessage {
    /// Job id, when the body still carried a readable one.
    pub job_id: Option<Uuid>,
    pub reason: String,
}

impl JobMessage {
    pub fn to_body(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(QueueError::Serialize)
    }

    pub fn parse(body: &str) -> Result<Self, MalformedMessage> {
        serde_json::from_str(body).map_err(|e| {
            let job_id = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("job_id")?.as_str()?.parse::<Uuid>().ok());
            MalformedMessage {
                job_id,
                reason: e.to_string(),
            }
        })
    }
}

/// A received message. Stays invisible to other consumers until it is
/// acknowledged, dead-lettered, or its lease runs out.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub body: String,
}

/// At-least-once message transport between intake and workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError>;

    /// Take the next message, or `None` when the queue is empty.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Park a message that can never succeed.
    async fn dead_letter(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Transport reachability, for health checks.
    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed queue: a pending list, a processing list, and a sorted set
/// of lease deadlines that gives received messages a visibility timeout.
pub struct RedisJobQueue {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
    leases_key: String,
    dead_letter_key: String,
    visibility_timeout: Duration,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, visibility_timeout: Duration) -> Result<Self, QueueError> {
        Self::with_namespace(redis_url, DEFAULT_NAMESPACE, visibility_timeout)
    }

    pub fn with_namespace(
        redis_url: &str,
        namespace: &str,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            queue_key: format!("{namespace}:jobs"),
            processing_key: format!("{namespace}:processing"),
            leases_key: format!("{namespace}:leases"),
            dead_letter_key: format!("{namespace}:dead_letter"),
            visibility_timeout,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Return expired leases to the queue. Returns how many were found.
    pub async fn requeue_expired(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let count: u64 = Script::new(REQUEUE_SCRIPT)
            .key(&self.leases_key)
            .key(&self.processing_key)
            .key(&self.queue_key)
            .arg(Utc::now().timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(count)
    }

    /// Get the current queue depth (pending messages).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.queue_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    pub async fn dead_letter_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn
            .llen(&self.dead_letter_key)
            .await
            .map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Push a raw body, bypassing serialization. Lets integration runs
    /// exercise the malformed-message path.
    pub async fn enqueue_raw(&self, body: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(&self.queue_key, body)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError> {
        self.enqueue_raw(&message.to_body()?).await
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let deadline = Utc::now().timestamp() + self.visibility_timeout.as_secs() as i64;
        let body: Option<String> = Script::new(RECEIVE_SCRIPT)
            .key(&self.queue_key)
            .key(&self.processing_key)
            .key(&self.leases_key)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(body.map(|body| Delivery { body }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lrem(&self.processing_key, 1, &delivery.body)
            .ignore()
            .zrem(&self.leases_key, &delivery.body)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lpush(&self.dead_letter_key, &delivery.body)
            .ignore()
            .lrem(&self.processing_key, 1, &delivery.body)
            .ignore()
            .zrem(&self.leases_key, &delivery.body)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
