use std::{fmt, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Task name consumed by event workers.
pub const HANDLE_EVENT_BATCH_TASK: &str = "octopoes.tasks.tasks.handle_event_batch";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    #[error("Broker rejected message: {0}")]
    Rejected(String),

    #[error("Failed to encode broker message: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl BrokerError {
    /// Connection-level failures are worth a reconnect and one retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::ConnectionLost(_))
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            BrokerError::ConnectionLost(err.to_string())
        } else {
            BrokerError::Rejected(err.to_string())
        }
    }
}

/// Envelope of a task pushed onto a worker queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    pub task: String,
    pub queue: String,
    pub args: Vec<Value>,
}

impl TaskMessage {
    pub fn new(task: impl Into<String>, queue: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            queue: queue.into(),
            args,
        }
    }
}

/// Port to the message broker.
#[async_trait]
pub trait MessageBroker: Send + Sync + fmt::Debug {
    async fn send_task(&self, message: &TaskMessage) -> Result<(), BrokerError>;

    /// Appends `payload` to a durable channel that outlives its consumers.
    async fn publish_persistent(
        &self,
        channel: &str,
        payload: &Value,
    ) -> Result<(), BrokerError>;

    async fn reconnect(&self) -> Result<(), BrokerError>;
}

pub struct RedisBroker {
    client: redis::Client,
    conn: RwLock<ConnectionManager>,
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisBroker {
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        info!("Connecting to Redis broker at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::Rejected(format!("Invalid Redis URL: {e}")))?;
        let conn = ConnectionManager::new(client.clone()).await?;

        info!("Successfully connected to Redis broker");
        Ok(Self {
            client,
            conn: RwLock::new(conn),
        })
    }

    async fn connection(&self) -> ConnectionManager {
        self.conn.read().await.clone()
    }

    /// Blocks up to `timeout` for the next task on `queue`.
    pub async fn receive_task(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<TaskMessage>, BrokerError> {
        let mut conn = self.connection().await;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(queue)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn send_task(&self, message: &TaskMessage) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(message)?;
        debug!(task = %message.task, queue = %message.queue, id = %message.id, "LPUSH task");

        let mut conn = self.connection().await;
        conn.lpush::<_, _, ()>(&message.queue, payload).await?;
        Ok(())
    }

    async fn publish_persistent(
        &self,
        channel: &str,
        payload: &Value,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(payload)?;
        let mut conn = self.connection().await;
        conn.lpush::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BrokerError> {
        warn!("Reconnecting to Redis broker");
        let fresh = ConnectionManager::new(self.client.clone()).await?;
        *self.conn.write().await = fresh;
        Ok(())
    }
}
