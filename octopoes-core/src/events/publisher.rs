use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use octopoes_config::BrokerSettings;
use serde_json::Value;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tracing::{debug, error, warn};

use crate::{
    error::Result,
    events::{
        DbEvent, EntityType, ScanProfileIncrement, ScanProfileMutation,
        broker::{BrokerError, HANDLE_EVENT_BATCH_TASK, MessageBroker, TaskMessage},
    },
};

/// Sink for change events emitted after a commit.
#[async_trait]
pub trait EventPublisher: Send + Sync + fmt::Debug {
    async fn publish(&self, event: DbEvent) -> Result<()>;
}

#[derive(Debug, Clone)]
struct PersistentMessage {
    channel: String,
    payload: Value,
}

#[derive(Debug)]
struct BatchState {
    events: Vec<DbEvent>,
    persistent: Vec<PersistentMessage>,
    last_flush: Instant,
}

impl BatchState {
    fn is_empty(&self) -> bool {
        self.events.is_empty() && self.persistent.is_empty()
    }
}

/// Batches events and fans them out to the broker.
///
/// Events are grouped per entity type into one `handle_event_batch` task each.
/// Scan profile changes additionally produce persistent mutation messages on
/// `{client}__scan_profile_mutations`, and level raises on
/// `{client}__scan_profile_increments`.
pub struct EventManager {
    broker: Arc<dyn MessageBroker>,
    queue: String,
    batch_size: usize,
    flush_interval: Duration,
    state: Mutex<BatchState>,
    timer: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventManager")
            .field("broker", &self.broker)
            .field("queue", &self.queue)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .finish()
    }
}

impl EventManager {
    pub fn new(broker: Arc<dyn MessageBroker>, settings: &BrokerSettings) -> Self {
        Self {
            broker,
            queue: settings.event_queue.clone(),
            batch_size: settings.batch_size.max(1),
            flush_interval: settings.flush_interval(),
            state: Mutex::new(BatchState {
                events: Vec::new(),
                persistent: Vec::new(),
                last_flush: Instant::now(),
            }),
            timer: parking_lot::Mutex::new(None),
        }
    }

    /// Creates a manager whose buffer is also flushed by a background timer.
    /// Must be called inside a Tokio runtime.
    pub fn spawn(broker: Arc<dyn MessageBroker>, settings: &BrokerSettings) -> Arc<Self> {
        let manager = Arc::new(Self::new(broker, settings));
        let handle = tokio::spawn(Self::run_timer(
            Arc::downgrade(&manager),
            manager.flush_interval,
        ));
        *manager.timer.lock() = Some(handle);
        manager
    }

    async fn run_timer(manager: Weak<Self>, period: Duration) {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let Some(manager) = manager.upgrade() else {
                break;
            };
            if let Err(err) = manager.flush_if_due().await {
                error!("timed event flush failed: {err}");
            }
        }
    }

    pub async fn pending_events(&self) -> usize {
        self.state.lock().await.events.len()
    }

    /// Flushes when `flush_interval` has passed since the last flush.
    pub async fn flush_if_due(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.last_flush.elapsed() < self.flush_interval {
            return Ok(());
        }
        self.flush_locked(&mut state).await
    }

    pub async fn force_flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut BatchState) -> Result<()> {
        state.last_flush = Instant::now();
        if state.is_empty() {
            return Ok(());
        }

        let events = std::mem::take(&mut state.events);
        let persistent = std::mem::take(&mut state.persistent);

        let outcome = match self.send(&events, &persistent).await {
            Err(err) if err.is_transient() => {
                warn!("broker connection lost during flush, reconnecting: {err}");
                match self.broker.reconnect().await {
                    Ok(()) => self.send(&events, &persistent).await,
                    Err(reconnect_err) => Err(reconnect_err),
                }
            }
            other => other,
        };

        if let Err(err) = outcome {
            error!(
                events = events.len(),
                "event flush failed, keeping events for the next attempt: {err}"
            );
            restore(&mut state.events, events);
            restore(&mut state.persistent, persistent);
            return Err(err.into());
        }
        Ok(())
    }

    async fn send(
        &self,
        events: &[DbEvent],
        persistent: &[PersistentMessage],
    ) -> std::result::Result<(), BrokerError> {
        let mut groups: BTreeMap<EntityType, Vec<&DbEvent>> = BTreeMap::new();
        for event in events {
            groups.entry(event.entity_type()).or_default().push(event);
        }

        for (entity_type, group) in groups {
            let message = TaskMessage::new(
                HANDLE_EVENT_BATCH_TASK,
                self.queue.clone(),
                vec![serde_json::to_value(&group)?],
            );
            self.broker.send_task(&message).await?;
            debug!(
                entity_type = entity_type.as_str(),
                count = group.len(),
                "event batch sent"
            );
        }

        for message in persistent {
            self.broker
                .publish_persistent(&message.channel, &message.payload)
                .await?;
        }
        Ok(())
    }
}

fn restore<T>(buffer: &mut Vec<T>, mut unsent: Vec<T>) {
    unsent.append(buffer);
    *buffer = unsent;
}

impl Drop for EventManager {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl EventPublisher for EventManager {
    async fn publish(&self, event: DbEvent) -> Result<()> {
        let mut state = self.state.lock().await;

        if let DbEvent::ScanProfile(change) = &event {
            let client = &change.change.client;
            if let Some(increment) = ScanProfileIncrement::from_event(change) {
                state.persistent.push(PersistentMessage {
                    channel: format!("{client}__scan_profile_increments"),
                    payload: serde_json::to_value(increment)?,
                });
            }
            state.persistent.push(PersistentMessage {
                channel: format!("{client}__scan_profile_mutations"),
                payload: serde_json::to_value(ScanProfileMutation::from_event(change))?,
            });
        }
        state.events.push(event);

        if state.events.len() >= self.batch_size {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }
}
