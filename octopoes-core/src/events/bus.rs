use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;

use crate::{
    error::Result,
    events::{DbEvent, publisher::EventPublisher},
};

/// In-process fan-out of change events. Stands in for the broker when the
/// engine and its consumers share a process.
pub struct InProcEventBus {
    sender: broadcast::Sender<DbEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DbEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for InProcEventBus {
    async fn publish(&self, event: DbEvent) -> Result<()> {
        // No subscribers is fine; events are fire-and-forget here.
        let _ = self.sender.send(event);
        Ok(())
    }
}
