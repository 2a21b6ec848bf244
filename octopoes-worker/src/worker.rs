use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use octopoes_config::Settings;
use octopoes_core::{
    database::infrastructure::XtdbHttpClient,
    events::{
        DbEvent, EventManager, MessageBroker, RedisBroker, TaskMessage,
        broker::HANDLE_EVENT_BATCH_TASK,
    },
    service::ServiceFactory,
};
use tracing::{debug, error, info, warn};

/// How long one blocking pop waits before checking for shutdown again.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub fn factory_for(
    settings: &Settings,
    client: &str,
    publisher: Arc<EventManager>,
) -> anyhow::Result<ServiceFactory> {
    let store = XtdbHttpClient::new(&settings.xtdb, Some(client))
        .with_context(|| format!("failed to create store client for {client}"))?;
    Ok(ServiceFactory::new(Arc::new(store), publisher, client)
        .with_bit_settings(settings.bits.clone()))
}

/// Feeds event batches from the broker back into the consistency service,
/// one service and commit per client per batch.
#[derive(Debug)]
pub struct EventWorker {
    settings: Settings,
    publisher: Arc<EventManager>,
    factories: HashMap<String, ServiceFactory>,
}

impl EventWorker {
    pub fn new(settings: Settings, publisher: Arc<EventManager>) -> Self {
        Self {
            settings,
            publisher,
            factories: HashMap::new(),
        }
    }

    /// Runs until ctrl-c.
    pub async fn run(&mut self, consumer: &RedisBroker) -> anyhow::Result<()> {
        let queue = self.settings.broker.event_queue.clone();
        info!(queue = %queue, "event worker started");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                received = consumer.receive_task(&queue, POLL_TIMEOUT) => {
                    match received {
                        Ok(Some(task)) => {
                            if let Err(err) = self.handle_task(task).await {
                                error!("event batch failed: {err:#}");
                            }
                        }
                        Ok(None) => {}
                        Err(err) if err.is_transient() => {
                            warn!("lost broker connection, reconnecting: {err}");
                            consumer.reconnect().await.context("broker reconnect failed")?;
                        }
                        Err(err) => error!("could not read task: {err}"),
                    }
                }
            }
        }
    }

    async fn handle_task(&mut self, task: TaskMessage) -> anyhow::Result<()> {
        if task.task != HANDLE_EVENT_BATCH_TASK {
            warn!(task = %task.task, id = %task.id, "ignoring unknown task");
            return Ok(());
        }
        let payload = task
            .args
            .into_iter()
            .next()
            .context("event batch task without arguments")?;
        let events: Vec<DbEvent> =
            serde_json::from_value(payload).context("malformed event batch")?;

        let mut by_client: BTreeMap<String, Vec<DbEvent>> = BTreeMap::new();
        for event in events {
            by_client
                .entry(event.client().to_string())
                .or_default()
                .push(event);
        }

        for (client, events) in by_client {
            let count = events.len();
            let service = self.factory(&client)?.service();
            let outcome = service.process_events(events).await;
            service
                .commit()
                .await
                .with_context(|| format!("commit for {client} failed"))?;
            debug!(
                client = %client,
                count,
                handled = outcome.handled,
                failed = outcome.failed,
                "event batch processed"
            );
        }
        Ok(())
    }

    fn factory(&mut self, client: &str) -> anyhow::Result<&ServiceFactory> {
        if !self.factories.contains_key(client) {
            let factory = factory_for(&self.settings, client, self.publisher.clone())?;
            self.factories.insert(client.to_string(), factory);
        }
        self.factories
            .get(client)
            .with_context(|| format!("no service factory for {client}"))
    }
}
