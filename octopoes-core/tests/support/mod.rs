#![allow(dead_code)]

use std::{
    net::Ipv4Addr,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use octopoes_config::BitSettings;
use octopoes_core::{
    bits::BitRegistry,
    database::infrastructure::InMemoryDocumentStore,
    events::{BrokerError, DbEvent, InProcEventBus, MessageBroker, TaskMessage},
    service::{ConsistencyService, ServiceFactory},
};
use octopoes_model::{
    DnsARecord, Hostname, IpAddressV4, Network, Ooi, Reference, ScanProfile,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::{Receiver, error::TryRecvError};

pub const CLIENT: &str = "test";

/// Rounds of event processing before a graph is considered to never settle.
const MAX_ROUNDS: usize = 50;

pub fn valid_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// An engine over the in-memory store whose change events loop back into
/// the service, the way workers would feed them.
pub struct TestEngine {
    pub store: Arc<InMemoryDocumentStore>,
    pub bus: Arc<InProcEventBus>,
    pub factory: ServiceFactory,
    events: Receiver<DbEvent>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_bits(BitRegistry::builtin())
    }

    pub fn without_bits() -> Self {
        Self::with_bits(BitRegistry::empty())
    }

    pub fn with_bits(bits: BitRegistry) -> Self {
        let store = Arc::new(InMemoryDocumentStore::new());
        let bus = Arc::new(InProcEventBus::new(4096));
        let events = bus.subscribe();
        let factory =
            ServiceFactory::new(store.clone(), bus.clone(), CLIENT).with_bits(bits);
        Self {
            store,
            bus,
            factory,
            events,
        }
    }

    pub fn with_bit_settings(mut self, settings: BitSettings) -> Self {
        self.factory = self.factory.with_bit_settings(settings);
        self
    }

    pub fn service(&self) -> ConsistencyService {
        self.factory.service()
    }

    pub fn drain(&mut self) -> Vec<DbEvent> {
        let mut drained = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => drained.push(event),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    panic!("event bus lagged by {skipped} events")
                }
            }
        }
        drained
    }

    /// Processes events until no new ones appear. Returns how many events
    /// were handled.
    pub async fn settle(&mut self) -> usize {
        let mut handled = 0;
        for _ in 0..MAX_ROUNDS {
            let batch = self.drain();
            if batch.is_empty() {
                return handled;
            }
            let service = self.service();
            let outcome = service.process_events(batch).await;
            assert_eq!(outcome.failed, 0, "event processing failed");
            handled += outcome.handled;
            service.commit().await.expect("commit should succeed");
        }
        panic!("graph did not settle within {MAX_ROUNDS} rounds");
    }

    /// Declares every object in one commit, then settles.
    pub async fn declare(&mut self, oois: &[Ooi]) {
        let service = self.service();
        for ooi in oois {
            service
                .save_declaration(ooi.clone(), valid_time(), None)
                .await
                .expect("declaration should be accepted");
        }
        service.commit().await.expect("commit should succeed");
        self.settle().await;
    }

    pub async fn set_declared_level(&mut self, reference: &Reference, level: u8) {
        let service = self.service();
        service
            .save_scan_profile(
                ScanProfile::declared(
                    reference.clone(),
                    level.try_into().expect("level should be valid"),
                ),
                valid_time(),
            )
            .await
            .expect("scan profile should save");
        service.commit().await.expect("commit should succeed");
        self.settle().await;
    }

    pub async fn recalculate(&mut self) -> octopoes_core::service::RecalculationSummary {
        let service = self.service();
        let summary = service
            .recalculate_scan_profiles(valid_time())
            .await
            .expect("recalculation should succeed");
        service.commit().await.expect("commit should succeed");
        self.settle().await;
        summary
    }

    pub async fn exists(&self, reference: &Reference) -> bool {
        self.service().get_ooi(reference, valid_time()).await.is_ok()
    }

    pub async fn profile(&self, reference: &Reference) -> ScanProfile {
        self.service()
            .get_ooi(reference, valid_time())
            .await
            .expect("object should exist")
            .scan_profile
    }
}

/// A small DNS neighbourhood:
/// `example.com` with one A record pointing at `192.0.2.1`.
pub struct DnsFixture {
    pub network: Ooi,
    pub hostname: Ooi,
    pub address: Ooi,
    pub record: Ooi,
}

impl DnsFixture {
    pub fn new() -> Self {
        let network = Ooi::from(Network::new("internet"));
        let hostname = Ooi::from(Hostname::new(network.reference(), "example.com"));
        let address = Ooi::from(IpAddressV4 {
            network: network.reference(),
            address: Ipv4Addr::new(192, 0, 2, 1),
        });
        let record = Ooi::from(DnsARecord {
            hostname: hostname.reference(),
            address: address.reference(),
            value: "192.0.2.1".into(),
            ttl: Some(300),
        });
        Self {
            network,
            hostname,
            address,
            record,
        }
    }

    pub fn all(&self) -> Vec<Ooi> {
        vec![
            self.network.clone(),
            self.hostname.clone(),
            self.address.clone(),
            self.record.clone(),
        ]
    }

    pub fn resolved_hostname(&self) -> Reference {
        Ooi::from(octopoes_model::ResolvedHostname {
            hostname: self.hostname.reference(),
            address: self.address.reference(),
        })
        .reference()
    }
}

/// What a [`RecordingBroker`] should do with the next calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Transient,
    Permanent,
}

/// Broker fake that records traffic and fails on demand.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    pub tasks: Mutex<Vec<TaskMessage>>,
    pub persistent: Mutex<Vec<(String, Value)>>,
    pub reconnects: Mutex<usize>,
    failures: Mutex<Vec<Failure>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues failures consumed one per send, in order.
    pub fn fail_next(&self, failures: &[Failure]) {
        self.failures.lock().extend_from_slice(failures);
    }

    fn take_failure(&self) -> Result<(), BrokerError> {
        let mut failures = self.failures.lock();
        if failures.is_empty() {
            return Ok(());
        }
        match failures.remove(0) {
            Failure::Transient => Err(BrokerError::ConnectionLost("connection reset".into())),
            Failure::Permanent => Err(BrokerError::Rejected("WRONGTYPE".into())),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn channels(&self) -> Vec<String> {
        self.persistent
            .lock()
            .iter()
            .map(|(channel, _)| channel.clone())
            .collect()
    }
}

#[async_trait]
impl MessageBroker for RecordingBroker {
    async fn send_task(&self, message: &TaskMessage) -> Result<(), BrokerError> {
        self.take_failure()?;
        self.tasks.lock().push(message.clone());
        Ok(())
    }

    async fn publish_persistent(
        &self,
        channel: &str,
        payload: &Value,
    ) -> Result<(), BrokerError> {
        self.take_failure()?;
        self.persistent
            .lock()
            .push((channel.to_string(), payload.clone()));
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BrokerError> {
        *self.reconnects.lock() += 1;
        Ok(())
    }
}
