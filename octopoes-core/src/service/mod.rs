//! The consistency service.
//!
//! Writes from producers (declarations, observations, affirmations, scan
//! profiles) and change events fed back by workers both go through a
//! [`ConsistencyService`]. Each service owns one [`Session`]; nothing it
//! writes is visible to reads until [`ConsistencyService::commit`], and every
//! follow-up reaction happens through the events published after that
//! commit rather than by re-entering the service.

mod dispatch;
mod inference;
mod scan_levels;

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use octopoes_config::BitSettings;
use octopoes_model::{
    ObjectType, Ooi, Origin, OriginType, Paginated, ProfiledOoi, Reference,
    ReferenceNode, ScanProfile,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    bits::BitRegistry,
    database::{DocumentStore, Session, TransactionReceipt},
    error::{OctopoesError, OptionalExt, Result},
    events::{DbEvent, EntityType, OperationType, publisher::EventPublisher},
    repositories::{OriginFilter, Repositories},
};

pub use scan_levels::RecalculationSummary;

/// Builds one [`ConsistencyService`] per unit of work, all sharing the same
/// store, publisher, bits and client.
#[derive(Debug, Clone)]
pub struct ServiceFactory {
    store: Arc<dyn DocumentStore>,
    publisher: Arc<dyn EventPublisher>,
    bits: Arc<BitRegistry>,
    bit_settings: BitSettings,
    client: String,
}

impl ServiceFactory {
    /// Factory with the built-in bits and default bit settings.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn EventPublisher>,
        client: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            bits: Arc::new(BitRegistry::builtin()),
            bit_settings: BitSettings::default(),
            client: client.into(),
        }
    }

    /// Replaces the bits services run with.
    pub fn with_bits(mut self, bits: BitRegistry) -> Self {
        self.bits = Arc::new(bits);
        self
    }

    /// Enable/disable overrides applied on top of each bit's default.
    pub fn with_bit_settings(mut self, bit_settings: BitSettings) -> Self {
        self.bit_settings = bit_settings;
        self
    }

    /// Store node the services work on.
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Store shared by every service.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// A service over a fresh session.
    pub fn service(&self) -> ConsistencyService {
        let session =
            Arc::new(Session::new(self.store.clone(), self.publisher.clone()));
        let repositories = Repositories::xtdb(&session, &self.client);
        ConsistencyService::new(
            session,
            repositories,
            self.bits.clone(),
            self.bit_settings.clone(),
        )
    }
}

/// Outcome of [`ConsistencyService::process_events`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Events processed without error.
    pub handled: usize,
    /// Events whose handler returned an error.
    pub failed: usize,
}

/// A reference tree whose objects carry their scan profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfiledTree {
    pub root: ReferenceNode,
    /// Every object in the tree, root included.
    pub store: BTreeMap<Reference, ProfiledOoi>,
}

/// One unit of work against the graph. Reads go to the store as of the
/// requested valid time; writes stay in the session until [`Self::commit`].
#[derive(Debug)]
pub struct ConsistencyService {
    session: Arc<Session>,
    repositories: Repositories,
    bits: Arc<BitRegistry>,
    bit_settings: BitSettings,
}

impl ConsistencyService {
    pub fn new(
        session: Arc<Session>,
        repositories: Repositories,
        bits: Arc<BitRegistry>,
        bit_settings: BitSettings,
    ) -> Self {
        Self {
            session,
            repositories,
            bits,
            bit_settings,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    /// Submits everything written through this service and publishes the
    /// resulting change events.
    pub async fn commit(&self) -> Result<Option<TransactionReceipt>> {
        self.session.commit().await
    }

    // Reads

    /// The object with its scan profile, `Empty` when none is stored.
    pub async fn get_ooi(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<ProfiledOoi> {
        let ooi = self.repositories.oois.get(reference, valid_time).await?;
        Ok(self
            .populate_scan_profiles(vec![ooi], valid_time)
            .await?
            .remove(0))
    }

    /// One page of objects of the given kinds; all kinds when `types` is
    /// empty.
    pub async fn list_ooi(
        &self,
        types: &[ObjectType],
        valid_time: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Paginated<ProfiledOoi>> {
        let page = self
            .repositories
            .oois
            .list_oois(types, valid_time, limit, offset)
            .await?;
        Ok(Paginated {
            count: page.count,
            items: self.populate_scan_profiles(page.items, valid_time).await?,
        })
    }

    /// See [`crate::repositories::ports::OoiRepository::get_tree`].
    pub async fn get_ooi_tree(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
        search_types: &[ObjectType],
        depth: usize,
    ) -> Result<ProfiledTree> {
        let tree = self
            .repositories
            .oois
            .get_tree(reference, valid_time, search_types, depth)
            .await?;
        let profiled = self
            .populate_scan_profiles(tree.store.into_values().collect(), valid_time)
            .await?;
        Ok(ProfiledTree {
            root: tree.root,
            store: profiled
                .into_iter()
                .map(|profiled| (profiled.ooi.reference(), profiled))
                .collect(),
        })
    }

    pub async fn list_origins(
        &self,
        filter: &OriginFilter,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Origin>> {
        self.repositories
            .origins
            .list_origins(filter, valid_time)
            .await
    }

    /// Pairs every object with its stored scan profile, or an empty one.
    async fn populate_scan_profiles(
        &self,
        oois: Vec<Ooi>,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<ProfiledOoi>> {
        let references: BTreeSet<Reference> =
            oois.iter().map(Ooi::reference).collect();
        let mut profiles: BTreeMap<Reference, ScanProfile> = self
            .repositories
            .scan_profiles
            .get_bulk(&references, valid_time)
            .await?
            .into_iter()
            .map(|profile| (profile.reference().clone(), profile))
            .collect();

        Ok(oois
            .into_iter()
            .map(|ooi| {
                let reference = ooi.reference();
                let scan_profile = profiles
                    .remove(&reference)
                    .unwrap_or_else(|| ScanProfile::empty(reference));
                ProfiledOoi { ooi, scan_profile }
            })
            .collect())
    }

    // Writes

    /// Saves `oois` and records `origin` as the reason they exist.
    ///
    /// The origin's result is replaced by the references of `oois`. Unless
    /// the origin declares or affirms its own source, that source must
    /// already exist.
    pub async fn save_origin(
        &self,
        mut origin: Origin,
        oois: &[Ooi],
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut seen = BTreeSet::new();
        origin.result = oois
            .iter()
            .map(Ooi::reference)
            .filter(|reference| seen.insert(reference.clone()))
            .collect();

        let self_sourced = matches!(
            origin.origin_type,
            OriginType::Declaration | OriginType::Affirmation
        );
        if !self_sourced && !origin.result.contains(&origin.source) {
            let source = self
                .repositories
                .oois
                .get(&origin.source, valid_time)
                .await
                .optional()?;
            if source.is_none() {
                return Err(OctopoesError::SourceNotFound(origin.source));
            }
        }

        for ooi in oois {
            self.repositories.oois.save(ooi, valid_time, None).await?;
        }
        self.repositories.origins.save(&origin, valid_time).await
    }

    /// Declares `ooi` as a user-asserted fact.
    pub async fn save_declaration(
        &self,
        ooi: Ooi,
        valid_time: DateTime<Utc>,
        task_id: Option<Uuid>,
    ) -> Result<()> {
        let mut origin = Origin::declaration(ooi.reference());
        origin.task_id = task_id;
        self.save_origin(origin, &[ooi], valid_time).await
    }

    /// Records what `method` observed on `source` during task `task_id`.
    pub async fn save_observation(
        &self,
        source: Reference,
        method: impl Into<String>,
        task_id: Uuid,
        oois: &[Ooi],
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let origin = Origin::new(OriginType::Observation, method, source)
            .with_task_id(task_id);
        self.save_origin(origin, oois, valid_time).await
    }

    /// Vouches for `ooi` without claiming where it came from. Affirmations
    /// do not keep an object alive on their own.
    pub async fn save_affirmation(
        &self,
        ooi: Ooi,
        method: impl Into<String>,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let origin =
            Origin::new(OriginType::Affirmation, method, ooi.reference());
        self.save_origin(origin, &[ooi], valid_time).await
    }

    pub async fn save_scan_profile(
        &self,
        profile: ScanProfile,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let old = self
            .repositories
            .scan_profiles
            .get(profile.reference(), valid_time)
            .await
            .optional()?;
        self.repositories
            .scan_profiles
            .save(old.as_ref(), &profile, valid_time)
            .await
    }

    /// No-op when the reference has no scan profile.
    pub async fn delete_scan_profile(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let Some(profile) = self
            .repositories
            .scan_profiles
            .get(reference, valid_time)
            .await
            .optional()?
        else {
            return Ok(());
        };
        self.repositories
            .scan_profiles
            .delete(&profile, valid_time)
            .await
    }

    /// Removes the object regardless of its provenance. Dependent origins,
    /// parameters and the scan profile follow once the delete event is
    /// processed.
    pub async fn delete_ooi(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        self.repositories.oois.delete(reference, valid_time).await
    }

    /// Deletes the object when no origin still produces it. Affirmations do
    /// not count and are removed together with the object.
    async fn delete_if_unreferenced(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let origins = self
            .repositories
            .origins
            .list_origins(&OriginFilter::new().result(reference.clone()), valid_time)
            .await?;
        if origins
            .iter()
            .any(|origin| origin.origin_type != OriginType::Affirmation)
        {
            return Ok(());
        }

        for affirmation in &origins {
            self.repositories
                .origins
                .delete(affirmation, valid_time)
                .await?;
        }
        debug!(reference = %reference, affirmations = origins.len(), "deleting unreferenced object");
        self.repositories.oois.delete(reference, valid_time).await
    }

    // Events

    /// Processes a batch deletes first, then updates, then creates; within
    /// an operation objects go before origins, origin parameters and scan
    /// profiles. A failing event is logged and skipped.
    pub async fn process_events(&self, mut events: Vec<DbEvent>) -> BatchOutcome {
        events.sort_by_key(|event| {
            (
                operation_rank(event.operation_type()),
                entity_rank(event.entity_type()),
            )
        });

        let mut outcome = BatchOutcome::default();
        for event in &events {
            match self.process_event(event).await {
                Ok(()) => outcome.handled += 1,
                Err(err) => {
                    outcome.failed += 1;
                    warn!(
                        primary_key = %octopoes_model::format_id_short(&event.primary_key()),
                        operation = event.operation_type().as_str(),
                        entity = event.entity_type().as_str(),
                        "failed to process event: {err}"
                    );
                }
            }
        }
        if outcome.failed > 0 {
            info!(handled = outcome.handled, failed = outcome.failed, "processed event batch with failures");
        }
        outcome
    }
}

fn operation_rank(operation: OperationType) -> u8 {
    match operation {
        OperationType::Delete => 0,
        OperationType::Update => 1,
        OperationType::Create => 2,
    }
}

fn entity_rank(entity: EntityType) -> u8 {
    match entity {
        EntityType::Ooi => 0,
        EntityType::Origin => 1,
        EntityType::OriginParameter => 2,
        EntityType::ScanProfile => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::infrastructure::InMemoryDocumentStore, events::InProcEventBus,
    };
    use chrono::TimeZone;
    use octopoes_model::{Hostname, Network};

    fn valid_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn factory() -> ServiceFactory {
        ServiceFactory::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InProcEventBus::new(64)),
            "test",
        )
        .with_bits(BitRegistry::empty())
    }

    #[tokio::test]
    async fn observation_requires_an_existing_source() {
        let service = factory().service();
        let network = Ooi::from(Network::new("internet"));
        let hostname = Ooi::from(Hostname::new(network.reference(), "example.com"));

        let err = service
            .save_observation(
                network.reference(),
                "kat_dns",
                Uuid::new_v4(),
                &[hostname],
                valid_time(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OctopoesError::SourceNotFound(source) if source == network.reference()));
        assert!(service.session().pending_operations().is_empty());
    }

    #[tokio::test]
    async fn reads_default_to_empty_scan_profiles() {
        let factory = factory();
        let service = factory.service();
        let network = Ooi::from(Network::new("internet"));
        service
            .save_declaration(network.clone(), valid_time(), None)
            .await
            .unwrap();
        service.commit().await.unwrap();

        let profiled = factory
            .service()
            .get_ooi(&network.reference(), valid_time())
            .await
            .unwrap();
        assert_eq!(profiled.ooi, network);
        assert_eq!(profiled.scan_profile, ScanProfile::empty(network.reference()));
    }

    #[test]
    fn batches_sort_deletes_first_and_objects_before_provenance() {
        let mut keys = vec![
            (operation_rank(OperationType::Create), entity_rank(EntityType::Ooi)),
            (operation_rank(OperationType::Delete), entity_rank(EntityType::ScanProfile)),
            (operation_rank(OperationType::Delete), entity_rank(EntityType::Ooi)),
            (operation_rank(OperationType::Update), entity_rank(EntityType::Origin)),
        ];
        keys.sort();
        assert_eq!(keys, vec![(0, 0), (0, 3), (1, 1), (2, 0)]);
    }
}
