use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octopoes_model::{
    Config, ObjectType, Ooi, Origin, OriginParameter, OriginType, Paginated,
    Path, Reference, ReferenceTree, ScanProfile, ScanProfileType,
};
use uuid::Uuid;

use crate::{bits::BitDefinition, error::Result};

/// Repository port for objects of interest.
#[async_trait]
pub trait OoiRepository: Send + Sync {
    /// Fails with `NotFound` when the object does not exist at `valid_time`.
    async fn get(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<Ooi>;

    async fn load_bulk(
        &self,
        references: &BTreeSet<Reference>,
        valid_time: DateTime<Utc>,
    ) -> Result<BTreeMap<Reference, Ooi>>;

    /// One page of objects whose kind is covered by any of `types`, ordered
    /// by reference, with the total number of matches.
    async fn list_oois(
        &self,
        types: &[ObjectType],
        valid_time: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Paginated<Ooi>>;

    /// Objects one hop away from any of `references` along the first segment
    /// of each path.
    async fn list_neighbours(
        &self,
        references: &BTreeSet<Reference>,
        paths: &[Path],
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Ooi>>;

    /// Neighbours of a single object grouped per one-hop path. Without
    /// `paths`, every relation of the object's kind is followed.
    async fn get_neighbours(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
        paths: Option<&[Path]>,
    ) -> Result<BTreeMap<Path, Vec<Ooi>>>;

    /// Neighbourhood of `reference` up to `depth` hops. Children whose kind
    /// is not covered by `search_types` are dropped; an empty slice keeps
    /// everything.
    async fn get_tree(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
        search_types: &[ObjectType],
        depth: usize,
    ) -> Result<ReferenceTree>;

    /// Objects at the end of `path` when walked from `ooi`.
    async fn list_related(
        &self,
        ooi: &Ooi,
        path: &Path,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Ooi>>;

    /// Merges `ooi` onto the stored value. Nothing is written when the
    /// merge changes nothing. With `end_valid_time` the object is also
    /// deleted from that moment on.
    async fn save(
        &self,
        ooi: &Ooi,
        valid_time: DateTime<Utc>,
        end_valid_time: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// No-op when the object does not exist.
    async fn delete(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn list_oois_without_scan_profile(
        &self,
        valid_time: DateTime<Utc>,
    ) -> Result<BTreeSet<Reference>>;

    /// `Config` objects for `bit` reachable from `source` through the bit's
    /// configuration path, ordered by the object they configure.
    async fn get_bit_configs(
        &self,
        source: &Ooi,
        bit: &BitDefinition,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Config>>;
}

/// Conjunctive filter over stored origins. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginFilter {
    pub task_id: Option<Uuid>,
    pub source: Option<Reference>,
    pub result: Option<Reference>,
    pub methods: Vec<String>,
    pub origin_type: Option<OriginType>,
}

impl OriginFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_id(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn source(mut self, source: Reference) -> Self {
        self.source = Some(source);
        self
    }

    pub fn result(mut self, result: Reference) -> Self {
        self.result = Some(result);
        self
    }

    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn origin_type(mut self, origin_type: OriginType) -> Self {
        self.origin_type = Some(origin_type);
        self
    }
}

#[async_trait]
pub trait OriginRepository: Send + Sync {
    async fn get(&self, id: &str, valid_time: DateTime<Utc>) -> Result<Origin>;

    /// Writes `origin` unless an equal origin is already stored.
    ///
    /// A non-inference origin without results is deleted instead. An equal
    /// origin carrying a different task id replaces the stored document
    /// without emitting an event.
    async fn save(
        &self,
        origin: &Origin,
        valid_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn delete(
        &self,
        origin: &Origin,
        valid_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn list_origins(
        &self,
        filter: &OriginFilter,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Origin>>;
}

#[async_trait]
pub trait OriginParameterRepository: Send + Sync {
    async fn get(
        &self,
        id: &str,
        valid_time: DateTime<Utc>,
    ) -> Result<OriginParameter>;

    async fn save(
        &self,
        parameter: &OriginParameter,
        valid_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn delete(
        &self,
        parameter: &OriginParameter,
        valid_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn list_by_origin(
        &self,
        origin_ids: &BTreeSet<String>,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<OriginParameter>>;

    async fn list_by_reference(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<OriginParameter>>;
}

#[async_trait]
pub trait ScanProfileRepository: Send + Sync {
    async fn get(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<ScanProfile>;

    /// Writes `new` unless it equals `old`. `old` is what the caller last
    /// read and decides between a create and an update event.
    async fn save(
        &self,
        old: Option<&ScanProfile>,
        new: &ScanProfile,
        valid_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn delete(
        &self,
        profile: &ScanProfile,
        valid_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn list_scan_profiles(
        &self,
        profile_type: Option<ScanProfileType>,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<ScanProfile>>;

    async fn get_bulk(
        &self,
        references: &BTreeSet<Reference>,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<ScanProfile>>;
}
