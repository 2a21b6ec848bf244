//! Change events emitted after every durable write.
//!
//! Repositories queue an event per changed entity; the session hands them to
//! an [`publisher::EventPublisher`] once the transaction is indexed. Workers
//! re-hydrate the same events and feed them back into
//! [`crate::service::ConsistencyService::process_event`].

pub mod broker;
pub mod bus;
pub mod publisher;

use chrono::{DateTime, Utc};
use octopoes_model::{
    Ooi, Origin, OriginParameter, Reference, ScanLevel, ScanProfile,
    ScanProfileType,
};
use serde::{Deserialize, Serialize};

pub use broker::{BrokerError, MessageBroker, RedisBroker, TaskMessage};
pub use bus::InProcEventBus;
pub use publisher::{EventManager, EventPublisher};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Ooi,
    Origin,
    OriginParameter,
    ScanProfile,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Ooi => "ooi",
            EntityType::Origin => "origin",
            EntityType::OriginParameter => "origin_parameter",
            EntityType::ScanProfile => "scan_profile",
        }
    }
}

/// Before/after snapshot of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    pub operation_type: OperationType,
    pub valid_time: DateTime<Utc>,
    pub client: String,
    pub old_data: Option<T>,
    pub new_data: Option<T>,
}

impl<T> ChangeEvent<T> {
    /// `Create` without an old value, `Update` otherwise.
    pub fn saved(
        old_data: Option<T>,
        new_data: T,
        valid_time: DateTime<Utc>,
        client: impl Into<String>,
    ) -> Self {
        let operation_type = if old_data.is_some() {
            OperationType::Update
        } else {
            OperationType::Create
        };
        Self {
            operation_type,
            valid_time,
            client: client.into(),
            old_data,
            new_data: Some(new_data),
        }
    }

    pub fn deleted(
        old_data: T,
        valid_time: DateTime<Utc>,
        client: impl Into<String>,
    ) -> Self {
        Self {
            operation_type: OperationType::Delete,
            valid_time,
            client: client.into(),
            old_data: Some(old_data),
            new_data: None,
        }
    }

    /// The newest state the event knows about.
    pub fn latest(&self) -> Option<&T> {
        self.new_data.as_ref().or(self.old_data.as_ref())
    }
}

/// Scan profile events also carry the reference they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProfileEvent {
    pub reference: Reference,
    #[serde(flatten)]
    pub change: ChangeEvent<ScanProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum DbEvent {
    Ooi(ChangeEvent<Ooi>),
    Origin(ChangeEvent<Origin>),
    OriginParameter(ChangeEvent<OriginParameter>),
    ScanProfile(ScanProfileEvent),
}

impl DbEvent {
    pub fn entity_type(&self) -> EntityType {
        match self {
            DbEvent::Ooi(_) => EntityType::Ooi,
            DbEvent::Origin(_) => EntityType::Origin,
            DbEvent::OriginParameter(_) => EntityType::OriginParameter,
            DbEvent::ScanProfile(_) => EntityType::ScanProfile,
        }
    }

    pub fn operation_type(&self) -> OperationType {
        match self {
            DbEvent::Ooi(event) => event.operation_type,
            DbEvent::Origin(event) => event.operation_type,
            DbEvent::OriginParameter(event) => event.operation_type,
            DbEvent::ScanProfile(event) => event.change.operation_type,
        }
    }

    pub fn valid_time(&self) -> DateTime<Utc> {
        match self {
            DbEvent::Ooi(event) => event.valid_time,
            DbEvent::Origin(event) => event.valid_time,
            DbEvent::OriginParameter(event) => event.valid_time,
            DbEvent::ScanProfile(event) => event.change.valid_time,
        }
    }

    pub fn client(&self) -> &str {
        match self {
            DbEvent::Ooi(event) => &event.client,
            DbEvent::Origin(event) => &event.client,
            DbEvent::OriginParameter(event) => &event.client,
            DbEvent::ScanProfile(event) => &event.change.client,
        }
    }

    /// Id of the affected document, for logging.
    pub fn primary_key(&self) -> String {
        match self {
            DbEvent::Ooi(event) => event
                .latest()
                .map(|ooi| ooi.reference().into_inner())
                .unwrap_or_default(),
            DbEvent::Origin(event) => {
                event.latest().map(Origin::id).unwrap_or_default()
            }
            DbEvent::OriginParameter(event) => {
                event.latest().map(OriginParameter::id).unwrap_or_default()
            }
            DbEvent::ScanProfile(event) => event.reference.to_string(),
        }
    }
}

/// Lightweight record of a scan profile change for low-latency consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProfileMutation {
    pub operation: OperationType,
    pub primary_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<ScanLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_profile_type: Option<ScanProfileType>,
}

impl ScanProfileMutation {
    pub fn from_event(event: &ScanProfileEvent) -> Self {
        let current = event.change.new_data.as_ref();
        Self {
            operation: event.change.operation_type,
            primary_key: event.reference.to_string(),
            level: current.map(ScanProfile::level),
            scan_profile_type: current.map(ScanProfile::profile_type),
        }
    }
}

/// Announces that an object may now be scanned more intensively than
/// before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProfileIncrement {
    pub primary_key: Reference,
    pub object_type: String,
    pub scan_profile: ScanProfile,
}

impl ScanProfileIncrement {
    /// `None` unless the change raised the level above what it was before.
    pub fn from_event(event: &ScanProfileEvent) -> Option<Self> {
        let new = event.change.new_data.as_ref()?;
        let old_level = event
            .change
            .old_data
            .as_ref()
            .map(ScanProfile::level)
            .unwrap_or_default();
        let raised = match event.change.operation_type {
            OperationType::Create | OperationType::Update => new.level() > old_level,
            OperationType::Delete => false,
        };
        raised.then(|| Self {
            primary_key: event.reference.clone(),
            object_type: event.reference.object_type().to_string(),
            scan_profile: new.clone(),
        })
    }
}
