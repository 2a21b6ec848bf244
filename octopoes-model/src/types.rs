use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Every object kind the graph knows about.
///
/// `IpAddress` and `Ooi` are abstract: they never appear as the type of a
/// stored object but are used as relation targets and in search filters. Use
/// [`ObjectType::concrete_types`] to expand them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum ObjectType {
    Network,
    Hostname,
    DnsZone,
    IpAddressV4,
    IpAddressV6,
    ResolvedHostname,
    DnsARecord,
    DnsAaaaRecord,
    DnsNsRecord,
    IpPort,
    Service,
    IpService,
    FindingType,
    Finding,
    Config,
    IpAddress,
    Ooi,
}

/// A typed, directed relation from an owning object kind to a target kind.
///
/// The two limits express how far a scan level may flow across the relation.
/// `None` means the relation never participates in propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub property: &'static str,
    pub target: ObjectType,
    /// Highest level the owner may absorb from the neighbour.
    pub max_inherit_scan_level: Option<u8>,
    /// Highest level the owner may hand on to the neighbour.
    pub max_issue_scan_level: Option<u8>,
}

const fn rel(
    property: &'static str,
    target: ObjectType,
    max_issue_scan_level: Option<u8>,
    max_inherit_scan_level: Option<u8>,
) -> Relation {
    Relation {
        property,
        target,
        max_inherit_scan_level,
        max_issue_scan_level,
    }
}

use ObjectType as T;

static HOSTNAME_RELATIONS: [Relation; 2] = [
    rel("network", T::Network, None, None),
    rel("dns_zone", T::DnsZone, Some(0), Some(2)),
];
static DNS_ZONE_RELATIONS: [Relation; 2] = [
    rel("hostname", T::Hostname, Some(2), Some(0)),
    rel("parent", T::DnsZone, Some(0), Some(1)),
];
static IP_ADDRESS_RELATIONS: [Relation; 1] =
    [rel("network", T::Network, None, None)];
static RESOLVED_HOSTNAME_RELATIONS: [Relation; 2] = [
    rel("hostname", T::Hostname, Some(4), Some(4)),
    rel("address", T::IpAddress, Some(4), Some(0)),
];
static DNS_ADDRESS_RECORD_RELATIONS: [Relation; 2] = [
    rel("hostname", T::Hostname, Some(0), Some(2)),
    rel("address", T::IpAddress, None, None),
];
static DNS_NS_RECORD_RELATIONS: [Relation; 2] = [
    rel("hostname", T::Hostname, Some(0), Some(2)),
    rel("name_server_hostname", T::Hostname, Some(1), Some(0)),
];
static IP_PORT_RELATIONS: [Relation; 1] =
    [rel("address", T::IpAddress, Some(0), Some(4))];
static IP_SERVICE_RELATIONS: [Relation; 2] = [
    rel("ip_port", T::IpPort, Some(0), Some(4)),
    rel("service", T::Service, None, None),
];
static FINDING_RELATIONS: [Relation; 2] = [
    rel("finding_type", T::FindingType, None, None),
    rel("ooi", T::Ooi, None, None),
];
static CONFIG_RELATIONS: [Relation; 1] = [rel("ooi", T::Ooi, None, None)];

impl ObjectType {
    /// All object kinds that can be stored, in catalog order.
    pub const CONCRETE: [ObjectType; 15] = [
        T::Network,
        T::Hostname,
        T::DnsZone,
        T::IpAddressV4,
        T::IpAddressV6,
        T::ResolvedHostname,
        T::DnsARecord,
        T::DnsAaaaRecord,
        T::DnsNsRecord,
        T::IpPort,
        T::Service,
        T::IpService,
        T::FindingType,
        T::Finding,
        T::Config,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            T::Network => "Network",
            T::Hostname => "Hostname",
            T::DnsZone => "DNSZone",
            T::IpAddressV4 => "IPAddressV4",
            T::IpAddressV6 => "IPAddressV6",
            T::ResolvedHostname => "ResolvedHostname",
            T::DnsARecord => "DNSARecord",
            T::DnsAaaaRecord => "DNSAAAARecord",
            T::DnsNsRecord => "DNSNSRecord",
            T::IpPort => "IPPort",
            T::Service => "Service",
            T::IpService => "IPService",
            T::FindingType => "FindingType",
            T::Finding => "Finding",
            T::Config => "Config",
            T::IpAddress => "IPAddress",
            T::Ooi => "OOI",
        }
    }

    pub fn is_abstract(self) -> bool {
        matches!(self, T::IpAddress | T::Ooi)
    }

    /// Expands abstract kinds into the concrete kinds they cover.
    pub fn concrete_types(self) -> Vec<ObjectType> {
        match self {
            T::IpAddress => vec![T::IpAddressV4, T::IpAddressV6],
            T::Ooi => Self::CONCRETE.to_vec(),
            concrete => vec![concrete],
        }
    }

    /// Whether `other` is this kind or one of its concrete members.
    pub fn covers(self, other: ObjectType) -> bool {
        self == other || self.concrete_types().contains(&other)
    }

    /// Outgoing relations declared on this kind. Abstract kinds return the
    /// relations shared by their first concrete member.
    pub fn relations(self) -> &'static [Relation] {
        match self {
            T::Hostname => &HOSTNAME_RELATIONS,
            T::DnsZone => &DNS_ZONE_RELATIONS,
            T::IpAddressV4 | T::IpAddressV6 | T::IpAddress => {
                &IP_ADDRESS_RELATIONS
            }
            T::ResolvedHostname => &RESOLVED_HOSTNAME_RELATIONS,
            T::DnsARecord | T::DnsAaaaRecord => &DNS_ADDRESS_RECORD_RELATIONS,
            T::DnsNsRecord => &DNS_NS_RECORD_RELATIONS,
            T::IpPort => &IP_PORT_RELATIONS,
            T::IpService => &IP_SERVICE_RELATIONS,
            T::Finding => &FINDING_RELATIONS,
            T::Config => &CONFIG_RELATIONS,
            T::Network | T::Service | T::FindingType | T::Ooi => &[],
        }
    }

    pub fn relation(self, property: &str) -> Option<&'static Relation> {
        self.relations()
            .iter()
            .find(|relation| relation.property == property)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::CONCRETE
            .iter()
            .chain([T::IpAddress, T::Ooi].iter())
            .copied()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| ModelError::UnknownObjectType(value.to_string()))
    }
}

impl TryFrom<String> for ObjectType {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectType> for String {
    fn from(value: ObjectType) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for object_type in ObjectType::CONCRETE {
            let parsed: ObjectType = object_type.as_str().parse().unwrap();
            assert_eq!(parsed, object_type);
        }
        assert!("Nope".parse::<ObjectType>().is_err());
    }

    #[test]
    fn abstract_address_covers_both_families() {
        assert!(ObjectType::IpAddress.covers(ObjectType::IpAddressV6));
        assert!(!ObjectType::IpAddress.covers(ObjectType::Hostname));
        assert!(ObjectType::Ooi.covers(ObjectType::Config));
    }

    #[test]
    fn relation_limits_are_declared_on_the_owner() {
        let relation = ObjectType::ResolvedHostname.relation("hostname").unwrap();
        assert_eq!(relation.max_issue_scan_level, Some(4));
        assert_eq!(relation.max_inherit_scan_level, Some(4));
        assert!(ObjectType::Hostname.relation("name").is_none());

        let name_server = ObjectType::DnsNsRecord
            .relation("name_server_hostname")
            .unwrap();
        assert_eq!(name_server.max_issue_scan_level, Some(1));
        assert_eq!(name_server.max_inherit_scan_level, Some(0));
    }
}
