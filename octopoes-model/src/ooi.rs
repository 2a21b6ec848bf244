use std::{
    collections::BTreeMap,
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ModelError, Result},
    reference::Reference,
    scan_profile::ScanProfile,
    types::ObjectType,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
}

impl Network {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hostname {
    pub network: Reference,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_zone: Option<Reference>,
}

impl Hostname {
    pub fn new(network: Reference, name: impl Into<String>) -> Self {
        Self {
            network,
            name: name.into(),
            dns_zone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsZone {
    pub hostname: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Reference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressV4 {
    pub network: Reference,
    pub address: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressV6 {
    pub network: Reference,
    pub address: Ipv6Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedHostname {
    pub hostname: Reference,
    pub address: Reference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsARecord {
    pub hostname: Reference,
    pub address: Reference,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAaaaRecord {
    pub hostname: Reference,
    pub address: Reference,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsNsRecord {
    pub hostname: Reference,
    pub name_server_hostname: Reference,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPort {
    pub address: Reference,
    pub protocol: Protocol,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PortState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpService {
    pub ip_port: Reference,
    pub service: Reference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingType {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub finding_type: Reference,
    pub ooi: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Per-object bit configuration. The bit reads the newest config reachable
/// through its configured relation path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub ooi: Reference,
    pub bit_id: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Closed set of stored objects. Serialized with an `object_type`
/// discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "object_type")]
pub enum Ooi {
    Network(Network),
    Hostname(Hostname),
    #[serde(rename = "DNSZone")]
    DnsZone(DnsZone),
    #[serde(rename = "IPAddressV4")]
    IpAddressV4(IpAddressV4),
    #[serde(rename = "IPAddressV6")]
    IpAddressV6(IpAddressV6),
    ResolvedHostname(ResolvedHostname),
    #[serde(rename = "DNSARecord")]
    DnsARecord(DnsARecord),
    #[serde(rename = "DNSAAAARecord")]
    DnsAaaaRecord(DnsAaaaRecord),
    #[serde(rename = "DNSNSRecord")]
    DnsNsRecord(DnsNsRecord),
    #[serde(rename = "IPPort")]
    IpPort(IpPort),
    Service(Service),
    #[serde(rename = "IPService")]
    IpService(IpService),
    FindingType(FindingType),
    Finding(Finding),
    Config(Config),
}

impl Ooi {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Ooi::Network(_) => ObjectType::Network,
            Ooi::Hostname(_) => ObjectType::Hostname,
            Ooi::DnsZone(_) => ObjectType::DnsZone,
            Ooi::IpAddressV4(_) => ObjectType::IpAddressV4,
            Ooi::IpAddressV6(_) => ObjectType::IpAddressV6,
            Ooi::ResolvedHostname(_) => ObjectType::ResolvedHostname,
            Ooi::DnsARecord(_) => ObjectType::DnsARecord,
            Ooi::DnsAaaaRecord(_) => ObjectType::DnsAaaaRecord,
            Ooi::DnsNsRecord(_) => ObjectType::DnsNsRecord,
            Ooi::IpPort(_) => ObjectType::IpPort,
            Ooi::Service(_) => ObjectType::Service,
            Ooi::IpService(_) => ObjectType::IpService,
            Ooi::FindingType(_) => ObjectType::FindingType,
            Ooi::Finding(_) => ObjectType::Finding,
            Ooi::Config(_) => ObjectType::Config,
        }
    }

    /// Derives the reference from the natural key fields.
    pub fn reference(&self) -> Reference {
        let ty = self.object_type();
        match self {
            Ooi::Network(o) => Reference::from_parts(ty, &[&o.name]),
            Ooi::Hostname(o) => {
                Reference::from_parts(ty, &[o.network.natural_key(), &o.name])
            }
            Ooi::DnsZone(o) => {
                Reference::from_parts(ty, &[o.hostname.natural_key()])
            }
            Ooi::IpAddressV4(o) => Reference::from_parts(
                ty,
                &[o.network.natural_key(), &o.address.to_string()],
            ),
            Ooi::IpAddressV6(o) => Reference::from_parts(
                ty,
                &[o.network.natural_key(), &o.address.to_string()],
            ),
            Ooi::ResolvedHostname(o) => Reference::from_parts(
                ty,
                &[o.hostname.natural_key(), o.address.natural_key()],
            ),
            Ooi::DnsARecord(o) => Reference::from_parts(
                ty,
                &[o.hostname.natural_key(), &o.value],
            ),
            Ooi::DnsAaaaRecord(o) => Reference::from_parts(
                ty,
                &[o.hostname.natural_key(), &o.value],
            ),
            Ooi::DnsNsRecord(o) => Reference::from_parts(
                ty,
                &[o.hostname.natural_key(), &o.value],
            ),
            Ooi::IpPort(o) => Reference::from_parts(
                ty,
                &[
                    o.address.natural_key(),
                    &o.protocol.to_string(),
                    &o.port.to_string(),
                ],
            ),
            Ooi::Service(o) => Reference::from_parts(ty, &[&o.name]),
            Ooi::IpService(o) => Reference::from_parts(
                ty,
                &[o.ip_port.natural_key(), o.service.natural_key()],
            ),
            Ooi::FindingType(o) => Reference::from_parts(ty, &[&o.id]),
            // Polymorphic targets keep their type prefix to stay unambiguous.
            Ooi::Finding(o) => Reference::from_parts(
                ty,
                &[o.ooi.as_str(), o.finding_type.natural_key()],
            ),
            Ooi::Config(o) => {
                Reference::from_parts(ty, &[o.ooi.as_str(), &o.bit_id])
            }
        }
    }

    /// Relation fields currently set on the object, keyed by property name.
    pub fn relation_values(&self) -> Vec<(&'static str, &Reference)> {
        let mut values: Vec<(&'static str, &Reference)> = Vec::new();
        match self {
            Ooi::Network(_) | Ooi::Service(_) | Ooi::FindingType(_) => {}
            Ooi::Hostname(o) => {
                values.push(("network", &o.network));
                if let Some(zone) = &o.dns_zone {
                    values.push(("dns_zone", zone));
                }
            }
            Ooi::DnsZone(o) => {
                values.push(("hostname", &o.hostname));
                if let Some(parent) = &o.parent {
                    values.push(("parent", parent));
                }
            }
            Ooi::IpAddressV4(o) => values.push(("network", &o.network)),
            Ooi::IpAddressV6(o) => values.push(("network", &o.network)),
            Ooi::ResolvedHostname(o) => {
                values.push(("hostname", &o.hostname));
                values.push(("address", &o.address));
            }
            Ooi::DnsARecord(o) => {
                values.push(("hostname", &o.hostname));
                values.push(("address", &o.address));
            }
            Ooi::DnsAaaaRecord(o) => {
                values.push(("hostname", &o.hostname));
                values.push(("address", &o.address));
            }
            Ooi::DnsNsRecord(o) => {
                values.push(("hostname", &o.hostname));
                values.push(("name_server_hostname", &o.name_server_hostname));
            }
            Ooi::IpPort(o) => values.push(("address", &o.address)),
            Ooi::IpService(o) => {
                values.push(("ip_port", &o.ip_port));
                values.push(("service", &o.service));
            }
            Ooi::Finding(o) => {
                values.push(("finding_type", &o.finding_type));
                values.push(("ooi", &o.ooi));
            }
            Ooi::Config(o) => values.push(("ooi", &o.ooi)),
        }
        values
    }

    pub fn relation_value(&self, property: &str) -> Option<&Reference> {
        self.relation_values()
            .into_iter()
            .find(|(name, _)| *name == property)
            .map(|(_, reference)| reference)
    }

    /// Field-by-field merge onto `old`: every field set on `self` overwrites
    /// the old value. Returns the merged object and whether anything changed.
    pub fn merge(&self, old: &Ooi) -> Result<(Ooi, bool)> {
        if self.object_type() != old.object_type() {
            return Err(ModelError::TypeMismatch {
                expected: old.object_type().to_string(),
                found: self.object_type().to_string(),
            });
        }

        let mut merged = serde_json::to_value(old)?;
        let incoming = serde_json::to_value(self)?;
        let (Value::Object(target), Value::Object(fields)) =
            (&mut merged, incoming)
        else {
            return Err(ModelError::TypeMismatch {
                expected: "object".into(),
                found: "non-object".into(),
            });
        };

        let mut changed = false;
        for (key, value) in fields {
            if value.is_null() {
                continue;
            }
            if target.get(&key) != Some(&value) {
                target.insert(key, value);
                changed = true;
            }
        }

        Ok((serde_json::from_value(merged)?, changed))
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Ooi {
                fn from(value: $variant) -> Self {
                    Ooi::$variant(value)
                }
            }
        )*
    };
}

impl_from_variant!(
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
);

/// An object together with the scan profile that applies to it at read time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfiledOoi {
    pub ooi: Ooi,
    pub scan_profile: ScanProfile,
}
