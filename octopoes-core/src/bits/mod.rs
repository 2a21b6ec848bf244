//! Inference rules ("bits").
//!
//! A bit is a pure function from a source object, the objects linked to it
//! through origin parameters and an optional configuration map to a list of
//! derived objects. The consistency service decides when a bit runs and
//! records what it produced as an inference origin.

mod dns_resolving;
mod missing_dns_zone;
mod port_classification;

use std::{collections::BTreeMap, fmt, sync::Arc};

use octopoes_model::{ObjectType, Ooi, ScanLevel};
use thiserror::Error;

pub use dns_resolving::DnsResolvingBit;
pub use missing_dns_zone::MissingDnsZoneBit;
pub use port_classification::PortClassificationBit;

/// Key/value configuration read from the newest matching `Config` object.
pub type BitConfig = BTreeMap<String, String>;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct BitError(pub String);

/// Extra input of a bit: objects of `ooi_type` that reach the bit's source
/// through `relation_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitParameterDefinition {
    pub ooi_type: ObjectType,
    pub relation_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitDefinition {
    pub id: String,
    pub consumes: ObjectType,
    pub parameters: Vec<BitParameterDefinition>,
    pub min_scan_level: ScanLevel,
    pub default_enabled: bool,
    /// Path from the consumed type to the object carrying this bit's config,
    /// e.g. `IPPort.address.network`.
    pub config_ooi_relation_path: Option<String>,
}

impl BitDefinition {
    pub fn new(id: impl Into<String>, consumes: ObjectType) -> Self {
        Self {
            id: id.into(),
            consumes,
            parameters: Vec::new(),
            min_scan_level: ScanLevel::L0,
            default_enabled: true,
            config_ooi_relation_path: None,
        }
    }

    pub fn with_parameter(
        mut self,
        ooi_type: ObjectType,
        relation_path: impl Into<String>,
    ) -> Self {
        self.parameters.push(BitParameterDefinition {
            ooi_type,
            relation_path: relation_path.into(),
        });
        self
    }

    pub fn with_min_scan_level(mut self, level: ScanLevel) -> Self {
        self.min_scan_level = level;
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.default_enabled = false;
        self
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_ooi_relation_path = Some(path.into());
        self
    }

    pub fn consumes_type(&self, object_type: ObjectType) -> bool {
        self.consumes.covers(object_type)
    }
}

pub trait Bit: Send + Sync {
    fn definition(&self) -> &BitDefinition;

    fn run(
        &self,
        source: &Ooi,
        parameters: &[Ooi],
        config: &BitConfig,
    ) -> Result<Vec<Ooi>, BitError>;
}

/// Bits known to the engine, keyed by id.
#[derive(Clone, Default)]
pub struct BitRegistry {
    bits: BTreeMap<String, Arc<dyn Bit>>,
}

impl fmt::Debug for BitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitRegistry")
            .field("bits", &self.bits.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BitRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(DnsResolvingBit::new());
        registry.register(PortClassificationBit::new());
        registry.register(MissingDnsZoneBit::new());
        registry
    }

    pub fn register(&mut self, bit: impl Bit + 'static) {
        self.bits
            .insert(bit.definition().id.clone(), Arc::new(bit));
    }

    pub fn get(&self, bit_id: &str) -> Option<&Arc<dyn Bit>> {
        self.bits.get(bit_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Bit>> {
        self.bits.values()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &BitDefinition> {
        self.bits.values().map(|bit| bit.definition())
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

/// Parses a comma separated port list from `config`, falling back to
/// `default` when the key is absent or malformed.
pub(crate) fn ports_from_config(
    config: &BitConfig,
    key: &str,
    default: &[u16],
) -> Vec<u16> {
    config
        .get(key)
        .and_then(|raw| {
            raw.split(',')
                .map(|port| port.trim().parse::<u16>())
                .collect::<Result<Vec<_>, _>>()
                .ok()
        })
        .unwrap_or_else(|| default.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_knows_all_bits() {
        let registry = BitRegistry::builtin();
        assert_eq!(registry.len(), 3);
        assert!(registry.get("dns-resolving").is_some());
        assert!(registry.get("port-classification-ip").is_some());
        let missing_zone = registry.get("missing-dns-zone").unwrap().definition();
        assert!(!missing_zone.default_enabled);
        assert_eq!(missing_zone.min_scan_level, ScanLevel::L1);
    }

    #[test]
    fn malformed_port_lists_fall_back_to_defaults() {
        let mut config = BitConfig::new();
        config.insert("common_tcp_ports".into(), "22, 443".into());
        config.insert("common_udp_ports".into(), "53,dns".into());

        assert_eq!(ports_from_config(&config, "common_tcp_ports", &[80]), vec![22, 443]);
        assert_eq!(ports_from_config(&config, "common_udp_ports", &[53]), vec![53]);
        assert_eq!(ports_from_config(&config, "absent", &[1, 2]), vec![1, 2]);
    }
}
