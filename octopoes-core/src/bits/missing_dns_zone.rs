use octopoes_model::{Finding, FindingType, ObjectType, Ooi, ScanLevel};

use super::{Bit, BitConfig, BitDefinition, BitError};

const FINDING_TYPE_ID: &str = "KAT-NO-DNS-ZONE";

/// Reports hostnames that are not attached to any DNS zone. Opt-in.
#[derive(Debug)]
pub struct MissingDnsZoneBit {
    definition: BitDefinition,
}

impl MissingDnsZoneBit {
    pub fn new() -> Self {
        Self {
            definition: BitDefinition::new("missing-dns-zone", ObjectType::Hostname)
                .with_min_scan_level(ScanLevel::L1)
                .disabled_by_default(),
        }
    }
}

impl Default for MissingDnsZoneBit {
    fn default() -> Self {
        Self::new()
    }
}

impl Bit for MissingDnsZoneBit {
    fn definition(&self) -> &BitDefinition {
        &self.definition
    }

    fn run(
        &self,
        source: &Ooi,
        _parameters: &[Ooi],
        _config: &BitConfig,
    ) -> Result<Vec<Ooi>, BitError> {
        let Ooi::Hostname(hostname) = source else {
            return Err(BitError(format!(
                "expected a Hostname, got {}",
                source.object_type()
            )));
        };
        if hostname.dns_zone.is_some() {
            return Ok(Vec::new());
        }

        let finding_type = Ooi::from(FindingType {
            id: FINDING_TYPE_ID.to_string(),
            description: Some("Hostname is not part of a known DNS zone.".into()),
        });
        let finding = Ooi::from(Finding {
            finding_type: finding_type.reference(),
            ooi: source.reference(),
            description: Some(format!("No DNS zone found for {}.", hostname.name)),
        });
        Ok(vec![finding_type, finding])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octopoes_model::{DnsZone, Hostname, Network};

    #[test]
    fn only_zoneless_hostnames_are_reported() {
        let network = Ooi::from(Network::new("internet")).reference();
        let mut hostname = Hostname::new(network, "example.com");
        let bit = MissingDnsZoneBit::new();

        let produced = bit
            .run(&Ooi::from(hostname.clone()), &[], &BitConfig::new())
            .unwrap();
        assert_eq!(produced.len(), 2);

        let zone = Ooi::from(DnsZone {
            hostname: Ooi::from(hostname.clone()).reference(),
            parent: None,
        });
        hostname.dns_zone = Some(zone.reference());
        let produced = bit
            .run(&Ooi::from(hostname), &[], &BitConfig::new())
            .unwrap();
        assert!(produced.is_empty());
    }
}
