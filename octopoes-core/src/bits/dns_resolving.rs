use octopoes_model::{ObjectType, Ooi, ResolvedHostname};

use super::{Bit, BitConfig, BitDefinition, BitError};

/// Turns the A and AAAA records of a hostname into resolved hostnames.
#[derive(Debug)]
pub struct DnsResolvingBit {
    definition: BitDefinition,
}

impl DnsResolvingBit {
    pub fn new() -> Self {
        Self {
            definition: BitDefinition::new("dns-resolving", ObjectType::Hostname)
                .with_parameter(ObjectType::DnsARecord, "hostname")
                .with_parameter(ObjectType::DnsAaaaRecord, "hostname"),
        }
    }
}

impl Default for DnsResolvingBit {
    fn default() -> Self {
        Self::new()
    }
}

impl Bit for DnsResolvingBit {
    fn definition(&self) -> &BitDefinition {
        &self.definition
    }

    fn run(
        &self,
        source: &Ooi,
        parameters: &[Ooi],
        _config: &BitConfig,
    ) -> Result<Vec<Ooi>, BitError> {
        let Ooi::Hostname(_) = source else {
            return Err(BitError(format!(
                "expected a Hostname, got {}",
                source.object_type()
            )));
        };
        let hostname = source.reference();

        let resolved = parameters
            .iter()
            .filter_map(|parameter| match parameter {
                Ooi::DnsARecord(record) => Some(&record.address),
                Ooi::DnsAaaaRecord(record) => Some(&record.address),
                _ => None,
            })
            .map(|address| {
                Ooi::from(ResolvedHostname {
                    hostname: hostname.clone(),
                    address: address.clone(),
                })
            })
            .collect();
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octopoes_model::{
        DnsARecord, DnsAaaaRecord, Hostname, IpAddressV4, IpAddressV6, Network,
    };

    #[test]
    fn resolves_every_address_record() {
        let network = Ooi::from(Network::new("internet")).reference();
        let hostname = Ooi::from(Hostname::new(network.clone(), "example.com"));
        let v4 = Ooi::from(IpAddressV4 {
            network: network.clone(),
            address: "192.0.2.1".parse().unwrap(),
        });
        let v6 = Ooi::from(IpAddressV6 {
            network,
            address: "2001:db8::1".parse().unwrap(),
        });
        let parameters = vec![
            Ooi::from(DnsARecord {
                hostname: hostname.reference(),
                address: v4.reference(),
                value: "192.0.2.1".into(),
                ttl: None,
            }),
            Ooi::from(DnsAaaaRecord {
                hostname: hostname.reference(),
                address: v6.reference(),
                value: "2001:db8::1".into(),
                ttl: Some(300),
            }),
        ];

        let produced = DnsResolvingBit::new()
            .run(&hostname, &parameters, &BitConfig::new())
            .unwrap();

        let references: Vec<String> =
            produced.iter().map(|ooi| ooi.reference().into_inner()).collect();
        assert_eq!(
            references,
            vec![
                "ResolvedHostname|internet|example.com|internet|192.0.2.1",
                "ResolvedHostname|internet|example.com|internet|2001:db8::1",
            ]
        );
    }
}
