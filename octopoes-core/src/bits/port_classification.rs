use octopoes_model::{
    Finding, FindingType, ObjectType, Ooi, PortState, Protocol,
};

use super::{Bit, BitConfig, BitDefinition, BitError, ports_from_config};

const COMMON_TCP_PORTS: &[u16] = &[25, 53, 80, 110, 143, 443, 993, 995];
const COMMON_UDP_PORTS: &[u16] = &[53];
const SA_TCP_PORTS: &[u16] = &[21, 22, 23, 3389, 5900];
const DB_TCP_PORTS: &[u16] = &[1433, 1434, 3050, 3306, 5432];

/// Flags open ports that are administrative, database or otherwise
/// uncommon. Port lists can be overridden per network through a `Config`
/// attached to the port's network.
#[derive(Debug)]
pub struct PortClassificationBit {
    definition: BitDefinition,
}

impl PortClassificationBit {
    pub fn new() -> Self {
        Self {
            definition: BitDefinition::new("port-classification-ip", ObjectType::IpPort)
                .with_config_path("IPPort.address.network"),
        }
    }
}

impl Default for PortClassificationBit {
    fn default() -> Self {
        Self::new()
    }
}

impl Bit for PortClassificationBit {
    fn definition(&self) -> &BitDefinition {
        &self.definition
    }

    fn run(
        &self,
        source: &Ooi,
        _parameters: &[Ooi],
        config: &BitConfig,
    ) -> Result<Vec<Ooi>, BitError> {
        let Ooi::IpPort(ip_port) = source else {
            return Err(BitError(format!(
                "expected an IPPort, got {}",
                source.object_type()
            )));
        };
        if matches!(ip_port.state, Some(PortState::Closed | PortState::Filtered)) {
            return Ok(Vec::new());
        }

        let common_tcp = ports_from_config(config, "common_tcp_ports", COMMON_TCP_PORTS);
        let common_udp = ports_from_config(config, "common_udp_ports", COMMON_UDP_PORTS);
        let sa_tcp = ports_from_config(config, "sa_tcp_ports", SA_TCP_PORTS);
        let db_tcp = ports_from_config(config, "db_tcp_ports", DB_TCP_PORTS);

        let port = ip_port.port;
        let protocol = ip_port.protocol;
        let classification = match protocol {
            Protocol::Tcp if sa_tcp.contains(&port) => Some((
                "KAT-OPEN-SYSADMIN-PORT",
                "is a system administrator port and should possibly not be open",
            )),
            Protocol::Tcp if db_tcp.contains(&port) => Some((
                "KAT-OPEN-DATABASE-PORT",
                "is a database port and should not be open",
            )),
            Protocol::Tcp if !common_tcp.contains(&port) => Some((
                "KAT-UNCOMMON-OPEN-PORT",
                "is not a common port and should possibly not be open",
            )),
            Protocol::Udp if !common_udp.contains(&port) => Some((
                "KAT-UNCOMMON-OPEN-PORT",
                "is not a common port and should possibly not be open",
            )),
            _ => None,
        };

        let Some((finding_type_id, reason)) = classification else {
            return Ok(Vec::new());
        };
        let finding_type = Ooi::from(FindingType {
            id: finding_type_id.to_string(),
            description: None,
        });
        let finding = Ooi::from(Finding {
            finding_type: finding_type.reference(),
            ooi: source.reference(),
            description: Some(format!("Port {port}/{protocol} {reason}.")),
        });
        Ok(vec![finding_type, finding])
    }
}
