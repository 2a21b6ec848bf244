//! Core data model shared across Octopoes crates: object references, the
//! closed set of object kinds and their relations, scan profiles, origins and
//! relation paths.
#![allow(missing_docs)]

pub mod error;
pub mod ooi;
pub mod origin;
pub mod path;
pub mod reference;
pub mod scan_profile;
pub mod tree;
pub mod types;

pub use error::{ModelError, Result};
pub use ooi::{
    Config, DnsAaaaRecord, DnsARecord, DnsNsRecord, DnsZone, Finding,
    FindingType, Hostname, IpAddressV4, IpAddressV6, IpPort, IpService,
    Network, Ooi, PortState, ProfiledOoi, Protocol, ResolvedHostname, Service,
};
pub use origin::{Origin, OriginParameter, OriginType};
pub use path::{Direction, Path, Segment, neighbour_paths};
pub use reference::{Reference, format_id_short};
pub use scan_profile::{
    InheritanceSection, ScanLevel, ScanProfile, ScanProfileType,
};
pub use tree::{Paginated, ReferenceNode, ReferenceTree};
pub use types::{ObjectType, Relation};
