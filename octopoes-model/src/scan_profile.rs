use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::ModelError, reference::Reference};

/// Scan intensity, 0 (observe only) through 4 (most intrusive).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct ScanLevel(u8);

impl ScanLevel {
    pub const L0: ScanLevel = ScanLevel(0);
    pub const L1: ScanLevel = ScanLevel(1);
    pub const L2: ScanLevel = ScanLevel(2);
    pub const L3: ScanLevel = ScanLevel(3);
    pub const L4: ScanLevel = ScanLevel(4);
    pub const MAX: ScanLevel = ScanLevel::L4;

    pub fn new(level: u8) -> Result<Self, ModelError> {
        if level > Self::MAX.0 {
            return Err(ModelError::ScanLevelOutOfRange(level));
        }
        Ok(Self(level))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// This level, lowered to `limit` when it is above it.
    pub fn capped(self, limit: u8) -> ScanLevel {
        ScanLevel(self.0.min(limit))
    }

    /// Levels from highest to lowest, excluding 0.
    pub fn descending_positive() -> impl Iterator<Item = ScanLevel> {
        (1..=Self::MAX.0).rev().map(ScanLevel)
    }
}

impl TryFrom<u8> for ScanLevel {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScanLevel> for u8 {
    fn from(value: ScanLevel) -> Self {
        value.0
    }
}

impl fmt::Display for ScanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ScanProfileType {
    Empty,
    Declared,
    Inherited,
}

impl ScanProfileType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanProfileType::Empty => "empty",
            ScanProfileType::Declared => "declared",
            ScanProfileType::Inherited => "inherited",
        }
    }
}

impl fmt::Display for ScanProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The scan profile attached to a reference.
///
/// `Declared` is operator-set and authoritative. `Inherited` is recomputed
/// from declared profiles and the relation graph. `Empty` is level 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ScanProfileRecord", into = "ScanProfileRecord")]
pub enum ScanProfile {
    Empty {
        reference: Reference,
    },
    Declared {
        reference: Reference,
        level: ScanLevel,
        user_id: Option<i64>,
    },
    Inherited {
        reference: Reference,
        level: ScanLevel,
    },
}

impl ScanProfile {
    pub fn empty(reference: Reference) -> Self {
        ScanProfile::Empty { reference }
    }

    pub fn declared(reference: Reference, level: ScanLevel) -> Self {
        ScanProfile::Declared {
            reference,
            level,
            user_id: None,
        }
    }

    pub fn inherited(reference: Reference, level: ScanLevel) -> Self {
        ScanProfile::Inherited { reference, level }
    }

    pub fn reference(&self) -> &Reference {
        match self {
            ScanProfile::Empty { reference }
            | ScanProfile::Declared { reference, .. }
            | ScanProfile::Inherited { reference, .. } => reference,
        }
    }

    pub fn level(&self) -> ScanLevel {
        match self {
            ScanProfile::Empty { .. } => ScanLevel::L0,
            ScanProfile::Declared { level, .. }
            | ScanProfile::Inherited { level, .. } => *level,
        }
    }

    pub fn profile_type(&self) -> ScanProfileType {
        match self {
            ScanProfile::Empty { .. } => ScanProfileType::Empty,
            ScanProfile::Declared { .. } => ScanProfileType::Declared,
            ScanProfile::Inherited { .. } => ScanProfileType::Inherited,
        }
    }

    pub fn is_declared(&self) -> bool {
        matches!(self, ScanProfile::Declared { .. })
    }
}

// The operator id is bookkeeping; two profiles that agree on variant,
// reference and level are the same profile.
impl PartialEq for ScanProfile {
    fn eq(&self, other: &Self) -> bool {
        self.profile_type() == other.profile_type()
            && self.reference() == other.reference()
            && self.level() == other.level()
    }
}

impl Eq for ScanProfile {}

/// Flat stored shape of a [`ScanProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScanProfileRecord {
    scan_profile_type: ScanProfileType,
    reference: Reference,
    #[serde(default)]
    level: ScanLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<i64>,
}

impl From<ScanProfile> for ScanProfileRecord {
    fn from(profile: ScanProfile) -> Self {
        let scan_profile_type = profile.profile_type();
        let level = profile.level();
        match profile {
            ScanProfile::Empty { reference }
            | ScanProfile::Inherited { reference, .. } => Self {
                scan_profile_type,
                reference,
                level,
                user_id: None,
            },
            ScanProfile::Declared {
                reference, user_id, ..
            } => Self {
                scan_profile_type,
                reference,
                level,
                user_id,
            },
        }
    }
}

impl TryFrom<ScanProfileRecord> for ScanProfile {
    type Error = ModelError;

    fn try_from(record: ScanProfileRecord) -> Result<Self, Self::Error> {
        Ok(match record.scan_profile_type {
            ScanProfileType::Empty => {
                if record.level != ScanLevel::L0 {
                    return Err(ModelError::ScanLevelOutOfRange(
                        record.level.value(),
                    ));
                }
                ScanProfile::Empty {
                    reference: record.reference,
                }
            }
            ScanProfileType::Declared => ScanProfile::Declared {
                reference: record.reference,
                level: record.level,
                user_id: record.user_id,
            },
            ScanProfileType::Inherited => ScanProfile::Inherited {
                reference: record.reference,
                level: record.level,
            },
        })
    }
}

/// One hop in the explanation of where a reference's level comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceSection {
    pub segment: Option<String>,
    pub reference: Reference,
    pub level: ScanLevel,
    pub scan_profile_type: ScanProfileType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectType;

    fn hostname() -> Reference {
        Reference::from_parts(ObjectType::Hostname, &["internet", "example.com"])
    }

    #[test]
    fn capping_only_lowers() {
        assert_eq!(ScanLevel::L4.capped(2), ScanLevel::L2);
        assert_eq!(ScanLevel::L1.capped(2), ScanLevel::L1);
        assert_eq!(ScanLevel::L3.capped(0), ScanLevel::L0);
    }

    #[test]
    fn level_is_bounded() {
        assert!(ScanLevel::new(4).is_ok());
        assert!(ScanLevel::new(5).is_err());
        let levels: Vec<u8> =
            ScanLevel::descending_positive().map(ScanLevel::value).collect();
        assert_eq!(levels, vec![4, 3, 2, 1]);
    }

    #[test]
    fn stored_shape_is_flat_and_tagged() {
        let profile = ScanProfile::declared(hostname(), ScanLevel::L3);
        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["scan_profile_type"], "declared");
        assert_eq!(value["level"], 3);

        let empty = serde_json::to_value(ScanProfile::empty(hostname())).unwrap();
        assert_eq!(empty["level"], 0);
        let back: ScanProfile = serde_json::from_value(empty).unwrap();
        assert_eq!(back, ScanProfile::empty(hostname()));
    }

    #[test]
    fn operator_id_does_not_affect_equality() {
        let a = ScanProfile::Declared {
            reference: hostname(),
            level: ScanLevel::L2,
            user_id: Some(7),
        };
        let b = ScanProfile::declared(hostname(), ScanLevel::L2);
        assert_eq!(a, b);
        assert_ne!(a, ScanProfile::inherited(hostname(), ScanLevel::L2));
    }
}
