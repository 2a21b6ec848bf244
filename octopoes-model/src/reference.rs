use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::ModelError, types::ObjectType};

/// Stable identity of an object in the graph.
///
/// Formatted as `Type|part|part`, where the parts are the object's natural
/// key. Parts that are themselves references contribute their natural key
/// only, so `ResolvedHostname|internet|example.com|internet|192.0.2.1`
/// embeds both the hostname and the address identity.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    /// Parses a reference string, checking it names a known concrete kind.
    pub fn parse(value: impl Into<String>) -> Result<Self, ModelError> {
        let value = value.into();
        let reference = Self(value);
        let object_type = reference.class_type()?;
        if object_type.is_abstract() {
            return Err(ModelError::InvalidReference(reference.0));
        }
        Ok(reference)
    }

    pub fn from_parts(object_type: ObjectType, parts: &[&str]) -> Self {
        let mut value = String::from(object_type.as_str());
        for part in parts {
            value.push('|');
            value.push_str(part);
        }
        Self(value)
    }

    /// Name of the object kind, the segment before the first `|`.
    pub fn object_type(&self) -> &str {
        self.0.split_once('|').map_or(self.0.as_str(), |(ty, _)| ty)
    }

    pub fn natural_key(&self) -> &str {
        self.0.split_once('|').map_or("", |(_, key)| key)
    }

    pub fn class_type(&self) -> Result<ObjectType, ModelError> {
        if !self.0.contains('|') {
            return Err(ModelError::InvalidReference(self.0.clone()));
        }
        self.object_type().parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Reference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Shortens long identifiers for log lines.
pub fn format_id_short(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 33 {
        return id.to_string();
    }
    let head: String = chars[..15].iter().collect();
    let tail: String = chars[chars.len() - 15..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_unknown_kinds_and_bare_strings() {
        assert!(Reference::parse("Hostname|internet|example.com").is_ok());
        assert!(Reference::parse("Unicorn|x").is_err());
        assert!(Reference::parse("Hostname").is_err());
        assert!(Reference::parse("IPAddress|internet|1.1.1.1").is_err());
    }

    #[test]
    fn splits_type_and_natural_key() {
        let reference = Reference::from_parts(
            ObjectType::IpPort,
            &["internet", "192.0.2.1", "tcp", "443"],
        );
        assert_eq!(reference.object_type(), "IPPort");
        assert_eq!(reference.natural_key(), "internet|192.0.2.1|tcp|443");
        assert_eq!(reference.class_type().unwrap(), ObjectType::IpPort);
    }

    #[test]
    fn short_ids_keep_head_and_tail() {
        assert_eq!(format_id_short("Network|internet"), "Network|internet");
        let long = "ResolvedHostname|internet|example.com|internet|192.0.2.1";
        let short = format_id_short(long);
        assert_eq!(short, "ResolvedHostnam...ernet|192.0.2.1");
    }
}
