//! Typed relation paths.
//!
//! A path is written as a start type followed by dotted steps. Outgoing
//! steps name a relation property (`address`), optionally narrowed with a
//! type marker (`address[is IPAddressV4]`). Incoming steps follow a relation
//! backwards and always carry the owning type (`<hostname[is DNSARecord]`).

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    error::{ModelError, Result},
    types::ObjectType,
};

static INCOMING_STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<\s*([A-Za-z_]+)\s*\[\s*is\s+([A-Za-z0-9]+)\s*\]$")
        .expect("incoming step regex should compile")
});

static OUTGOING_STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_]+)(?:\s*\[\s*is\s+([A-Za-z0-9]+)\s*\])?$")
        .expect("outgoing step regex should compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// One hop across a relation.
///
/// For an incoming segment the relation is declared on `target_type` and
/// points at `source_type`.
#[derive(Debug, Clone)]
pub struct Segment {
    pub source_type: ObjectType,
    pub direction: Direction,
    pub property_name: String,
    pub target_type: Option<ObjectType>,
}

impl Segment {
    pub fn new(
        source_type: ObjectType,
        direction: Direction,
        property_name: impl Into<String>,
        target_type: Option<ObjectType>,
    ) -> Self {
        Self {
            source_type,
            direction,
            property_name: property_name.into(),
            target_type,
        }
    }

    fn parse_step(
        step: &str,
    ) -> Result<(Direction, String, Option<ObjectType>)> {
        let step = step.trim();
        if let Some(captures) = INCOMING_STEP.captures(step) {
            let target: ObjectType = captures[2].parse()?;
            return Ok((Direction::Incoming, captures[1].to_string(), Some(target)));
        }
        if let Some(captures) = OUTGOING_STEP.captures(step) {
            let target = captures
                .get(2)
                .map(|m| m.as_str().parse::<ObjectType>())
                .transpose()?;
            return Ok((Direction::Outgoing, captures[1].to_string(), target));
        }
        Err(ModelError::InvalidPath(format!("could not parse step: {step}")))
    }

    /// Resolves a textual step starting from `source_type`. Outgoing steps
    /// that name a plain field rather than a relation get no target.
    pub fn calculate_step(source_type: ObjectType, step: &str) -> Result<Self> {
        let (direction, property_name, explicit_target) =
            Self::parse_step(step)?;
        if explicit_target.is_some() {
            return Ok(Self::new(
                source_type,
                direction,
                property_name,
                explicit_target,
            ));
        }

        let target = relation_target(source_type, &property_name);
        Ok(Self::new(source_type, direction, property_name, target))
    }

    pub fn reverse(&self) -> Result<Self> {
        let target = self.target_type.ok_or_else(|| {
            ModelError::InvalidPath(format!(
                "cannot reverse segment {self} without a target type"
            ))
        })?;
        let direction = match self.direction {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
        };
        Ok(Self::new(
            target,
            direction,
            self.property_name.clone(),
            Some(self.source_type),
        ))
    }

    /// Kind that declares the relation this segment crosses.
    pub fn relation_owner(&self) -> Option<ObjectType> {
        match self.direction {
            Direction::Outgoing => Some(self.source_type),
            Direction::Incoming => self.target_type,
        }
    }

    /// Store attribute for this hop: `Type/prop` or `Type/_prop`.
    pub fn encode(&self) -> Result<String> {
        match self.direction {
            Direction::Outgoing => {
                Ok(format!("{}/{}", self.source_type, self.property_name))
            }
            Direction::Incoming => {
                let target = self.target_type.ok_or_else(|| {
                    ModelError::InvalidPath(
                        "incoming segment needs a target type".into(),
                    )
                })?;
                Ok(format!("{}/_{}", target, self.property_name))
            }
        }
    }

    /// Inverse of [`Segment::encode`], seen from an object of `source_type`.
    pub fn decode(source_type: ObjectType, encoded: &str) -> Result<Self> {
        let (owner, property) = encoded.split_once('/').ok_or_else(|| {
            ModelError::InvalidPath(format!("not an encoded segment: {encoded}"))
        })?;
        let owner: ObjectType = owner.parse()?;
        match property.strip_prefix('_') {
            Some(property) => Ok(Self::new(
                source_type,
                Direction::Incoming,
                property,
                Some(owner),
            )),
            None => Ok(Self::new(
                owner,
                Direction::Outgoing,
                property,
                relation_target(owner, property),
            )),
        }
    }

    /// How high a level the source may absorb through this hop.
    pub fn max_scan_level_inheritance(&self) -> Option<u8> {
        let owner = self.relation_owner()?;
        let relation = owner.relation(&self.property_name)?;
        match self.direction {
            Direction::Incoming => relation.max_issue_scan_level,
            Direction::Outgoing => relation.max_inherit_scan_level,
        }
    }

    /// How high a level the source may hand on through this hop.
    pub fn max_scan_level_issuance(&self) -> Option<u8> {
        let owner = self.relation_owner()?;
        let relation = owner.relation(&self.property_name)?;
        match self.direction {
            Direction::Incoming => relation.max_inherit_scan_level,
            Direction::Outgoing => relation.max_issue_scan_level,
        }
    }
}

fn relation_target(owner: ObjectType, property: &str) -> Option<ObjectType> {
    if let Some(relation) = owner.relation(property) {
        return Some(relation.target);
    }
    owner
        .concrete_types()
        .into_iter()
        .find_map(|concrete| concrete.relation(property))
        .map(|relation| relation.target)
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.source_type == other.source_type
            && self.direction == other.direction
            && self.property_name == other.property_name
    }
}

impl Eq for Segment {}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_type.hash(state);
        self.direction.hash(state);
        self.property_name.hash(state);
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.direction, self.target_type) {
            (Direction::Incoming, Some(target)) => {
                write!(f, "<{}[is {}]", self.property_name, target)
            }
            _ => f.write_str(&self.property_name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Path {
    pub segments: Vec<Segment>,
}

impl Path {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Parses `Type.step.step`. Parsing stops after a step that lands on a
    /// plain field, since nothing can follow it.
    pub fn parse(path: &str) -> Result<Self> {
        let mut parts = path.split('.');
        let start = parts
            .next()
            .filter(|part| !part.trim().is_empty())
            .ok_or_else(|| ModelError::InvalidPath(path.to_string()))?;
        let start_type: ObjectType = start.trim().parse()?;

        let mut segments: Vec<Segment> = Vec::new();
        let mut current = Some(start_type);
        for step in parts {
            let Some(source_type) = current else {
                break;
            };
            let segment = Segment::calculate_step(source_type, step)?;
            current = segment.target_type;
            segments.push(segment);
        }

        if segments.is_empty() {
            return Err(ModelError::InvalidPath(format!(
                "path {path} has no steps"
            )));
        }
        Ok(Self { segments })
    }

    pub fn start_type(&self) -> Option<ObjectType> {
        self.segments.first().map(|segment| segment.source_type)
    }

    pub fn reverse(&self) -> Result<Self> {
        let segments = self
            .segments
            .iter()
            .rev()
            .map(Segment::reverse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(first) = self.segments.first() else {
            return Ok(());
        };
        write!(f, "{}", first.source_type)?;
        for segment in &self.segments {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

/// All single-hop paths leaving `source_type`: its own relations outgoing,
/// and every other kind's relation that can point at it, incoming.
pub fn neighbour_paths(source_type: ObjectType) -> Vec<Path> {
    let mut paths: Vec<Path> = source_type
        .relations()
        .iter()
        .map(|relation| {
            Path::new(vec![Segment::new(
                source_type,
                Direction::Outgoing,
                relation.property,
                Some(relation.target),
            )])
        })
        .collect();

    for other in ObjectType::CONCRETE {
        for relation in other.relations() {
            if relation.target.covers(source_type) {
                paths.push(Path::new(vec![Segment::new(
                    source_type,
                    Direction::Incoming,
                    relation.property,
                    Some(other),
                )]));
            }
        }
    }

    paths.sort();
    paths.dedup();
    paths
}
