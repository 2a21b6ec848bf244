use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reference::Reference;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OriginType {
    Declaration,
    Observation,
    Inference,
    Affirmation,
}

impl OriginType {
    pub fn as_str(self) -> &'static str {
        match self {
            OriginType::Declaration => "declaration",
            OriginType::Observation => "observation",
            OriginType::Inference => "inference",
            OriginType::Affirmation => "affirmation",
        }
    }
}

impl fmt::Display for OriginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance edge: `source` produced `result` through `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Origin {
    pub origin_type: OriginType,
    pub method: String,
    pub source: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_method: Option<String>,
    #[serde(default)]
    pub result: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
}

impl Origin {
    pub fn new(
        origin_type: OriginType,
        method: impl Into<String>,
        source: Reference,
    ) -> Self {
        Self {
            origin_type,
            method: method.into(),
            source,
            source_method: None,
            result: Vec::new(),
            task_id: None,
        }
    }

    pub fn declaration(source: Reference) -> Self {
        Self::new(OriginType::Declaration, "manual", source)
    }

    pub fn inference(bit_id: impl Into<String>, source: Reference) -> Self {
        Self::new(OriginType::Inference, bit_id, source)
    }

    pub fn with_task_id(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_result(mut self, result: Vec<Reference>) -> Self {
        self.result = result;
        self
    }

    /// Deterministic id so repeated saves land on the same document.
    pub fn id(&self) -> String {
        match &self.source_method {
            Some(source_method) => format!(
                "{}|{}|{}|{}",
                self.origin_type, source_method, self.method, self.source
            ),
            None => {
                format!("{}|{}|{}", self.origin_type, self.method, self.source)
            }
        }
    }

    pub fn result_set(&self) -> BTreeSet<&Reference> {
        self.result.iter().collect()
    }

    /// References in this origin's result that `newer` no longer carries.
    pub fn dereferenced(&self, newer: &Origin) -> Vec<Reference> {
        let kept = newer.result_set();
        let mut seen = BTreeSet::new();
        self.result
            .iter()
            .filter(|reference| !kept.contains(reference))
            .filter(|reference| seen.insert(*reference))
            .cloned()
            .collect()
    }
}

// Task ids and result ordering are not part of an origin's graph identity.
impl PartialEq for Origin {
    fn eq(&self, other: &Self) -> bool {
        self.origin_type == other.origin_type
            && self.method == other.method
            && self.source == other.source
            && self.source_method == other.source_method
            && self.result_set() == other.result_set()
    }
}

impl Eq for Origin {}

/// Extra input of an inference origin beyond its source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginParameter {
    pub origin_id: String,
    pub reference: Reference,
}

impl OriginParameter {
    pub fn new(origin_id: impl Into<String>, reference: Reference) -> Self {
        Self {
            origin_id: origin_id.into(),
            reference,
        }
    }

    pub fn id(&self) -> String {
        format!("{}|{}", self.origin_id, self.reference)
    }
}
