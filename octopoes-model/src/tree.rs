use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{ooi::Ooi, reference::Reference};

/// A reference and its neighbours, keyed by the step that reaches them
/// (`network`, `<hostname[is DNSARecord]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceNode {
    pub reference: Reference,
    #[serde(default)]
    pub children: BTreeMap<String, Vec<ReferenceNode>>,
}

impl ReferenceNode {
    pub fn leaf(reference: Reference) -> Self {
        Self {
            reference,
            children: BTreeMap::new(),
        }
    }

    /// Drops children (recursively) that fail `keep`; empty groups go too.
    pub fn filter_children<F>(&mut self, keep: &F)
    where
        F: Fn(&ReferenceNode) -> bool,
    {
        for nodes in self.children.values_mut() {
            nodes.retain(|node| keep(node));
            for node in nodes.iter_mut() {
                node.filter_children(keep);
            }
        }
        self.children.retain(|_, nodes| !nodes.is_empty());
    }

    pub fn collect_references(&self) -> BTreeSet<Reference> {
        let mut references = BTreeSet::new();
        self.collect_into(&mut references);
        references
    }

    fn collect_into(&self, references: &mut BTreeSet<Reference>) {
        references.insert(self.reference.clone());
        for node in self.children.values().flatten() {
            node.collect_into(references);
        }
    }
}

/// Neighbourhood of a root reference plus every object it mentions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceTree {
    pub root: ReferenceNode,
    pub store: BTreeMap<Reference, Ooi>,
}

impl ReferenceTree {
    /// Follows a dotted chain of steps from the root and returns the objects
    /// at the end of it.
    pub fn find_relation(&self, relation: &str) -> Vec<&Ooi> {
        let mut nodes = vec![&self.root];
        for part in relation.split('.') {
            nodes = nodes
                .into_iter()
                .filter_map(|node| node.children.get(part.trim()))
                .flatten()
                .collect();
        }
        nodes
            .into_iter()
            .filter_map(|node| self.store.get(&node.reference))
            .collect()
    }
}

/// One page of a listing together with the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub count: usize,
    pub items: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooi::{Hostname, Network};

    fn tree() -> ReferenceTree {
        let network: Ooi = Network::new("internet").into();
        let hostname: Ooi =
            Hostname::new(network.reference(), "example.com").into();

        let mut root = ReferenceNode::leaf(hostname.reference());
        root.children.insert(
            "network".to_string(),
            vec![ReferenceNode::leaf(network.reference())],
        );

        let store = [network, hostname]
            .into_iter()
            .map(|ooi| (ooi.reference(), ooi))
            .collect();
        ReferenceTree { root, store }
    }

    #[test]
    fn find_relation_walks_named_steps() {
        let tree = tree();
        let found = tree.find_relation("network");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reference().as_str(), "Network|internet");
        assert!(tree.find_relation("dns_zone").is_empty());
    }

    #[test]
    fn filter_children_prunes_empty_groups() {
        let mut tree = tree();
        tree.root.filter_children(&|_| false);
        assert!(tree.root.children.is_empty());
        assert_eq!(tree.root.collect_references().len(), 1);
    }
}
