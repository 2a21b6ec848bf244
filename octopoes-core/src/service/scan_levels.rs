//! Scan level propagation.
//!
//! Declared profiles are the only roots. Levels flow outwards from them,
//! highest first, across every relation whose issuance limit admits the
//! level being propagated. The first level to reach an object wins, so an
//! object ends up with the highest level any declared root can hand it.

use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use octopoes_model::{
    InheritanceSection, ObjectType, Path, Reference, ScanLevel, ScanProfile,
    ScanProfileType, neighbour_paths,
};
use tracing::{debug, info};

use crate::{error::Result, service::ConsistencyService};

/// Writes issued by [`ConsistencyService::recalculate_scan_profiles`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalculationSummary {
    /// Objects reached from a declared profile, declared ones included.
    pub assigned: usize,
    /// Inherited profiles written because their level changed.
    pub updated: usize,
    /// Stale inherited levels reset to empty.
    pub reset: usize,
    /// Objects that had no profile at all.
    pub initialized: usize,
}

impl RecalculationSummary {
    /// Scan profile documents written in total.
    pub fn writes(&self) -> usize {
        self.updated + self.reset + self.initialized
    }
}

fn check_path_level(limit: Option<u8>, level: ScanLevel) -> bool {
    limit.is_some_and(|limit| limit >= level.value())
}

/// One-hop paths out of `source_type` that can carry `level`.
fn issuing_paths(source_type: ObjectType, level: ScanLevel) -> Vec<Path> {
    neighbour_paths(source_type)
        .into_iter()
        .filter(|path| {
            path.segments.first().is_some_and(|segment| {
                check_path_level(segment.max_scan_level_issuance(), level)
            })
        })
        .collect()
}

impl ConsistencyService {
    /// Recomputes every inherited scan level from the declared profiles and
    /// writes only the profiles whose value changes.
    pub async fn recalculate_scan_profiles(
        &self,
        valid_time: DateTime<Utc>,
    ) -> Result<RecalculationSummary> {
        let profiles = self
            .repositories
            .scan_profiles
            .list_scan_profiles(None, valid_time)
            .await?;
        let existing: BTreeMap<Reference, ScanProfile> = profiles
            .into_iter()
            .map(|profile| (profile.reference().clone(), profile))
            .collect();
        let declared: BTreeSet<Reference> = existing
            .values()
            .filter(|profile| profile.is_declared())
            .map(|profile| profile.reference().clone())
            .collect();

        let mut assigned: BTreeMap<Reference, ScanLevel> = existing
            .values()
            .filter(|profile| profile.is_declared())
            .map(|profile| (profile.reference().clone(), profile.level()))
            .collect();

        for level in ScanLevel::descending_positive() {
            let mut frontier: BTreeSet<Reference> = assigned
                .iter()
                .filter(|(_, assigned_level)| **assigned_level >= level)
                .map(|(reference, _)| reference.clone())
                .collect();

            while !frontier.is_empty() {
                let mut by_type: BTreeMap<ObjectType, BTreeSet<Reference>> =
                    BTreeMap::new();
                for reference in frontier {
                    match reference.class_type() {
                        Ok(object_type) => {
                            by_type.entry(object_type).or_default().insert(reference);
                        }
                        Err(err) => {
                            debug!(reference = %reference, "skipping unknown kind: {err}");
                        }
                    }
                }

                let mut next = BTreeSet::new();
                for (object_type, references) in by_type {
                    let paths = issuing_paths(object_type, level);
                    if paths.is_empty() {
                        continue;
                    }
                    let neighbours = self
                        .repositories
                        .oois
                        .list_neighbours(&references, &paths, valid_time)
                        .await?;
                    for neighbour in neighbours {
                        if let Entry::Vacant(entry) =
                            assigned.entry(neighbour.reference())
                        {
                            next.insert(entry.key().clone());
                            entry.insert(level);
                        }
                    }
                }
                frontier = next;
            }
        }

        let mut summary = RecalculationSummary {
            assigned: assigned.len(),
            ..Default::default()
        };

        for (reference, level) in &assigned {
            if declared.contains(reference) {
                continue;
            }
            let new = ScanProfile::inherited(reference.clone(), *level);
            let old = existing.get(reference);
            if old == Some(&new) {
                continue;
            }
            self.repositories
                .scan_profiles
                .save(old, &new, valid_time)
                .await?;
            summary.updated += 1;
        }

        let mut reset = BTreeSet::new();
        for (reference, profile) in &existing {
            if profile.level() == ScanLevel::L0
                || declared.contains(reference)
                || assigned.contains_key(reference)
            {
                continue;
            }
            self.repositories
                .scan_profiles
                .save(Some(profile), &ScanProfile::empty(reference.clone()), valid_time)
                .await?;
            reset.insert(reference.clone());
        }
        summary.reset = reset.len();

        let unprofiled = self
            .repositories
            .oois
            .list_oois_without_scan_profile(valid_time)
            .await?;
        for reference in unprofiled {
            if assigned.contains_key(&reference) || reset.contains(&reference) {
                continue;
            }
            self.repositories
                .scan_profiles
                .save(None, &ScanProfile::empty(reference), valid_time)
                .await?;
            summary.initialized += 1;
        }

        info!(
            assigned = summary.assigned,
            updated = summary.updated,
            reset = summary.reset,
            initialized = summary.initialized,
            "recalculated scan profiles"
        );
        Ok(summary)
    }

    /// Explains where the level of `reference` comes from: a chain of
    /// sections starting at the reference itself and, when the level is
    /// inherited, ending at the declared profile it descends from.
    ///
    /// Neighbours are explored depth first, highest level first, and a
    /// declared neighbour ends the search immediately. When no declared
    /// root can be found the chain holds only the reference itself.
    pub async fn get_scan_profile_inheritance(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<InheritanceSection>> {
        let profile = self
            .populate_scan_profiles(
                vec![self.repositories.oois.get(reference, valid_time).await?],
                valid_time,
            )
            .await?
            .remove(0)
            .scan_profile;
        let root = InheritanceSection {
            segment: None,
            reference: reference.clone(),
            level: profile.level(),
            scan_profile_type: profile.profile_type(),
        };
        if root.scan_profile_type == ScanProfileType::Declared
            || root.level == ScanLevel::L0
        {
            return Ok(vec![root]);
        }
        self.inheritance_chain(vec![root], valid_time).await
    }

    fn inheritance_chain(
        &self,
        chain: Vec<InheritanceSection>,
        valid_time: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<InheritanceSection>>> {
        Box::pin(async move {
            let Some(last) = chain.last() else {
                return Ok(chain);
            };
            let level = last.level;
            let visited: BTreeSet<&Reference> =
                chain.iter().map(|section| &section.reference).collect();

            let neighbours = self
                .repositories
                .oois
                .get_neighbours(&last.reference, valid_time, None)
                .await?;

            // First path wins for a neighbour reachable more than one way.
            let mut candidates: BTreeMap<Reference, (String, u8, Vec<_>)> =
                BTreeMap::new();
            for (path, oois) in neighbours {
                let Some(segment) = path.segments.first() else {
                    continue;
                };
                let Some(cap) = segment.max_scan_level_inheritance() else {
                    continue;
                };
                if !check_path_level(Some(cap), level) {
                    continue;
                }
                for ooi in oois {
                    let neighbour = ooi.reference();
                    if visited.contains(&neighbour) {
                        continue;
                    }
                    candidates
                        .entry(neighbour)
                        .or_insert_with(|| (segment.to_string(), cap, vec![ooi]));
                }
            }

            let profiles = self
                .populate_scan_profiles(
                    candidates
                        .values_mut()
                        .flat_map(|(_, _, oois)| oois.drain(..))
                        .collect(),
                    valid_time,
                )
                .await?;
            let mut sections: Vec<InheritanceSection> = profiles
                .into_iter()
                .filter(|profiled| profiled.scan_profile.level() >= level)
                .filter_map(|profiled| {
                    let reference = profiled.ooi.reference();
                    let (segment, cap, _) = candidates.get(&reference)?;
                    // A neighbour hands over no more than the relation admits.
                    Some(InheritanceSection {
                        segment: Some(segment.clone()),
                        level: profiled.scan_profile.level().capped(*cap),
                        scan_profile_type: profiled.scan_profile.profile_type(),
                        reference,
                    })
                })
                .collect();
            sections.sort_by(|a, b| {
                b.level.cmp(&a.level).then_with(|| a.reference.cmp(&b.reference))
            });

            if let Some(declared) = sections
                .iter()
                .find(|section| section.scan_profile_type == ScanProfileType::Declared)
            {
                let mut found = chain.clone();
                found.push(declared.clone());
                return Ok(found);
            }

            for section in sections {
                if section.scan_profile_type != ScanProfileType::Inherited {
                    continue;
                }
                let mut extended = chain.clone();
                extended.push(section);
                let explained = self.inheritance_chain(extended, valid_time).await?;
                if explained.last().is_some_and(|section| {
                    section.scan_profile_type == ScanProfileType::Declared
                }) {
                    return Ok(explained);
                }
            }
            Ok(chain)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostnames_hand_full_level_to_resolved_hostnames_only() {
        let paths: Vec<String> = issuing_paths(ObjectType::Hostname, ScanLevel::L4)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(paths, vec!["Hostname.<hostname[is ResolvedHostname]"]);

        let at_two: Vec<String> = issuing_paths(ObjectType::Hostname, ScanLevel::L2)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert!(at_two.contains(&"Hostname.<hostname[is DNSARecord]".to_string()));
        assert!(!at_two.contains(&"Hostname.dns_zone".to_string()));
        assert!(!at_two.contains(&"Hostname.network".to_string()));
    }

    #[test]
    fn unlimited_relations_never_carry_levels() {
        assert!(!check_path_level(None, ScanLevel::L1));
        assert!(check_path_level(Some(2), ScanLevel::L2));
        assert!(!check_path_level(Some(0), ScanLevel::L1));
    }
}
