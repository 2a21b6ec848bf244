use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use octopoes_model::{
    Config, Direction, ObjectType, Ooi, Paginated, Path, Reference,
    ReferenceNode, ReferenceTree, Segment, neighbour_paths,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    bits::BitDefinition,
    database::{
        Document, FieldSet, NeighbourQuery, PRIMARY_KEY, PostCommit, PullQuery,
        Query, Session,
    },
    error::{OctopoesError, OptionalExt, Result},
    events::{ChangeEvent, DbEvent},
    repositories::{
        OBJECT_TYPE, document_reference, documents, ports::OoiRepository,
        related_documents,
    },
};

/// Objects stored as flat documents: every field is prefixed with the
/// concrete kind (`Hostname/name`), next to `object_type` and the primary
/// key.
#[derive(Debug, Clone)]
pub struct XtdbOoiRepository {
    session: Arc<Session>,
    client: String,
}

impl XtdbOoiRepository {
    pub fn new(session: Arc<Session>, client: impl Into<String>) -> Self {
        Self {
            session,
            client: client.into(),
        }
    }

    pub fn serialize(ooi: &Ooi) -> Result<Document> {
        let object_type = ooi.object_type();
        let Value::Object(fields) = serde_json::to_value(ooi)? else {
            return Err(OctopoesError::Validation(format!(
                "{object_type} did not serialize to an object"
            )));
        };

        let mut document = Document::new();
        for (field, value) in fields {
            if field == OBJECT_TYPE || value.is_null() {
                continue;
            }
            document.insert(format!("{object_type}/{field}"), value);
        }
        document.insert(
            OBJECT_TYPE.to_string(),
            Value::String(object_type.to_string()),
        );
        document.insert(
            PRIMARY_KEY.to_string(),
            Value::String(ooi.reference().into_inner()),
        );
        Ok(document)
    }

    pub fn deserialize(document: &Document) -> Result<Ooi> {
        let object_type = document
            .get(OBJECT_TYPE)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                OctopoesError::Validation(format!(
                    "document {:?} carries no {OBJECT_TYPE}",
                    document.get(PRIMARY_KEY)
                ))
            })?;

        let prefix = format!("{object_type}/");
        let mut fields = Map::new();
        fields.insert(
            OBJECT_TYPE.to_string(),
            Value::String(object_type.to_string()),
        );
        for (key, value) in document {
            if let Some(field) = key.strip_prefix(&prefix) {
                fields.insert(field.to_string(), value.clone());
            }
        }
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    async fn neighbour_rows(
        &self,
        ids: Vec<String>,
        attributes: Vec<String>,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        if ids.is_empty() || attributes.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::Neighbours(NeighbourQuery { ids, attributes });
        let rows = self.session.store().query(&query, valid_time).await?;
        Ok(documents(rows).collect())
    }

    /// One node per existing reference, carrying its direct neighbours as
    /// leaves keyed by the step that reaches them.
    async fn related_nodes(
        &self,
        references: &BTreeSet<Reference>,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<ReferenceNode>> {
        let kinds: BTreeSet<ObjectType> = references
            .iter()
            .filter_map(|reference| reference.class_type().ok())
            .collect();
        let attributes = first_hop_attributes(
            kinds.into_iter().flat_map(neighbour_paths).collect::<Vec<_>>().iter(),
        );
        let ids = references.iter().map(|r| r.to_string()).collect();

        let mut nodes = Vec::new();
        for row in self.neighbour_rows(ids, attributes, valid_time).await? {
            let Some(reference) = document_reference(&row) else {
                continue;
            };
            let source_type = reference.class_type()?;
            let mut node = ReferenceNode::leaf(reference);

            for (attribute, value) in &row {
                if attribute == PRIMARY_KEY {
                    continue;
                }
                let segment = match Segment::decode(source_type, attribute) {
                    Ok(segment) => segment,
                    Err(err) => {
                        debug!(attribute = %attribute, "skipping neighbour attribute: {err}");
                        continue;
                    }
                };
                let children: Vec<ReferenceNode> = related_documents(value)
                    .into_iter()
                    .filter_map(document_reference)
                    .map(ReferenceNode::leaf)
                    .collect();
                if !children.is_empty() {
                    node.children
                        .entry(segment.to_string())
                        .or_default()
                        .extend(children);
                }
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    fn tree_level(
        &self,
        references: BTreeSet<Reference>,
        depth: usize,
        mut exclude: BTreeSet<Reference>,
        valid_time: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<ReferenceNode>>> {
        Box::pin(async move {
            if depth == 0 || references.is_empty() {
                return Ok(Vec::new());
            }

            let mut nodes = self.related_nodes(&references, valid_time).await?;
            for node in &mut nodes {
                node.filter_children(&|child: &ReferenceNode| {
                    !exclude.contains(&child.reference)
                });
            }
            if depth == 1 {
                return Ok(nodes);
            }

            let deeper: BTreeSet<Reference> = nodes
                .iter()
                .flat_map(|node| node.children.values().flatten())
                .map(|child| child.reference.clone())
                .collect();
            exclude.extend(references);
            let expanded: BTreeMap<Reference, ReferenceNode> = self
                .tree_level(deeper, depth - 1, exclude, valid_time)
                .await?
                .into_iter()
                .map(|node| (node.reference.clone(), node))
                .collect();

            for node in &mut nodes {
                for child in node.children.values_mut().flatten() {
                    if let Some(subtree) = expanded.get(&child.reference) {
                        *child = subtree.clone();
                    }
                }
            }
            Ok(nodes)
        })
    }

    fn saved_event(
        &self,
        old: Option<Ooi>,
        new: Ooi,
        valid_time: DateTime<Utc>,
    ) -> PostCommit {
        PostCommit::Publish(DbEvent::Ooi(ChangeEvent::saved(
            old,
            new,
            valid_time,
            self.client.as_str(),
        )))
    }
}

/// Encoded store attributes for the first segment of each path.
fn first_hop_attributes<'a>(paths: impl Iterator<Item = &'a Path>) -> Vec<String> {
    paths
        .filter_map(|path| path.segments.first())
        .filter_map(|segment| segment.encode().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Store attributes crossed by `segment`. Abstract kinds on either side
/// expand to every concrete kind that declares the relation.
fn hop_attributes(segment: &Segment) -> Vec<String> {
    let property = segment.property_name.as_str();
    match segment.direction {
        Direction::Outgoing => segment
            .source_type
            .concrete_types()
            .into_iter()
            .filter(|owner| owner.relation(property).is_some())
            .map(|owner| format!("{owner}/{property}"))
            .collect(),
        Direction::Incoming => segment
            .target_type
            .map_or_else(|| ObjectType::CONCRETE.to_vec(), ObjectType::concrete_types)
            .into_iter()
            .filter(|owner| owner.relation(property).is_some())
            .map(|owner| format!("{owner}/_{property}"))
            .collect(),
    }
}

#[async_trait]
impl OoiRepository for XtdbOoiRepository {
    async fn get(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<Ooi> {
        let document = self
            .session
            .store()
            .get_entity(reference.as_str(), valid_time)
            .await?
            .ok_or_else(|| OctopoesError::NotFound(reference.to_string()))?;
        Self::deserialize(&document)
    }

    async fn load_bulk(
        &self,
        references: &BTreeSet<Reference>,
        valid_time: DateTime<Utc>,
    ) -> Result<BTreeMap<Reference, Ooi>> {
        if references.is_empty() {
            return Ok(BTreeMap::new());
        }
        let ids: Vec<String> = references.iter().map(|r| r.to_string()).collect();
        let query = PullQuery::new(FieldSet::AllFields).filter(PRIMARY_KEY, ids);
        let rows = self
            .session
            .store()
            .query(&Query::Pull(query), valid_time)
            .await?;

        documents(rows)
            .map(|document| {
                let ooi = Self::deserialize(&document)?;
                Ok((ooi.reference(), ooi))
            })
            .collect()
    }

    async fn list_oois(
        &self,
        types: &[ObjectType],
        valid_time: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Paginated<Ooi>> {
        let names: BTreeSet<String> = types
            .iter()
            .flat_map(|ty| ty.concrete_types())
            .map(|ty| ty.to_string())
            .collect();
        let filter = PullQuery::new(FieldSet::AllFields)
            .filter(OBJECT_TYPE, names.into_iter().collect::<Vec<_>>());

        let store = self.session.store();
        let count = store
            .query(&Query::Count(filter.clone()), valid_time)
            .await?
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let rows = store
            .query(&Query::Pull(filter.offset(offset).limit(limit)), valid_time)
            .await?;
        let items = documents(rows)
            .map(|document| Self::deserialize(&document))
            .collect::<Result<Vec<_>>>()?;

        Ok(Paginated { count, items })
    }

    async fn list_neighbours(
        &self,
        references: &BTreeSet<Reference>,
        paths: &[Path],
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Ooi>> {
        let ids = references.iter().map(|r| r.to_string()).collect();
        let attributes = first_hop_attributes(paths.iter());

        let mut neighbours = BTreeMap::new();
        for row in self.neighbour_rows(ids, attributes, valid_time).await? {
            for (attribute, value) in &row {
                if attribute == PRIMARY_KEY {
                    continue;
                }
                for related in related_documents(value) {
                    match Self::deserialize(related) {
                        Ok(ooi) => {
                            neighbours.insert(ooi.reference(), ooi);
                        }
                        Err(err) => {
                            debug!(attribute = %attribute, "could not deserialize neighbour: {err}");
                        }
                    }
                }
            }
        }
        Ok(neighbours.into_values().collect())
    }

    async fn get_neighbours(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
        paths: Option<&[Path]>,
    ) -> Result<BTreeMap<Path, Vec<Ooi>>> {
        let source_type = reference.class_type()?;
        let paths = match paths {
            Some(paths) => paths.to_vec(),
            None => neighbour_paths(source_type),
        };
        let attributes = first_hop_attributes(paths.iter());
        let rows = self
            .neighbour_rows(vec![reference.to_string()], attributes, valid_time)
            .await?;

        let mut grouped = BTreeMap::new();
        let Some(row) = rows.into_iter().next() else {
            return Ok(grouped);
        };
        for (attribute, value) in &row {
            if attribute == PRIMARY_KEY {
                continue;
            }
            let segment = Segment::decode(source_type, attribute)?;
            let oois = related_documents(value)
                .into_iter()
                .map(Self::deserialize)
                .collect::<Result<Vec<_>>>()?;
            if !oois.is_empty() {
                grouped.insert(Path::new(vec![segment]), oois);
            }
        }
        Ok(grouped)
    }

    async fn get_tree(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
        search_types: &[ObjectType],
        depth: usize,
    ) -> Result<ReferenceTree> {
        let start = BTreeSet::from([reference.clone()]);
        let mut root = self
            .tree_level(start, depth.max(1), BTreeSet::new(), valid_time)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OctopoesError::NotFound(reference.to_string()))?;

        if !search_types.is_empty() {
            root.filter_children(&|child: &ReferenceNode| {
                child.reference.class_type().is_ok_and(|kind| {
                    search_types.iter().any(|wanted| wanted.covers(kind))
                })
            });
        }

        let store = self
            .load_bulk(&root.collect_references(), valid_time)
            .await?;
        Ok(ReferenceTree { root, store })
    }

    async fn list_related(
        &self,
        ooi: &Ooi,
        path: &Path,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Ooi>> {
        let mut current = BTreeSet::from([ooi.reference()]);
        let mut reached: BTreeMap<Reference, Ooi> = BTreeMap::new();

        for segment in &path.segments {
            let ids = current.iter().map(|r| r.to_string()).collect();
            let rows = self
                .neighbour_rows(ids, hop_attributes(segment), valid_time)
                .await?;

            reached.clear();
            for row in &rows {
                for (attribute, value) in row {
                    if attribute == PRIMARY_KEY {
                        continue;
                    }
                    for related in related_documents(value) {
                        let Ok(next) = Self::deserialize(related) else {
                            continue;
                        };
                        let wanted = segment
                            .target_type
                            .is_none_or(|target| target.covers(next.object_type()));
                        if wanted {
                            reached.insert(next.reference(), next);
                        }
                    }
                }
            }
            current = reached.keys().cloned().collect();
            if current.is_empty() {
                break;
            }
        }

        Ok(reached.into_values().collect())
    }

    async fn save(
        &self,
        ooi: &Ooi,
        valid_time: DateTime<Utc>,
        end_valid_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let reference = ooi.reference();
        let old = self.get(&reference, valid_time).await.optional()?;

        let new = match &old {
            Some(old) => {
                let (merged, changed) = ooi.merge(old)?;
                if !changed {
                    return Ok(());
                }
                merged
            }
            None => ooi.clone(),
        };

        self.session.put(Self::serialize(&new)?, valid_time);
        if let Some(end_valid_time) = end_valid_time {
            self.session.delete(reference.to_string(), end_valid_time);
        }
        debug!(reference = %reference, created = old.is_none(), "queued object write");
        self.session
            .listen_post_commit(self.saved_event(old, new, valid_time));
        Ok(())
    }

    async fn delete(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let Some(old) = self.get(reference, valid_time).await.optional()? else {
            return Ok(());
        };

        self.session.delete(reference.to_string(), valid_time);
        self.session.listen_post_commit(PostCommit::Publish(DbEvent::Ooi(
            ChangeEvent::deleted(old, valid_time, self.client.as_str()),
        )));
        Ok(())
    }

    async fn list_oois_without_scan_profile(
        &self,
        valid_time: DateTime<Utc>,
    ) -> Result<BTreeSet<Reference>> {
        let rows = self
            .session
            .store()
            .query(&Query::MissingScanProfile, valid_time)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|id| id.as_str().and_then(|id| Reference::parse(id).ok()))
            .collect())
    }

    async fn get_bit_configs(
        &self,
        source: &Ooi,
        bit: &BitDefinition,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Config>> {
        let Some(config_path) = &bit.config_ooi_relation_path else {
            return Ok(Vec::new());
        };
        let path = Path::parse(&format!("{config_path}.<ooi[is Config]"))?;

        let mut configs: Vec<Config> = self
            .list_related(source, &path, valid_time)
            .await?
            .into_iter()
            .filter_map(|ooi| match ooi {
                Ooi::Config(config) if config.bit_id == bit.id => Some(config),
                _ => None,
            })
            .collect();
        configs.sort_by(|a, b| a.ooi.cmp(&b.ooi));
        Ok(configs)
    }
}
