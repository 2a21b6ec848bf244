//! Bitemporal document store held in process memory.
//!
//! Every write appends a version stamped with its valid time and transaction
//! order. A read as of `t` sees, per document, the latest version whose valid
//! time is not after `t`. Used by tests and single-process deployments.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Value, json};

use crate::{
    database::{
        ports::{
            Document, DocumentStore, PRIMARY_KEY, TransactionOperation,
            TransactionReceipt,
        },
        query::{FieldSet, NeighbourQuery, PullQuery, Query},
    },
    error::Result,
};

#[derive(Debug, Clone)]
struct Version {
    valid_time: DateTime<Utc>,
    document: Option<Document>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<String, Vec<Version>>,
    last_tx_id: u64,
    operations: usize,
}

impl MemoryState {
    fn as_of(&self, id: &str, valid_time: DateTime<Utc>) -> Option<&Document> {
        self.entities
            .get(id)?
            .iter()
            .enumerate()
            .filter(|(_, version)| version.valid_time <= valid_time)
            .max_by_key(|(order, version)| (version.valid_time, *order))
            .and_then(|(_, version)| version.document.as_ref())
    }

    /// Live documents as of `valid_time`, ordered by id.
    fn snapshot(&self, valid_time: DateTime<Utc>) -> BTreeMap<&str, &Document> {
        self.entities
            .keys()
            .filter_map(|id| {
                self.as_of(id, valid_time)
                    .map(|document| (id.as_str(), document))
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<MemoryState>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions submitted so far.
    pub fn transaction_count(&self) -> u64 {
        self.state.read().last_tx_id
    }

    /// Number of put and delete operations submitted so far.
    pub fn operation_count(&self) -> usize {
        self.state.read().operations
    }

    fn evaluate_pull(
        snapshot: &BTreeMap<&str, &Document>,
        pull: &PullQuery,
    ) -> Vec<Vec<Value>> {
        let matching = snapshot
            .values()
            .filter(|document| pull.matches(document))
            .skip(pull.offset.unwrap_or(0))
            .take(pull.limit.unwrap_or(usize::MAX));

        matching
            .map(|document| {
                let document = match pull.fields {
                    FieldSet::AllFields => (*document).clone(),
                    FieldSet::OnlyId => document
                        .get(PRIMARY_KEY)
                        .map(|id| {
                            Document::from_iter([(PRIMARY_KEY.to_string(), id.clone())])
                        })
                        .unwrap_or_default(),
                };
                vec![Value::Object(document)]
            })
            .collect()
    }

    fn evaluate_neighbours(
        snapshot: &BTreeMap<&str, &Document>,
        query: &NeighbourQuery,
    ) -> Vec<Vec<Value>> {
        let mut rows = Vec::new();
        for id in &query.ids {
            if !snapshot.contains_key(id.as_str()) {
                continue;
            }
            let mut row = Document::new();
            row.insert(PRIMARY_KEY.to_string(), Value::String(id.clone()));

            for attribute in &query.attributes {
                let Some((owner, property)) = attribute.split_once('/') else {
                    continue;
                };
                let related = match property.strip_prefix('_') {
                    Some(property) => {
                        incoming(snapshot, id, &format!("{owner}/{property}"))
                    }
                    None => match outgoing(snapshot, id, attribute) {
                        Some(value) => value,
                        None => continue,
                    },
                };
                if related != Value::Array(Vec::new()) {
                    row.insert(attribute.clone(), related);
                }
            }
            rows.push(vec![Value::Object(row)]);
        }
        rows
    }

    fn evaluate_missing_scan_profiles(
        snapshot: &BTreeMap<&str, &Document>,
    ) -> Vec<Vec<Value>> {
        let profiled: BTreeSet<&str> = snapshot
            .values()
            .filter(|document| {
                document.get("type").and_then(Value::as_str) == Some("ScanProfile")
            })
            .filter_map(|document| document.get("reference").and_then(Value::as_str))
            .collect();

        snapshot
            .iter()
            .filter(|(_, document)| document.contains_key("object_type"))
            .filter(|(id, _)| !profiled.contains(*id))
            .map(|(id, _)| vec![Value::String((*id).to_string())])
            .collect()
    }
}

/// Documents referenced by `attribute` on document `id`. List-valued
/// attributes resolve to a list.
fn outgoing(
    snapshot: &BTreeMap<&str, &Document>,
    id: &str,
    attribute: &str,
) -> Option<Value> {
    let value = snapshot.get(id)?.get(attribute)?;
    let resolve = |target: &Value| {
        target
            .as_str()
            .and_then(|target| snapshot.get(target))
            .map(|document| Value::Object((*document).clone()))
    };
    match value {
        Value::Array(targets) => {
            Some(Value::Array(targets.iter().filter_map(resolve).collect()))
        }
        target => resolve(target),
    }
}

/// Documents whose `attribute` points at `id`.
fn incoming(
    snapshot: &BTreeMap<&str, &Document>,
    id: &str,
    attribute: &str,
) -> Value {
    let wanted = Value::String(id.to_string());
    let found = snapshot
        .values()
        .filter(|document| match document.get(attribute) {
            Some(Value::Array(items)) => items.contains(&wanted),
            Some(value) => *value == wanted,
            None => false,
        })
        .map(|document| Value::Object((*document).clone()))
        .collect();
    Value::Array(found)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_entity(
        &self,
        id: &str,
        valid_time: DateTime<Utc>,
    ) -> Result<Option<Document>> {
        Ok(self.state.read().as_of(id, valid_time).cloned())
    }

    async fn query(
        &self,
        query: &Query,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Vec<Value>>> {
        let state = self.state.read();
        let snapshot = state.snapshot(valid_time);

        Ok(match query {
            Query::Pull(pull) => Self::evaluate_pull(&snapshot, pull),
            Query::Count(pull) => {
                let count = snapshot
                    .values()
                    .filter(|document| pull.matches(document))
                    .count();
                vec![vec![json!(count)]]
            }
            Query::Neighbours(neighbours) => {
                Self::evaluate_neighbours(&snapshot, neighbours)
            }
            Query::MissingScanProfile => {
                Self::evaluate_missing_scan_profiles(&snapshot)
            }
        })
    }

    async fn submit_transaction(
        &self,
        operations: Vec<TransactionOperation>,
    ) -> Result<TransactionReceipt> {
        let mut state = self.state.write();
        state.last_tx_id += 1;
        state.operations += operations.len();

        for operation in operations {
            let (id, version) = match operation {
                TransactionOperation::Put {
                    document,
                    valid_time,
                } => {
                    let Some(id) = document
                        .get(PRIMARY_KEY)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                    else {
                        continue;
                    };
                    (
                        id,
                        Version {
                            valid_time,
                            document: Some(document),
                        },
                    )
                }
                TransactionOperation::Delete { id, valid_time } => (
                    id,
                    Version {
                        valid_time,
                        document: None,
                    },
                ),
            };
            state.entities.entry(id).or_default().push(version);
        }

        Ok(TransactionReceipt {
            tx_id: state.last_tx_id,
            tx_time: Utc::now(),
        })
    }

    async fn status(&self) -> Result<Value> {
        let state = self.state.read();
        Ok(json!({
            "kv-store": "memory",
            "latest-completed-tx": state.last_tx_id,
            "entities": state.entities.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn put(value: Value, valid_time: DateTime<Utc>) -> TransactionOperation {
        TransactionOperation::Put {
            document: doc(value),
            valid_time,
        }
    }

    #[tokio::test]
    async fn reads_are_as_of_valid_time() {
        let store = InMemoryDocumentStore::new();
        let later = t0() + Duration::hours(1);
        store
            .submit_transaction(vec![put(json!({"xt/id": "a", "v": 1}), t0())])
            .await
            .unwrap();
        store
            .submit_transaction(vec![put(json!({"xt/id": "a", "v": 2}), later)])
            .await
            .unwrap();

        let before = store.get_entity("a", t0() - Duration::seconds(1)).await.unwrap();
        let first = store.get_entity("a", t0()).await.unwrap().unwrap();
        let second = store.get_entity("a", later).await.unwrap().unwrap();

        assert!(before.is_none());
        assert_eq!(first["v"], json!(1));
        assert_eq!(second["v"], json!(2));
    }

    #[tokio::test]
    async fn delete_hides_document_from_its_valid_time() {
        let store = InMemoryDocumentStore::new();
        let end = t0() + Duration::days(1);
        store
            .submit_transaction(vec![
                put(json!({"xt/id": "a"}), t0()),
                TransactionOperation::Delete {
                    id: "a".into(),
                    valid_time: end,
                },
            ])
            .await
            .unwrap();

        assert!(store.get_entity("a", t0()).await.unwrap().is_some());
        assert!(store.get_entity("a", end).await.unwrap().is_none());
        assert_eq!(store.transaction_count(), 1);
        assert_eq!(store.operation_count(), 2);

        let status = store.status().await.unwrap();
        assert_eq!(status["latest-completed-tx"], json!(1));
        assert_eq!(status["entities"], json!(1));
    }

    #[tokio::test]
    async fn neighbour_queries_follow_both_directions() {
        let store = InMemoryDocumentStore::new();
        store
            .submit_transaction(vec![
                put(json!({"xt/id": "Network|internet", "object_type": "Network"}), t0()),
                put(
                    json!({
                        "xt/id": "Hostname|internet|example.com",
                        "object_type": "Hostname",
                        "Hostname/network": "Network|internet",
                    }),
                    t0(),
                ),
            ])
            .await
            .unwrap();

        let rows = store
            .query(
                &Query::Neighbours(NeighbourQuery {
                    ids: vec!["Network|internet".into()],
                    attributes: vec!["Hostname/_network".into(), "IPAddressV4/_network".into()],
                }),
                t0(),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        let row = rows[0][0].as_object().unwrap();
        assert_eq!(row["Hostname/_network"].as_array().unwrap().len(), 1);
        assert!(!row.contains_key("IPAddressV4/_network"));
    }

    #[tokio::test]
    async fn pull_paginates_in_id_order_and_count_ignores_pages() {
        let store = InMemoryDocumentStore::new();
        let ops = ["c", "a", "b"]
            .into_iter()
            .map(|id| put(json!({"xt/id": id, "object_type": "Network"}), t0()))
            .collect();
        store.submit_transaction(ops).await.unwrap();

        let pull = PullQuery::new(FieldSet::OnlyId)
            .filter("object_type", "Network")
            .offset(1)
            .limit(1);
        let rows = store.query(&Query::Pull(pull.clone()), t0()).await.unwrap();
        assert_eq!(rows, vec![vec![json!({"xt/id": "b"})]]);

        let count = store.query(&Query::Count(pull), t0()).await.unwrap();
        assert_eq!(count, vec![vec![json!(3)]]);
    }

    #[tokio::test]
    async fn reports_objects_without_scan_profile() {
        let store = InMemoryDocumentStore::new();
        store
            .submit_transaction(vec![
                put(json!({"xt/id": "Network|a", "object_type": "Network"}), t0()),
                put(json!({"xt/id": "Network|b", "object_type": "Network"}), t0()),
                put(
                    json!({
                        "xt/id": "ScanProfile|Network|a",
                        "type": "ScanProfile",
                        "reference": "Network|a",
                    }),
                    t0(),
                ),
            ])
            .await
            .unwrap();

        let rows = store.query(&Query::MissingScanProfile, t0()).await.unwrap();
        assert_eq!(rows, vec![vec![json!("Network|b")]]);
    }
}
