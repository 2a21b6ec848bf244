use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octopoes_model::{Origin, OriginType};
use serde_json::Value;
use tracing::debug;

use crate::{
    database::{Document, FieldSet, PostCommit, PullQuery, Query, Session},
    error::{OctopoesError, OptionalExt, Result},
    events::{ChangeEvent, DbEvent},
    repositories::{
        DOCUMENT_TYPE, documents,
        ports::{OriginFilter, OriginRepository},
        typed_document,
    },
};

const ORIGIN: &str = "Origin";

#[derive(Debug, Clone)]
pub struct XtdbOriginRepository {
    session: Arc<Session>,
    client: String,
}

impl XtdbOriginRepository {
    pub fn new(session: Arc<Session>, client: impl Into<String>) -> Self {
        Self {
            session,
            client: client.into(),
        }
    }

    pub fn serialize(origin: &Origin) -> Result<Document> {
        typed_document(origin, &origin.id(), ORIGIN)
    }

    pub fn deserialize(document: Document) -> Result<Origin> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }

    fn publish(&self, event: ChangeEvent<Origin>) {
        self.session
            .listen_post_commit(PostCommit::Publish(DbEvent::Origin(event)));
    }
}

#[async_trait]
impl OriginRepository for XtdbOriginRepository {
    async fn get(&self, id: &str, valid_time: DateTime<Utc>) -> Result<Origin> {
        let document = self
            .session
            .store()
            .get_entity(id, valid_time)
            .await?
            .ok_or_else(|| OctopoesError::NotFound(id.to_string()))?;
        Self::deserialize(document)
    }

    async fn save(
        &self,
        origin: &Origin,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let id = origin.id();
        let old = self.get(&id, valid_time).await.optional()?;

        if origin.result.is_empty() && origin.origin_type != OriginType::Inference {
            if let Some(old) = old {
                debug!(origin = %id, "pruning origin without results");
                self.delete(&old, valid_time).await?;
            }
            return Ok(());
        }

        if let Some(old) = &old
            && old == origin
        {
            if old.task_id != origin.task_id {
                // Same provenance from a newer run: replace the document so
                // it carries the latest task id, silently.
                self.session.delete(id.clone(), valid_time);
                self.session.put(Self::serialize(origin)?, valid_time);
            }
            return Ok(());
        }

        self.session.put(Self::serialize(origin)?, valid_time);
        self.publish(ChangeEvent::saved(
            old,
            origin.clone(),
            valid_time,
            self.client.as_str(),
        ));
        Ok(())
    }

    async fn delete(
        &self,
        origin: &Origin,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        self.session.delete(origin.id(), valid_time);
        self.publish(ChangeEvent::deleted(
            origin.clone(),
            valid_time,
            self.client.as_str(),
        ));
        Ok(())
    }

    async fn list_origins(
        &self,
        filter: &OriginFilter,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Origin>> {
        let mut query =
            PullQuery::new(FieldSet::AllFields).filter(DOCUMENT_TYPE, ORIGIN);
        if let Some(task_id) = filter.task_id {
            query = query.filter("task_id", task_id.to_string());
        }
        if let Some(source) = &filter.source {
            query = query.filter("source", source.to_string());
        }
        if let Some(result) = &filter.result {
            query = query.filter("result", result.to_string());
        }
        if !filter.methods.is_empty() {
            query = query.filter("method", filter.methods.clone());
        }
        if let Some(origin_type) = filter.origin_type {
            query = query.filter("origin_type", origin_type.as_str());
        }

        let rows = self
            .session
            .store()
            .query(&Query::Pull(query), valid_time)
            .await?;
        documents(rows).map(Self::deserialize).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::infrastructure::InMemoryDocumentStore, events::InProcEventBus,
    };
    use chrono::TimeZone;
    use octopoes_model::{ObjectType, Reference};
    use uuid::Uuid;

    fn valid_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn hostname() -> Reference {
        Reference::from_parts(ObjectType::Hostname, &["internet", "example.com"])
    }

    fn observation(task_id: Uuid) -> Origin {
        Origin::new(OriginType::Observation, "kat_dns", hostname())
            .with_task_id(task_id)
            .with_result(vec![hostname()])
    }

    struct Fixture {
        store: Arc<InMemoryDocumentStore>,
        bus: Arc<InProcEventBus>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryDocumentStore::new()),
                bus: Arc::new(InProcEventBus::new(64)),
            }
        }

        fn repository(&self) -> (XtdbOriginRepository, Arc<Session>) {
            let session = Arc::new(Session::new(self.store.clone(), self.bus.clone()));
            (XtdbOriginRepository::new(session.clone(), "test"), session)
        }
    }

    #[tokio::test]
    async fn identical_saves_write_once() {
        let fixture = Fixture::new();
        let mut events = fixture.bus.subscribe();
        let origin = observation(Uuid::new_v4());

        let (repository, session) = fixture.repository();
        repository.save(&origin, valid_time()).await.unwrap();
        session.commit().await.unwrap();
        assert!(events.try_recv().is_ok());

        let (repository, session) = fixture.repository();
        repository.save(&origin, valid_time()).await.unwrap();
        assert!(session.pending_operations().is_empty());
        session.commit().await.unwrap();
        assert!(events.try_recv().is_err());
        assert_eq!(fixture.store.operation_count(), 1);
    }

    #[tokio::test]
    async fn new_task_id_replaces_document_without_event() {
        let fixture = Fixture::new();
        let mut events = fixture.bus.subscribe();
        let (repository, session) = fixture.repository();
        repository.save(&observation(Uuid::new_v4()), valid_time()).await.unwrap();
        session.commit().await.unwrap();
        let _ = events.try_recv();

        let rerun = Uuid::new_v4();
        let (repository, session) = fixture.repository();
        repository.save(&observation(rerun), valid_time()).await.unwrap();
        assert_eq!(session.pending_operations().len(), 2);
        session.commit().await.unwrap();
        assert!(events.try_recv().is_err());

        let (repository, _) = fixture.repository();
        let stored = repository
            .get(&observation(rerun).id(), valid_time())
            .await
            .unwrap();
        assert_eq!(stored.task_id, Some(rerun));
    }

    #[tokio::test]
    async fn empty_observations_are_pruned() {
        let fixture = Fixture::new();
        let (repository, session) = fixture.repository();
        let origin = observation(Uuid::new_v4());
        repository.save(&origin, valid_time()).await.unwrap();
        session.commit().await.unwrap();

        let (repository, session) = fixture.repository();
        repository
            .save(&origin.clone().with_result(Vec::new()), valid_time())
            .await
            .unwrap();
        session.commit().await.unwrap();

        let (repository, _) = fixture.repository();
        let err = repository.get(&origin.id(), valid_time()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn empty_inference_origins_are_kept() {
        let fixture = Fixture::new();
        let (repository, session) = fixture.repository();
        let origin = Origin::inference("dns-resolving", hostname());
        repository.save(&origin, valid_time()).await.unwrap();
        session.commit().await.unwrap();

        let (repository, _) = fixture.repository();
        assert_eq!(repository.get(&origin.id(), valid_time()).await.unwrap(), origin);
    }

    #[tokio::test]
    async fn filters_combine() {
        let fixture = Fixture::new();
        let (repository, session) = fixture.repository();
        let task_id = Uuid::new_v4();
        repository.save(&observation(task_id), valid_time()).await.unwrap();
        repository
            .save(&Origin::inference("dns-resolving", hostname()), valid_time())
            .await
            .unwrap();
        session.commit().await.unwrap();

        let by_result = repository
            .list_origins(&OriginFilter::new().result(hostname()), valid_time())
            .await
            .unwrap();
        assert_eq!(by_result.len(), 1);

        let inferences = repository
            .list_origins(
                &OriginFilter::new()
                    .source(hostname())
                    .origin_type(OriginType::Inference),
                valid_time(),
            )
            .await
            .unwrap();
        assert_eq!(inferences.len(), 1);
        assert_eq!(inferences[0].method, "dns-resolving");

        let by_task = repository
            .list_origins(
                &OriginFilter::new().task_id(task_id).methods(["kat_dns"]),
                valid_time(),
            )
            .await
            .unwrap();
        assert_eq!(by_task.len(), 1);
    }
}
