use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octopoes_model::{OriginParameter, Reference};
use serde_json::Value;

use crate::{
    database::{Document, FieldSet, PostCommit, PullQuery, Query, Session},
    error::{OctopoesError, OptionalExt, Result},
    events::{ChangeEvent, DbEvent},
    repositories::{
        DOCUMENT_TYPE, documents, ports::OriginParameterRepository,
        typed_document,
    },
};

const ORIGIN_PARAMETER: &str = "OriginParameter";

#[derive(Debug, Clone)]
pub struct XtdbOriginParameterRepository {
    session: Arc<Session>,
    client: String,
}

impl XtdbOriginParameterRepository {
    pub fn new(session: Arc<Session>, client: impl Into<String>) -> Self {
        Self {
            session,
            client: client.into(),
        }
    }

    fn deserialize(document: Document) -> Result<OriginParameter> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }

    async fn list_where(
        &self,
        query: PullQuery,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<OriginParameter>> {
        let query = query.filter(DOCUMENT_TYPE, ORIGIN_PARAMETER);
        let rows = self
            .session
            .store()
            .query(&Query::Pull(query), valid_time)
            .await?;
        documents(rows).map(Self::deserialize).collect()
    }
}

#[async_trait]
impl OriginParameterRepository for XtdbOriginParameterRepository {
    async fn get(
        &self,
        id: &str,
        valid_time: DateTime<Utc>,
    ) -> Result<OriginParameter> {
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
        parameter: &OriginParameter,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let id = parameter.id();
        let old = self.get(&id, valid_time).await.optional()?;
        if old.as_ref() == Some(parameter) {
            return Ok(());
        }

        self.session
            .put(typed_document(parameter, &id, ORIGIN_PARAMETER)?, valid_time);
        self.session.listen_post_commit(PostCommit::Publish(
            DbEvent::OriginParameter(ChangeEvent::saved(
                old,
                parameter.clone(),
                valid_time,
                self.client.as_str(),
            )),
        ));
        Ok(())
    }

    async fn delete(
        &self,
        parameter: &OriginParameter,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        self.session.delete(parameter.id(), valid_time);
        self.session.listen_post_commit(PostCommit::Publish(
            DbEvent::OriginParameter(ChangeEvent::deleted(
                parameter.clone(),
                valid_time,
                self.client.as_str(),
            )),
        ));
        Ok(())
    }

    async fn list_by_origin(
        &self,
        origin_ids: &BTreeSet<String>,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<OriginParameter>> {
        if origin_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = origin_ids.iter().cloned().collect();
        self.list_where(
            PullQuery::new(FieldSet::AllFields).filter("origin_id", ids),
            valid_time,
        )
        .await
    }

    async fn list_by_reference(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<OriginParameter>> {
        self.list_where(
            PullQuery::new(FieldSet::AllFields)
                .filter("reference", reference.to_string()),
            valid_time,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::infrastructure::InMemoryDocumentStore, events::InProcEventBus,
    };
    use chrono::TimeZone;
    use octopoes_model::{ObjectType, Origin};

    #[tokio::test]
    async fn parameters_are_found_by_origin_and_reference() {
        let valid_time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let store = Arc::new(InMemoryDocumentStore::new());
        let session = Arc::new(Session::new(store, Arc::new(InProcEventBus::new(8))));
        let repository = XtdbOriginParameterRepository::new(session.clone(), "test");

        let hostname =
            Reference::from_parts(ObjectType::Hostname, &["internet", "example.com"]);
        let record = Reference::from_parts(
            ObjectType::DnsARecord,
            &["internet", "example.com", "192.0.2.1"],
        );
        let origin = Origin::inference("dns-resolving", hostname);
        let parameter = OriginParameter::new(origin.id(), record.clone());

        repository.save(&parameter, valid_time).await.unwrap();
        session.commit().await.unwrap();

        let by_origin = repository
            .list_by_origin(&BTreeSet::from([origin.id()]), valid_time)
            .await
            .unwrap();
        assert_eq!(by_origin, vec![parameter.clone()]);

        let by_reference = repository
            .list_by_reference(&record, valid_time)
            .await
            .unwrap();
        assert_eq!(by_reference, vec![parameter.clone()]);

        // Saving again is a no-op once the first write is durable.
        let session = Arc::new(Session::new(
            session.store().clone(),
            Arc::new(InProcEventBus::new(8)),
        ));
        let repository = XtdbOriginParameterRepository::new(session.clone(), "test");
        repository.save(&parameter, valid_time).await.unwrap();
        assert!(session.pending_operations().is_empty());
    }
}
