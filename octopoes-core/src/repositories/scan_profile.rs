use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octopoes_model::{Reference, ScanProfile, ScanProfileType};
use serde_json::Value;

use crate::{
    database::{Document, FieldSet, PostCommit, PullQuery, Query, Session},
    error::{OctopoesError, Result},
    events::{ChangeEvent, DbEvent, ScanProfileEvent},
    repositories::{
        DOCUMENT_TYPE, documents, ports::ScanProfileRepository, typed_document,
    },
};

const SCAN_PROFILE: &str = "ScanProfile";

#[derive(Debug, Clone)]
pub struct XtdbScanProfileRepository {
    session: Arc<Session>,
    client: String,
}

impl XtdbScanProfileRepository {
    pub fn new(session: Arc<Session>, client: impl Into<String>) -> Self {
        Self {
            session,
            client: client.into(),
        }
    }

    /// Scan profiles live next to the object under `ScanProfile|{reference}`.
    pub fn format_id(reference: &Reference) -> String {
        format!("{SCAN_PROFILE}|{reference}")
    }

    pub fn serialize(profile: &ScanProfile) -> Result<Document> {
        typed_document(
            profile,
            &Self::format_id(profile.reference()),
            SCAN_PROFILE,
        )
    }

    fn deserialize(document: Document) -> Result<ScanProfile> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }

    async fn list_where(
        &self,
        query: PullQuery,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<ScanProfile>> {
        let query = query.filter(DOCUMENT_TYPE, SCAN_PROFILE);
        let rows = self
            .session
            .store()
            .query(&Query::Pull(query), valid_time)
            .await?;
        documents(rows).map(Self::deserialize).collect()
    }

    fn publish(&self, reference: &Reference, change: ChangeEvent<ScanProfile>) {
        self.session.listen_post_commit(PostCommit::Publish(
            DbEvent::ScanProfile(ScanProfileEvent {
                reference: reference.clone(),
                change,
            }),
        ));
    }
}

#[async_trait]
impl ScanProfileRepository for XtdbScanProfileRepository {
    async fn get(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<ScanProfile> {
        let id = Self::format_id(reference);
        let document = self
            .session
            .store()
            .get_entity(&id, valid_time)
            .await?
            .ok_or(OctopoesError::NotFound(id))?;
        Self::deserialize(document)
    }

    async fn save(
        &self,
        old: Option<&ScanProfile>,
        new: &ScanProfile,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        if old == Some(new) {
            return Ok(());
        }

        self.session.put(Self::serialize(new)?, valid_time);
        self.publish(
            new.reference(),
            ChangeEvent::saved(
                old.cloned(),
                new.clone(),
                valid_time,
                self.client.as_str(),
            ),
        );
        Ok(())
    }

    async fn delete(
        &self,
        profile: &ScanProfile,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        self.session
            .delete(Self::format_id(profile.reference()), valid_time);
        self.publish(
            profile.reference(),
            ChangeEvent::deleted(
                profile.clone(),
                valid_time,
                self.client.as_str(),
            ),
        );
        Ok(())
    }

    async fn list_scan_profiles(
        &self,
        profile_type: Option<ScanProfileType>,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<ScanProfile>> {
        let mut query = PullQuery::new(FieldSet::AllFields);
        if let Some(profile_type) = profile_type {
            query = query.filter("scan_profile_type", profile_type.as_str());
        }
        self.list_where(query, valid_time).await
    }

    async fn get_bulk(
        &self,
        references: &BTreeSet<Reference>,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<ScanProfile>> {
        if references.is_empty() {
            return Ok(Vec::new());
        }
        let references: Vec<String> =
            references.iter().map(|r| r.to_string()).collect();
        self.list_where(
            PullQuery::new(FieldSet::AllFields).filter("reference", references),
            valid_time,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::{PRIMARY_KEY, infrastructure::InMemoryDocumentStore},
        events::{InProcEventBus, OperationType},
    };
    use chrono::TimeZone;
    use octopoes_model::{ObjectType, ScanLevel};

    fn hostname() -> Reference {
        Reference::from_parts(ObjectType::Hostname, &["internet", "example.com"])
    }

    #[test]
    fn documents_are_keyed_by_reference() {
        let document =
            XtdbScanProfileRepository::serialize(&ScanProfile::empty(hostname()))
                .unwrap();
        assert_eq!(
            document[PRIMARY_KEY],
            "ScanProfile|Hostname|internet|example.com"
        );
        assert_eq!(document[DOCUMENT_TYPE], "ScanProfile");
        assert_eq!(document["reference"], "Hostname|internet|example.com");
    }

    #[tokio::test]
    async fn save_emits_create_then_update_and_skips_equal_profiles() {
        let valid_time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let bus = Arc::new(InProcEventBus::new(16));
        let mut events = bus.subscribe();
        let session = Arc::new(Session::new(
            Arc::new(InMemoryDocumentStore::new()),
            bus.clone(),
        ));
        let repository = XtdbScanProfileRepository::new(session.clone(), "test");

        let empty = ScanProfile::empty(hostname());
        let declared = ScanProfile::declared(hostname(), ScanLevel::L3);
        repository.save(None, &empty, valid_time).await.unwrap();
        repository
            .save(Some(&empty), &declared, valid_time)
            .await
            .unwrap();
        repository
            .save(Some(&declared), &declared, valid_time)
            .await
            .unwrap();
        assert_eq!(session.pending_operations().len(), 2);
        session.commit().await.unwrap();

        let operations: Vec<OperationType> = [events.try_recv(), events.try_recv()]
            .into_iter()
            .map(|event| event.unwrap().operation_type())
            .collect();
        assert_eq!(operations, vec![OperationType::Create, OperationType::Update]);

        let declared_only = repository
            .list_scan_profiles(Some(ScanProfileType::Declared), valid_time)
            .await
            .unwrap();
        assert_eq!(declared_only, vec![declared.clone()]);
        let bulk = repository
            .get_bulk(&BTreeSet::from([hostname()]), valid_time)
            .await
            .unwrap();
        assert_eq!(bulk, vec![declared]);
    }
}
