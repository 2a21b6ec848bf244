//! Reactions to committed changes.
//!
//! Every handler only writes through the service's own session. Whatever it
//! changes produces new events after the next commit, so a single event is
//! never handled recursively.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use octopoes_model::{
    Config, Ooi, Origin, OriginParameter, OriginType, Reference, ScanProfile,
};
use tracing::{debug, instrument};

use crate::{
    error::{OctopoesError, OptionalExt, Result},
    events::{ChangeEvent, DbEvent, EntityType, OperationType},
    repositories::OriginFilter,
    service::ConsistencyService,
};

/// What a change calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handler {
    OoiCreated,
    OoiUpdated,
    OoiDeleted,
    OriginCreated,
    OriginUpdated,
    OriginDeleted,
    ParameterChanged,
    ScanProfileChanged,
}

impl Handler {
    pub(crate) fn for_event(
        operation: OperationType,
        entity: EntityType,
    ) -> Option<Handler> {
        use EntityType as E;
        use OperationType as O;

        match (entity, operation) {
            (E::Ooi, O::Create) => Some(Handler::OoiCreated),
            (E::Ooi, O::Update) => Some(Handler::OoiUpdated),
            (E::Ooi, O::Delete) => Some(Handler::OoiDeleted),
            (E::Origin, O::Create) => Some(Handler::OriginCreated),
            (E::Origin, O::Update) => Some(Handler::OriginUpdated),
            (E::Origin, O::Delete) => Some(Handler::OriginDeleted),
            (E::OriginParameter, O::Create | O::Delete) => {
                Some(Handler::ParameterChanged)
            }
            // Parameters are immutable: their id is their content.
            (E::OriginParameter, O::Update) => None,
            (E::ScanProfile, _) => Some(Handler::ScanProfileChanged),
        }
    }
}

fn required<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| {
        OctopoesError::Validation(format!("event without {what}"))
    })
}

impl ConsistencyService {
    /// Applies the consequences of one committed change.
    #[instrument(
        skip(self, event),
        fields(
            operation = event.operation_type().as_str(),
            entity = event.entity_type().as_str(),
        )
    )]
    pub async fn process_event(&self, event: &DbEvent) -> Result<()> {
        let Some(handler) =
            Handler::for_event(event.operation_type(), event.entity_type())
        else {
            debug!("no handler");
            return Ok(());
        };
        let valid_time = event.valid_time();

        match (handler, event) {
            (Handler::OoiCreated, DbEvent::Ooi(change)) => {
                self.on_ooi_created(required(&change.new_data, "new_data")?, valid_time)
                    .await
            }
            (Handler::OoiUpdated, DbEvent::Ooi(change)) => {
                self.on_ooi_updated(required(&change.new_data, "new_data")?, valid_time)
                    .await
            }
            (Handler::OoiDeleted, DbEvent::Ooi(change)) => {
                let old = required(&change.old_data, "old_data")?;
                self.on_ooi_deleted(&old.reference(), valid_time).await
            }
            (Handler::OriginCreated, DbEvent::Origin(change)) => {
                let origin = required(&change.new_data, "new_data")?;
                if origin.origin_type == OriginType::Inference {
                    self.run_inference(origin, valid_time).await?;
                }
                Ok(())
            }
            (Handler::OriginUpdated, DbEvent::Origin(change)) => {
                let old = required(&change.old_data, "old_data")?;
                let new = required(&change.new_data, "new_data")?;
                for reference in old.dereferenced(new) {
                    self.delete_if_unreferenced(&reference, valid_time).await?;
                }
                Ok(())
            }
            (Handler::OriginDeleted, DbEvent::Origin(change)) => {
                let old = required(&change.old_data, "old_data")?;
                for reference in old.result_set() {
                    self.delete_if_unreferenced(reference, valid_time).await?;
                }
                Ok(())
            }
            (Handler::ParameterChanged, DbEvent::OriginParameter(change)) => {
                self.on_parameter_changed(change, valid_time).await
            }
            (Handler::ScanProfileChanged, DbEvent::ScanProfile(event)) => {
                self.rerun_inferences_from(&event.reference, valid_time)
                    .await
            }
            (handler, event) => Err(OctopoesError::Validation(format!(
                "{handler:?} cannot handle {} events",
                event.entity_type().as_str()
            ))),
        }
    }

    async fn on_ooi_created(
        &self,
        ooi: &Ooi,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let reference = ooi.reference();
        let object_type = ooi.object_type();

        let profile = self
            .repositories
            .scan_profiles
            .get(&reference, valid_time)
            .await
            .optional()?;
        if profile.is_none() {
            self.repositories
                .scan_profiles
                .save(None, &ScanProfile::empty(reference.clone()), valid_time)
                .await?;
        }

        for definition in self.enabled_bits() {
            if definition.consumes_type(object_type) {
                let origin = Origin::inference(&definition.id, reference.clone());
                self.repositories.origins.save(&origin, valid_time).await?;
            }

            for parameter in &definition.parameters {
                if !parameter.ooi_type.covers(object_type) {
                    continue;
                }
                let depth = parameter.relation_path.split('.').count();
                let Some(tree) = self
                    .repositories
                    .oois
                    .get_tree(&reference, valid_time, &[], depth)
                    .await
                    .optional()?
                else {
                    continue;
                };

                for ancestor in tree.find_relation(&parameter.relation_path) {
                    if !definition.consumes_type(ancestor.object_type()) {
                        continue;
                    }
                    let owner =
                        Origin::inference(&definition.id, ancestor.reference());
                    self.repositories
                        .origin_parameters
                        .save(
                            &OriginParameter::new(owner.id(), reference.clone()),
                            valid_time,
                        )
                        .await?;
                }
            }
        }

        if let Ooi::Config(config) = ooi {
            self.rerun_configured_bit(config, valid_time).await?;
        }
        Ok(())
    }

    async fn on_ooi_updated(
        &self,
        ooi: &Ooi,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let reference = ooi.reference();

        // Keyed by id: an origin can be reached both as source and through
        // one of its parameters.
        let mut origins: BTreeMap<String, Origin> = self
            .repositories
            .origins
            .list_origins(
                &OriginFilter::new()
                    .source(reference.clone())
                    .origin_type(OriginType::Inference),
                valid_time,
            )
            .await?
            .into_iter()
            .map(|origin| (origin.id(), origin))
            .collect();

        let parameters = self
            .repositories
            .origin_parameters
            .list_by_reference(&reference, valid_time)
            .await?;
        for parameter in parameters {
            if origins.contains_key(&parameter.origin_id) {
                continue;
            }
            if let Some(origin) = self
                .repositories
                .origins
                .get(&parameter.origin_id, valid_time)
                .await
                .optional()?
                && origin.origin_type == OriginType::Inference
            {
                origins.insert(parameter.origin_id, origin);
            }
        }

        for origin in origins.values() {
            self.run_inference(origin, valid_time).await?;
        }

        if let Ooi::Config(config) = ooi {
            self.rerun_configured_bit(config, valid_time).await?;
        }
        Ok(())
    }

    /// Cascades a removed object to the provenance that depends on it.
    async fn on_ooi_deleted(
        &self,
        reference: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let origins = self
            .repositories
            .origins
            .list_origins(&OriginFilter::new().source(reference.clone()), valid_time)
            .await?;
        for origin in &origins {
            self.repositories.origins.delete(origin, valid_time).await?;
        }

        let parameters = self
            .repositories
            .origin_parameters
            .list_by_reference(reference, valid_time)
            .await?;
        for parameter in &parameters {
            self.repositories
                .origin_parameters
                .delete(parameter, valid_time)
                .await?;
        }

        debug!(
            reference = %reference,
            origins = origins.len(),
            parameters = parameters.len(),
            "cascaded object delete"
        );
        self.delete_scan_profile(reference, valid_time).await
    }

    async fn on_parameter_changed(
        &self,
        change: &ChangeEvent<OriginParameter>,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let Some(parameter) = change.latest() else {
            return Err(OctopoesError::Validation(
                "origin parameter event without data".into(),
            ));
        };
        match self
            .repositories
            .origins
            .get(&parameter.origin_id, valid_time)
            .await
            .optional()?
        {
            Some(origin) => self.run_inference(&origin, valid_time).await,
            None => {
                debug!(origin = %parameter.origin_id, "parameter owner is gone");
                Ok(())
            }
        }
    }

    async fn rerun_inferences_from(
        &self,
        source: &Reference,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let origins = self
            .repositories
            .origins
            .list_origins(
                &OriginFilter::new()
                    .source(source.clone())
                    .origin_type(OriginType::Inference),
                valid_time,
            )
            .await?;
        for origin in &origins {
            self.run_inference(origin, valid_time).await?;
        }
        Ok(())
    }

    /// Reruns every inference of the bit a `Config` object configures.
    async fn rerun_configured_bit(
        &self,
        config: &Config,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let configurable = self
            .bits
            .get(&config.bit_id)
            .is_some_and(|bit| bit.definition().config_ooi_relation_path.is_some());
        if !configurable {
            return Ok(());
        }

        let origins = self
            .repositories
            .origins
            .list_origins(
                &OriginFilter::new()
                    .methods([config.bit_id.as_str()])
                    .origin_type(OriginType::Inference),
                valid_time,
            )
            .await?;
        debug!(bit = %config.bit_id, origins = origins.len(), "rerunning configured bit");
        for origin in &origins {
            self.run_inference(origin, valid_time).await?;
        }
        Ok(())
    }
}
