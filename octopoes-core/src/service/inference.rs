use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use octopoes_model::{Origin, OriginParameter, OriginType, Path, ScanLevel};
use tracing::{debug, info, warn};

use crate::{
    bits::{BitConfig, BitDefinition},
    error::{OptionalExt, Result},
    repositories::OriginFilter,
    service::ConsistencyService,
};

const RECALCULATION_PAGE_SIZE: usize = 1000;

impl ConsistencyService {
    /// Bits switched on for this deployment.
    pub(crate) fn enabled_bits(&self) -> Vec<&BitDefinition> {
        self.bits
            .definitions()
            .filter(|definition| {
                self.bit_settings
                    .is_enabled(&definition.id, definition.default_enabled)
            })
            .collect()
    }

    /// Evaluates the bit behind an inference origin and records what it
    /// produced as the origin's new result.
    ///
    /// A bit that is unknown, disabled or not admitted by the source's scan
    /// level yields an empty result. A bit that fails leaves the origin as
    /// it is.
    pub(crate) async fn run_inference(
        &self,
        origin: &Origin,
        valid_time: DateTime<Utc>,
    ) -> Result<()> {
        let Some(source) = self
            .repositories
            .oois
            .get(&origin.source, valid_time)
            .await
            .optional()?
        else {
            debug!(origin = %origin.id(), "skipping inference, source is gone");
            return Ok(());
        };

        let definition = self
            .bits
            .get(&origin.method)
            .map(|bit| bit.definition())
            .filter(|definition| {
                self.bit_settings
                    .is_enabled(&definition.id, definition.default_enabled)
            });
        let Some(definition) = definition else {
            return self.save_origin(origin.clone(), &[], valid_time).await;
        };

        let level = self
            .repositories
            .scan_profiles
            .get(&origin.source, valid_time)
            .await
            .optional()?
            .map(|profile| profile.level())
            .unwrap_or(ScanLevel::L0);
        if level < definition.min_scan_level {
            debug!(
                bit = %definition.id,
                source = %origin.source,
                level = %level,
                "scan level below bit minimum"
            );
            return self.save_origin(origin.clone(), &[], valid_time).await;
        }

        let parameter_references: BTreeSet<_> = self
            .repositories
            .origin_parameters
            .list_by_origin(&BTreeSet::from([origin.id()]), valid_time)
            .await?
            .into_iter()
            .map(|parameter| parameter.reference)
            .collect();
        let parameters: Vec<_> = self
            .repositories
            .oois
            .load_bulk(&parameter_references, valid_time)
            .await?
            .into_values()
            .collect();

        let config = if definition.config_ooi_relation_path.is_some() {
            self.repositories
                .oois
                .get_bit_configs(&source, definition, valid_time)
                .await?
                .pop()
                .map(|config| config.config)
                .unwrap_or_default()
        } else {
            BitConfig::new()
        };

        let Some(bit) = self.bits.get(&definition.id) else {
            return Ok(());
        };
        match bit.run(&source, &parameters, &config) {
            Ok(produced) => self.save_origin(origin.clone(), &produced, valid_time).await,
            Err(err) => {
                warn!(
                    bit = %definition.id,
                    source = %origin.source,
                    "bit failed, keeping previous result: {err}"
                );
                Ok(())
            }
        }
    }

    /// Attaches every enabled bit to every object it consumes, links their
    /// parameters and reruns all inference origins. Returns how many
    /// inferences ran.
    ///
    /// Origins created here become visible after commit; their own create
    /// events run them then.
    pub async fn recalculate_bits(
        &self,
        valid_time: DateTime<Utc>,
    ) -> Result<usize> {
        for definition in self.enabled_bits() {
            let mut offset = 0;
            loop {
                let page = self
                    .repositories
                    .oois
                    .list_oois(
                        &[definition.consumes],
                        valid_time,
                        RECALCULATION_PAGE_SIZE,
                        offset,
                    )
                    .await?;
                let page_len = page.items.len();

                for ooi in &page.items {
                    let origin = Origin::inference(&definition.id, ooi.reference());
                    let origin_id = origin.id();
                    let existing = self
                        .repositories
                        .origins
                        .get(&origin_id, valid_time)
                        .await
                        .optional()?;
                    if existing.is_none() {
                        self.repositories.origins.save(&origin, valid_time).await?;
                    }

                    for parameter in &definition.parameters {
                        let path = Path::parse(&format!(
                            "{}.{}",
                            parameter.ooi_type, parameter.relation_path
                        ))?
                        .reverse()?;
                        let related = self
                            .repositories
                            .oois
                            .list_related(ooi, &path, valid_time)
                            .await?;
                        for related in related {
                            self.repositories
                                .origin_parameters
                                .save(
                                    &OriginParameter::new(
                                        origin_id.clone(),
                                        related.reference(),
                                    ),
                                    valid_time,
                                )
                                .await?;
                        }
                    }
                }

                offset += page_len;
                if page_len == 0 || offset >= page.count {
                    break;
                }
            }
        }

        let origins = self
            .repositories
            .origins
            .list_origins(
                &OriginFilter::new().origin_type(OriginType::Inference),
                valid_time,
            )
            .await?;
        for origin in &origins {
            self.run_inference(origin, valid_time).await?;
        }
        info!(executions = origins.len(), "recalculated bits");
        Ok(origins.len())
    }
}
