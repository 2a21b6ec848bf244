//! Typed access to the four stored entity kinds.
//!
//! The traits in [`ports`] are what the consistency service depends on. The
//! `Xtdb*` adapters map entities onto the XTDB document layout, read through
//! the session's store and buffer their writes and change events in the
//! session until it commits.

mod ooi;
mod origin;
mod origin_parameter;
pub mod ports;
mod scan_profile;

use std::{any::type_name_of_val, fmt, sync::Arc};

use serde_json::Value;

use octopoes_model::Reference;

use crate::database::{Document, PRIMARY_KEY, Session};

pub use ooi::XtdbOoiRepository;
pub use origin::XtdbOriginRepository;
pub use origin_parameter::XtdbOriginParameterRepository;
pub use ports::{
    OoiRepository, OriginFilter, OriginParameterRepository, OriginRepository,
    ScanProfileRepository,
};
pub use scan_profile::XtdbScanProfileRepository;

/// The four repository ports sharing one session.
#[derive(Clone)]
pub struct Repositories {
    pub oois: Arc<dyn OoiRepository>,
    pub origins: Arc<dyn OriginRepository>,
    pub origin_parameters: Arc<dyn OriginParameterRepository>,
    pub scan_profiles: Arc<dyn ScanProfileRepository>,
}

impl Repositories {
    /// XTDB-layout repositories writing through `session` on behalf of
    /// `client`.
    pub fn xtdb(session: &Arc<Session>, client: &str) -> Self {
        Self {
            oois: Arc::new(XtdbOoiRepository::new(session.clone(), client)),
            origins: Arc::new(XtdbOriginRepository::new(session.clone(), client)),
            origin_parameters: Arc::new(XtdbOriginParameterRepository::new(
                session.clone(),
                client,
            )),
            scan_profiles: Arc::new(XtdbScanProfileRepository::new(
                session.clone(),
                client,
            )),
        }
    }
}

impl fmt::Debug for Repositories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repositories")
            .field("oois", &type_name_of_val(self.oois.as_ref()))
            .field("origins", &type_name_of_val(self.origins.as_ref()))
            .field(
                "origin_parameters",
                &type_name_of_val(self.origin_parameters.as_ref()),
            )
            .field(
                "scan_profiles",
                &type_name_of_val(self.scan_profiles.as_ref()),
            )
            .finish()
    }
}

/// Discriminator attribute on object documents.
pub const OBJECT_TYPE: &str = "object_type";

/// Discriminator attribute on provenance and scan profile documents.
pub const DOCUMENT_TYPE: &str = "type";

/// First column of every result row, when it is a document.
pub(crate) fn documents(
    rows: Vec<Vec<Value>>,
) -> impl Iterator<Item = Document> {
    rows.into_iter()
        .filter_map(|row| match row.into_iter().next() {
            Some(Value::Object(document)) => Some(document),
            _ => None,
        })
}

/// Nested documents under a pulled relation attribute.
pub(crate) fn related_documents(value: &Value) -> Vec<&Document> {
    match value {
        Value::Object(document) => vec![document],
        Value::Array(items) => {
            items.iter().filter_map(Value::as_object).collect()
        }
        _ => Vec::new(),
    }
}

pub(crate) fn document_id(document: &Document) -> Option<&str> {
    document.get(PRIMARY_KEY).and_then(Value::as_str)
}

pub(crate) fn document_reference(document: &Document) -> Option<Reference> {
    document_id(document).and_then(|id| Reference::parse(id).ok())
}

/// Serializes `value` to a JSON object and stamps it with its id and kind.
pub(crate) fn typed_document<T: serde::Serialize>(
    value: &T,
    id: &str,
    document_type: &str,
) -> crate::error::Result<Document> {
    let Value::Object(mut document) = serde_json::to_value(value)? else {
        return Err(crate::error::OctopoesError::Validation(format!(
            "{document_type} {id} is not a JSON object"
        )));
    };
    document.insert(PRIMARY_KEY.to_string(), Value::String(id.to_string()));
    document.insert(
        DOCUMENT_TYPE.to_string(),
        Value::String(document_type.to_string()),
    );
    Ok(document)
}
