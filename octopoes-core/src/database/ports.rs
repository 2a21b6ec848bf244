use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{database::query::Query, error::Result};

/// Primary key attribute of every stored document.
pub const PRIMARY_KEY: &str = "xt/id";

/// A stored document: a flat JSON object carrying [`PRIMARY_KEY`].
pub type Document = Map<String, Value>;

/// One write inside a transaction, effective from `valid_time` onwards.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOperation {
    Put {
        document: Document,
        valid_time: DateTime<Utc>,
    },
    Delete {
        id: String,
        valid_time: DateTime<Utc>,
    },
}

impl TransactionOperation {
    pub fn document_id(&self) -> Option<&str> {
        match self {
            TransactionOperation::Put { document, .. } => {
                document.get(PRIMARY_KEY).and_then(Value::as_str)
            }
            TransactionOperation::Delete { id, .. } => Some(id),
        }
    }

    pub fn valid_time(&self) -> DateTime<Utc> {
        match self {
            TransactionOperation::Put { valid_time, .. }
            | TransactionOperation::Delete { valid_time, .. } => *valid_time,
        }
    }
}

/// Acknowledgement of an indexed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_id: u64,
    pub tx_time: DateTime<Utc>,
}

/// Port to a bitemporal document store.
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Document as of `valid_time`, or `None` when it does not exist then.
    async fn get_entity(
        &self,
        id: &str,
        valid_time: DateTime<Utc>,
    ) -> Result<Option<Document>>;

    /// Evaluates `query` as of `valid_time` and returns its result tuples.
    async fn query(
        &self,
        query: &Query,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Vec<Value>>>;

    /// Submits all operations as one atomic transaction and returns once the
    /// store has indexed it.
    async fn submit_transaction(
        &self,
        operations: Vec<TransactionOperation>,
    ) -> Result<TransactionReceipt>;

    /// Store-reported health and index state.
    async fn status(&self) -> Result<Value>;
}
