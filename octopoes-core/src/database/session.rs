use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    database::ports::{
        Document, DocumentStore, TransactionOperation, TransactionReceipt,
    },
    error::{OctopoesError, Result},
    events::{DbEvent, publisher::EventPublisher},
};

/// Work deferred until the session's transaction is durable.
#[derive(Debug, Clone, PartialEq)]
pub enum PostCommit {
    Publish(DbEvent),
}

#[derive(Debug, Default)]
struct SessionState {
    operations: Vec<TransactionOperation>,
    post_commit: Vec<PostCommit>,
    committed: bool,
}

/// Unit of work against the store.
///
/// Writes are buffered until [`Session::commit`], which submits them as one
/// transaction, waits for indexing and then runs the queued post-commit work
/// in registration order. Reads go straight to the store and therefore do
/// not observe buffered writes.
pub struct Session {
    store: Arc<dyn DocumentStore>,
    publisher: Arc<dyn EventPublisher>,
    state: Mutex<SessionState>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("store", &self.store)
            .field("pending_operations", &state.operations.len())
            .field("pending_effects", &state.post_commit.len())
            .field("committed", &state.committed)
            .finish()
    }
}

impl Session {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            publisher,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn add(&self, operation: TransactionOperation) {
        self.state.lock().operations.push(operation);
    }

    pub fn put(&self, document: Document, valid_time: DateTime<Utc>) {
        self.add(TransactionOperation::Put {
            document,
            valid_time,
        });
    }

    pub fn delete(&self, id: impl Into<String>, valid_time: DateTime<Utc>) {
        self.add(TransactionOperation::Delete {
            id: id.into(),
            valid_time,
        });
    }

    pub fn listen_post_commit(&self, effect: PostCommit) {
        self.state.lock().post_commit.push(effect);
    }

    pub fn pending_operations(&self) -> Vec<TransactionOperation> {
        self.state.lock().operations.clone()
    }

    pub fn is_committed(&self) -> bool {
        self.state.lock().committed
    }

    /// Submits the buffered operations and runs post-commit work.
    ///
    /// Returns `None` when there was nothing to write. A failed submission
    /// leaves the session uncommitted and skips all post-commit work.
    pub async fn commit(&self) -> Result<Option<TransactionReceipt>> {
        let operations = {
            let mut state = self.state.lock();
            if state.committed {
                return Err(OctopoesError::SessionAlreadyCommitted);
            }
            state.committed = true;
            state.operations.clone()
        };

        let receipt = if operations.is_empty() {
            None
        } else {
            let count = operations.len();
            match self.store.submit_transaction(operations).await {
                Ok(receipt) => {
                    debug!(tx_id = receipt.tx_id, operations = count, "transaction indexed");
                    Some(receipt)
                }
                Err(err) => {
                    self.state.lock().committed = false;
                    return Err(err);
                }
            }
        };

        let effects = std::mem::take(&mut self.state.lock().post_commit);
        let mut first_error = None;
        for effect in effects {
            let outcome = match effect {
                PostCommit::Publish(event) => self.publisher.publish(event).await,
            };
            if let Err(err) = outcome {
                warn!("post-commit publish failed: {err}");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(receipt),
        }
    }
}
