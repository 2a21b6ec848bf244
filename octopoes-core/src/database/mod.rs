//! Bitemporal store access.
//!
//! Reads go straight to a [`DocumentStore`]; writes are buffered in a
//! [`Session`] and submitted as one transaction on commit.

pub mod infrastructure;
pub mod ports;
pub mod query;
pub mod session;

pub use ports::{
    Document, DocumentStore, PRIMARY_KEY, TransactionOperation,
    TransactionReceipt,
};
pub use query::{FieldSet, NeighbourQuery, PullQuery, Query, WhereValue};
pub use session::{PostCommit, Session};
