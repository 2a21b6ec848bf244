pub mod memory;
pub mod xtdb;

pub use memory::InMemoryDocumentStore;
pub use xtdb::XtdbHttpClient;
