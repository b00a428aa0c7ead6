mod sqlite;
mod store;
mod traits;

pub use sqlite::SqliteStore;
pub use store::InMemoryStore;
pub use traits::{MemoryStore, OutcomeRecord, RejectionRecord};
