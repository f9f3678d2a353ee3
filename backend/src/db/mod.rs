pub mod autosave;
pub mod config;
pub mod connection;
pub mod filter;
pub mod global;
pub mod platform;
pub mod rows;
pub mod service;
pub mod snapshot;
pub mod sync;

use async_trait::async_trait;

use caddie_core::schema::Schema;
use caddie_core::Result;

pub use config::{BrowserConfig, DatabaseConfig};
pub use connection::Database;
pub use platform::Platform;
pub use service::TableService;
pub use snapshot::{FsSnapshotStore, MemorySnapshotStore, SnapshotLocation, SnapshotStore};
pub use sync::{delete_missing_children, sync_children, upsert_entities, upsert_entity};

#[async_trait]
pub trait SchemaExt {
    /// Creates every table and index that does not exist yet.
    async fn create_all(&self, db: &Database) -> Result<()>;
}

#[async_trait]
impl SchemaExt for Schema {
    async fn create_all(&self, db: &Database) -> Result<()> {
        db.ensure_schema(self).await
    }
}
