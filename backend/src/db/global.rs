//! Process-wide database handle.

use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::Mutex;

use caddie_core::Result;

use super::config::DatabaseConfig;
use super::connection::Database;
use super::snapshot::{FsSnapshotStore, MemorySnapshotStore, SnapshotStore};

struct Global {
    config: DatabaseConfig,
    store: Option<Arc<dyn SnapshotStore>>,
    db: Option<Database>,
}

impl Global {
    fn new() -> Self {
        Self {
            config: DatabaseConfig::default(),
            store: None,
            db: None,
        }
    }

    /// The configured snapshot store. Without a snapshot directory it lives in memory,
    /// kept here so a reopened handle still sees earlier snapshots.
    fn store(&mut self) -> Arc<dyn SnapshotStore> {
        if let Some(store) = &self.store {
            return store.clone();
        }
        let store: Arc<dyn SnapshotStore> = match &self.config.browser.snapshot_dir {
            Some(dir) => Arc::new(FsSnapshotStore::new(dir)),
            None => Arc::new(MemorySnapshotStore::new()),
        };
        self.store = Some(store.clone());
        store
    }

    async fn open(&mut self) -> Result<Database> {
        if let Some(db) = &self.db {
            return Ok(db.clone());
        }
        let store = self.store();
        let db = Database::open(&self.config, store).await?;
        self.db = Some(db.clone());
        Ok(db)
    }
}

static GLOBAL: Lazy<Mutex<Global>> = Lazy::new(|| Mutex::new(Global::new()));

/// Replaces the configuration used by the next initialization.
pub async fn configure(config: DatabaseConfig) {
    let mut g = GLOBAL.lock().await;
    if g.db.is_some() {
        log::warn!(target: "caddie::db", "database already open, new config applies after close");
    }
    g.config = config;
    g.store = None;
}

pub async fn configure_with_store(config: DatabaseConfig, store: Arc<dyn SnapshotStore>) {
    configure(config).await;
    GLOBAL.lock().await.store = Some(store);
}

pub async fn init_database() -> Result<Database> {
    let mut g = GLOBAL.lock().await;
    let fresh = g.db.is_none();
    let db = g.open().await?;
    if fresh {
        log::info!(target: "caddie::db", "database ready on {}", db.platform());
    }
    Ok(db)
}

/// The open handle, initializing it on first use.
pub async fn get_database() -> Result<Database> {
    GLOBAL.lock().await.open().await
}

/// Closes the handle; the next [`get_database`] opens a new one.
pub async fn close_database() -> Result<()> {
    let db = GLOBAL.lock().await.db.take();
    match db {
        Some(db) => db.close().await,
        None => Ok(()),
    }
}

/// Writes a snapshot of the open database now. Does nothing when none is open.
pub async fn save_database() -> Result<()> {
    let db = GLOBAL.lock().await.db.clone();
    match db {
        Some(db) => db.save().await,
        None => Ok(()),
    }
}

/// The last stored snapshot image, if any.
pub async fn load_database() -> Result<Option<Vec<u8>>> {
    let mut g = GLOBAL.lock().await;
    let location = g.config.browser.location();
    let store = g.store();
    drop(g);
    store.load(&location).await
}
