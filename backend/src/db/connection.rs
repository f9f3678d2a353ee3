use sea_orm::{ConnectOptions, ConnectionTrait, DatabaseConnection, Statement};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Weak};
use tempfile::TempDir;

use caddie_core::db::Dialect;
use caddie_core::schema::Schema;
use caddie_core::{Result, StoreError};

use super::autosave::AutoSave;
use super::config::DatabaseConfig;
use super::platform::Platform;
use super::rows;
use super::snapshot::{SnapshotLocation, SnapshotStore};

const SCRATCH_FILE: &str = "caddie.sqlite";

/// An open database. Cheap to clone; every clone shares one pool.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    conn: DatabaseConnection,
    dialect: Dialect,
    platform: Platform,
    browser: Option<BrowserState>,
}

struct BrowserState {
    scratch: TempDir,
    store: Arc<dyn SnapshotStore>,
    location: SnapshotLocation,
    autosave: AutoSave,
}

fn init_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::BackendInit(e.to_string())
}

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}

async fn connect(url: String) -> Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new(url);
    opt.max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    Ok(sea_orm::Database::connect(opt).await?)
}

/// Whether the connection reads as an SQLite database at all.
async fn verify_sqlite(conn: &DatabaseConnection) -> Result<()> {
    conn.query_one(Statement::from_string(
        conn.get_database_backend(),
        "SELECT count(*) AS n FROM sqlite_master",
    ))
    .await?;
    Ok(())
}

/// Scratch engine seeded from the stored image, or empty when there is none
/// or it cannot be opened.
async fn hydrate(
    scratch: &Path,
    store: &dyn SnapshotStore,
    loc: &SnapshotLocation,
) -> Result<DatabaseConnection> {
    let path = scratch.join(SCRATCH_FILE);
    let seeded = match store.load(loc).await {
        Ok(Some(image)) => {
            tokio::fs::write(&path, image).await?;
            true
        }
        Ok(None) => false,
        Err(e) => {
            log::warn!(target: "caddie::db", "reading snapshot {:?} failed: {}", loc, e);
            false
        }
    };
    if seeded {
        let opened = match connect(sqlite_url(&path)).await {
            Ok(conn) => match verify_sqlite(&conn).await {
                Ok(()) => Ok(conn),
                Err(e) => {
                    let _ = conn.close().await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };
        match opened {
            Ok(conn) => {
                log::info!(target: "caddie::db", "hydrated snapshot {:?}", loc);
                return Ok(conn);
            }
            Err(e) => {
                log::warn!(
                    target: "caddie::db",
                    "snapshot {:?} unusable, starting empty: {}",
                    loc,
                    e
                );
                tokio::fs::remove_file(&path).await?;
            }
        }
    }
    connect(sqlite_url(&path)).await
}

impl Inner {
    fn browser(&self) -> Result<&BrowserState> {
        self.browser
            .as_ref()
            .ok_or_else(|| StoreError::Unsupported(format!("{} has no snapshots", self.platform)))
    }

    /// Full image of the scratch database.
    async fn export(&self) -> Result<Vec<u8>> {
        let browser = self.browser()?;
        // VACUUM INTO accepts an existing empty file
        let target = tempfile::NamedTempFile::new_in(browser.scratch.path())?;
        let path = target.path().to_string_lossy().replace('\'', "''");
        self.conn
            .execute_unprepared(&format!("VACUUM INTO '{}'", path))
            .await?;
        Ok(tokio::fs::read(target.path()).await?)
    }

    async fn persist(&self) -> Result<()> {
        let browser = self.browser()?;
        let image = self
            .export()
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        log::debug!(target: "caddie::db", "saving {} byte snapshot", image.len());
        browser
            .store
            .save(&browser.location, image)
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))
    }
}

impl Database {
    /// Opens the backend `config` selects. Browser snapshots go through `store`.
    pub async fn open(config: &DatabaseConfig, store: Arc<dyn SnapshotStore>) -> Result<Database> {
        let platform = config.platform();
        log::info!(target: "caddie::db", "opening {} database", platform);
        match platform {
            Platform::Mobile => {
                if let Some(dir) = config.native_path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(dir).await.map_err(init_err)?;
                }
                let conn = connect(sqlite_url(&config.native_path))
                    .await
                    .map_err(init_err)?;
                Ok(Self::assemble(conn, Dialect::Sqlite, platform, None))
            }
            Platform::Server => {
                let url = config
                    .server_url
                    .clone()
                    .ok_or_else(|| init_err("server platform needs a database url"))?;
                let conn = connect(url).await.map_err(init_err)?;
                let dialect = Dialect::from_backend(conn.get_database_backend()).map_err(init_err)?;
                Ok(Self::assemble(conn, dialect, platform, None))
            }
            Platform::Browser => {
                let scratch = tempfile::tempdir().map_err(init_err)?;
                let location = config.browser.location();
                let conn = hydrate(scratch.path(), store.as_ref(), &location)
                    .await
                    .map_err(init_err)?;
                let parts = (scratch, store, location, config.browser.debounce());
                Ok(Self::assemble(conn, Dialect::Sqlite, platform, Some(parts)))
            }
        }
    }

    fn assemble(
        conn: DatabaseConnection,
        dialect: Dialect,
        platform: Platform,
        browser: Option<(TempDir, Arc<dyn SnapshotStore>, SnapshotLocation, std::time::Duration)>,
    ) -> Database {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let browser = browser.map(|(scratch, store, location, delay)| {
                let weak = weak.clone();
                let autosave = AutoSave::new(delay, move || {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(inner) => inner.persist().await,
                            None => Ok(()),
                        }
                    }
                });
                BrowserState {
                    scratch,
                    store,
                    location,
                    autosave,
                }
            });
            Inner {
                conn,
                dialect,
                platform,
                browser,
            }
        });
        Database { inner }
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.inner.conn
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub fn platform(&self) -> Platform {
        self.inner.platform
    }

    /// Runs a write and, once it has succeeded, schedules a snapshot flush.
    pub async fn autosaved<T, F>(&self, write: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let out = write.await;
        if out.is_ok() {
            self.mark_dirty();
        }
        out
    }

    pub fn mark_dirty(&self) {
        if let Some(browser) = &self.inner.browser {
            browser.autosave.schedule();
        }
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.inner
            .browser
            .as_ref()
            .is_some_and(|b| b.autosave.is_dirty())
    }

    /// Flushes the snapshot now. A no-op for backends that are durable by themselves.
    pub async fn save(&self) -> Result<()> {
        match &self.inner.browser {
            Some(browser) => browser.autosave.force_flush().await,
            None => Ok(()),
        }
    }

    /// The image the store currently holds for this database.
    pub async fn stored_snapshot(&self) -> Result<Option<Vec<u8>>> {
        let browser = self.inner.browser()?;
        browser.store.load(&browser.location).await
    }

    /// Image of the live database, without touching the store.
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        self.inner.export().await
    }

    pub async fn ensure_schema(&self, schema: &Schema) -> Result<()> {
        for cfg in schema.tables() {
            rows::check_driver(cfg, self.dialect())?;
        }
        self.autosaved(async {
            for cfg in schema.tables() {
                rows::create_table(self.conn(), self.dialect(), cfg.table()).await?;
            }
            Ok::<(), StoreError>(())
        })
        .await
    }

    pub async fn table_names(&self) -> Result<Vec<String>> {
        rows::table_names(self.conn(), self.dialect()).await
    }

    /// Cancels the pending flush, writes a final snapshot when needed and closes the pool.
    pub async fn close(self) -> Result<()> {
        if let Some(browser) = &self.inner.browser {
            if let Err(e) = browser.autosave.flush_now().await {
                log::error!(target: "caddie::db", "final flush failed: {}", e);
            }
        }
        self.inner.conn.clone().close().await?;
        log::info!(target: "caddie::db", "closed {} database", self.platform());
        Ok(())
    }
}
