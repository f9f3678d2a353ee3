use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use caddie_core::Result;

/// Address of one snapshot: database, object store, record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotLocation {
    pub database: String,
    pub store: String,
    pub key: String,
}

impl SnapshotLocation {
    pub fn new(
        database: impl Into<String>,
        store: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            store: store.into(),
            key: key.into(),
        }
    }
}

/// Block storage holding database images.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, loc: &SnapshotLocation) -> Result<Option<Vec<u8>>>;
    async fn save(&self, loc: &SnapshotLocation, image: Vec<u8>) -> Result<()>;
}

/// `<root>/<database>/<store>/<key>.bin`
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    root: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, loc: &SnapshotLocation) -> PathBuf {
        self.root
            .join(&loc.database)
            .join(&loc.store)
            .join(format!("{}.bin", loc.key))
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn load(&self, loc: &SnapshotLocation) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(loc)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, loc: &SnapshotLocation, image: Vec<u8>) -> Result<()> {
        let path = self.path(loc);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        // readers never see a half-written image
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, image).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    images: Mutex<HashMap<SnapshotLocation, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces an image directly, bypassing the database.
    pub fn put(&self, loc: SnapshotLocation, image: Vec<u8>) {
        self.images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(loc, image);
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, loc: &SnapshotLocation) -> Result<Option<Vec<u8>>> {
        Ok(self
            .images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(loc)
            .cloned())
    }

    async fn save(&self, loc: &SnapshotLocation, image: Vec<u8>) -> Result<()> {
        self.put(loc.clone(), image);
        Ok(())
    }
}
