//! Blob storage — one redb table per bucket, raw bytes as values.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::{BlobError, BlobResult};

macro_rules! map_err {
    ($variant:ident) => {
        |e| BlobError::$variant(e.to_string())
    };
}

/// Key/value object storage, scoped to a single bucket.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object.
    async fn put(&self, key: &str, bytes: &[u8]) -> BlobResult<()>;

    /// Store `bytes` under `key` unless an object already exists there.
    /// Returns whether the write happened.
    async fn put_if_absent(&self, key: &str, bytes: &[u8]) -> BlobResult<bool>;

    /// Fetch the object under `key`, or [`BlobError::NotFound`].
    async fn get(&self, key: &str) -> BlobResult<Vec<u8>>;

    async fn exists(&self, key: &str) -> BlobResult<bool>;
}

/// The redb database holding every bucket.
#[derive(Clone)]
pub struct BlobDb {
    db: Arc<Database>,
}

impl BlobDb {
    /// Open (or create) a persistent blob database at the given path.
    pub fn open(path: &Path) -> BlobResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        debug!(?path, "blob store opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Create an ephemeral in-memory blob database (for testing).
    pub fn open_in_memory() -> BlobResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        debug!("in-memory blob store opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Get a handle to the named bucket, creating its table if absent.
    pub fn bucket(&self, name: &str) -> BlobResult<RedbBucket> {
        let bucket = RedbBucket {
            db: self.db.clone(),
            name: name.to_string(),
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(bucket.table()).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(bucket)
    }
}

/// A single bucket inside a [`BlobDb`].
#[derive(Clone)]
pub struct RedbBucket {
    db: Arc<Database>,
    name: String,
}

impl RedbBucket {
    fn table(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.name)
    }

    fn check_key(key: &str) -> BlobResult<()> {
        if key.is_empty() {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for RedbBucket {
    async fn put(&self, key: &str, bytes: &[u8]) -> BlobResult<()> {
        Self::check_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(self.table()).map_err(map_err!(Table))?;
            table.insert(key, bytes).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(bucket = %self.name, %key, len = bytes.len(), "blob stored");
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, bytes: &[u8]) -> BlobResult<bool> {
        Self::check_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let written;
        {
            let mut table = txn.open_table(self.table()).map_err(map_err!(Table))?;
            let present = table.get(key).map_err(map_err!(Read))?.is_some();
            if !present {
                table.insert(key, bytes).map_err(map_err!(Write))?;
            }
            written = !present;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(bucket = %self.name, %key, written, "conditional blob put");
        Ok(written)
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(self.table()).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(guard.value().to_vec()),
            None => Err(BlobError::not_found(&self.name, key)),
        }
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(self.table()).map_err(map_err!(Table))?;
        Ok(table.get(key).map_err(map_err!(Read))?.is_some())
    }
}
