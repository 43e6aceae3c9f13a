//! Metadata store.
//!
//! Catalog records and the migration queue live in one sled database so that
//! a catalog change and its migration can commit in a single transaction.

pub mod key;
pub(crate) mod transaction;

pub use transaction::{abort, MetadataTx, TxResult};

use crate::catalog::MetadataCatalog;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::migration::MigrationQueue;
use sled::{Db, Tree};

/// Tree name for object records and the object name index.
const OBJECTS_TREE: &str = "catalog:objects";

/// Tree name for field records and the field name index.
const FIELDS_TREE: &str = "catalog:fields";

/// Tree name for queued migrations.
const QUEUE_TREE: &str = "migration:queue";

/// Tree name for sequence counters and the migration id index.
const META_TREE: &str = "migration:meta";

/// Tree name for skipped and withdrawn migrations.
const ARCHIVE_TREE: &str = "migration:archive";

/// The sled-backed metadata store.
pub struct MetadataStore {
    db: Db,
    objects: Tree,
    fields: Tree,
    queue: Tree,
    meta: Tree,
    archive: Tree,
}

impl MetadataStore {
    /// Open or create the store.
    pub fn open(config: &EngineConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let objects = db.open_tree(OBJECTS_TREE)?;
        let fields = db.open_tree(FIELDS_TREE)?;
        let queue = db.open_tree(QUEUE_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        let archive = db.open_tree(ARCHIVE_TREE)?;

        Ok(Self {
            db,
            objects,
            fields,
            queue,
            meta,
            archive,
        })
    }

    /// Open a temporary store, for testing.
    pub fn temporary() -> Result<Self, Error> {
        Self::open(&EngineConfig::temporary())
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Read access to the catalog.
    pub fn catalog(&self) -> MetadataCatalog {
        MetadataCatalog::new(self.objects.clone(), self.fields.clone())
    }

    /// Access to the migration queue.
    pub fn queue(&self) -> MigrationQueue {
        MigrationQueue::new(self.queue.clone(), self.meta.clone(), self.archive.clone())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}
