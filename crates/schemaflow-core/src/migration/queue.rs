//! Durable per-tenant migration queue.
//!
//! Migrations are appended by [`MetadataTx::enqueue`](crate::storage::MetadataTx::enqueue)
//! in the same transaction as the catalog change that produced them. This
//! module owns everything that happens afterwards: listing, status changes
//! and the operator controls that move a migration to the archive.

use super::action::TableAction;
use super::error::MigrationError;
use crate::catalog::types::id_hex;
use crate::catalog::TenantId;
use crate::error::Error;
use crate::storage::key::{
    current_timestamp, decode_sequence_key, migration_id_key, open_migration_key, sequence_key,
    tag, tenant_prefix, Id,
};
use crate::storage::transaction::{abort, finish};
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use sled::transaction::TransactionError;
use sled::{Transactional, Tree};
use std::collections::BTreeSet;
use std::fmt;
use tracing::info;

/// Lifecycle status of a queued migration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Waiting to be executed.
    Pending,
    /// Executed successfully.
    Applied,
    /// Execution failed; blocks the tenant until retried or skipped.
    Failed,
}

/// Open-index value of a pending migration.
const OPEN_PENDING: &[u8] = b"p";

/// Open-index value of a failed migration.
const OPEN_FAILED: &[u8] = b"f";

impl MigrationStatus {
    /// Value stored in the open-migration index, `None` once applied.
    pub(crate) fn open_marker(self) -> Option<&'static [u8]> {
        match self {
            MigrationStatus::Pending => Some(OPEN_PENDING),
            MigrationStatus::Failed => Some(OPEN_FAILED),
            MigrationStatus::Applied => None,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStatus::Pending => write!(f, "pending"),
            MigrationStatus::Applied => write!(f, "applied"),
            MigrationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A queued migration.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct PendingMigration {
    /// Stable id.
    #[serde(with = "id_hex")]
    pub id: Id,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Position in the tenant's queue, starting at 1.
    pub sequence: u64,
    /// Descriptive name, e.g. `create-field:amount`.
    pub name: String,
    /// Table actions, executed in order.
    pub actions: Vec<TableAction>,
    /// Current status.
    pub status: MigrationStatus,
    /// Executor error of the last failed attempt.
    pub failure_reason: Option<String>,
    /// Number of retries.
    pub attempts: u32,
    /// Enqueue time (microseconds since epoch).
    pub created_at: u64,
    /// Time the migration was applied.
    pub applied_at: Option<u64>,
    /// Last status change.
    pub updated_at: u64,
}

impl PendingMigration {
    /// Create a pending migration.
    pub fn new(
        id: Id,
        tenant_id: TenantId,
        sequence: u64,
        name: impl Into<String>,
        actions: Vec<TableAction>,
    ) -> Self {
        let now = current_timestamp();
        Self {
            id,
            tenant_id,
            sequence,
            name: name.into(),
            actions,
            status: MigrationStatus::Pending,
            failure_reason: None,
            attempts: 0,
            created_at: now,
            applied_at: None,
            updated_at: now,
        }
    }

    /// Queue key of this migration.
    pub(crate) fn key(&self) -> Vec<u8> {
        sequence_key(tag::MIGRATION, &self.tenant_id, self.sequence)
    }

    /// Serialize the migration to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a migration from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Why a migration left the queue.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    /// A failed migration was skipped by an operator.
    Skipped,
    /// A pending migration was withdrawn before execution.
    Withdrawn,
}

impl fmt::Display for ArchiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveReason::Skipped => write!(f, "skipped"),
            ArchiveReason::Withdrawn => write!(f, "withdrawn"),
        }
    }
}

/// A migration removed from the queue, kept for audit.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct ArchivedMigration {
    /// The migration as it was when archived.
    pub migration: PendingMigration,
    /// Why it was archived.
    pub reason: ArchiveReason,
    /// Archive time (microseconds since epoch).
    pub archived_at: u64,
}

impl ArchivedMigration {
    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Read and status-update access to the migration queue.
///
/// Besides the queue records, the meta tree holds an index of the migrations
/// that are not applied yet, keyed by tenant and sequence. Every status change
/// updates it in the same transaction, so the head of a tenant and the set of
/// tenants with work are found without reading applied history.
#[derive(Clone)]
pub struct MigrationQueue {
    queue: Tree,
    meta: Tree,
    archive: Tree,
}

impl MigrationQueue {
    pub(crate) fn new(queue: Tree, meta: Tree, archive: Tree) -> Self {
        Self {
            queue,
            meta,
            archive,
        }
    }

    /// Get a migration by id.
    pub fn get(&self, id: &Id) -> Result<Option<PendingMigration>, MigrationError> {
        let Some(key) = self.meta.get(migration_id_key(id))? else {
            return Ok(None);
        };
        match self.queue.get(key)? {
            Some(bytes) => Ok(Some(PendingMigration::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All migrations of a tenant in sequence order, optionally filtered.
    pub fn list(
        &self,
        tenant: &TenantId,
        status: Option<MigrationStatus>,
    ) -> Result<Vec<PendingMigration>, MigrationError> {
        let mut migrations = Vec::new();
        for item in self.queue.scan_prefix(tenant_prefix(tag::MIGRATION, tenant)) {
            let (_, bytes) = item?;
            let migration = PendingMigration::from_bytes(&bytes)?;
            if status.map_or(true, |s| s == migration.status) {
                migrations.push(migration);
            }
        }
        Ok(migrations)
    }

    /// Pending migrations of a tenant in sequence order.
    pub fn list_pending(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<PendingMigration>, MigrationError> {
        let mut migrations = Vec::new();
        for item in self.meta.scan_prefix(tenant_prefix(tag::OPEN, tenant)) {
            let (key, marker) = item?;
            if &marker[..] == OPEN_PENDING {
                migrations.push(self.load_open(&key)?);
            }
        }
        Ok(migrations)
    }

    /// The first migration of a tenant that is not applied yet.
    ///
    /// A failed migration here blocks everything behind it.
    pub fn head(&self, tenant: &TenantId) -> Result<Option<PendingMigration>, MigrationError> {
        match self.meta.scan_prefix(tenant_prefix(tag::OPEN, tenant)).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(self.load_open(&key)?))
            }
            None => Ok(None),
        }
    }

    /// Every tenant with at least one pending migration.
    pub fn tenants_with_pending(&self) -> Result<Vec<TenantId>, MigrationError> {
        let mut tenants = BTreeSet::new();
        for item in self.meta.scan_prefix([tag::OPEN]) {
            let (key, marker) = item?;
            if &marker[..] != OPEN_PENDING {
                continue;
            }
            let (tenant, _) = decode_sequence_key(&key).ok_or_else(|| {
                Error::InvalidData(format!("corrupt open migration key {key:?}"))
            })?;
            tenants.insert(tenant);
        }
        Ok(tenants.into_iter().collect())
    }

    /// Mark a migration applied. Marking an applied migration again is a no-op.
    pub fn mark_applied(&self, id: &Id) -> Result<PendingMigration, MigrationError> {
        self.transition(id, MigrationStatus::Applied, |migration| {
            match migration.status {
                MigrationStatus::Applied => Ok(false),
                MigrationStatus::Pending => {
                    let now = current_timestamp();
                    migration.status = MigrationStatus::Applied;
                    migration.failure_reason = None;
                    migration.applied_at = Some(now);
                    migration.updated_at = now;
                    Ok(true)
                }
                MigrationStatus::Failed => Err(MigrationStatus::Failed),
            }
        })
    }

    /// Mark a migration failed. Marking a failed migration again is a no-op.
    pub fn mark_failed(&self, id: &Id, reason: &str) -> Result<PendingMigration, MigrationError> {
        self.transition(id, MigrationStatus::Failed, |migration| {
            match migration.status {
                MigrationStatus::Failed => Ok(false),
                MigrationStatus::Pending => {
                    migration.status = MigrationStatus::Failed;
                    migration.failure_reason = Some(reason.to_string());
                    migration.updated_at = current_timestamp();
                    Ok(true)
                }
                MigrationStatus::Applied => Err(MigrationStatus::Applied),
            }
        })
    }

    /// Put a failed migration back into the pending state.
    pub fn retry(&self, id: &Id) -> Result<PendingMigration, MigrationError> {
        let migration = self.transition(id, MigrationStatus::Pending, |migration| {
            match migration.status {
                MigrationStatus::Failed => {
                    migration.status = MigrationStatus::Pending;
                    migration.failure_reason = None;
                    migration.attempts += 1;
                    migration.updated_at = current_timestamp();
                    Ok(true)
                }
                other => Err(other),
            }
        })?;
        info!(
            tenant = %migration.tenant_id,
            sequence = migration.sequence,
            attempts = migration.attempts,
            "Migration queued for retry"
        );
        Ok(migration)
    }

    /// Archive a failed migration, unblocking its tenant.
    pub fn skip(&self, id: &Id) -> Result<ArchivedMigration, MigrationError> {
        self.archive_migration(id, MigrationStatus::Failed, ArchiveReason::Skipped)
    }

    /// Archive a pending migration that has not started.
    ///
    /// The caller must hold the tenant's DDL lock.
    pub fn withdraw(&self, id: &Id) -> Result<ArchivedMigration, MigrationError> {
        self.archive_migration(id, MigrationStatus::Pending, ArchiveReason::Withdrawn)
    }

    /// Archived migrations of a tenant in sequence order.
    pub fn list_archived(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<ArchivedMigration>, MigrationError> {
        self.archive
            .scan_prefix(tenant_prefix(tag::ARCHIVE, tenant))
            .map(|item| {
                let (_, bytes) = item?;
                Ok(ArchivedMigration::from_bytes(&bytes)?)
            })
            .collect()
    }

    /// Apply a status change atomically.
    ///
    /// `change` returns `Ok(false)` for a no-op and `Err(current)` when the
    /// transition is not allowed.
    fn transition<F>(
        &self,
        id: &Id,
        target: MigrationStatus,
        change: F,
    ) -> Result<PendingMigration, MigrationError>
    where
        F: Fn(&mut PendingMigration) -> Result<bool, MigrationStatus>,
    {
        let index_key = migration_id_key(id);
        let result: Result<PendingMigration, TransactionError<MigrationError>> =
            (&self.queue, &self.meta).transaction(|(queue, meta)| {
                let not_found = || abort(MigrationError::MigrationNotFound { migration_id: *id });
                let key = meta.get(&index_key)?.ok_or_else(not_found)?;
                let bytes = queue.get(&key)?.ok_or_else(not_found)?;
                let mut migration = PendingMigration::from_bytes(&bytes).map_err(abort)?;

                match change(&mut migration) {
                    Ok(true) => {
                        queue.insert(key, migration.to_bytes().map_err(abort)?)?;
                        let open_key = open_migration_key(&migration.tenant_id, migration.sequence);
                        match migration.status.open_marker() {
                            Some(marker) => meta.insert(open_key, marker)?,
                            None => meta.remove(open_key)?,
                        };
                    }
                    Ok(false) => {}
                    Err(from) => {
                        return Err(abort(MigrationError::InvalidTransition {
                            migration_id: *id,
                            from,
                            to: target,
                        }));
                    }
                }
                Ok(migration)
            });
        finish(result)
    }

    fn archive_migration(
        &self,
        id: &Id,
        expected: MigrationStatus,
        reason: ArchiveReason,
    ) -> Result<ArchivedMigration, MigrationError> {
        let index_key = migration_id_key(id);
        let result: Result<ArchivedMigration, TransactionError<MigrationError>> =
            (&self.queue, &self.meta, &self.archive).transaction(|(queue, meta, archive)| {
                let not_found = || abort(MigrationError::MigrationNotFound { migration_id: *id });
                let key = meta.get(&index_key)?.ok_or_else(not_found)?;
                let bytes = queue.get(&key)?.ok_or_else(not_found)?;
                let migration = PendingMigration::from_bytes(&bytes).map_err(abort)?;

                if migration.status != expected {
                    return Err(abort(MigrationError::InvalidTransition {
                        migration_id: *id,
                        from: migration.status,
                        to: expected,
                    }));
                }

                let archive_key =
                    sequence_key(tag::ARCHIVE, &migration.tenant_id, migration.sequence);
                let open_key = open_migration_key(&migration.tenant_id, migration.sequence);
                let record = ArchivedMigration {
                    migration,
                    reason,
                    archived_at: current_timestamp(),
                };
                archive.insert(archive_key, record.to_bytes().map_err(abort)?)?;
                queue.remove(key)?;
                meta.remove(index_key.as_slice())?;
                meta.remove(open_key)?;
                Ok(record)
            });
        let record = finish(result)?;

        info!(
            tenant = %record.migration.tenant_id,
            sequence = record.migration.sequence,
            reason = %reason,
            "Migration archived"
        );
        Ok(record)
    }

    /// Load the queue record behind an open-index key.
    fn load_open(&self, open_key: &[u8]) -> Result<PendingMigration, MigrationError> {
        let corrupt = || Error::InvalidData(format!("dangling open migration key {open_key:?}"));
        let (tenant, sequence) = decode_sequence_key(open_key).ok_or_else(corrupt)?;
        let bytes = self
            .queue
            .get(sequence_key(tag::MIGRATION, &tenant, sequence))?
            .ok_or_else(corrupt)?;
        Ok(PendingMigration::from_bytes(&bytes)?)
    }
}
