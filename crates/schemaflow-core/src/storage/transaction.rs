//! Scoped transactions pairing catalog writes with migration enqueue.
//!
//! Every catalog mutation and the migration it produces commit together or
//! not at all. Closures passed to [`MetadataStore::transact`] may run more than
//! once when sled detects a conflict, so they must not have side effects
//! outside the transaction.

use super::key::{
    decode_id, decode_u64, field_name_key, format_id, generate_id, id_key, last_sequence_key,
    migration_id_key, object_name_key, open_migration_key, tag,
};
use super::MetadataStore;
use crate::catalog::{FieldMetadata, ObjectMetadata, TenantId};
use crate::error::Error;
use crate::migration::{MigrationError, PendingMigration, TableAction};
use crate::storage::key::Id;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::Transactional;

/// Result type of operations inside a metadata transaction.
pub type TxResult<T> = Result<T, ConflictableTransactionError<MigrationError>>;

/// Abort the surrounding transaction with `error`.
pub fn abort(error: impl Into<MigrationError>) -> ConflictableTransactionError<MigrationError> {
    ConflictableTransactionError::Abort(error.into())
}

/// Unwrap the outcome of a sled transaction.
pub(crate) fn finish<T>(
    result: Result<T, TransactionError<MigrationError>>,
) -> Result<T, MigrationError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(e.into()),
    }
}

/// Catalog and queue access inside one transaction.
pub struct MetadataTx<'a> {
    objects: &'a TransactionalTree,
    fields: &'a TransactionalTree,
    queue: &'a TransactionalTree,
    meta: &'a TransactionalTree,
}

impl<'a> MetadataTx<'a> {
    /// Read an object.
    pub fn object(&self, tenant: &TenantId, id: &Id) -> TxResult<Option<ObjectMetadata>> {
        match self.objects.get(id_key(tag::OBJECT, tenant, id))? {
            Some(bytes) => Ok(Some(ObjectMetadata::from_bytes(&bytes).map_err(abort)?)),
            None => Ok(None),
        }
    }

    /// Read an object that must exist.
    pub fn require_object(&self, tenant: &TenantId, id: &Id) -> TxResult<ObjectMetadata> {
        self.object(tenant, id)?.ok_or_else(|| {
            abort(MigrationError::ObjectNotFound {
                object: format_id(id),
            })
        })
    }

    /// Resolve a physical table name to the id of the object owning it.
    pub fn object_id_by_table(&self, tenant: &TenantId, table_name: &str) -> TxResult<Option<Id>> {
        match self.objects.get(object_name_key(tenant, table_name))? {
            Some(bytes) => Ok(Some(decode_id(&bytes).ok_or_else(|| abort(Error::InvalidKey))?)),
            None => Ok(None),
        }
    }

    /// Insert a new object.
    ///
    /// Names are unique per tenant through their table name, so `Deal` and
    /// `deal` cannot coexist.
    pub fn insert_object(&self, object: &ObjectMetadata) -> TxResult<()> {
        let tenant = &object.tenant_id;
        if self
            .object_id_by_table(tenant, &object.target_table_name)?
            .is_some()
        {
            return Err(abort(MigrationError::ObjectAlreadyExists {
                name: object.name_singular.clone(),
            }));
        }
        self.objects.insert(
            id_key(tag::OBJECT, tenant, &object.id),
            object.to_bytes().map_err(abort)?,
        )?;
        self.objects.insert(
            object_name_key(tenant, &object.target_table_name),
            &object.id,
        )?;
        Ok(())
    }

    /// Remove an object and its name index entry.
    pub fn remove_object(&self, object: &ObjectMetadata) -> TxResult<()> {
        let tenant = &object.tenant_id;
        self.objects.remove(id_key(tag::OBJECT, tenant, &object.id))?;
        self.objects
            .remove(object_name_key(tenant, &object.target_table_name))?;
        Ok(())
    }

    /// Read a field.
    pub fn field(&self, tenant: &TenantId, id: &Id) -> TxResult<Option<FieldMetadata>> {
        match self.fields.get(id_key(tag::FIELD, tenant, id))? {
            Some(bytes) => Ok(Some(FieldMetadata::from_bytes(&bytes).map_err(abort)?)),
            None => Ok(None),
        }
    }

    /// Read a field that must exist.
    pub fn require_field(&self, tenant: &TenantId, id: &Id) -> TxResult<FieldMetadata> {
        self.field(tenant, id)?.ok_or_else(|| {
            abort(MigrationError::FieldNotFound {
                field: format_id(id),
            })
        })
    }

    /// Insert a new field, enforcing name uniqueness within the object.
    pub fn insert_field(&self, object: &ObjectMetadata, field: &FieldMetadata) -> TxResult<()> {
        self.claim_field_name(object, field)?;
        self.write_field(field)
    }

    /// Replace a field, moving its name index entry on rename.
    pub fn update_field(
        &self,
        object: &ObjectMetadata,
        before: &FieldMetadata,
        after: &FieldMetadata,
    ) -> TxResult<()> {
        let old_key = field_name_key(&before.tenant_id, &before.object_id, &before.name);
        let new_key = field_name_key(&after.tenant_id, &after.object_id, &after.name);
        if old_key != new_key {
            self.claim_field_name(object, after)?;
            self.fields.remove(old_key)?;
        }
        self.write_field(after)
    }

    /// Remove a field and its name index entry.
    pub fn remove_field(&self, field: &FieldMetadata) -> TxResult<()> {
        let tenant = &field.tenant_id;
        self.fields.remove(id_key(tag::FIELD, tenant, &field.id))?;
        self.fields
            .remove(field_name_key(tenant, &field.object_id, &field.name))?;
        Ok(())
    }

    /// Append a migration to the tenant's queue.
    ///
    /// The sequence number is the tenant's last issued number plus one, read
    /// and written inside this transaction.
    pub fn enqueue(
        &self,
        tenant: &TenantId,
        name: &str,
        actions: Vec<TableAction>,
    ) -> TxResult<PendingMigration> {
        let sequence_key = last_sequence_key(tenant);
        let last = match self.meta.get(&sequence_key)? {
            Some(bytes) => decode_u64(&bytes).ok_or_else(|| {
                abort(Error::InvalidData(format!(
                    "corrupt sequence counter for tenant {tenant}"
                )))
            })?,
            None => 0,
        };
        let sequence = last + 1;

        let migration =
            PendingMigration::new(generate_id(), tenant.clone(), sequence, name, actions);
        let key = migration.key();
        self.queue
            .insert(key.as_slice(), migration.to_bytes().map_err(abort)?)?;
        self.meta.insert(sequence_key, &sequence.to_be_bytes())?;
        self.meta.insert(migration_id_key(&migration.id), key)?;
        if let Some(marker) = migration.status.open_marker() {
            self.meta
                .insert(open_migration_key(tenant, sequence), marker)?;
        }
        Ok(migration)
    }

    fn claim_field_name(&self, object: &ObjectMetadata, field: &FieldMetadata) -> TxResult<()> {
        let name_key = field_name_key(&field.tenant_id, &field.object_id, &field.name);
        if let Some(existing) = self.fields.get(&name_key)? {
            if existing[..] != field.id[..] {
                return Err(abort(MigrationError::FieldAlreadyExists {
                    object: object.name_singular.clone(),
                    name: field.name.clone(),
                }));
            }
        }
        self.fields.insert(name_key, &field.id)?;
        Ok(())
    }

    fn write_field(&self, field: &FieldMetadata) -> TxResult<()> {
        self.fields.insert(
            id_key(tag::FIELD, &field.tenant_id, &field.id),
            field.to_bytes().map_err(abort)?,
        )?;
        Ok(())
    }
}

impl MetadataStore {
    /// Run `f` in one transaction over the catalog and queue trees.
    ///
    /// Returning an error from `f` rolls back every write it made.
    pub fn transact<T, F>(&self, f: F) -> Result<T, MigrationError>
    where
        F: Fn(&MetadataTx<'_>) -> TxResult<T>,
    {
        let result: Result<T, TransactionError<MigrationError>> = (
            &self.objects,
            &self.fields,
            &self.queue,
            &self.meta,
        )
            .transaction(|(objects, fields, queue, meta)| {
                let tx = MetadataTx {
                    objects,
                    fields,
                    queue,
                    meta,
                };
                f(&tx)
            });
        finish(result)
    }
}
