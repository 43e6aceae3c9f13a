//! Caller-facing engine.
//!
//! Every metadata write validates its input, plans the physical change and
//! commits the catalog record together with the migration. Execution is a
//! separate step: [`SchemaEngine::run_pending_migrations`], a background
//! worker, or the drain that follows each write when
//! [`EngineConfig::drain_on_write`] is set.

use crate::catalog::{
    FieldKind, FieldMetadata, FieldPatch, FieldSpec, MetadataCatalog, ObjectMetadata, ObjectSpec,
    TargetColumn, TenantId,
};
use crate::config::EngineConfig;
use crate::migration::{
    map_target_columns, ArchivedMigration, MigrationError, MigrationFactory, MigrationQueue,
    MigrationRunner, MigrationStatus, PendingMigration, RunReport, SchemaExecutor,
    SqliteSchemaExecutor, TenantLocks,
};
use crate::storage::key::{format_id, Id};
use crate::storage::{abort, MetadataStore, MetadataTx, TxResult};
use std::sync::Arc;
use tracing::{info, warn};

/// Columns every object table carries.
pub const SYSTEM_COLUMNS: [&str; 4] = ["id", "createdAt", "updatedAt", "deletedAt"];

/// The metadata-to-schema migration engine.
pub struct SchemaEngine {
    config: EngineConfig,
    store: MetadataStore,
    catalog: MetadataCatalog,
    queue: MigrationQueue,
    locks: Arc<TenantLocks>,
    runner: MigrationRunner,
}

impl SchemaEngine {
    /// Open the engine with SQLite workspaces as configured.
    pub fn open(config: EngineConfig) -> Result<Self, MigrationError> {
        let executor = Arc::new(SqliteSchemaExecutor::new(
            config.workspace_path.clone(),
            config.busy_timeout,
        ));
        Self::with_executor(config, executor)
    }

    /// Open the engine with a custom executor.
    pub fn with_executor(
        config: EngineConfig,
        executor: Arc<dyn SchemaExecutor>,
    ) -> Result<Self, MigrationError> {
        let store = MetadataStore::open(&config)?;
        if store.was_recovered() {
            info!("Metadata store recovered from previous run");
        }
        let catalog = store.catalog();
        let queue = store.queue();
        let locks = Arc::new(TenantLocks::new());
        let runner = MigrationRunner::new(queue.clone(), executor, locks.clone());

        Ok(Self {
            config,
            store,
            catalog,
            queue,
            locks,
            runner,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Catalog reader.
    pub fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    /// Migration queue.
    pub fn queue(&self) -> &MigrationQueue {
        &self.queue
    }

    /// Flush the metadata store.
    pub fn flush(&self) -> Result<(), MigrationError> {
        Ok(self.store.flush()?)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Create an object and its table, with optional initial fields.
    pub fn create_object(
        &self,
        tenant: &TenantId,
        spec: ObjectSpec,
        initial_fields: Vec<FieldSpec>,
    ) -> Result<ObjectMetadata, MigrationError> {
        spec.validate()?;
        let object = spec.into_metadata(tenant.clone());

        let mut fields: Vec<FieldMetadata> = Vec::with_capacity(initial_fields.len());
        for field in initial_fields {
            field.validate()?;
            if fields.iter().any(|f| f.name.eq_ignore_ascii_case(&field.name)) {
                return Err(MigrationError::FieldAlreadyExists {
                    object: object.name_singular.clone(),
                    name: field.name,
                });
            }
            let columns =
                map_target_columns(&field.name, &field.kind, field.default_value.as_ref())?;
            check_column_conflicts(&columns, &fields, None)?;
            fields.push(field.into_metadata(tenant.clone(), object.id, columns));
        }

        let migration = self.store.transact(|tx| {
            tx.insert_object(&object)?;
            for field in &fields {
                check_relation_target(tx, tenant, &object, field)?;
                tx.insert_field(&object, field)?;
            }
            let action = MigrationFactory::plan_create_object(&object, &fields);
            tx.enqueue(
                tenant,
                &format!("create-object:{}", object.name_singular),
                vec![action],
            )
        })?;

        self.after_write(tenant, Some(&migration));
        Ok(object)
    }

    /// Delete an object, its fields and its table.
    pub fn delete_object(&self, tenant: &TenantId, object_id: &Id) -> Result<(), MigrationError> {
        let fields = self.catalog.list_fields(tenant, object_id)?;

        let migration = self.store.transact(|tx| {
            let object = tx.require_object(tenant, object_id)?;
            for field in &fields {
                if let Some(current) = tx.field(tenant, &field.id)? {
                    tx.remove_field(&current)?;
                }
            }
            tx.remove_object(&object)?;
            let action = MigrationFactory::plan_delete_object(&object);
            tx.enqueue(
                tenant,
                &format!("delete-object:{}", object.name_singular),
                vec![action],
            )
        })?;

        self.after_write(tenant, Some(&migration));
        Ok(())
    }

    /// Get an object by id.
    pub fn get_object(
        &self,
        tenant: &TenantId,
        object_id: &Id,
    ) -> Result<Option<ObjectMetadata>, MigrationError> {
        self.catalog.get_object(tenant, object_id)
    }

    /// Find an object by name.
    pub fn find_object_by_name(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> Result<Option<ObjectMetadata>, MigrationError> {
        self.catalog.find_object_by_name(tenant, name)
    }

    /// All objects of a tenant.
    pub fn list_objects(&self, tenant: &TenantId) -> Result<Vec<ObjectMetadata>, MigrationError> {
        self.catalog.list_objects(tenant)
    }

    // =========================================================================
    // Fields
    // =========================================================================

    /// Create a field and enqueue its columns.
    pub fn create_field(
        &self,
        tenant: &TenantId,
        object_id: &Id,
        spec: FieldSpec,
    ) -> Result<FieldMetadata, MigrationError> {
        spec.validate()?;
        let columns = map_target_columns(&spec.name, &spec.kind, spec.default_value.as_ref())?;
        let mut siblings = self.catalog.list_fields(tenant, object_id)?;
        // A duplicate name is reported by the name index
        siblings.retain(|f| !f.name.eq_ignore_ascii_case(&spec.name));
        check_column_conflicts(&columns, &siblings, None)?;
        let field = spec.into_metadata(tenant.clone(), *object_id, columns);

        let migration = self.store.transact(|tx| {
            let object = tx.require_object(tenant, object_id)?;
            check_relation_target(tx, tenant, &object, &field)?;
            tx.insert_field(&object, &field)?;
            let action = MigrationFactory::plan_create_field(&object, &field);
            tx.enqueue(tenant, &format!("create-field:{}", field.name), vec![action])
        })?;

        self.after_write(tenant, Some(&migration));
        Ok(field)
    }

    /// Update a field.
    ///
    /// Only a new type or default value reaches the physical schema. Other
    /// members (label, description, icon, options, active flag, name) change
    /// the catalog alone.
    pub fn update_field(
        &self,
        tenant: &TenantId,
        field_id: &Id,
        patch: FieldPatch,
    ) -> Result<FieldMetadata, MigrationError> {
        patch.validate()?;
        let current = self.require_field(tenant, field_id)?;
        let siblings = self.catalog.list_fields(tenant, &current.object_id)?;

        let (field, migration) = self.store.transact(|tx| {
            let before = tx.require_field(tenant, field_id)?;
            let object = tx.require_object(tenant, &before.object_id)?;
            let mut after = before.apply_patch(&patch).map_err(abort)?;

            let columns =
                MigrationFactory::target_columns_for_update(&before, &after).map_err(abort)?;
            check_relation_target(tx, tenant, &object, &after)?;

            let mut migration = None;
            if patch.is_physically_significant() {
                check_column_conflicts(&columns, &siblings, Some(field_id)).map_err(abort)?;
                after.target_column_map = columns;
                let action =
                    MigrationFactory::plan_alter_field(&object, &before, &after).map_err(abort)?;
                if !action.is_empty() {
                    migration = Some(tx.enqueue(
                        tenant,
                        &format!("update-field:{}", after.name),
                        vec![action],
                    )?);
                }
            }

            tx.update_field(&object, &before, &after)?;
            Ok((after, migration))
        })?;

        self.after_write(tenant, migration.as_ref());
        Ok(field)
    }

    /// Delete a field and enqueue the removal of its columns.
    pub fn delete_field(&self, tenant: &TenantId, field_id: &Id) -> Result<(), MigrationError> {
        let migration = self.store.transact(|tx| {
            let field = tx.require_field(tenant, field_id)?;
            let object = tx.require_object(tenant, &field.object_id)?;
            tx.remove_field(&field)?;
            let action = MigrationFactory::plan_delete_field(&object, &field);
            tx.enqueue(tenant, &format!("delete-field:{}", field.name), vec![action])
        })?;

        self.after_write(tenant, Some(&migration));
        Ok(())
    }

    /// Get a field by id.
    pub fn get_field(
        &self,
        tenant: &TenantId,
        field_id: &Id,
    ) -> Result<Option<FieldMetadata>, MigrationError> {
        self.catalog.get_field(tenant, field_id)
    }

    /// All fields of an object.
    pub fn list_fields(
        &self,
        tenant: &TenantId,
        object_id: &Id,
    ) -> Result<Vec<FieldMetadata>, MigrationError> {
        self.catalog.list_fields(tenant, object_id)
    }

    // =========================================================================
    // Migrations
    // =========================================================================

    /// Apply every pending migration of a tenant.
    pub fn run_pending_migrations(&self, tenant: &TenantId) -> Result<RunReport, MigrationError> {
        self.runner.run(tenant)
    }

    /// Drain every tenant with pending migrations. One tenant failing does not
    /// stop the others.
    pub fn run_all_pending_migrations(
        &self,
    ) -> Result<Vec<(TenantId, Result<RunReport, MigrationError>)>, MigrationError> {
        Ok(self
            .queue
            .tenants_with_pending()?
            .into_iter()
            .map(|tenant| {
                let result = self.runner.run(&tenant);
                (tenant, result)
            })
            .collect())
    }

    /// Migrations of a tenant, optionally filtered by status.
    pub fn list_migrations(
        &self,
        tenant: &TenantId,
        status: Option<MigrationStatus>,
    ) -> Result<Vec<PendingMigration>, MigrationError> {
        self.queue.list(tenant, status)
    }

    /// Skipped and withdrawn migrations of a tenant.
    pub fn list_archived_migrations(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<ArchivedMigration>, MigrationError> {
        self.queue.list_archived(tenant)
    }

    /// Put a failed migration back into the queue.
    pub fn retry_migration(
        &self,
        tenant: &TenantId,
        migration_id: &Id,
    ) -> Result<PendingMigration, MigrationError> {
        self.require_migration(tenant, migration_id)?;
        self.queue.retry(migration_id)
    }

    /// Archive a failed migration, unblocking the tenant.
    pub fn skip_migration(
        &self,
        tenant: &TenantId,
        migration_id: &Id,
    ) -> Result<ArchivedMigration, MigrationError> {
        self.require_migration(tenant, migration_id)?;
        let archived = self.queue.skip(migration_id)?;
        warn!(
            tenant = %tenant,
            sequence = archived.migration.sequence,
            migration = %archived.migration.name,
            "Failed migration skipped, catalog and schema may disagree"
        );
        Ok(archived)
    }

    /// Archive a pending migration before it runs.
    pub fn withdraw_migration(
        &self,
        tenant: &TenantId,
        migration_id: &Id,
    ) -> Result<ArchivedMigration, MigrationError> {
        self.require_migration(tenant, migration_id)?;
        let lock = self.locks.lock_for(tenant);
        let _guard = lock.lock();
        self.queue.withdraw(migration_id)
    }

    /// Every tenant with at least one pending migration.
    pub fn tenants_with_pending(&self) -> Result<Vec<TenantId>, MigrationError> {
        self.queue.tenants_with_pending()
    }

    fn require_field(
        &self,
        tenant: &TenantId,
        field_id: &Id,
    ) -> Result<FieldMetadata, MigrationError> {
        self.catalog
            .get_field(tenant, field_id)?
            .ok_or_else(|| MigrationError::FieldNotFound {
                field: format_id(field_id),
            })
    }

    fn require_migration(
        &self,
        tenant: &TenantId,
        migration_id: &Id,
    ) -> Result<PendingMigration, MigrationError> {
        match self.queue.get(migration_id)? {
            Some(migration) if &migration.tenant_id == tenant => Ok(migration),
            _ => Err(MigrationError::MigrationNotFound {
                migration_id: *migration_id,
            }),
        }
    }

    fn after_write(&self, tenant: &TenantId, migration: Option<&PendingMigration>) {
        let Some(migration) = migration else {
            return;
        };
        info!(
            tenant = %tenant,
            sequence = migration.sequence,
            migration_id = %format_id(&migration.id),
            migration = %migration.name,
            "Migration enqueued"
        );

        if self.config.drain_on_write {
            if let Err(e) = self.runner.run(tenant) {
                warn!(tenant = %tenant, error = %e, "Drain after write failed");
            }
        }
    }
}

/// Reject columns that collide, ignoring ASCII case, with system columns or
/// another field's columns.
fn check_column_conflicts(
    columns: &[TargetColumn],
    siblings: &[FieldMetadata],
    skip: Option<&Id>,
) -> Result<(), MigrationError> {
    for target in columns {
        let name = target.column.name.as_str();
        if SYSTEM_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            return Err(MigrationError::Validation {
                message: format!("column {name} is reserved"),
            });
        }
        let owner = siblings
            .iter()
            .filter(|f| Some(&f.id) != skip)
            .find(|f| {
                f.target_column_map
                    .iter()
                    .any(|t| t.column.name.eq_ignore_ascii_case(name))
            });
        if let Some(owner) = owner {
            return Err(MigrationError::Validation {
                message: format!("column {name} is already used by field {}", owner.name),
            });
        }
    }
    Ok(())
}

/// Relations must point at an existing object of the same tenant.
fn check_relation_target(
    tx: &MetadataTx<'_>,
    tenant: &TenantId,
    object: &ObjectMetadata,
    field: &FieldMetadata,
) -> TxResult<()> {
    if let FieldKind::Relation { target_object_id } = &field.kind {
        if target_object_id != &object.id {
            tx.require_object(tenant, target_object_id)?;
        }
    }
    Ok(())
}
