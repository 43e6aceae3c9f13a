//! Migration engine for SchemaFlow.
//!
//! Turns catalog changes into physical schema changes:
//! - [`type_mapper`] maps an abstract field type to its columns
//! - [`factory`] plans the table actions of a catalog change
//! - [`queue`] keeps each tenant's migrations in a durable ordered log
//! - [`runner`] drains a tenant's queue through a [`SchemaExecutor`]
//!
//! # Example
//!
//! ```ignore
//! use schemaflow_core::migration::{MigrationFactory, MigrationRunner};
//!
//! // Plan and enqueue inside one metadata transaction
//! store.transact(|tx| {
//!     let object = tx.require_object(&tenant, &object_id)?;
//!     tx.insert_field(&object, &field)?;
//!     let action = MigrationFactory::plan_create_field(&object, &field);
//!     tx.enqueue(&tenant, "create-field:amount", vec![action])
//! })?;
//!
//! // Apply everything pending for the tenant
//! let report = runner.run(&tenant)?;
//! ```

pub mod action;
pub mod column;
pub mod ddl;
pub mod error;
pub mod executor;
pub mod factory;
pub mod lock;
pub mod queue;
pub mod runner;
pub mod type_mapper;

pub use action::{ColumnAction, TableAction, TableActionKind};
pub use column::{ColumnDefault, ColumnSpec, PhysicalType};
pub use ddl::{order_actions, DdlCompiler, DdlStatement, Dialect};
pub use error::{ErrorCategory, MigrationError};
pub use executor::{ColumnInfo, ExecutorError, SchemaExecutor, SqliteSchemaExecutor};
pub use factory::MigrationFactory;
pub use lock::TenantLocks;
pub use queue::{
    ArchiveReason, ArchivedMigration, MigrationQueue, MigrationStatus, PendingMigration,
};
pub use runner::{AppliedMigration, MigrationRunner, RunReport};
pub use type_mapper::{map_target_columns, map_type};
