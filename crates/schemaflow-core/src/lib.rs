//! SchemaFlow Core - Metadata catalog and per-tenant schema migrations.
//!
//! This crate turns runtime object and field definitions into physical DDL,
//! queues it durably per tenant and applies it in order.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod migration;
pub mod storage;

pub use catalog::{
    DefaultValue, FieldKind, FieldMetadata, FieldOption, FieldOptionPatch, FieldPatch, FieldSpec,
    MetadataCatalog, ObjectMetadata, ObjectSpec, TargetColumn, TenantId,
};
pub use config::EngineConfig;
pub use engine::SchemaEngine;
pub use error::Error;
pub use migration::{
    ArchiveReason, ArchivedMigration, ColumnAction, ColumnSpec, DdlCompiler, DdlStatement,
    Dialect, ErrorCategory, MigrationError, MigrationFactory, MigrationQueue, MigrationRunner,
    MigrationStatus, PendingMigration, PhysicalType, RunReport, SchemaExecutor,
    SqliteSchemaExecutor, TableAction, TableActionKind,
};
pub use storage::key::{format_id, parse_id, Id};
pub use storage::MetadataStore;
