//! Migration runner.
//!
//! Drains one tenant's queue in sequence order. Each migration is read,
//! executed and marked while holding the tenant's DDL lock; the lock is
//! released between migrations so enqueue and other tenants make progress.

use super::ddl::{DdlCompiler, DdlStatement};
use super::error::MigrationError;
use super::executor::{ExecutorError, SchemaExecutor};
use super::lock::TenantLocks;
use super::queue::{MigrationQueue, MigrationStatus, PendingMigration};
use crate::catalog::types::id_hex;
use crate::catalog::TenantId;
use crate::storage::key::Id;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// A migration applied during a drain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedMigration {
    /// Migration id.
    #[serde(with = "id_hex")]
    pub id: Id,
    /// Per-tenant sequence number.
    pub sequence: u64,
    /// Descriptive name.
    pub name: String,
    /// Number of statements executed.
    pub statements: usize,
}

/// Result of draining one tenant's queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Tenant that was drained.
    pub tenant: TenantId,
    /// Migrations applied, in order.
    pub applied: Vec<AppliedMigration>,
    /// Time spent.
    #[serde(skip)]
    pub duration: Duration,
}

impl RunReport {
    fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            applied: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Check if nothing was applied.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Total statements executed.
    pub fn statements_executed(&self) -> usize {
        self.applied.iter().map(|m| m.statements).sum()
    }
}

/// Executes queued migrations against tenant workspaces.
pub struct MigrationRunner {
    queue: MigrationQueue,
    executor: Arc<dyn SchemaExecutor>,
    locks: Arc<TenantLocks>,
}

impl MigrationRunner {
    /// Create a runner.
    pub fn new(
        queue: MigrationQueue,
        executor: Arc<dyn SchemaExecutor>,
        locks: Arc<TenantLocks>,
    ) -> Self {
        Self {
            queue,
            executor,
            locks,
        }
    }

    /// The executor migrations run on.
    pub fn executor(&self) -> &Arc<dyn SchemaExecutor> {
        &self.executor
    }

    /// Drain the tenant's queue.
    ///
    /// Stops at the first failure: the migration is marked failed and
    /// [`MigrationError::ExecutionFailed`] is returned. A tenant whose next
    /// migration already failed gets [`MigrationError::QueueBlocked`] without
    /// anything being executed.
    #[instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub fn run(&self, tenant: &TenantId) -> Result<RunReport, MigrationError> {
        let start = Instant::now();
        let mut report = RunReport::new(tenant.clone());

        while let Some(applied) = self.run_next(tenant)? {
            report.applied.push(applied);
        }

        report.duration = start.elapsed();
        if report.is_empty() {
            debug!("No pending migrations");
        } else {
            info!(
                applied = report.applied.len(),
                statements = report.statements_executed(),
                duration_ms = report.duration.as_millis() as u64,
                "Drain completed"
            );
        }
        Ok(report)
    }

    /// Execute the head of the queue under the tenant lock.
    fn run_next(&self, tenant: &TenantId) -> Result<Option<AppliedMigration>, MigrationError> {
        let lock = self.locks.lock_for(tenant);
        let _guard = lock.lock();

        let Some(migration) = self.queue.head(tenant)? else {
            return Ok(None);
        };

        if migration.status == MigrationStatus::Failed {
            return Err(MigrationError::QueueBlocked {
                tenant: tenant.clone(),
                migration_id: migration.id,
                sequence: migration.sequence,
                reason: migration.failure_reason.unwrap_or_default(),
            });
        }

        let statements = self.compile(tenant, &migration);
        match self.execute(tenant, &statements) {
            Ok(()) => {
                self.queue.mark_applied(&migration.id)?;
                info!(
                    sequence = migration.sequence,
                    migration = %migration.name,
                    statements = statements.len(),
                    "Migration applied"
                );
                Ok(Some(AppliedMigration {
                    id: migration.id,
                    sequence: migration.sequence,
                    name: migration.name,
                    statements: statements.len(),
                }))
            }
            Err(e) => {
                let reason = e.to_string();
                self.queue.mark_failed(&migration.id, &reason)?;
                warn!(
                    sequence = migration.sequence,
                    migration = %migration.name,
                    error = %reason,
                    "Migration failed"
                );
                Err(MigrationError::ExecutionFailed {
                    migration_id: migration.id,
                    sequence: migration.sequence,
                    reason,
                })
            }
        }
    }

    fn compile(&self, tenant: &TenantId, migration: &PendingMigration) -> Vec<DdlStatement> {
        let compiler = DdlCompiler::new(self.executor.dialect(), self.executor.schema_name(tenant));
        let statements = compiler.compile(&migration.actions);
        for statement in &statements {
            debug!(sequence = migration.sequence, sql = %statement.sql, "Compiled statement");
        }
        statements
    }

    fn execute(&self, tenant: &TenantId, statements: &[DdlStatement]) -> Result<(), ExecutorError> {
        if statements.is_empty() {
            return Ok(());
        }
        if self.executor.supports_transactional_ddl() {
            return self.executor.execute_batch(tenant, statements);
        }

        for (index, statement) in statements.iter().enumerate() {
            if let Err(e) = self.executor.execute(tenant, statement) {
                self.compensate(tenant, &statements[..index]);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undo executed statements in reverse order, best effort.
    fn compensate(&self, tenant: &TenantId, executed: &[DdlStatement]) {
        for statement in executed.iter().rev() {
            match statement.compensating() {
                Some(undo) => {
                    if let Err(e) = self.executor.execute(tenant, &undo) {
                        warn!(sql = %undo.sql, error = %e, "Compensation failed");
                    }
                }
                None => warn!(sql = %statement.sql, "Statement cannot be compensated"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::executor::SqliteSchemaExecutor;
    use crate::migration::{ColumnAction, ColumnSpec, Dialect, PhysicalType, TableAction};
    use crate::storage::MetadataStore;

    /// Runs statements one by one on SQLite, as a database without
    /// transactional DDL would.
    struct StatementByStatement(SqliteSchemaExecutor);

    impl SchemaExecutor for StatementByStatement {
        fn dialect(&self) -> Dialect {
            self.0.dialect()
        }

        fn supports_transactional_ddl(&self) -> bool {
            false
        }

        fn schema_name(&self, tenant: &TenantId) -> String {
            self.0.schema_name(tenant)
        }

        fn execute_batch(
            &self,
            _tenant: &TenantId,
            _statements: &[DdlStatement],
        ) -> Result<(), ExecutorError> {
            unreachable!("batches are not supported")
        }

        fn execute(
            &self,
            tenant: &TenantId,
            statement: &DdlStatement,
        ) -> Result<(), ExecutorError> {
            self.0.execute(tenant, statement)
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    fn column(name: &str) -> ColumnAction {
        ColumnAction::Create {
            column: ColumnSpec::new(name, PhysicalType::Text),
        }
    }

    fn enqueue(store: &MetadataStore, actions: Vec<TableAction>) -> PendingMigration {
        store
            .transact(|tx| tx.enqueue(&tenant(), "test", actions.clone()))
            .unwrap()
    }

    #[test]
    fn test_run_applies_in_order() {
        let store = MetadataStore::temporary().unwrap();
        let executor = Arc::new(SqliteSchemaExecutor::in_memory());
        let runner = MigrationRunner::new(store.queue(), executor.clone(), Arc::default());

        enqueue(&store, vec![TableAction::create("deal", vec![])]);
        enqueue(&store, vec![TableAction::alter("deal", vec![column("title")])]);

        let report = runner.run(&tenant()).unwrap();
        let sequences: Vec<_> = report.applied.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert!(store.queue().list_pending(&tenant()).unwrap().is_empty());
        assert!(executor
            .table_columns(&tenant(), "deal")
            .unwrap()
            .iter()
            .any(|c| c.name == "title"));

        let again = runner.run(&tenant()).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_failed_head_blocks_tenant() {
        let store = MetadataStore::temporary().unwrap();
        let runner = MigrationRunner::new(
            store.queue(),
            Arc::new(SqliteSchemaExecutor::in_memory()),
            Arc::default(),
        );

        let broken = enqueue(&store, vec![TableAction::alter("missing", vec![column("x")])]);
        enqueue(&store, vec![TableAction::create("deal", vec![])]);

        let err = runner.run(&tenant()).unwrap_err();
        assert!(matches!(err, MigrationError::ExecutionFailed { sequence: 1, .. }));

        let err = runner.run(&tenant()).unwrap_err();
        match err {
            MigrationError::QueueBlocked {
                migration_id,
                reason,
                ..
            } => {
                assert_eq!(migration_id, broken.id);
                assert!(reason.contains("missing"));
            }
            other => panic!("expected QueueBlocked, got {other:?}"),
        }
        assert_eq!(store.queue().list_pending(&tenant()).unwrap().len(), 1);
    }

    #[test]
    fn test_compensation_without_transactional_ddl() {
        let store = MetadataStore::temporary().unwrap();
        let executor = Arc::new(StatementByStatement(SqliteSchemaExecutor::in_memory()));
        let runner = MigrationRunner::new(store.queue(), executor.clone(), Arc::default());

        enqueue(
            &store,
            vec![
                TableAction::create("deal", vec![]),
                TableAction::alter("missing", vec![column("x")]),
            ],
        );

        let err = runner.run(&tenant()).unwrap_err();
        assert!(matches!(err, MigrationError::ExecutionFailed { .. }));
        assert!(!executor.0.table_exists(&tenant(), "deal").unwrap());
    }

    #[test]
    fn test_compensation_leaves_existing_table_alone() {
        let store = MetadataStore::temporary().unwrap();
        let executor = Arc::new(StatementByStatement(SqliteSchemaExecutor::in_memory()));
        let runner = MigrationRunner::new(store.queue(), executor.clone(), Arc::default());

        executor
            .0
            .with_connection(&tenant(), |conn| {
                conn.execute_batch(
                    "CREATE TABLE deal (id TEXT PRIMARY KEY); INSERT INTO deal VALUES ('d1');",
                )
            })
            .unwrap();

        enqueue(
            &store,
            vec![
                TableAction::create("deal", vec![]),
                TableAction::alter("missing", vec![column("x")]),
            ],
        );

        let err = runner.run(&tenant()).unwrap_err();
        assert!(matches!(err, MigrationError::ExecutionFailed { sequence: 1, .. }));
        assert!(executor.0.table_exists(&tenant(), "deal").unwrap());
        let rows: i64 = executor
            .0
            .with_connection(&tenant(), |conn| {
                conn.query_row("SELECT COUNT(*) FROM deal", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_concurrent_runs_apply_each_migration_once() {
        let store = MetadataStore::temporary().unwrap();
        let executor = Arc::new(SqliteSchemaExecutor::in_memory());
        let runner = MigrationRunner::new(store.queue(), executor.clone(), Arc::default());

        enqueue(&store, vec![TableAction::create("deal", vec![])]);
        for i in 0..20 {
            let name = format!("c{i}");
            enqueue(&store, vec![TableAction::alter("deal", vec![column(&name)])]);
        }

        let reports: Vec<RunReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| scope.spawn(|| runner.run(&tenant()).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for report in &reports {
            let sequences: Vec<_> = report.applied.iter().map(|m| m.sequence).collect();
            assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        }
        let mut all: Vec<_> = reports
            .iter()
            .flat_map(|r| r.applied.iter().map(|m| m.sequence))
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=21).collect::<Vec<_>>());

        let columns = executor.table_columns(&tenant(), "deal").unwrap();
        assert_eq!(columns.len(), 4 + 20);
        assert!(store.queue().list_pending(&tenant()).unwrap().is_empty());
    }
}
