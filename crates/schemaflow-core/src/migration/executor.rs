//! Physical DDL execution against tenant workspaces.

use super::ddl::{DdlStatement, Dialect};
use crate::catalog::TenantId;
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised while executing DDL.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A statement was rejected by the database.
    #[error("{source} (statement: {sql})")]
    Statement {
        /// Statement text.
        sql: String,
        /// Database error.
        #[source]
        source: rusqlite::Error,
    },

    /// Database error outside a statement (connect, begin, commit).
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The workspace file could not be created.
    #[error("workspace io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes compiled DDL in a tenant's physical schema.
pub trait SchemaExecutor: Send + Sync {
    /// SQL dialect understood by this executor.
    fn dialect(&self) -> Dialect;

    /// Whether a batch can run as one physical transaction.
    fn supports_transactional_ddl(&self) -> bool;

    /// Physical schema holding the tenant's tables.
    fn schema_name(&self, tenant: &TenantId) -> String;

    /// Run all statements in one transaction.
    fn execute_batch(
        &self,
        tenant: &TenantId,
        statements: &[DdlStatement],
    ) -> Result<(), ExecutorError>;

    /// Run a single statement outside any batch.
    fn execute(&self, tenant: &TenantId, statement: &DdlStatement) -> Result<(), ExecutorError>;
}

/// A column as reported by the workspace database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub declared_type: String,
    /// Whether the column is NOT NULL.
    pub not_null: bool,
}

/// SQLite workspaces, one database per tenant.
pub struct SqliteSchemaExecutor {
    workspace_path: Option<PathBuf>,
    busy_timeout: Duration,
    connections: DashMap<TenantId, Arc<Mutex<Connection>>>,
}

impl SqliteSchemaExecutor {
    /// Create an executor storing one file per tenant under `workspace_path`,
    /// or in-memory databases when it is `None`.
    pub fn new(workspace_path: Option<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            workspace_path,
            busy_timeout,
            connections: DashMap::new(),
        }
    }

    /// Create an executor with in-memory workspaces.
    pub fn in_memory() -> Self {
        Self::new(None, Duration::from_secs(5))
    }

    /// Path of a tenant's workspace file.
    pub fn workspace_file(&self, tenant: &TenantId) -> Option<PathBuf> {
        self.workspace_path
            .as_ref()
            .map(|dir| dir.join(format!("workspace_{}.sqlite", tenant.schema_suffix())))
    }

    /// Run `f` with the tenant's connection.
    pub fn with_connection<R, F>(&self, tenant: &TenantId, f: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R>,
    {
        let connection = self.connection(tenant)?;
        let mut guard = connection.lock();
        Ok(f(&mut *guard)?)
    }

    /// Check if a table exists in the tenant's workspace.
    pub fn table_exists(&self, tenant: &TenantId, table: &str) -> Result<bool, ExecutorError> {
        self.with_connection(tenant, |conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Columns of a table in declaration order.
    pub fn table_columns(
        &self,
        tenant: &TenantId,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, ExecutorError> {
        self.with_connection(tenant, |conn| {
            let mut stmt = conn.prepare(
                "SELECT name, type, \"notnull\" FROM pragma_table_info(?1) ORDER BY cid",
            )?;
            let rows = stmt.query_map(params![table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    declared_type: row.get(1)?,
                    not_null: row.get::<_, i64>(2)? != 0,
                })
            })?;
            let columns = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(columns)
        })
    }

    fn connection(&self, tenant: &TenantId) -> Result<Arc<Mutex<Connection>>, ExecutorError> {
        if let Some(existing) = self.connections.get(tenant) {
            return Ok(existing.clone());
        }

        let entry = self
            .connections
            .entry(tenant.clone())
            .or_try_insert_with(|| self.open(tenant).map(|c| Arc::new(Mutex::new(c))))?;
        Ok(entry.clone())
    }

    fn open(&self, tenant: &TenantId) -> Result<Connection, ExecutorError> {
        let connection = match self.workspace_file(tenant) {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                debug!(tenant = %tenant, path = %path.display(), "Opening workspace");
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        connection.busy_timeout(self.busy_timeout)?;
        Ok(connection)
    }
}

impl SchemaExecutor for SqliteSchemaExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn schema_name(&self, _tenant: &TenantId) -> String {
        "main".to_string()
    }

    fn execute_batch(
        &self,
        tenant: &TenantId,
        statements: &[DdlStatement],
    ) -> Result<(), ExecutorError> {
        let connection = self.connection(tenant)?;
        let mut conn = connection.lock();
        let tx = conn.transaction()?;
        for statement in statements {
            tx.execute_batch(&statement.sql)
                .map_err(|source| ExecutorError::Statement {
                    sql: statement.sql.clone(),
                    source,
                })?;
        }
        tx.commit()?;
        Ok(())
    }

    fn execute(&self, tenant: &TenantId, statement: &DdlStatement) -> Result<(), ExecutorError> {
        let connection = self.connection(tenant)?;
        let conn = connection.lock();
        conn.execute_batch(&statement.sql)
            .map_err(|source| ExecutorError::Statement {
                sql: statement.sql.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{ColumnAction, ColumnSpec, DdlCompiler, PhysicalType, TableAction};

    fn tenant() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    fn compile(executor: &SqliteSchemaExecutor, actions: &[TableAction]) -> Vec<DdlStatement> {
        DdlCompiler::new(executor.dialect(), executor.schema_name(&tenant())).compile(actions)
    }

    #[test]
    fn test_batch_creates_table_with_system_columns() {
        let executor = SqliteSchemaExecutor::in_memory();
        let statements = compile(
            &executor,
            &[TableAction::create(
                "opportunity",
                vec![ColumnSpec::new("name", PhysicalType::Text)],
            )],
        );
        executor.execute_batch(&tenant(), &statements).unwrap();

        let columns: Vec<_> = executor
            .table_columns(&tenant(), "opportunity")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(columns, vec!["id", "createdAt", "updatedAt", "deletedAt", "name"]);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let executor = SqliteSchemaExecutor::in_memory();
        let mut statements = compile(&executor, &[TableAction::create("deal", vec![])]);
        statements.extend(compile(
            &executor,
            &[TableAction::alter(
                "missing",
                vec![ColumnAction::Create {
                    column: ColumnSpec::new("x", PhysicalType::Text),
                }],
            )],
        ));

        let err = executor.execute_batch(&tenant(), &statements).unwrap_err();
        assert!(matches!(err, ExecutorError::Statement { .. }));
        assert!(!executor.table_exists(&tenant(), "deal").unwrap());
    }

    #[test]
    fn test_rebuild_keeps_values() {
        let executor = SqliteSchemaExecutor::in_memory();
        let create = compile(
            &executor,
            &[TableAction::create(
                "deal",
                vec![ColumnSpec::new("score", PhysicalType::Integer)],
            )],
        );
        executor.execute_batch(&tenant(), &create).unwrap();
        executor
            .with_connection(&tenant(), |conn| {
                conn.execute("INSERT INTO deal (id, score) VALUES ('a', 7)", [])
            })
            .unwrap();

        let alter = compile(
            &executor,
            &[TableAction::alter(
                "deal",
                vec![ColumnAction::Alter {
                    from: ColumnSpec::new("score", PhysicalType::Integer),
                    to: ColumnSpec::new("score", PhysicalType::Float),
                }],
            )],
        );
        executor.execute_batch(&tenant(), &alter).unwrap();

        let score: f64 = executor
            .with_connection(&tenant(), |conn| {
                conn.query_row("SELECT score FROM deal WHERE id = 'a'", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(score, 7.0);
        let columns = executor.table_columns(&tenant(), "deal").unwrap();
        let score = columns.iter().find(|c| c.name == "score").unwrap();
        assert_eq!(score.declared_type, "REAL");
        assert!(columns.iter().all(|c| c.name != "score__old"));
    }

    #[test]
    fn test_workspace_files_per_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let executor =
            SqliteSchemaExecutor::new(Some(dir.path().join("ws")), Duration::from_secs(1));
        let statements = compile(&executor, &[TableAction::create("deal", vec![])]);
        executor.execute_batch(&tenant(), &statements).unwrap();

        let other = TenantId::new("globex_eu").unwrap();
        assert!(dir.path().join("ws/workspace_acme.sqlite").exists());
        assert_eq!(
            executor.workspace_file(&other),
            Some(dir.path().join("ws/workspace_globex_eu.sqlite"))
        );
        assert!(!executor.table_exists(&other, "deal").unwrap());
    }
}
