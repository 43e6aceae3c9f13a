//! Compilation of table actions into dialect-specific DDL.
//!
//! Every statement carries an optional compensation that undoes it. Executors
//! without transactional DDL run the compensations of already executed
//! statements in reverse order when a later statement fails.

use super::action::{ColumnAction, TableAction, TableActionKind};
use super::column::{ColumnDefault, ColumnSpec, PhysicalType};
use std::fmt;

/// Target SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PostgreSQL, one schema per tenant.
    Postgres,
    /// SQLite, one database per tenant.
    Sqlite,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// One DDL statement and its undo statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStatement {
    /// Statement text.
    pub sql: String,
    /// Statement undoing `sql`, if it can be undone.
    pub compensation: Option<String>,
}

impl DdlStatement {
    fn new(sql: String, compensation: Option<String>) -> Self {
        Self { sql, compensation }
    }

    /// The compensation as a statement of its own.
    pub fn compensating(&self) -> Option<DdlStatement> {
        self.compensation
            .as_ref()
            .map(|sql| DdlStatement::new(sql.clone(), None))
    }
}

impl fmt::Display for DdlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};", self.sql)
    }
}

/// Suffix of the temporary column used by the SQLite column rebuild.
const REBUILD_SUFFIX: &str = "__old";

/// Put a migration's table actions into execution order.
///
/// A create-table moves in front of the first alter of the same table.
/// Inside an alter, column creates run before alters, alters before drops.
/// Everything else keeps its relative order.
pub fn order_actions(actions: &[TableAction]) -> Vec<TableAction> {
    let mut ordered: Vec<TableAction> = Vec::with_capacity(actions.len());

    for action in actions {
        let mut action = action.clone();
        action.columns.sort_by_key(ColumnAction::rank);

        let first_alter = if action.kind == TableActionKind::Create {
            ordered.iter().position(|a| {
                a.kind == TableActionKind::Alter && a.table_name == action.table_name
            })
        } else {
            None
        };
        match first_alter {
            Some(index) => ordered.insert(index, action),
            None => ordered.push(action),
        }
    }

    ordered
}

/// Compiles [`TableAction`]s for one dialect and one schema.
#[derive(Debug, Clone)]
pub struct DdlCompiler {
    dialect: Dialect,
    schema: String,
}

impl DdlCompiler {
    /// Create a compiler targeting `schema`.
    pub fn new(dialect: Dialect, schema: impl Into<String>) -> Self {
        Self {
            dialect,
            schema: schema.into(),
        }
    }

    /// Target dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Compile a migration's actions, in execution order.
    pub fn compile(&self, actions: &[TableAction]) -> Vec<DdlStatement> {
        let mut statements = Vec::new();
        for action in order_actions(actions) {
            match action.kind {
                TableActionKind::Create => statements.push(self.create_table(&action)),
                TableActionKind::Drop => statements.push(self.drop_table(&action.table_name)),
                TableActionKind::Alter => {
                    for column in &action.columns {
                        self.alter_table(&action.table_name, column, &mut statements);
                    }
                }
            }
        }
        statements
    }

    fn create_table(&self, action: &TableAction) -> DdlStatement {
        let mut definitions = self.system_columns();
        for column in &action.columns {
            if let ColumnAction::Create { column } = column {
                definitions.push(self.column_definition(column, true));
            }
        }

        // Fails on an existing table; the compensation drops it.
        let table = self.table(&action.table_name);
        DdlStatement::new(
            format!("CREATE TABLE {table} ({})", definitions.join(", ")),
            Some(format!("DROP TABLE {table}")),
        )
    }

    fn drop_table(&self, table_name: &str) -> DdlStatement {
        DdlStatement::new(format!("DROP TABLE IF EXISTS {}", self.table(table_name)), None)
    }

    fn alter_table(&self, table_name: &str, action: &ColumnAction, out: &mut Vec<DdlStatement>) {
        let table = self.table(table_name);
        match action {
            ColumnAction::Create { column } => out.push(DdlStatement::new(
                self.add_column(&table, column),
                Some(self.drop_column(&table, &column.name)),
            )),
            ColumnAction::Drop { column } => out.push(DdlStatement::new(
                self.drop_column(&table, &column.name),
                Some(self.add_column(&table, column)),
            )),
            ColumnAction::Alter { from, to } => match self.dialect {
                Dialect::Postgres => self.postgres_alter_column(&table, from, to, out),
                Dialect::Sqlite => self.sqlite_rebuild_column(&table, from, to, out),
            },
        }
    }

    fn add_column(&self, table: &str, column: &ColumnSpec) -> String {
        format!(
            "ALTER TABLE {table} ADD COLUMN {}",
            self.column_definition(column, false)
        )
    }

    fn drop_column(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {table} DROP COLUMN {}", quote_ident(column))
    }

    fn postgres_alter_column(
        &self,
        table: &str,
        from: &ColumnSpec,
        to: &ColumnSpec,
        out: &mut Vec<DdlStatement>,
    ) {
        let column = quote_ident(&to.name);
        let prefix = format!("ALTER TABLE {table} ALTER COLUMN {column}");

        if from.physical_type != to.physical_type {
            let retype = |from: PhysicalType, to: PhysicalType| {
                format!(
                    "{prefix} TYPE {} USING {}",
                    self.type_name(to),
                    self.convert(&column, from, to)
                )
            };
            out.push(DdlStatement::new(
                retype(from.physical_type, to.physical_type),
                Some(retype(to.physical_type, from.physical_type)),
            ));
        }

        if from.default != to.default {
            let set_default = |default: &Option<ColumnDefault>| match default {
                Some(default) => format!("{prefix} SET DEFAULT {}", self.literal(default)),
                None => format!("{prefix} DROP DEFAULT"),
            };
            out.push(DdlStatement::new(
                set_default(&to.default),
                Some(set_default(&from.default)),
            ));
        }

        if from.nullable != to.nullable {
            let set_nullable = |nullable: bool| {
                if nullable {
                    format!("{prefix} DROP NOT NULL")
                } else {
                    format!("{prefix} SET NOT NULL")
                }
            };
            out.push(DdlStatement::new(
                set_nullable(to.nullable),
                Some(set_nullable(from.nullable)),
            ));
        }
    }

    /// SQLite cannot alter a column in place: rename it away, add the new
    /// definition under the original name, copy the values and drop the old
    /// column.
    fn sqlite_rebuild_column(
        &self,
        table: &str,
        from: &ColumnSpec,
        to: &ColumnSpec,
        out: &mut Vec<DdlStatement>,
    ) {
        let column = quote_ident(&to.name);
        let old = quote_ident(&format!("{}{REBUILD_SUFFIX}", from.name));

        out.push(DdlStatement::new(
            format!("ALTER TABLE {table} RENAME COLUMN {column} TO {old}"),
            Some(format!("ALTER TABLE {table} RENAME COLUMN {old} TO {column}")),
        ));
        out.push(DdlStatement::new(
            self.add_column(table, to),
            Some(self.drop_column(table, &to.name)),
        ));

        let value = if from.physical_type == to.physical_type {
            old.clone()
        } else {
            self.convert(&old, from.physical_type, to.physical_type)
        };
        out.push(DdlStatement::new(
            format!("UPDATE {table} SET {column} = {value}"),
            None,
        ));
        out.push(DdlStatement::new(
            format!("ALTER TABLE {table} DROP COLUMN {old}"),
            None,
        ));
    }

    /// Expression converting `value` between physical types. Booleans are
    /// spelled out so both dialects produce `1`/`0` and `'true'`/`'false'`,
    /// keeping NULL as NULL.
    fn convert(&self, value: &str, from: PhysicalType, to: PhysicalType) -> String {
        match (from, to) {
            (PhysicalType::Boolean, PhysicalType::Integer) => {
                format!("CASE WHEN {value} THEN 1 WHEN NOT {value} THEN 0 END")
            }
            (PhysicalType::Boolean, PhysicalType::Text) => {
                format!("CASE WHEN {value} THEN 'true' WHEN NOT {value} THEN 'false' END")
            }
            _ => match self.dialect {
                Dialect::Postgres => format!("{value}::{}", self.type_name(to)),
                Dialect::Sqlite => format!("CAST({value} AS {})", self.type_name(to)),
            },
        }
    }

    fn system_columns(&self) -> Vec<String> {
        let timestamp = self.type_name(PhysicalType::Timestamp);
        let now = self.literal(&ColumnDefault::CurrentTimestamp);
        let id = match self.dialect {
            Dialect::Postgres => format!(
                "{} {} PRIMARY KEY DEFAULT gen_random_uuid()",
                quote_ident("id"),
                self.type_name(PhysicalType::Uuid)
            ),
            Dialect::Sqlite => format!(
                "{} {} PRIMARY KEY NOT NULL",
                quote_ident("id"),
                self.type_name(PhysicalType::Uuid)
            ),
        };
        vec![
            id,
            format!("{} {timestamp} NOT NULL DEFAULT {now}", quote_ident("createdAt")),
            format!("{} {timestamp} NOT NULL DEFAULT {now}", quote_ident("updatedAt")),
            format!("{} {timestamp}", quote_ident("deletedAt")),
        ]
    }

    /// Column definition. SQLite only accepts a non-constant default at
    /// table creation, so `CURRENT_TIMESTAMP` is dropped when adding a column.
    fn column_definition(&self, column: &ColumnSpec, in_create_table: bool) -> String {
        let mut definition = format!(
            "{} {}",
            quote_ident(&column.name),
            self.type_name(column.physical_type)
        );
        if !column.nullable {
            definition.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            let constant = !matches!(default, ColumnDefault::CurrentTimestamp);
            if self.dialect == Dialect::Postgres || in_create_table || constant {
                definition.push_str(" DEFAULT ");
                definition.push_str(&self.literal(default));
            }
        }
        definition
    }

    fn table(&self, table_name: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table_name))
    }

    fn type_name(&self, physical_type: PhysicalType) -> &'static str {
        match self.dialect {
            Dialect::Postgres => match physical_type {
                PhysicalType::Text => "text",
                PhysicalType::Integer => "bigint",
                PhysicalType::Float => "double precision",
                PhysicalType::Boolean => "boolean",
                PhysicalType::Date => "date",
                PhysicalType::Timestamp => "timestamptz",
                PhysicalType::Uuid => "uuid",
                PhysicalType::TextArray => "text[]",
            },
            Dialect::Sqlite => match physical_type {
                PhysicalType::Text | PhysicalType::Uuid => "TEXT",
                PhysicalType::Integer => "INTEGER",
                PhysicalType::Float => "REAL",
                PhysicalType::Boolean => "BOOLEAN",
                PhysicalType::Date => "DATE",
                PhysicalType::Timestamp => "TIMESTAMP",
                // Stored as a JSON array.
                PhysicalType::TextArray => "TEXT",
            },
        }
    }

    fn literal(&self, default: &ColumnDefault) -> String {
        match default {
            ColumnDefault::Text(text) => quote_literal(text),
            ColumnDefault::Integer(n) => n.to_string(),
            ColumnDefault::Float(n) => format!("{n:?}"),
            ColumnDefault::Boolean(b) => match self.dialect {
                Dialect::Postgres => b.to_string(),
                Dialect::Sqlite => u8::from(*b).to_string(),
            },
            ColumnDefault::TextArray(values) => match self.dialect {
                Dialect::Postgres => format!(
                    "ARRAY[{}]::text[]",
                    values
                        .iter()
                        .map(|v| quote_literal(v))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                Dialect::Sqlite => {
                    quote_literal(&serde_json::Value::from(values.clone()).to_string())
                }
            },
            ColumnDefault::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

/// Quote an identifier with double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
