//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use schemaflow_core::{
    format_id, ArchivedMigration, FieldMetadata, ObjectMetadata, PendingMigration, RunReport,
};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a list of objects.
    fn format_objects(&self, objects: &[ObjectMetadata]) -> String;

    /// Format a list of fields.
    fn format_fields(&self, fields: &[FieldMetadata]) -> String;

    /// Format queued migrations.
    fn format_migrations(&self, migrations: &[PendingMigration]) -> String;

    /// Format archived migrations.
    fn format_archived(&self, migrations: &[ArchivedMigration]) -> String;

    /// Format the result of a drain.
    fn format_report(&self, report: &RunReport) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_objects(&self, objects: &[ObjectMetadata]) -> String {
        if objects.is_empty() {
            return "No objects".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Id", "Name", "Plural", "Label", "Table"]);
        for object in objects {
            table.add_row(vec![
                Cell::new(format_id(&object.id)),
                Cell::new(&object.name_singular),
                Cell::new(&object.name_plural),
                Cell::new(&object.label),
                Cell::new(&object.target_table_name),
            ]);
        }
        table.to_string()
    }

    fn format_fields(&self, fields: &[FieldMetadata]) -> String {
        if fields.is_empty() {
            return "No fields".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Id", "Name", "Type", "Columns", "Active"]);
        for field in fields {
            let columns: Vec<String> = field
                .target_column_map
                .iter()
                .map(|t| format!("{} {}", t.column.name, t.column.physical_type))
                .collect();
            table.add_row(vec![
                Cell::new(format_id(&field.id)),
                Cell::new(&field.name),
                Cell::new(field.kind.type_name()),
                Cell::new(columns.join("\n")),
                Cell::new(field.is_active),
            ]);
        }
        table.to_string()
    }

    fn format_migrations(&self, migrations: &[PendingMigration]) -> String {
        if migrations.is_empty() {
            return "No migrations".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["#", "Id", "Name", "Status", "Attempts", "Failure"]);
        for migration in migrations {
            table.add_row(vec![
                Cell::new(migration.sequence),
                Cell::new(format_id(&migration.id)),
                Cell::new(&migration.name),
                Cell::new(migration.status),
                Cell::new(migration.attempts),
                Cell::new(migration.failure_reason.as_deref().unwrap_or("")),
            ]);
        }
        table.to_string()
    }

    fn format_archived(&self, migrations: &[ArchivedMigration]) -> String {
        if migrations.is_empty() {
            return "No archived migrations".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["#", "Id", "Name", "Reason", "Status"]);
        for archived in migrations {
            let migration = &archived.migration;
            table.add_row(vec![
                Cell::new(migration.sequence),
                Cell::new(format_id(&migration.id)),
                Cell::new(&migration.name),
                Cell::new(archived.reason),
                Cell::new(migration.status),
            ]);
        }
        table.to_string()
    }

    fn format_report(&self, report: &RunReport) -> String {
        if report.is_empty() {
            return format!("{}: no pending migrations", report.tenant);
        }
        let mut table = Table::new();
        table.set_header(vec!["#", "Id", "Name", "Statements"]);
        for applied in &report.applied {
            table.add_row(vec![
                Cell::new(applied.sequence),
                Cell::new(format_id(&applied.id)),
                Cell::new(&applied.name),
                Cell::new(applied.statements),
            ]);
        }
        format!(
            "{}\n{}: {} migration(s) applied in {} ms",
            table,
            report.tenant,
            report.applied.len(),
            report.duration.as_millis()
        )
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn render<T: serde::Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| {
            serde_json::json!({
                "error": e.to_string()
            })
            .to_string()
        })
    }
}

impl Formatter for JsonFormatter {
    fn format_objects(&self, objects: &[ObjectMetadata]) -> String {
        Self::render(objects)
    }

    fn format_fields(&self, fields: &[FieldMetadata]) -> String {
        Self::render(fields)
    }

    fn format_migrations(&self, migrations: &[PendingMigration]) -> String {
        Self::render(migrations)
    }

    fn format_archived(&self, migrations: &[ArchivedMigration]) -> String {
        Self::render(migrations)
    }

    fn format_report(&self, report: &RunReport) -> String {
        Self::render(report)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({
            "message": message
        })
        .to_string()
    }
}
