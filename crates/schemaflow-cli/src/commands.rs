//! Command execution against a local engine.

use crate::config::{Command, FieldCommand, MigrationsCommand, ObjectCommand};
use crate::formatter::Formatter;
use schemaflow_core::{
    format_id, parse_id, DefaultValue, FieldKind, FieldMetadata, FieldOption, FieldPatch,
    FieldSpec, Id, MigrationError, ObjectMetadata, ObjectSpec, SchemaEngine, TenantId,
};
use thiserror::Error;

/// Errors surfaced by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Engine error.
    #[error(transparent)]
    Engine(#[from] MigrationError),

    /// Malformed JSON argument.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Named object or field does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Execute a tenant-scoped command and render its output.
pub fn execute(
    engine: &SchemaEngine,
    tenant: &TenantId,
    command: Command,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    match command {
        Command::Object(command) => object(engine, tenant, command, formatter),
        Command::Field(command) => field(engine, tenant, command, formatter),
        Command::Migrations(command) => migrations(engine, tenant, command, formatter),
        Command::Worker { .. } => Err(CliError::InvalidArgument(
            "worker runs as a long-lived process".to_string(),
        )),
    }
}

fn object(
    engine: &SchemaEngine,
    tenant: &TenantId,
    command: ObjectCommand,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    match command {
        ObjectCommand::Create {
            name,
            plural,
            label,
            description,
            fields,
        } => {
            let mut spec = ObjectSpec::new(name);
            spec.name_plural = plural;
            spec.label = label;
            spec.description = description;
            let fields: Vec<FieldSpec> = match fields {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            };

            let object = engine.create_object(tenant, spec, fields)?;
            Ok(formatter.format_message(&format!(
                "Created object {} ({})",
                object.name_singular,
                format_id(&object.id)
            )))
        }
        ObjectCommand::Delete { name } => {
            let object = require_object(engine, tenant, &name)?;
            engine.delete_object(tenant, &object.id)?;
            Ok(formatter.format_message(&format!("Deleted object {}", object.name_singular)))
        }
        ObjectCommand::List => Ok(formatter.format_objects(&engine.list_objects(tenant)?)),
    }
}

fn field(
    engine: &SchemaEngine,
    tenant: &TenantId,
    command: FieldCommand,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    match command {
        FieldCommand::Create {
            object,
            name,
            kind,
            options,
            target,
            default,
            label,
        } => {
            let owner = require_object(engine, tenant, &object)?;
            let target_id = match target {
                Some(target) => Some(require_object(engine, tenant, &target)?.id),
                None => None,
            };
            let mut spec = FieldSpec::new(name, parse_kind(&kind, &options, target_id)?);
            spec.label = label;
            if let Some(json) = default {
                spec.default_value = Some(serde_json::from_str::<DefaultValue>(&json)?);
            }

            let field = engine.create_field(tenant, &owner.id, spec)?;
            Ok(formatter.format_message(&format!(
                "Created field {}.{} ({})",
                owner.name_singular,
                field.name,
                format_id(&field.id)
            )))
        }
        FieldCommand::Update {
            object,
            name,
            patch,
            label,
            rename,
        } => {
            let owner = require_object(engine, tenant, &object)?;
            let field = require_field(engine, tenant, &owner, &name)?;
            let mut patch: FieldPatch = match patch {
                Some(json) => serde_json::from_str(&json)?,
                None => FieldPatch::default(),
            };
            if label.is_some() {
                patch.label = label;
            }
            if rename.is_some() {
                patch.name = rename;
            }

            let updated = engine.update_field(tenant, &field.id, patch)?;
            Ok(formatter.format_message(&format!(
                "Updated field {}.{}",
                owner.name_singular, updated.name
            )))
        }
        FieldCommand::Delete { object, name } => {
            let owner = require_object(engine, tenant, &object)?;
            let field = require_field(engine, tenant, &owner, &name)?;
            engine.delete_field(tenant, &field.id)?;
            Ok(formatter.format_message(&format!(
                "Deleted field {}.{}",
                owner.name_singular, field.name
            )))
        }
        FieldCommand::List { object } => {
            let owner = require_object(engine, tenant, &object)?;
            Ok(formatter.format_fields(&engine.list_fields(tenant, &owner.id)?))
        }
    }
}

fn migrations(
    engine: &SchemaEngine,
    tenant: &TenantId,
    command: MigrationsCommand,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    match command {
        MigrationsCommand::List { status, archived } => {
            if archived {
                Ok(formatter.format_archived(&engine.list_archived_migrations(tenant)?))
            } else {
                let migrations = engine.list_migrations(tenant, status.map(Into::into))?;
                Ok(formatter.format_migrations(&migrations))
            }
        }
        MigrationsCommand::Run { all: false } => {
            let report = engine.run_pending_migrations(tenant)?;
            Ok(formatter.format_report(&report))
        }
        MigrationsCommand::Run { all: true } => {
            let results = engine.run_all_pending_migrations()?;
            if results.is_empty() {
                return Ok(formatter.format_message("No pending migrations"));
            }
            let output: Vec<String> = results
                .into_iter()
                .map(|(tenant, result)| match result {
                    Ok(report) => formatter.format_report(&report),
                    Err(e) => formatter.format_message(&format!("{tenant}: {e}")),
                })
                .collect();
            Ok(output.join("\n"))
        }
        MigrationsCommand::Retry { id } => {
            let migration = engine.retry_migration(tenant, &parse_migration_id(&id)?)?;
            Ok(formatter.format_message(&format!(
                "Migration #{} queued for retry",
                migration.sequence
            )))
        }
        MigrationsCommand::Skip { id } => {
            let archived = engine.skip_migration(tenant, &parse_migration_id(&id)?)?;
            Ok(formatter.format_message(&format!(
                "Migration #{} skipped",
                archived.migration.sequence
            )))
        }
        MigrationsCommand::Withdraw { id } => {
            let archived = engine.withdraw_migration(tenant, &parse_migration_id(&id)?)?;
            Ok(formatter.format_message(&format!(
                "Migration #{} withdrawn",
                archived.migration.sequence
            )))
        }
    }
}

fn require_object(
    engine: &SchemaEngine,
    tenant: &TenantId,
    name: &str,
) -> Result<ObjectMetadata, CliError> {
    engine
        .find_object_by_name(tenant, name)?
        .ok_or_else(|| CliError::NotFound(format!("object {name}")))
}

fn require_field(
    engine: &SchemaEngine,
    tenant: &TenantId,
    object: &ObjectMetadata,
    name: &str,
) -> Result<FieldMetadata, CliError> {
    engine
        .catalog()
        .find_field_by_name(tenant, &object.id, name)?
        .ok_or_else(|| CliError::NotFound(format!("field {}.{name}", object.name_singular)))
}

fn parse_migration_id(text: &str) -> Result<Id, CliError> {
    parse_id(text).ok_or_else(|| CliError::InvalidArgument(format!("migration id {text:?}")))
}

/// Build a field kind from a type name or a JSON definition.
fn parse_kind(
    text: &str,
    options: &[String],
    target: Option<Id>,
) -> Result<FieldKind, CliError> {
    let mut kind: FieldKind = if text.trim_start().starts_with('{') {
        serde_json::from_str(text)?
    } else if text.eq_ignore_ascii_case("RELATION") {
        let target_object_id = target.ok_or_else(|| {
            CliError::InvalidArgument("RELATION requires --target".to_string())
        })?;
        FieldKind::Relation { target_object_id }
    } else {
        let tag = text.to_ascii_uppercase().replace('-', "_");
        let json = if tag == "SELECT" || tag == "MULTI_SELECT" {
            serde_json::json!({ "type": tag, "options": [] })
        } else {
            serde_json::json!({ "type": tag })
        };
        serde_json::from_value(json)
            .map_err(|_| CliError::InvalidArgument(format!("unknown field type {text:?}")))?
    };

    if !options.is_empty() {
        let Some(current) = kind.options_mut() else {
            return Err(CliError::InvalidArgument(format!(
                "--options does not apply to {}",
                kind.type_name()
            )));
        };
        *current = options
            .iter()
            .enumerate()
            .map(|(position, value)| {
                let mut option = FieldOption::new(value.trim());
                option.position = position as u32;
                option
            })
            .collect();
    }
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatusArg;
    use crate::formatter::{create_formatter, OutputFormat};
    use schemaflow_core::{EngineConfig, MigrationStatus};

    fn engine() -> SchemaEngine {
        SchemaEngine::open(EngineConfig::temporary()).unwrap()
    }

    fn run(engine: &SchemaEngine, command: Command) -> Result<String, CliError> {
        let tenant = TenantId::new("acme").unwrap();
        let formatter = create_formatter(OutputFormat::Json);
        execute(engine, &tenant, command, &*formatter)
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("currency", &[], None).unwrap(), FieldKind::Currency);
        assert_eq!(parse_kind("full-name", &[], None).unwrap(), FieldKind::FullName);

        let kind = parse_kind("SELECT", &["Open".to_string(), "Won".to_string()], None).unwrap();
        let values: Vec<_> = kind.options().unwrap().iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["Open", "Won"]);

        let kind = parse_kind("RELATION", &[], Some([3u8; 16])).unwrap();
        assert_eq!(kind, FieldKind::Relation { target_object_id: [3u8; 16] });

        assert!(parse_kind("RELATION", &[], None).is_err());
        assert!(parse_kind("BLOB", &[], None).is_err());
        assert!(parse_kind("TEXT", &["A".to_string()], None).is_err());
    }

    #[test]
    fn test_object_and_field_commands() {
        let engine = engine();
        run(
            &engine,
            Command::Object(ObjectCommand::Create {
                name: "deal".to_string(),
                plural: None,
                label: None,
                description: None,
                fields: Some(r#"[{"name":"title","kind":{"type":"TEXT"}}]"#.to_string()),
            }),
        )
        .unwrap();
        run(
            &engine,
            Command::Field(FieldCommand::Create {
                object: "deal".to_string(),
                name: "amount".to_string(),
                kind: "CURRENCY".to_string(),
                options: vec![],
                target: None,
                default: None,
                label: Some("Amount".to_string()),
            }),
        )
        .unwrap();

        let output = run(
            &engine,
            Command::Field(FieldCommand::List {
                object: "deal".to_string(),
            }),
        )
        .unwrap();
        let fields: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(fields.as_array().unwrap().len(), 2);

        run(
            &engine,
            Command::Migrations(MigrationsCommand::Run { all: false }),
        )
        .unwrap();

        let output = run(
            &engine,
            Command::Migrations(MigrationsCommand::List {
                status: Some(StatusArg::Applied),
                archived: false,
            }),
        )
        .unwrap();
        let migrations: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(migrations.as_array().unwrap().len(), 2);

        let tenant = TenantId::new("acme").unwrap();
        assert!(engine
            .list_migrations(&tenant, Some(MigrationStatus::Pending))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_object() {
        let engine = engine();
        let err = run(
            &engine,
            Command::Object(ObjectCommand::Delete {
                name: "ghost".to_string(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::NotFound(_)));
    }

    #[test]
    fn test_bad_migration_id() {
        let engine = engine();
        let err = run(
            &engine,
            Command::Migrations(MigrationsCommand::Retry {
                id: "xyz".to_string(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }
}
