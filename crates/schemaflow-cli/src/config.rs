//! Command-line arguments.

use crate::formatter::OutputFormat;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use schemaflow_core::{EngineConfig, MigrationStatus};
use std::path::PathBuf;
use std::time::Duration;

/// Default metadata directory.
pub const DEFAULT_DATA_PATH: &str = "./schemaflow_data";

/// Default SQLite busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Default worker polling interval in milliseconds.
pub const DEFAULT_WORKER_INTERVAL_MS: u64 = 1000;

/// SchemaFlow command-line interface.
#[derive(Parser, Debug)]
#[command(name = "schemaflow")]
#[command(version, about = "Metadata-driven schema migrations for multi-tenant workspaces")]
pub struct Args {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Tenant (workspace) to operate on.
    #[arg(short, long, default_value = "default", global = true)]
    pub tenant: String,

    /// Output format.
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Engine options shared by every command.
#[derive(ClapArgs, Debug, Clone)]
pub struct EngineArgs {
    /// Path to the metadata directory.
    #[arg(short, long, default_value = DEFAULT_DATA_PATH, global = true)]
    pub data_path: PathBuf,

    /// Directory of the per-tenant SQLite workspaces (defaults to <data-path>/workspaces).
    #[arg(long, global = true)]
    pub workspace_path: Option<PathBuf>,

    /// SQLite busy timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_BUSY_TIMEOUT_MS, global = true)]
    pub busy_timeout_ms: u64,

    /// Apply migrations right after each metadata change.
    #[arg(long, global = true)]
    pub drain_on_write: bool,
}

impl EngineArgs {
    /// Convert command-line arguments to engine configuration.
    pub fn into_config(self) -> EngineConfig {
        let mut config = EngineConfig::new(self.data_path)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .with_drain_on_write(self.drain_on_write);
        if let Some(path) = self.workspace_path {
            config = config.with_workspace_path(path);
        }
        config
    }
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage objects.
    #[command(subcommand)]
    Object(ObjectCommand),
    /// Manage fields.
    #[command(subcommand)]
    Field(FieldCommand),
    /// Inspect and control the migration queue.
    #[command(subcommand)]
    Migrations(MigrationsCommand),
    /// Apply pending migrations of every tenant until interrupted.
    Worker {
        /// Polling interval in milliseconds.
        #[arg(long, default_value_t = DEFAULT_WORKER_INTERVAL_MS)]
        interval_ms: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum ObjectCommand {
    /// Create an object and its table.
    Create {
        /// Singular name.
        name: String,
        /// Plural name.
        #[arg(long)]
        plural: Option<String>,
        /// Display label.
        #[arg(long)]
        label: Option<String>,
        /// Description.
        #[arg(long)]
        description: Option<String>,
        /// Initial fields as a JSON array of field specs.
        #[arg(long)]
        fields: Option<String>,
    },
    /// Delete an object and its table.
    Delete {
        /// Object name.
        name: String,
    },
    /// List objects.
    List,
}

#[derive(Subcommand, Debug)]
pub enum FieldCommand {
    /// Create a field.
    Create {
        /// Object name.
        object: String,
        /// Field name.
        name: String,
        /// Field type: a type name such as CURRENCY, or a JSON type definition.
        #[arg(long = "type")]
        kind: String,
        /// Comma-separated options for SELECT and MULTI_SELECT.
        #[arg(long, value_delimiter = ',')]
        options: Vec<String>,
        /// Target object name for RELATION.
        #[arg(long)]
        target: Option<String>,
        /// Default value as JSON, e.g. '{"text":"Open"}'.
        #[arg(long)]
        default: Option<String>,
        /// Display label.
        #[arg(long)]
        label: Option<String>,
    },
    /// Update a field.
    Update {
        /// Object name.
        object: String,
        /// Field name.
        name: String,
        /// Patch as JSON.
        #[arg(long)]
        patch: Option<String>,
        /// New display label.
        #[arg(long)]
        label: Option<String>,
        /// New name.
        #[arg(long)]
        rename: Option<String>,
    },
    /// Delete a field.
    Delete {
        /// Object name.
        object: String,
        /// Field name.
        name: String,
    },
    /// List the fields of an object.
    List {
        /// Object name.
        object: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum MigrationsCommand {
    /// List migrations.
    List {
        /// Only migrations with this status.
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// List skipped and withdrawn migrations instead.
        #[arg(long)]
        archived: bool,
    },
    /// Apply pending migrations.
    Run {
        /// Drain every tenant instead of the selected one.
        #[arg(long)]
        all: bool,
    },
    /// Put a failed migration back into the queue.
    Retry {
        /// Migration id (hex).
        id: String,
    },
    /// Archive a failed migration.
    Skip {
        /// Migration id (hex).
        id: String,
    },
    /// Archive a pending migration.
    Withdraw {
        /// Migration id (hex).
        id: String,
    },
}

/// Migration status filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Pending,
    Applied,
    Failed,
}

impl From<StatusArg> for MigrationStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Pending => MigrationStatus::Pending,
            StatusArg::Applied => MigrationStatus::Applied,
            StatusArg::Failed => MigrationStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["schemaflow", "object", "list"]);
        assert_eq!(args.tenant, "default");
        assert_eq!(args.format, OutputFormat::Table);

        let config = args.engine.into_config();
        assert_eq!(config.data_path, PathBuf::from(DEFAULT_DATA_PATH));
        assert_eq!(
            config.workspace_path,
            Some(PathBuf::from(DEFAULT_DATA_PATH).join("workspaces"))
        );
        assert_eq!(config.busy_timeout, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));
        assert!(!config.drain_on_write);
    }

    #[test]
    fn test_engine_options() {
        let args = Args::parse_from([
            "schemaflow",
            "--data-path",
            "/var/lib/schemaflow",
            "--workspace-path",
            "/srv/workspaces",
            "--busy-timeout-ms",
            "250",
            "--drain-on-write",
            "migrations",
            "run",
        ]);
        let config = args.engine.into_config();
        assert_eq!(config.data_path, PathBuf::from("/var/lib/schemaflow"));
        assert_eq!(config.workspace_path, Some(PathBuf::from("/srv/workspaces")));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(config.drain_on_write);
    }

    #[test]
    fn test_field_create_options() {
        let args = Args::parse_from([
            "schemaflow",
            "field",
            "create",
            "deal",
            "stage",
            "--type",
            "SELECT",
            "--options",
            "Open,Won,Lost",
            "--tenant",
            "acme",
        ]);
        assert_eq!(args.tenant, "acme");
        match args.command {
            Command::Field(FieldCommand::Create { kind, options, .. }) => {
                assert_eq!(kind, "SELECT");
                assert_eq!(options, vec!["Open", "Won", "Lost"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
