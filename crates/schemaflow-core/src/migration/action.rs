//! Physical table and column actions.

use super::column::ColumnSpec;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// What a [`TableAction`] does to its table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TableActionKind {
    /// Create the table with its system columns plus the listed columns.
    Create,
    /// Apply the listed column actions to an existing table.
    Alter,
    /// Drop the table.
    Drop,
}

impl std::fmt::Display for TableActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableActionKind::Create => write!(f, "create"),
            TableActionKind::Alter => write!(f, "alter"),
            TableActionKind::Drop => write!(f, "drop"),
        }
    }
}

/// A single column change.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ColumnAction {
    /// Add a column.
    Create {
        /// Column to add.
        column: ColumnSpec,
    },
    /// Change a column's type or default. The name never changes.
    Alter {
        /// Current definition.
        from: ColumnSpec,
        /// Target definition.
        to: ColumnSpec,
    },
    /// Drop a column.
    Drop {
        /// Column to drop.
        column: ColumnSpec,
    },
}

impl ColumnAction {
    /// Name of the affected column.
    pub fn column_name(&self) -> &str {
        match self {
            ColumnAction::Create { column } | ColumnAction::Drop { column } => &column.name,
            ColumnAction::Alter { to, .. } => &to.name,
        }
    }

    /// Execution rank within an alter: creates, then alters, then drops.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            ColumnAction::Create { .. } => 0,
            ColumnAction::Alter { .. } => 1,
            ColumnAction::Drop { .. } => 2,
        }
    }
}

/// One physical change to one table.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct TableAction {
    /// Physical table name.
    pub table_name: String,
    /// Action kind.
    pub kind: TableActionKind,
    /// Column changes, empty for drops.
    pub columns: Vec<ColumnAction>,
}

impl TableAction {
    /// Create a table with the given columns.
    pub fn create(table_name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            table_name: table_name.into(),
            kind: TableActionKind::Create,
            columns: columns
                .into_iter()
                .map(|column| ColumnAction::Create { column })
                .collect(),
        }
    }

    /// Alter a table.
    pub fn alter(table_name: impl Into<String>, columns: Vec<ColumnAction>) -> Self {
        Self {
            table_name: table_name.into(),
            kind: TableActionKind::Alter,
            columns,
        }
    }

    /// Drop a table.
    pub fn drop_table(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            kind: TableActionKind::Drop,
            columns: Vec::new(),
        }
    }

    /// Check if the action changes nothing.
    pub fn is_empty(&self) -> bool {
        self.kind == TableActionKind::Alter && self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::PhysicalType;

    #[test]
    fn test_empty_alter() {
        assert!(TableAction::alter("opportunity", vec![]).is_empty());
        assert!(!TableAction::create("opportunity", vec![]).is_empty());
        assert!(!TableAction::drop_table("opportunity").is_empty());
    }

    #[test]
    fn test_column_name() {
        let from = ColumnSpec::new("score", PhysicalType::Integer);
        let to = ColumnSpec::new("score", PhysicalType::Float);
        let action = ColumnAction::Alter { from, to };
        assert_eq!(action.column_name(), "score");
        assert_eq!(action.rank(), 1);
    }
}
