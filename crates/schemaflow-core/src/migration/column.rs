//! Physical column specifications.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;

/// Physical storage type of a column.
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
pub enum PhysicalType {
    /// Variable-length text.
    Text,
    /// 64-bit integer.
    Integer,
    /// Double precision float.
    Float,
    /// Boolean.
    Boolean,
    /// Calendar date.
    Date,
    /// Timestamp with time zone.
    Timestamp,
    /// UUID.
    Uuid,
    /// Array of text values.
    TextArray,
}

impl PhysicalType {
    /// Check whether values of `self` convert to `target` without loss.
    ///
    /// Identical types are always convertible.
    pub fn converts_losslessly_to(self, target: PhysicalType) -> bool {
        use PhysicalType::*;
        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (Integer, Float)
                | (Integer, Text)
                | (Float, Text)
                | (Boolean, Text)
                | (Boolean, Integer)
                | (Uuid, Text)
                | (Date, Text)
                | (Date, Timestamp)
                | (Timestamp, Text)
        )
    }
}

impl fmt::Display for PhysicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhysicalType::Text => "text",
            PhysicalType::Integer => "integer",
            PhysicalType::Float => "float",
            PhysicalType::Boolean => "boolean",
            PhysicalType::Date => "date",
            PhysicalType::Timestamp => "timestamp",
            PhysicalType::Uuid => "uuid",
            PhysicalType::TextArray => "text[]",
        };
        f.write_str(name)
    }
}

/// Column-level default expression.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    /// Text literal.
    Text(String),
    /// Integer literal.
    Integer(i64),
    /// Float literal.
    Float(f64),
    /// Boolean literal.
    Boolean(bool),
    /// Text array literal.
    TextArray(Vec<String>),
    /// Current timestamp at insert time.
    CurrentTimestamp,
}

/// Physical column specification.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct ColumnSpec {
    /// Physical column name.
    pub name: String,
    /// Physical type.
    pub physical_type: PhysicalType,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Column default.
    pub default: Option<ColumnDefault>,
}

impl ColumnSpec {
    /// Create a nullable column without default.
    pub fn new(name: impl Into<String>, physical_type: PhysicalType) -> Self {
        Self {
            name: name.into(),
            physical_type,
            nullable: true,
            default: None,
        }
    }

    /// Set the default.
    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lossless_conversions() {
        assert!(PhysicalType::Integer.converts_losslessly_to(PhysicalType::Float));
        assert!(PhysicalType::Float.converts_losslessly_to(PhysicalType::Text));
        assert!(PhysicalType::Date.converts_losslessly_to(PhysicalType::Timestamp));
        assert!(PhysicalType::Text.converts_losslessly_to(PhysicalType::Text));

        assert!(!PhysicalType::Text.converts_losslessly_to(PhysicalType::Float));
        assert!(!PhysicalType::Float.converts_losslessly_to(PhysicalType::Integer));
        assert!(!PhysicalType::Timestamp.converts_losslessly_to(PhysicalType::Date));
        assert!(!PhysicalType::TextArray.converts_losslessly_to(PhysicalType::Text));
    }

    #[test]
    fn test_column_builder() {
        let column = ColumnSpec::new("amountMicros", PhysicalType::Integer)
            .with_default(ColumnDefault::Integer(0))
            .not_null();

        assert_eq!(column.name, "amountMicros");
        assert!(!column.nullable);
        assert_eq!(column.default, Some(ColumnDefault::Integer(0)));
    }
}
