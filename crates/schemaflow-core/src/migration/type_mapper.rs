//! Abstract field type to physical column mapping.
//!
//! Pure functions only. The set and order of columns generated for a kind is
//! part of that kind's contract: changing it changes the schema of every
//! tenant that already uses the kind.

use super::column::{ColumnDefault, ColumnSpec, PhysicalType};
use super::error::MigrationError;
use crate::catalog::{DefaultValue, FieldKind, FieldOption, TargetColumn};
use std::collections::HashSet;

/// Sub-field name used by every single-column kind except relations.
pub const VALUE_SUB_FIELD: &str = "value";

/// Map a field to its physical columns.
pub fn map_type(
    name: &str,
    kind: &FieldKind,
    default: Option<&DefaultValue>,
) -> Result<Vec<ColumnSpec>, MigrationError> {
    Ok(map_target_columns(name, kind, default)?
        .into_iter()
        .map(|t| t.column)
        .collect())
}

/// Map a field to its ordered target column map.
pub fn map_target_columns(
    name: &str,
    kind: &FieldKind,
    default: Option<&DefaultValue>,
) -> Result<Vec<TargetColumn>, MigrationError> {
    if name.is_empty() {
        return Err(unsupported(kind, "field name cannot be empty"));
    }

    let columns = match kind {
        FieldKind::Text | FieldKind::Email | FieldKind::Phone => {
            scalar(name, PhysicalType::Text, text_default(kind, default)?)
        }
        FieldKind::Number | FieldKind::Probability => {
            scalar(name, PhysicalType::Float, number_default(kind, default)?)
        }
        FieldKind::Boolean => scalar(name, PhysicalType::Boolean, boolean_default(kind, default)?),
        FieldKind::Date => scalar(name, PhysicalType::Date, now_default(kind, default)?),
        FieldKind::DateTime => scalar(name, PhysicalType::Timestamp, now_default(kind, default)?),
        FieldKind::Uuid => {
            no_default(kind, default)?;
            scalar(name, PhysicalType::Uuid, None)
        }
        FieldKind::Select { options } => {
            check_options(kind, options)?;
            scalar(name, PhysicalType::Text, select_default(kind, options, default)?)
        }
        FieldKind::MultiSelect { options } => {
            check_options(kind, options)?;
            scalar(
                name,
                PhysicalType::TextArray,
                multi_select_default(kind, options, default)?,
            )
        }
        FieldKind::Relation { .. } => {
            no_default(kind, default)?;
            vec![TargetColumn::new(
                "foreignKey",
                ColumnSpec::new(format!("{name}Id"), PhysicalType::Uuid),
            )]
        }
        FieldKind::Currency => {
            let (amount, code) = match default {
                None => (None, None),
                Some(DefaultValue::Currency {
                    amount_micros,
                    currency_code,
                }) => (
                    Some(ColumnDefault::Integer(*amount_micros)),
                    Some(ColumnDefault::Text(currency_code.clone())),
                ),
                Some(other) => return Err(mismatched_default(kind, other)),
            };
            vec![
                sub_column("amountMicros", format!("{name}Micros"), PhysicalType::Integer, amount),
                sub_column(
                    "currencyCode",
                    format!("{name}CurrencyCode"),
                    PhysicalType::Text,
                    code,
                ),
            ]
        }
        FieldKind::FullName => {
            let (first, last) = match default {
                None => (None, None),
                Some(DefaultValue::FullName {
                    first_name,
                    last_name,
                }) => (
                    Some(ColumnDefault::Text(first_name.clone())),
                    Some(ColumnDefault::Text(last_name.clone())),
                ),
                Some(other) => return Err(mismatched_default(kind, other)),
            };
            vec![
                sub_column("firstName", format!("{name}FirstName"), PhysicalType::Text, first),
                sub_column("lastName", format!("{name}LastName"), PhysicalType::Text, last),
            ]
        }
        FieldKind::Link => {
            let (label, url) = match default {
                None => (None, None),
                Some(DefaultValue::Link { label, url }) => (
                    Some(ColumnDefault::Text(label.clone())),
                    Some(ColumnDefault::Text(url.clone())),
                ),
                Some(other) => return Err(mismatched_default(kind, other)),
            };
            vec![
                sub_column("label", format!("{name}Label"), PhysicalType::Text, label),
                sub_column("url", format!("{name}Url"), PhysicalType::Text, url),
            ]
        }
        FieldKind::Address => {
            no_default(kind, default)?;
            const TEXT_PARTS: [(&str, &str); 6] = [
                ("street1", "Street1"),
                ("street2", "Street2"),
                ("city", "City"),
                ("state", "State"),
                ("postcode", "Postcode"),
                ("country", "Country"),
            ];
            let mut columns: Vec<TargetColumn> = TEXT_PARTS
                .iter()
                .map(|(sub, suffix)| {
                    sub_column(sub, format!("{name}Address{suffix}"), PhysicalType::Text, None)
                })
                .collect();
            columns.push(sub_column(
                "lat",
                format!("{name}AddressLat"),
                PhysicalType::Float,
                None,
            ));
            columns.push(sub_column(
                "lng",
                format!("{name}AddressLng"),
                PhysicalType::Float,
                None,
            ));
            columns
        }
    };

    Ok(columns)
}

fn scalar(
    name: &str,
    physical_type: PhysicalType,
    default: Option<ColumnDefault>,
) -> Vec<TargetColumn> {
    vec![sub_column(VALUE_SUB_FIELD, name.to_string(), physical_type, default)]
}

fn sub_column(
    sub_field: &str,
    column: String,
    physical_type: PhysicalType,
    default: Option<ColumnDefault>,
) -> TargetColumn {
    let mut spec = ColumnSpec::new(column, physical_type);
    spec.default = default;
    TargetColumn::new(sub_field, spec)
}

fn unsupported(kind: &FieldKind, reason: impl Into<String>) -> MigrationError {
    MigrationError::UnsupportedType {
        kind: kind.type_name().to_string(),
        reason: reason.into(),
    }
}

fn mismatched_default(kind: &FieldKind, default: &DefaultValue) -> MigrationError {
    unsupported(kind, format!("default value {default:?} does not match the type"))
}

fn no_default(kind: &FieldKind, default: Option<&DefaultValue>) -> Result<(), MigrationError> {
    match default {
        None => Ok(()),
        Some(_) => Err(unsupported(kind, "type does not accept a default value")),
    }
}

fn text_default(
    kind: &FieldKind,
    default: Option<&DefaultValue>,
) -> Result<Option<ColumnDefault>, MigrationError> {
    match default {
        None => Ok(None),
        Some(DefaultValue::Text(text)) => Ok(Some(ColumnDefault::Text(text.clone()))),
        Some(other) => Err(mismatched_default(kind, other)),
    }
}

fn number_default(
    kind: &FieldKind,
    default: Option<&DefaultValue>,
) -> Result<Option<ColumnDefault>, MigrationError> {
    match default {
        None => Ok(None),
        Some(DefaultValue::Number(n)) if n.is_finite() => {
            if matches!(kind, FieldKind::Probability) && !(0.0..=1.0).contains(n) {
                return Err(unsupported(kind, "probability default must be within [0, 1]"));
            }
            Ok(Some(ColumnDefault::Float(*n)))
        }
        Some(other) => Err(mismatched_default(kind, other)),
    }
}

fn boolean_default(
    kind: &FieldKind,
    default: Option<&DefaultValue>,
) -> Result<Option<ColumnDefault>, MigrationError> {
    match default {
        None => Ok(None),
        Some(DefaultValue::Boolean(b)) => Ok(Some(ColumnDefault::Boolean(*b))),
        Some(other) => Err(mismatched_default(kind, other)),
    }
}

fn now_default(
    kind: &FieldKind,
    default: Option<&DefaultValue>,
) -> Result<Option<ColumnDefault>, MigrationError> {
    match default {
        None => Ok(None),
        Some(DefaultValue::Now) => Ok(Some(ColumnDefault::CurrentTimestamp)),
        Some(other) => Err(mismatched_default(kind, other)),
    }
}

fn check_options(kind: &FieldKind, options: &[FieldOption]) -> Result<(), MigrationError> {
    if options.is_empty() {
        return Err(unsupported(kind, "at least one option is required"));
    }
    let mut seen = HashSet::new();
    for option in options {
        if option.value.is_empty() {
            return Err(unsupported(kind, "option values cannot be empty"));
        }
        if !seen.insert(option.value.as_str()) {
            return Err(unsupported(
                kind,
                format!("duplicate option value {:?}", option.value),
            ));
        }
    }
    Ok(())
}

fn select_default(
    kind: &FieldKind,
    options: &[FieldOption],
    default: Option<&DefaultValue>,
) -> Result<Option<ColumnDefault>, MigrationError> {
    match default {
        None => Ok(None),
        Some(DefaultValue::Text(value)) => {
            ensure_option(kind, options, value)?;
            Ok(Some(ColumnDefault::Text(value.clone())))
        }
        Some(other) => Err(mismatched_default(kind, other)),
    }
}

fn multi_select_default(
    kind: &FieldKind,
    options: &[FieldOption],
    default: Option<&DefaultValue>,
) -> Result<Option<ColumnDefault>, MigrationError> {
    match default {
        None => Ok(None),
        Some(DefaultValue::TextList(values)) => {
            for value in values {
                ensure_option(kind, options, value)?;
            }
            Ok(Some(ColumnDefault::TextArray(values.clone())))
        }
        Some(other) => Err(mismatched_default(kind, other)),
    }
}

fn ensure_option(
    kind: &FieldKind,
    options: &[FieldOption],
    value: &str,
) -> Result<(), MigrationError> {
    if options.iter().any(|o| o.value == value) {
        Ok(())
    } else {
        Err(unsupported(
            kind,
            format!("default {value:?} is not one of the options"),
        ))
    }
}
