//! Abstract field kinds and their per-kind configuration.

use crate::storage::key::Id;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;

/// Serde helper encoding [`Id`] values as hex strings.
pub mod id_hex {
    use crate::storage::key::{format_id, parse_id, Id};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize an id as hex.
    pub fn serialize<S: Serializer>(id: &Id, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_id(id))
    }

    /// Deserialize an id from hex or hyphenated UUID form.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Id, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_id(&text).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {text}")))
    }
}

/// Serde helper for optional hex ids.
pub mod opt_id_hex {
    use crate::storage::key::{format_id, parse_id, Id};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize an optional id as hex.
    pub fn serialize<S: Serializer>(id: &Option<Id>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_some(&format_id(id)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional id.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Id>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => parse_id(&text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid id: {text}"))),
            None => Ok(None),
        }
    }
}

/// One option of a select or multi-select field.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct FieldOption {
    /// Stable option id. Assigned by the catalog on field creation.
    #[serde(default, with = "id_hex")]
    pub id: Id,
    /// Stored value.
    pub value: String,
    /// Display label.
    pub label: String,
    /// Display color.
    #[serde(default)]
    pub color: Option<String>,
    /// Display position.
    #[serde(default)]
    pub position: u32,
}

impl FieldOption {
    /// Create an option whose label equals its value.
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            id: [0u8; 16],
            label: value.clone(),
            value,
            color: None,
            position: 0,
        }
    }
}

/// Abstract field type, carrying its own configuration.
///
/// The set is closed: adding a kind means adding a match arm to the type
/// mapper, which the compiler enforces.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    /// Free text.
    Text,
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// Floating point number.
    Number,
    /// Probability in `[0, 1]`.
    Probability,
    /// Boolean flag.
    Boolean,
    /// Calendar date.
    Date,
    /// Timestamp with time zone.
    DateTime,
    /// Opaque UUID.
    Uuid,
    /// Single choice among options.
    Select {
        /// Allowed options.
        options: Vec<FieldOption>,
    },
    /// Multiple choices among options.
    MultiSelect {
        /// Allowed options.
        options: Vec<FieldOption>,
    },
    /// Many-to-one relation to another object.
    Relation {
        /// Object the relation points to.
        #[serde(with = "id_hex")]
        target_object_id: Id,
    },
    /// Amount in micros plus ISO currency code.
    Currency,
    /// First and last name.
    FullName,
    /// Label and URL.
    Link,
    /// Postal address with coordinates.
    Address,
}

impl FieldKind {
    /// Create a select kind from option values.
    pub fn select<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldKind::Select {
            options: values.into_iter().map(FieldOption::new).collect(),
        }
    }

    /// Stable upper-case name of the kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text => "TEXT",
            FieldKind::Email => "EMAIL",
            FieldKind::Phone => "PHONE",
            FieldKind::Number => "NUMBER",
            FieldKind::Probability => "PROBABILITY",
            FieldKind::Boolean => "BOOLEAN",
            FieldKind::Date => "DATE",
            FieldKind::DateTime => "DATE_TIME",
            FieldKind::Uuid => "UUID",
            FieldKind::Select { .. } => "SELECT",
            FieldKind::MultiSelect { .. } => "MULTI_SELECT",
            FieldKind::Relation { .. } => "RELATION",
            FieldKind::Currency => "CURRENCY",
            FieldKind::FullName => "FULL_NAME",
            FieldKind::Link => "LINK",
            FieldKind::Address => "ADDRESS",
        }
    }

    /// Options of a select kind.
    pub fn options(&self) -> Option<&[FieldOption]> {
        match self {
            FieldKind::Select { options } | FieldKind::MultiSelect { options } => Some(options),
            _ => None,
        }
    }

    /// Mutable options of a select kind.
    pub fn options_mut(&mut self) -> Option<&mut Vec<FieldOption>> {
        match self {
            FieldKind::Select { options } | FieldKind::MultiSelect { options } => Some(options),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Default value of a field.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Text, email, phone or select value.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
    /// Multi-select values.
    TextList(Vec<String>),
    /// Current timestamp at insert time.
    Now,
    /// Currency amount.
    Currency {
        /// Amount in micros.
        amount_micros: i64,
        /// ISO 4217 code.
        currency_code: String,
    },
    /// Full name.
    FullName {
        /// First name.
        first_name: String,
        /// Last name.
        last_name: String,
    },
    /// Link.
    Link {
        /// Link label.
        label: String,
        /// Link target.
        url: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_json_shape() {
        let kind: FieldKind = serde_json::from_str(r#"{"type":"CURRENCY"}"#).unwrap();
        assert_eq!(kind, FieldKind::Currency);

        let kind: FieldKind = serde_json::from_str(
            r#"{"type":"SELECT","options":[{"value":"OPEN","label":"Open"}]}"#,
        )
        .unwrap();
        let options = kind.options().unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].id, [0u8; 16]);
        assert_eq!(options[0].label, "Open");
    }

    #[test]
    fn test_default_value_json() {
        let value: DefaultValue =
            serde_json::from_str(r#"{"currency":{"amount_micros":0,"currency_code":"USD"}}"#)
                .unwrap();
        assert_eq!(
            value,
            DefaultValue::Currency {
                amount_micros: 0,
                currency_code: "USD".into()
            }
        );
        let now: DefaultValue = serde_json::from_str(r#""now""#).unwrap();
        assert_eq!(now, DefaultValue::Now);
    }
}
