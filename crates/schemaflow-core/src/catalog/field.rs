//! Field metadata.

use super::object::is_identifier;
use super::tenant::TenantId;
use super::types::{id_hex, opt_id_hex, DefaultValue, FieldKind, FieldOption};
use crate::error::Error;
use crate::migration::{ColumnSpec, MigrationError};
use crate::storage::key::{current_timestamp, generate_id, Id};
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Mapping from one logical sub-field to its physical column.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct TargetColumn {
    /// Logical sub-field name (`value` for scalar kinds).
    pub sub_field: String,
    /// Physical column.
    pub column: ColumnSpec,
}

impl TargetColumn {
    /// Create a target column entry.
    pub fn new(sub_field: impl Into<String>, column: ColumnSpec) -> Self {
        Self {
            sub_field: sub_field.into(),
            column,
        }
    }
}

/// A field defined on an object.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct FieldMetadata {
    /// Stable id.
    #[serde(with = "id_hex")]
    pub id: Id,
    /// Owning object.
    #[serde(with = "id_hex")]
    pub object_id: Id,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Logical name, unique within the object.
    pub name: String,
    /// Display label.
    pub label: String,
    /// Description.
    pub description: Option<String>,
    /// Icon name.
    pub icon: Option<String>,
    /// Abstract type with its configuration.
    pub kind: FieldKind,
    /// Default value.
    pub default_value: Option<DefaultValue>,
    /// Ordered sub-field to physical column mapping.
    pub target_column_map: Vec<TargetColumn>,
    /// Whether the field was defined by the tenant.
    pub is_custom: bool,
    /// Whether the field is active.
    pub is_active: bool,
    /// Whether the field accepts null values.
    pub is_nullable: bool,
    /// Creation time (microseconds since epoch).
    pub created_at: u64,
    /// Last update time (microseconds since epoch).
    pub updated_at: u64,
}

impl FieldMetadata {
    /// Physical columns of this field, in target-column-map order.
    pub fn columns(&self) -> Vec<ColumnSpec> {
        self.target_column_map
            .iter()
            .map(|t| t.column.clone())
            .collect()
    }

    /// Look up the target column of a sub-field.
    pub fn target_column(&self, sub_field: &str) -> Option<&TargetColumn> {
        self.target_column_map
            .iter()
            .find(|t| t.sub_field == sub_field)
    }

    /// Produce the updated record described by `patch`.
    ///
    /// Does not touch the target column map; the caller recomputes it when
    /// the patch is physically significant.
    pub fn apply_patch(&self, patch: &FieldPatch) -> Result<FieldMetadata, MigrationError> {
        patch.validate()?;

        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.clone();
        }
        if let Some(label) = &patch.label {
            next.label = label.clone();
        }
        if let Some(description) = &patch.description {
            next.description = Some(description.clone());
        }
        if let Some(icon) = &patch.icon {
            next.icon = Some(icon.clone());
        }
        if let Some(is_active) = patch.is_active {
            next.is_active = is_active;
        }
        if let Some(kind) = &patch.kind {
            next.kind = kind.clone();
            assign_option_ids(&mut next.kind);
        }
        if let Some(options) = &patch.options {
            let Some(current) = next.kind.options_mut() else {
                return Err(MigrationError::Validation {
                    message: format!(
                        "field {} of type {} does not take options",
                        self.name, next.kind
                    ),
                });
            };
            *current = options.iter().map(FieldOptionPatch::to_option).collect();
        }
        if patch.clear_default {
            next.default_value = None;
        } else if let Some(default) = &patch.default_value {
            next.default_value = Some(default.clone());
        }
        next.updated_at = current_timestamp();
        Ok(next)
    }

    /// Serialize the field to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a field from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Give every option without an id a fresh one.
pub(crate) fn assign_option_ids(kind: &mut FieldKind) {
    if let Some(options) = kind.options_mut() {
        for option in options.iter_mut() {
            if option.id == [0u8; 16] {
                option.id = generate_id();
            }
        }
    }
}

/// Input for creating a field.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct FieldSpec {
    /// Logical name.
    pub name: String,
    /// Display label. Defaults to the name.
    #[serde(default)]
    pub label: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Icon name.
    #[serde(default)]
    pub icon: Option<String>,
    /// Abstract type.
    pub kind: FieldKind,
    /// Default value.
    #[serde(default)]
    pub default_value: Option<DefaultValue>,
}

impl FieldSpec {
    /// Create a field spec.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: None,
            description: None,
            icon: None,
            kind,
            default_value: None,
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default_value = Some(default);
        self
    }

    /// Check the field name.
    pub fn validate(&self) -> Result<(), MigrationError> {
        validate_field_name(&self.name)
    }

    /// Build the metadata record. Option ids are always regenerated.
    pub fn into_metadata(
        self,
        tenant_id: TenantId,
        object_id: Id,
        target_column_map: Vec<TargetColumn>,
    ) -> FieldMetadata {
        let mut kind = self.kind;
        if let Some(options) = kind.options_mut() {
            for option in options.iter_mut() {
                option.id = generate_id();
            }
        }
        let now = current_timestamp();
        FieldMetadata {
            id: generate_id(),
            object_id,
            tenant_id,
            label: self.label.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            description: self.description,
            icon: self.icon,
            kind,
            default_value: self.default_value,
            target_column_map,
            is_custom: true,
            is_active: true,
            is_nullable: true,
            created_at: now,
            updated_at: now,
        }
    }
}

fn validate_field_name(name: &str) -> Result<(), MigrationError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(MigrationError::Validation {
            message: format!(
                "field name {name:?} must start with a letter and contain only letters and digits"
            ),
        })
    }
}

/// Option entry of an update patch. The id is mandatory.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct FieldOptionPatch {
    /// Stable option id. Must be present.
    #[serde(default, with = "opt_id_hex")]
    pub id: Option<Id>,
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

impl FieldOptionPatch {
    /// Patch entry for an option with a known id.
    pub fn new(id: Id, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            id: Some(id),
            label: value.clone(),
            value,
            color: None,
            position: 0,
        }
    }

    fn to_option(&self) -> FieldOption {
        FieldOption {
            id: self.id.unwrap_or_default(),
            value: self.value.clone(),
            label: self.label.clone(),
            color: self.color.clone(),
            position: self.position,
        }
    }
}

impl From<&FieldOption> for FieldOptionPatch {
    fn from(option: &FieldOption) -> Self {
        Self {
            id: Some(option.id),
            value: option.value.clone(),
            label: option.label.clone(),
            color: option.color.clone(),
            position: option.position,
        }
    }
}

/// Partial update of a field.
#[derive(Debug, Clone, Default, PartialEq, SerdeSerialize, SerdeDeserialize)]
#[serde(default)]
pub struct FieldPatch {
    /// New logical name. Physical column names are kept.
    pub name: Option<String>,
    /// New label.
    pub label: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New icon.
    pub icon: Option<String>,
    /// New active flag.
    pub is_active: Option<bool>,
    /// New abstract type.
    pub kind: Option<FieldKind>,
    /// Replacement option list for select kinds.
    pub options: Option<Vec<FieldOptionPatch>>,
    /// New default value.
    pub default_value: Option<DefaultValue>,
    /// Remove the default value.
    pub clear_default: bool,
}

impl FieldPatch {
    /// Check that the patch is well formed.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if let Some(name) = &self.name {
            validate_field_name(name)?;
        }
        if let Some(options) = &self.options {
            if options.iter().any(|o| o.id.is_none()) {
                return Err(MigrationError::Validation {
                    message: "option id is required".to_string(),
                });
            }
        }
        if self.clear_default && self.default_value.is_some() {
            return Err(MigrationError::Validation {
                message: "cannot set and clear the default value at once".to_string(),
            });
        }
        Ok(())
    }

    /// Whether the patch can change the physical representation.
    ///
    /// Only the type and the default value reach the column definitions.
    pub fn is_physically_significant(&self) -> bool {
        self.kind.is_some() || self.default_value.is_some() || self.clear_default
    }
}
