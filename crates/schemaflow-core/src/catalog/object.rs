//! Object metadata.

use super::tenant::TenantId;
use super::types::id_hex;
use crate::error::Error;
use crate::migration::MigrationError;
use crate::storage::key::{current_timestamp, generate_id, Id};
use heck::ToLowerCamelCase;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// A tenant-scoped logical entity backed by one physical table.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct ObjectMetadata {
    /// Stable id.
    #[serde(with = "id_hex")]
    pub id: Id,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Logical singular name, unique within the tenant.
    pub name_singular: String,
    /// Logical plural name.
    pub name_plural: String,
    /// Display label.
    pub label: String,
    /// Description.
    pub description: Option<String>,
    /// Physical table name. Never changes after creation.
    pub target_table_name: String,
    /// Whether the object was defined by the tenant.
    pub is_custom: bool,
    /// Whether the object is active.
    pub is_active: bool,
    /// Creation time (microseconds since epoch).
    pub created_at: u64,
    /// Last update time (microseconds since epoch).
    pub updated_at: u64,
}

impl ObjectMetadata {
    /// Serialize the object to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize an object from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Input for creating an object.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct ObjectSpec {
    /// Logical singular name.
    pub name_singular: String,
    /// Logical plural name. Defaults to the singular name with an `s`.
    #[serde(default)]
    pub name_plural: Option<String>,
    /// Display label. Defaults to the singular name.
    #[serde(default)]
    pub label: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
}

impl ObjectSpec {
    /// Create an object spec.
    pub fn new(name_singular: impl Into<String>) -> Self {
        Self {
            name_singular: name_singular.into(),
            name_plural: None,
            label: None,
            description: None,
        }
    }

    /// Set the plural name.
    pub fn with_plural(mut self, name_plural: impl Into<String>) -> Self {
        self.name_plural = Some(name_plural.into());
        self
    }

    /// Check the names.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if !is_identifier(&self.name_singular) {
            return Err(MigrationError::Validation {
                message: format!(
                    "object name {:?} must start with a letter and contain only letters and digits",
                    self.name_singular
                ),
            });
        }
        Ok(())
    }

    /// Physical table name derived from the singular name.
    pub fn table_name(&self) -> String {
        self.name_singular.to_lower_camel_case()
    }

    /// Build the metadata record.
    pub fn into_metadata(self, tenant_id: TenantId) -> ObjectMetadata {
        let now = current_timestamp();
        ObjectMetadata {
            id: generate_id(),
            tenant_id,
            target_table_name: self.table_name(),
            name_plural: self
                .name_plural
                .unwrap_or_else(|| format!("{}s", self.name_singular)),
            label: self.label.unwrap_or_else(|| self.name_singular.clone()),
            name_singular: self.name_singular,
            description: self.description,
            is_custom: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Check that a logical name can be turned into a physical identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric())
}
