//! Tenant (workspace) identifiers.

use crate::migration::MigrationError;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;

/// Maximum tenant id length in bytes.
pub const MAX_TENANT_ID_LEN: usize = 63;

/// Identifier of an isolated tenant workspace.
///
/// Tenant ids appear verbatim in storage keys, physical schema names and file
/// names, so they are restricted to lowercase ASCII letters, digits and `_`.
/// Two distinct ids never share a workspace.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Create a validated tenant id.
    pub fn new(id: impl Into<String>) -> Result<Self, MigrationError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_TENANT_ID_LEN {
            return Err(MigrationError::Validation {
                message: format!(
                    "tenant id must be 1 to {} bytes, got {}",
                    MAX_TENANT_ID_LEN,
                    id.len()
                ),
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(MigrationError::Validation {
                message: format!(
                    "tenant id {id:?} may only contain lowercase letters, digits and '_'"
                ),
            });
        }
        Ok(Self(id))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Suffix of the physical schema and workspace file names.
    pub fn schema_suffix(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl std::str::FromStr for TenantId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
