//! Metadata catalog for SchemaFlow.
//!
//! The catalog stores the objects and fields each tenant defines at runtime.

mod catalog;
mod field;
mod object;
mod tenant;
pub(crate) mod types;

pub use catalog::MetadataCatalog;
pub use field::{FieldMetadata, FieldOptionPatch, FieldPatch, FieldSpec, TargetColumn};
pub use object::{ObjectMetadata, ObjectSpec};
pub use tenant::{TenantId, MAX_TENANT_ID_LEN};
pub use types::{DefaultValue, FieldKind, FieldOption};
