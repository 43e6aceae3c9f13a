//! Key encoding for the metadata and migration trees.
//!
//! Every key starts with a one-byte record tag followed by the tenant id and a
//! `0x00` separator, so a prefix scan over `[tag][tenant][0x00]` returns exactly
//! one tenant's records. Sequence numbers are encoded big-endian so that
//! lexicographic order matches numeric order.

use crate::catalog::TenantId;

/// Size of a metadata or migration identifier in bytes.
pub const ID_SIZE: usize = 16;

/// A 16-byte identifier (UUID bytes).
pub type Id = [u8; ID_SIZE];

/// Separator between the tenant id and the rest of a key.
const TENANT_SEPARATOR: u8 = 0x00;

/// Record tags.
pub(crate) mod tag {
    /// Object metadata record.
    pub const OBJECT: u8 = b'o';
    /// Field metadata record.
    pub const FIELD: u8 = b'f';
    /// Unique-name index entry.
    pub const NAME: u8 = b'n';
    /// Queued migration record.
    pub const MIGRATION: u8 = b'm';
    /// Last sequence number for a tenant.
    pub const SEQUENCE: u8 = b's';
    /// Migration id to queue key index.
    pub const MIGRATION_ID: u8 = b'i';
    /// Archived migration record.
    pub const ARCHIVE: u8 = b'a';
    /// Index entry of a migration that is not applied yet.
    pub const OPEN: u8 = b'p';
}

/// Prefix covering all records of one tag for one tenant.
pub fn tenant_prefix(tag: u8, tenant: &TenantId) -> Vec<u8> {
    let tenant = tenant.as_str().as_bytes();
    let mut key = Vec::with_capacity(tenant.len() + 2);
    key.push(tag);
    key.extend_from_slice(tenant);
    key.push(TENANT_SEPARATOR);
    key
}

/// Key for a record addressed by tenant and id.
pub fn id_key(tag: u8, tenant: &TenantId, id: &Id) -> Vec<u8> {
    let mut key = tenant_prefix(tag, tenant);
    key.extend_from_slice(id);
    key
}

/// Key for a record addressed by tenant and sequence number.
pub fn sequence_key(tag: u8, tenant: &TenantId, sequence: u64) -> Vec<u8> {
    let mut key = tenant_prefix(tag, tenant);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Unique-name index key for objects: `[n][tenant][0x00][name]`.
///
/// Names are folded to ASCII lowercase, since physical identifiers are
/// case-insensitive on some backends.
pub fn object_name_key(tenant: &TenantId, name: &str) -> Vec<u8> {
    let mut key = tenant_prefix(tag::NAME, tenant);
    key.extend_from_slice(name.to_ascii_lowercase().as_bytes());
    key
}

/// Unique-name index key for fields: `[n][tenant][0x00][object id][name]`,
/// case-folded like [`object_name_key`].
pub fn field_name_key(tenant: &TenantId, object_id: &Id, name: &str) -> Vec<u8> {
    let mut key = id_key(tag::NAME, tenant, object_id);
    key.extend_from_slice(name.to_ascii_lowercase().as_bytes());
    key
}

/// Key holding the last issued sequence number for a tenant.
pub fn last_sequence_key(tenant: &TenantId) -> Vec<u8> {
    let mut key = Vec::with_capacity(tenant.as_str().len() + 1);
    key.push(tag::SEQUENCE);
    key.extend_from_slice(tenant.as_str().as_bytes());
    key
}

/// Key of the migration id index.
pub fn migration_id_key(id: &Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_SIZE + 1);
    key.push(tag::MIGRATION_ID);
    key.extend_from_slice(id);
    key
}

/// Index key of an open migration: `[p][tenant][0x00][sequence]`.
pub fn open_migration_key(tenant: &TenantId, sequence: u64) -> Vec<u8> {
    sequence_key(tag::OPEN, tenant, sequence)
}

/// Split a key built by [`sequence_key`] into its tenant and sequence.
pub fn decode_sequence_key(key: &[u8]) -> Option<(TenantId, u64)> {
    let separator = key.len().checked_sub(9)?;
    if separator < 1 || key[separator] != TENANT_SEPARATOR {
        return None;
    }
    let tenant = std::str::from_utf8(&key[1..separator]).ok()?;
    let sequence = decode_u64(&key[separator + 1..])?;
    Some((TenantId::new(tenant).ok()?, sequence))
}

/// Decode a big-endian `u64` value.
pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
    let buf: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(buf))
}

/// Decode an [`Id`] value.
pub fn decode_id(bytes: &[u8]) -> Option<Id> {
    bytes.try_into().ok()
}

/// Generate a new random identifier.
pub fn generate_id() -> Id {
    uuid::Uuid::new_v4().into_bytes()
}

/// Format an identifier as lowercase hex.
pub fn format_id(id: &Id) -> String {
    hex::encode(id)
}

/// Parse an identifier from hex or hyphenated UUID form.
pub fn parse_id(text: &str) -> Option<Id> {
    let compact: String = text.chars().filter(|c| *c != '-').collect();
    let bytes = hex::decode(compact).ok()?;
    decode_id(&bytes)
}

/// Get current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    #[test]
    fn test_sequence_keys_sort_numerically() {
        let t = tenant("acme");
        let k1 = sequence_key(tag::MIGRATION, &t, 1);
        let k2 = sequence_key(tag::MIGRATION, &t, 2);
        let k256 = sequence_key(tag::MIGRATION, &t, 256);

        assert!(k1 < k2);
        assert!(k2 < k256);
    }

    #[test]
    fn test_tenant_prefix_isolation() {
        // "acme" must not be a prefix match for "acme2".
        let a = tenant_prefix(tag::MIGRATION, &tenant("acme"));
        let b = sequence_key(tag::MIGRATION, &tenant("acme2"), 1);
        assert!(!b.starts_with(&a));
    }

    #[test]
    fn test_parse_id_accepts_both_forms() {
        let id = generate_id();
        assert_eq!(parse_id(&format_id(&id)), Some(id));

        let hyphenated = uuid::Uuid::from_bytes(id).hyphenated().to_string();
        assert_eq!(parse_id(&hyphenated), Some(id));

        assert_eq!(parse_id("not-hex"), None);
        assert_eq!(parse_id("abcd"), None);
    }

    #[test]
    fn test_decode_sequence_key() {
        let key = open_migration_key(&tenant("acme_corp"), 42);
        assert_eq!(decode_sequence_key(&key), Some((tenant("acme_corp"), 42)));
        assert_eq!(decode_sequence_key(&key[..key.len() - 1]), None);
        assert_eq!(decode_sequence_key(&[tag::OPEN, 0, 0, 0]), None);
    }

    #[test]
    fn test_decode_u64() {
        assert_eq!(decode_u64(&42u64.to_be_bytes()), Some(42));
        assert_eq!(decode_u64(&[1, 2, 3]), None);
    }
}
