//! Per-tenant DDL locks.

use crate::catalog::TenantId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Exclusive DDL rights per tenant. Different tenants never contend.
#[derive(Default)]
pub struct TenantLocks {
    locks: DashMap<TenantId, Arc<Mutex<()>>>,
}

impl TenantLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `tenant`'s schema.
    pub fn lock_for(&self, tenant: &TenantId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(tenant) {
            return lock.clone();
        }
        self.locks.entry(tenant.clone()).or_default().clone()
    }

    /// Number of tenants that have been locked at least once.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Check if no tenant has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
