//! In-process [`TokenStore`], for tests and single-process deployments which do not need
//! the cache to survive a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CachedAuthorization, TokenStore};
use crate::{Error, Result};

/// A [`TokenStore`] backed by a `HashMap` keyed by `jti`.
#[derive(Default)]
pub struct MemoryTokenStore {
    records: RwLock<HashMap<String, CachedAuthorization>>,
    inserts: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of every stored record, regardless of expiry.
    pub async fn records(&self) -> Vec<CachedAuthorization> {
        self.records.read().await.values().cloned().collect()
    }

    /// The number of successful inserts so far.
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// The number of deletes so far.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn select_refreshable(
        &self,
        service_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CachedAuthorization>> {
        let records = self.records.read().await;

        Ok(records
            .values()
            .filter(|record| record.service_name == service_name && record.refresh_expires > now)
            .cloned()
            .collect())
    }

    async fn insert(&self, record: &CachedAuthorization) -> Result<()> {
        let mut records = self.records.write().await;

        if records.contains_key(&record.jti) {
            return Err(Error::store(format!("duplicate jti {}", record.jti)));
        }

        records.insert(record.jti.clone(), record.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, jti: &str) -> Result<()> {
        self.records.write().await.remove(jti);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
