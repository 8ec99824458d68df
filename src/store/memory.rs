//! In-memory cache store.
//!
//! Backs the unit tests and doubles as a non-durable store for embedders that
//! want offline fallback only for the lifetime of the process.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::traits::CacheStore;
use crate::fetch::GatewayResponse;

type Buckets = HashMap<String, HashMap<String, GatewayResponse>>;

#[derive(Default)]
pub struct MemoryStore {
  buckets: Mutex<Buckets>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Buckets>> {
    self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStore for MemoryStore {
  fn put(&self, bucket: &str, key: &str, response: &GatewayResponse) -> Result<()> {
    let mut buckets = self.lock()?;
    buckets
      .entry(bucket.to_string())
      .or_default()
      .insert(key.to_string(), response.clone());
    Ok(())
  }

  fn get(&self, bucket: &str, key: &str) -> Result<Option<GatewayResponse>> {
    let buckets = self.lock()?;
    Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
  }

  fn delete_bucket(&self, bucket: &str) -> Result<()> {
    let mut buckets = self.lock()?;
    buckets.remove(bucket);
    Ok(())
  }

  fn list_buckets(&self) -> Result<Vec<String>> {
    let buckets = self.lock()?;
    let mut names: Vec<String> = buckets.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn entry_count(&self, bucket: &str) -> Result<u64> {
    let buckets = self.lock()?;
    Ok(buckets.get(bucket).map(|b| b.len() as u64).unwrap_or(0))
  }
}
