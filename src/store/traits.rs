//! Cache storage port and bucket naming.

use color_eyre::Result;

use crate::fetch::GatewayResponse;

/// The three asset classes, each with its own bucket per version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
  /// Application shell and other static assets
  App,
  /// Backend API responses
  Api,
  /// Images
  Img,
}

impl BucketKind {
  fn prefix(&self) -> &'static str {
    match self {
      BucketKind::App => "app",
      BucketKind::Api => "api",
      BucketKind::Img => "img",
    }
  }

  /// Bucket name for this kind at a given cache version.
  pub fn bucket_name(&self, version: u32) -> String {
    format!("{}-v{}", self.prefix(), version)
  }
}

/// The current version's bucket names.
///
/// Exactly these three buckets survive an activation; anything else is
/// garbage from an older version.
#[derive(Debug, Clone)]
pub struct BucketSet {
  pub app: String,
  pub api: String,
  pub img: String,
}

impl BucketSet {
  pub fn current(version: u32) -> Self {
    Self {
      app: BucketKind::App.bucket_name(version),
      api: BucketKind::Api.bucket_name(version),
      img: BucketKind::Img.bucket_name(version),
    }
  }

  /// Whether `name` belongs to this version.
  pub fn contains(&self, name: &str) -> bool {
    name == self.app || name == self.api || name == self.img
  }
}

/// Trait for cache storage backends.
///
/// Individual operations are atomic at the key level; there are no cross-key
/// transactions. Concurrent writers to the same key are last-write-wins.
pub trait CacheStore: Send + Sync {
  /// Store a response under (bucket, key), overwriting any previous entry.
  fn put(&self, bucket: &str, key: &str, response: &GatewayResponse) -> Result<()>;

  /// Look up a response by (bucket, key).
  fn get(&self, bucket: &str, key: &str) -> Result<Option<GatewayResponse>>;

  /// Delete a bucket and every entry in it.
  fn delete_bucket(&self, bucket: &str) -> Result<()>;

  /// Names of all buckets that currently hold entries.
  fn list_buckets(&self) -> Result<Vec<String>>;

  /// Number of entries in a bucket.
  fn entry_count(&self, bucket: &str) -> Result<u64>;
}
