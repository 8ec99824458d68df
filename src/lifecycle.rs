//! Lifecycle coordination: install pre-warming, version GC, client notices.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::fetch::{request_key, GatewayResponse};
use crate::notify::Notification;
use crate::store::{BucketSet, CacheStore};

/// Lifecycle states, in adoption order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  Installed,
  Activating,
  Active,
}

/// Notices broadcast to every connected client.
#[derive(Debug, Clone)]
pub enum ClientNotice {
  /// A new version finished activating; clients should prompt a reload
  Updated { version: u32 },
  /// A push notification to display
  Notify(Notification),
}

/// Coordinates install and activation for one cache version.
///
/// A new version never activates on its own; it waits for an explicit adopt
/// signal from the application so open tabs are not invalidated mid-work.
pub struct Coordinator<S: CacheStore> {
  store: Arc<S>,
  buckets: BucketSet,
  version: u32,
  state: LifecycleState,
  clients: broadcast::Sender<ClientNotice>,
}

impl<S: CacheStore> Coordinator<S> {
  pub fn new(store: Arc<S>, version: u32) -> Self {
    let (clients, _) = broadcast::channel(64);
    Self {
      store,
      buckets: BucketSet::current(version),
      version,
      state: LifecycleState::Installing,
      clients,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn buckets(&self) -> &BucketSet {
    &self.buckets
  }

  /// Subscribe to lifecycle and notification broadcasts.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientNotice> {
    self.clients.subscribe()
  }

  /// Broadcast a notice to all connected clients.
  pub fn notify(&self, notice: ClientNotice) {
    // No receivers is fine; notices are fire-and-forget
    let _ = self.clients.send(notice);
  }

  /// Pre-warm the shell bucket from the manifest.
  ///
  /// All-or-nothing: any unreachable manifest URL fails the whole install and
  /// the version stays unadoptable. A partially-seeded shell would break
  /// offline navigation in ways that are hard to diagnose later.
  pub async fn install<F, Fut>(&mut self, manifest: &[Url], fetch: F) -> Result<()>
  where
    F: Fn(Url) -> Fut,
    Fut: Future<Output = Result<GatewayResponse>>,
  {
    info!(version = self.version, urls = manifest.len(), "installing");

    for url in manifest {
      let response = fetch(url.clone())
        .await
        .map_err(|e| eyre!("Failed to pre-warm {}: {}", url, e))?;

      if response.status != 200 {
        return Err(eyre!("Failed to pre-warm {}: HTTP {}", url, response.status));
      }

      let key = request_key(&Method::GET, url);
      let stamped = response.stamped(Utc::now());
      self
        .store
        .put(&self.buckets.app, &key, &stamped)
        .map_err(|e| eyre!("Failed to store shell entry {}: {}", url, e))?;
    }

    self.state = LifecycleState::Installed;
    info!(version = self.version, "installation complete");
    Ok(())
  }

  /// Garbage-collect buckets from older versions, then notify clients.
  ///
  /// Individual deletion failures are non-fatal: a lingering stale bucket is
  /// a disk-space leak, not a correctness risk, and the next activation gets
  /// another chance at it.
  pub fn activate(&mut self) -> Result<()> {
    self.state = LifecycleState::Activating;
    info!(version = self.version, "activating");

    let existing = self
      .store
      .list_buckets()
      .map_err(|e| eyre!("Failed to enumerate buckets: {}", e))?;

    for name in existing {
      if !self.buckets.contains(&name) {
        info!(bucket = %name, "deleting stale bucket");
        if let Err(e) = self.store.delete_bucket(&name) {
          warn!(bucket = %name, error = %e, "failed to delete stale bucket, leaving for next activation");
        }
      }
    }

    self.state = LifecycleState::Active;
    self.notify(ClientNotice::Updated {
      version: self.version,
    });
    Ok(())
  }

  /// Handle the application's explicit "adopt new version now" signal.
  ///
  /// Only an installed-but-waiting version activates; anything else ignores
  /// the signal.
  pub fn adopt(&mut self) -> Result<()> {
    match self.state {
      LifecycleState::Installed => self.activate(),
      state => {
        debug!(?state, "adopt signal ignored");
        Ok(())
      }
    }
  }
}
