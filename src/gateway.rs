//! The gateway event loop.
//!
//! One handler per event kind behind a single dispatch loop: intercepted
//! fetches, the application's adopt signal, background-sync triggers, and
//! push payloads. Each fetch runs as its own spawned task over the shared
//! durable stores, so concurrent requests never contend on in-memory state.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::{classify, RequestClass};
use crate::config::{Config, SyncConfig};
use crate::fetch::{request_key, Fetch, GatewayRequest, GatewayResponse};
use crate::lifecycle::{ClientNotice, Coordinator};
use crate::notify::{Notification, PushPayload};
use crate::policy::{content_class_of, ContentClass, ExpirationRules};
use crate::queue::{MutationKind, QueueStore, SyncQueue};
use crate::store::{BucketSet, CacheStore};
use crate::strategy;

/// Events the gateway reacts to.
#[derive(Debug)]
pub enum GatewayEvent {
  /// An intercepted request; the response goes back over the channel
  Fetch {
    request: GatewayRequest,
    respond_to: oneshot::Sender<GatewayResponse>,
  },
  /// Application message: adopt the waiting version now
  AdoptVersion,
  /// A background-sync trigger fired
  Sync { tag: String },
  /// A push message arrived, possibly with a JSON payload
  Push { payload: Option<Vec<u8>> },
}

/// Cheap cloneable handle the host application talks to the gateway through.
#[derive(Clone)]
pub struct GatewayHandle {
  tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl GatewayHandle {
  /// Run an intercepted request through the gateway and await its response.
  pub async fn fetch(&self, request: GatewayRequest) -> Result<GatewayResponse> {
    let (respond_to, response) = oneshot::channel();
    self
      .tx
      .send(GatewayEvent::Fetch {
        request,
        respond_to,
      })
      .map_err(|_| eyre!("Gateway is no longer running"))?;

    response
      .await
      .map_err(|_| eyre!("Gateway dropped the request"))
  }

  /// Signal that the application is ready to adopt the installed version.
  pub fn adopt_version(&self) -> Result<()> {
    self
      .tx
      .send(GatewayEvent::AdoptVersion)
      .map_err(|_| eyre!("Gateway is no longer running"))
  }

  /// Fire a background-sync trigger by tag.
  pub fn sync(&self, tag: &str) -> Result<()> {
    self
      .tx
      .send(GatewayEvent::Sync {
        tag: tag.to_string(),
      })
      .map_err(|_| eyre!("Gateway is no longer running"))
  }

  /// Deliver a push message.
  pub fn push(&self, payload: Option<Vec<u8>>) -> Result<()> {
    self
      .tx
      .send(GatewayEvent::Push { payload })
      .map_err(|_| eyre!("Gateway is no longer running"))
  }
}

/// The offline-resilience gateway.
pub struct Gateway<S, Q, F>
where
  S: CacheStore + 'static,
  Q: QueueStore + 'static,
  F: Fetch,
{
  config: Arc<Config>,
  store: Arc<S>,
  queue: SyncQueue<Q>,
  fetcher: F,
  coordinator: Coordinator<S>,
  rx: mpsc::UnboundedReceiver<GatewayEvent>,
  /// Cache key of the offline fallback page in the app bucket
  fallback_key: String,
  jobs_url: Url,
  tracking_url: Url,
}

impl<S, Q, F> Gateway<S, Q, F>
where
  S: CacheStore + 'static,
  Q: QueueStore + 'static,
  F: Fetch,
{
  pub fn new(
    config: Config,
    store: Arc<S>,
    queue: SyncQueue<Q>,
    fetcher: F,
  ) -> Result<(Self, GatewayHandle)> {
    let fallback_key = request_key(&Method::GET, &config.resolve(&config.offline_fallback)?);
    let jobs_url = config.resolve(&config.sync.jobs_endpoint)?;
    let tracking_url = config.resolve(&config.sync.tracking_endpoint)?;

    let coordinator = Coordinator::new(store.clone(), config.version);
    let (tx, rx) = mpsc::unbounded_channel();

    let gateway = Self {
      config: Arc::new(config),
      store,
      queue,
      fetcher,
      coordinator,
      rx,
      fallback_key,
      jobs_url,
      tracking_url,
    };

    Ok((gateway, GatewayHandle { tx }))
  }

  /// Subscribe to lifecycle and notification broadcasts.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientNotice> {
    self.coordinator.subscribe()
  }

  /// Install the shell, then serve events until every handle is dropped.
  ///
  /// Install failure is fatal here: the version never becomes adoptable and
  /// the caller decides whether to retry.
  pub async fn run(mut self) -> Result<()> {
    let manifest = self
      .config
      .shell_manifest
      .iter()
      .map(|path| self.config.resolve(path))
      .collect::<Result<Vec<Url>>>()?;

    let fetcher = self.fetcher.clone();
    self
      .coordinator
      .install(&manifest, |url| fetcher.fetch(GatewayRequest::get(url)))
      .await?;

    info!("shell installed, waiting for adoption signal");
    self.serve().await
  }

  /// Serve events without installing first.
  ///
  /// For embedders that manage install and activation themselves (and for
  /// tests); [`run`](Self::run) is the usual entry point.
  pub async fn serve(mut self) -> Result<()> {
    while let Some(event) = self.rx.recv().await {
      self.dispatch(event);
    }

    debug!("all gateway handles dropped, shutting down");
    Ok(())
  }

  fn dispatch(&mut self, event: GatewayEvent) {
    match event {
      GatewayEvent::Fetch {
        request,
        respond_to,
      } => self.spawn_fetch(request, respond_to),
      GatewayEvent::AdoptVersion => {
        if let Err(e) = self.coordinator.adopt() {
          warn!(error = %e, "version adoption failed");
        }
      }
      GatewayEvent::Sync { tag } => self.spawn_sync(&tag),
      GatewayEvent::Push { payload } => {
        let notification = Notification::from(PushPayload::parse(payload.as_deref()));
        self.coordinator.notify(ClientNotice::Notify(notification));
      }
    }
  }

  fn spawn_fetch(&self, request: GatewayRequest, respond_to: oneshot::Sender<GatewayResponse>) {
    let class = classify(&request, &self.config.origin, &self.config.routes);

    let store = self.store.clone();
    let fetcher = self.fetcher.clone();
    let queue = self.queue.clone();
    let buckets = self.coordinator.buckets().clone();
    let rules = self.config.expiration.clone();
    let sync = self.config.sync.clone();
    let fallback_key = self.fallback_key.clone();

    tokio::spawn(async move {
      let response = handle_fetch(
        class,
        &*store,
        &fetcher,
        &queue,
        &buckets,
        &rules,
        &sync,
        &fallback_key,
        request,
      )
      .await;

      // A closed receiver means the client gave up on the request (e.g. the
      // navigation was aborted); nothing left to do
      let _ = respond_to.send(response);
    });
  }

  fn spawn_sync(&self, tag: &str) {
    let Some(kind) = MutationKind::from_sync_tag(tag) else {
      warn!(tag, "ignoring unknown sync tag");
      return;
    };

    let endpoint = match kind {
      MutationKind::Job => self.jobs_url.clone(),
      MutationKind::Tracking => self.tracking_url.clone(),
    };
    let queue = self.queue.clone();
    let fetcher = self.fetcher.clone();

    // Each sync trigger is its own task: a hung replay delays its own batch,
    // never the next trigger
    tokio::spawn(async move {
      queue
        .flush(kind, move |mutation| {
          let fetcher = fetcher.clone();
          let endpoint = endpoint.clone();
          async move { fetcher.fetch(mutation.to_request(&endpoint)?).await }
        })
        .await;
    });
  }
}

#[allow(clippy::too_many_arguments)]
async fn handle_fetch<S, Q, F>(
  class: RequestClass,
  store: &S,
  fetcher: &F,
  queue: &SyncQueue<Q>,
  buckets: &BucketSet,
  rules: &ExpirationRules,
  sync: &SyncConfig,
  fallback_key: &str,
  request: GatewayRequest,
) -> GatewayResponse
where
  S: CacheStore,
  Q: QueueStore,
  F: Fetch,
{
  match class {
    RequestClass::Api => {
      let fetch = {
        let fetcher = fetcher.clone();
        let request = request.clone();
        move || async move { fetcher.fetch(request).await }
      };
      strategy::network_first(store, rules, &buckets.api, &request, fetch).await
    }
    RequestClass::Asset => {
      let bucket = if content_class_of(&request.url) == ContentClass::Image {
        &buckets.img
      } else {
        &buckets.app
      };
      let fetch = {
        let fetcher = fetcher.clone();
        let request = request.clone();
        move || async move { fetcher.fetch(request).await }
      };
      strategy::cache_first(store, bucket, fallback_key, &request, fetch).await
    }
    RequestClass::Bypass => handle_bypass(fetcher, queue, sync, request).await,
  }
}

/// Pass a request straight through to the network.
///
/// A mutation for one of the sync endpoints that fails in transit is recorded
/// in the deferred queue for the next background-sync trigger before the
/// failure is reported back.
async fn handle_bypass<Q, F>(
  fetcher: &F,
  queue: &SyncQueue<Q>,
  sync: &SyncConfig,
  request: GatewayRequest,
) -> GatewayResponse
where
  Q: QueueStore,
  F: Fetch,
{
  match fetcher.fetch(request.clone()).await {
    Ok(response) => response,
    Err(e) => {
      debug!(url = %request.url, error = %e, "bypass fetch failed");

      if let Some(kind) = deferrable_kind(&request, sync) {
        let payload = request
          .body
          .as_deref()
          .and_then(|body| serde_json::from_slice(body).ok());
        if let Some(payload) = payload {
          info!(kind = kind.as_str(), url = %request.url, "deferring mutation for background sync");
          queue.enqueue(kind, payload);
        }
      }

      GatewayResponse::new(503, "text/plain", "Network error")
    }
  }
}

/// Which deferred-mutation kind, if any, a failed request maps to.
fn deferrable_kind(request: &GatewayRequest, sync: &SyncConfig) -> Option<MutationKind> {
  if request.method != Method::POST {
    return None;
  }

  let path = request.url.path();
  if path == sync.jobs_endpoint {
    Some(MutationKind::Job)
  } else if path == sync.tracking_endpoint {
    Some(MutationKind::Tracking)
  } else {
    None
  }
}
