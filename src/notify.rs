//! Push notification payload contract and click routing.

use serde::Deserialize;
use url::Url;

const DEFAULT_TITLE: &str = "TradeGate";
const DEFAULT_BODY: &str = "You have a new update";
const DEFAULT_URL: &str = "/";

/// Optional JSON body of a push message. Absent fields fall back to fixed
/// defaults; an unparseable payload falls back entirely.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
  #[serde(default = "default_body")]
  pub body: String,
  #[serde(default = "default_url")]
  pub url: String,
}

fn default_body() -> String {
  DEFAULT_BODY.into()
}

fn default_url() -> String {
  DEFAULT_URL.into()
}

impl Default for PushPayload {
  fn default() -> Self {
    Self {
      body: default_body(),
      url: default_url(),
    }
  }
}

impl PushPayload {
  pub fn parse(data: Option<&[u8]>) -> Self {
    data
      .and_then(|d| serde_json::from_slice(d).ok())
      .unwrap_or_default()
  }
}

/// A notification ready for the host application to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub url: String,
}

impl From<PushPayload> for Notification {
  fn from(payload: PushPayload) -> Self {
    Self {
      title: DEFAULT_TITLE.into(),
      body: payload.body,
      url: payload.url,
    }
  }
}

/// What a notification click should do with its deep-link target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAction {
  /// Focus the already-open window at this index
  Focus(usize),
  /// No window shows the target; open a new one
  OpenNew,
}

/// Route a notification click: focus an existing window already showing the
/// target URL, otherwise open a new one.
pub fn click_action(open_windows: &[Url], target: &Url) -> ClickAction {
  open_windows
    .iter()
    .position(|w| w == target)
    .map(ClickAction::Focus)
    .unwrap_or(ClickAction::OpenNew)
}
