//! Expiration policy: per-content-class maximum ages and the staleness check.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use url::Url;

/// Content classes with distinct expiration behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
  Api,
  Html,
  Css,
  Js,
  Image,
  Font,
}

/// Maximum age in seconds for each content class.
///
/// Static configuration, immutable at runtime. Only the api class is consulted
/// on the serving path (assets are cache-busted by filename, not by time); the
/// rest of the table drives reporting and manual eviction.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpirationRules {
  #[serde(default = "default_api")]
  pub api: u64,
  #[serde(default = "default_html")]
  pub html: u64,
  #[serde(default = "default_css_js")]
  pub css: u64,
  #[serde(default = "default_css_js")]
  pub js: u64,
  #[serde(default = "default_image")]
  pub image: u64,
  #[serde(default = "default_font")]
  pub font: u64,
}

fn default_api() -> u64 {
  300 // 5 minutes
}

fn default_html() -> u64 {
  3_600
}

fn default_css_js() -> u64 {
  86_400
}

fn default_image() -> u64 {
  604_800
}

fn default_font() -> u64 {
  2_592_000
}

impl Default for ExpirationRules {
  fn default() -> Self {
    Self {
      api: default_api(),
      html: default_html(),
      css: default_css_js(),
      js: default_css_js(),
      image: default_image(),
      font: default_font(),
    }
  }
}

impl ExpirationRules {
  /// Maximum age for a content class.
  pub fn max_age(&self, class: ContentClass) -> Duration {
    let seconds = match class {
      ContentClass::Api => self.api,
      ContentClass::Html => self.html,
      ContentClass::Css => self.css,
      ContentClass::Js => self.js,
      ContentClass::Image => self.image,
      ContentClass::Font => self.font,
    };
    Duration::seconds(seconds as i64)
  }

  /// Whether an entry captured at `captured_at` is expired at `now`.
  ///
  /// Expired exactly when the age reaches the maximum (boundary inclusive).
  pub fn is_expired(&self, class: ContentClass, captured_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - captured_at >= self.max_age(class)
  }
}

/// Map a URL path to its content class by extension.
///
/// Unknown extensions and extensionless paths read as html (page documents).
pub fn content_class_of(url: &Url) -> ContentClass {
  let path = url.path().to_lowercase();
  match path.rsplit('.').next() {
    Some("css") => ContentClass::Css,
    Some("js") | Some("mjs") => ContentClass::Js,
    Some("png") | Some("jpg") | Some("jpeg") | Some("gif") | Some("webp") | Some("svg")
    | Some("ico") => ContentClass::Image,
    Some("woff") | Some("woff2") | Some("ttf") | Some("otf") => ContentClass::Font,
    _ => ContentClass::Html,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fresh_below_max_age() {
    let rules = ExpirationRules::default();
    let now = Utc::now();
    let captured = now - Duration::seconds(299);
    assert!(!rules.is_expired(ContentClass::Api, captured, now));
  }

  #[test]
  fn test_expired_exactly_at_max_age() {
    let rules = ExpirationRules::default();
    let now = Utc::now();
    let captured = now - Duration::seconds(300);
    assert!(rules.is_expired(ContentClass::Api, captured, now));
  }

  #[test]
  fn test_expired_beyond_max_age() {
    let rules = ExpirationRules::default();
    let now = Utc::now();
    let captured = now - Duration::seconds(600);
    assert!(rules.is_expired(ContentClass::Api, captured, now));
  }

  #[test]
  fn test_configured_max_age_overrides_default() {
    let rules: ExpirationRules = serde_yaml::from_str("api: 60").unwrap();
    let now = Utc::now();
    assert!(rules.is_expired(ContentClass::Api, now - Duration::seconds(61), now));
    assert!(!rules.is_expired(ContentClass::Api, now - Duration::seconds(59), now));
    // Unlisted classes keep their defaults
    assert_eq!(rules.image, 604_800);
  }

  #[test]
  fn test_content_class_by_extension() {
    let base = Url::parse("https://app.example.com").unwrap();
    let class = |p: &str| content_class_of(&base.join(p).unwrap());
    assert_eq!(class("/static/app.css"), ContentClass::Css);
    assert_eq!(class("/static/app.js"), ContentClass::Js);
    assert_eq!(class("/icons/icon-192x192.png"), ContentClass::Image);
    assert_eq!(class("/fonts/inter.woff2"), ContentClass::Font);
    assert_eq!(class("/jobs/42"), ContentClass::Html);
    assert_eq!(class("/offline.html"), ContentClass::Html);
  }
}
