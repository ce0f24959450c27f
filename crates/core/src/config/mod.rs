//! Worker configuration with layered loading.
//!
//! The configuration is loaded once at startup and never mutated afterwards;
//! components receive it as an `Arc<WorkerConfig>`. Sources, highest wins:
//!
//! 1. Environment variables (WAYPOST_*)
//! 2. TOML config file (if WAYPOST_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::exchange::ResourceClass;

mod validation;

pub use validation::ConfigError;

/// Immutable worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Site origin that relative request URLs resolve against.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Application name, the prefix of the composite cache id.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Deployment version tag appended to every generation name.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    #[serde(default = "default_static_prefix")]
    pub static_cache_prefix: String,

    #[serde(default = "default_dynamic_prefix")]
    pub dynamic_cache_prefix: String,

    /// Launch-critical paths pre-populated on install and served cache-first.
    #[serde(default = "default_critical_resources")]
    pub critical_resources: Vec<String>,

    /// Path prefixes whose contents are launch-critical (logos, favicons).
    #[serde(default = "default_critical_dirs")]
    pub critical_dirs: Vec<String>,

    /// Substrings marking API, contact-submission and analytics URLs.
    #[serde(default = "default_api_markers")]
    pub api_markers: Vec<String>,

    /// File extensions (without dot) of static assets.
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,

    /// Path prefixes holding static assets.
    #[serde(default = "default_asset_dirs")]
    pub asset_dirs: Vec<String>,

    /// Network-first timeout for `api` requests in milliseconds.
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,

    /// Network-first timeout for `other` requests in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Overall HTTP client timeout in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Entries kept in the dynamic generation before the oldest are evicted.
    #[serde(default = "default_max_dynamic_entries")]
    pub max_dynamic_entries: usize,

    /// Path queued submissions are replayed to.
    #[serde(default = "default_replay_endpoint")]
    pub replay_endpoint: String,

    /// Background-sync tag that triggers a replay pass.
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,

    /// Path to the SQLite store.
    ///
    /// Set via WAYPOST_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_notification_icon")]
    pub notification_icon: Option<String>,

    #[serde(default = "default_notification_badge")]
    pub notification_badge: Option<String>,

    /// Where a clicked notification without its own URL navigates.
    #[serde(default = "default_click_url")]
    pub default_click_url: String,
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_app_name() -> String {
    "waypost".into()
}

fn default_cache_version() -> String {
    "v1".into()
}

fn default_static_prefix() -> String {
    "static".into()
}

fn default_dynamic_prefix() -> String {
    "dynamic".into()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_critical_resources() -> Vec<String> {
    strings(&["/", "/index.html", "/styles.css", "/script.js", "/logo.png", "/favicon.ico", "/manifest.json"])
}

fn default_critical_dirs() -> Vec<String> {
    strings(&["/logos/", "/favicons/"])
}

fn default_api_markers() -> Vec<String> {
    strings(&["/api/", "/contact", "analytics"])
}

fn default_static_extensions() -> Vec<String> {
    strings(&[
        "png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico", "woff", "woff2", "ttf", "otf", "eot", "js", "mjs",
        "css",
    ])
}

fn default_asset_dirs() -> Vec<String> {
    strings(&["/assets/"])
}

fn default_api_timeout_ms() -> u64 {
    2_500
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_fetch_timeout_ms() -> u64 {
    20_000
}

fn default_max_dynamic_entries() -> usize {
    100
}

fn default_replay_endpoint() -> String {
    "/api/contact".into()
}

fn default_sync_tag() -> String {
    "contact-form-sync".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./waypost-worker.sqlite")
}

fn default_user_agent() -> String {
    "waypost-worker/0.1".into()
}

fn default_notification_icon() -> Option<String> {
    Some("/logo.png".into())
}

fn default_notification_badge() -> Option<String> {
    Some("/favicon.ico".into())
}

fn default_click_url() -> String {
    "/".into()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            app_name: default_app_name(),
            cache_version: default_cache_version(),
            static_cache_prefix: default_static_prefix(),
            dynamic_cache_prefix: default_dynamic_prefix(),
            critical_resources: default_critical_resources(),
            critical_dirs: default_critical_dirs(),
            api_markers: default_api_markers(),
            static_extensions: default_static_extensions(),
            asset_dirs: default_asset_dirs(),
            api_timeout_ms: default_api_timeout_ms(),
            default_timeout_ms: default_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_dynamic_entries: default_max_dynamic_entries(),
            replay_endpoint: default_replay_endpoint(),
            sync_tag: default_sync_tag(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            notification_icon: default_notification_icon(),
            notification_badge: default_notification_badge(),
            default_click_url: default_click_url(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be read, or if
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("WAYPOST_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("WAYPOST_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Name of the current static generation, e.g. `static-v1`.
    pub fn static_cache_name(&self) -> String {
        format!("{}-{}", self.static_cache_prefix, self.cache_version)
    }

    /// Name of the current dynamic generation, e.g. `dynamic-v1`.
    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-{}", self.dynamic_cache_prefix, self.cache_version)
    }

    /// Identifier of the deployment as a whole, e.g. `waypost-v1`.
    pub fn composite_cache_id(&self) -> String {
        format!("{}-{}", self.app_name, self.cache_version)
    }

    /// Generations that survive activation.
    pub fn allowed_generations(&self) -> [String; 2] {
        [self.static_cache_name(), self.dynamic_cache_name()]
    }

    /// Parsed origin.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })
    }

    /// Resolve an absolute or origin-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin_url()?
            .join(path)
            .map_err(|e| ConfigError::Invalid { field: "path".into(), reason: format!("{path}: {e}") })
    }

    /// Network-first timeout for a resource class.
    ///
    /// Only `api` and `other` are served network-first; the remaining classes
    /// fall back to the default entry.
    pub fn timeout_for(&self, class: ResourceClass) -> Duration {
        match class {
            ResourceClass::Api => Duration::from_millis(self.api_timeout_ms),
            ResourceClass::Other | ResourceClass::Critical | ResourceClass::Static => {
                Duration::from_millis(self.default_timeout_ms)
            }
        }
    }

    /// Overall HTTP client timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
