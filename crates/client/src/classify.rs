//! Resource classification.
//!
//! Maps a request URL to the class that selects its caching strategy. Rules are
//! evaluated in a fixed order and the first match wins:
//!
//! 1. `critical` - a same-origin path in the launch manifest or under a critical directory
//! 2. `api` - the URL contains an API, contact-submission or analytics marker
//! 3. `static` - the path has a static-asset extension or is under an assets directory
//! 4. `other`

use std::collections::HashSet;

use regex::Regex;
use url::Url;
use waypost_core::{Error, ResourceClass, WorkerConfig};

use crate::fetch::same_origin;

/// Immutable rule set built once from the worker configuration.
#[derive(Debug, Clone)]
pub struct ResourceClassifier {
    origin: Url,
    critical_paths: HashSet<String>,
    critical_dirs: Vec<String>,
    api_markers: Vec<String>,
    static_extension: Option<Regex>,
    asset_dirs: Vec<String>,
}

impl ResourceClassifier {
    /// Compile the rules from configuration.
    ///
    /// Manifest entries may be paths or absolute URLs; both are reduced to the path.
    pub fn new(config: &WorkerConfig) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let critical_paths = config
            .critical_resources
            .iter()
            .map(|entry| {
                origin
                    .join(entry)
                    .map(|u| u.path().to_string())
                    .map_err(|e| Error::InvalidUrl(format!("{entry}: {e}")))
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let extensions: Vec<String> = config
            .static_extensions
            .iter()
            .map(|ext| regex::escape(ext.trim_start_matches('.')))
            .filter(|ext| !ext.is_empty())
            .collect();
        let static_extension = if extensions.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)\.(?:{})$", extensions.join("|"));
            Some(Regex::new(&pattern).map_err(|e| Error::InvalidInput(format!("static_extensions: {e}")))?)
        };

        Ok(Self {
            origin,
            critical_paths,
            critical_dirs: config.critical_dirs.clone(),
            api_markers: config.api_markers.iter().map(|m| m.to_lowercase()).collect(),
            static_extension,
            asset_dirs: config.asset_dirs.clone(),
        })
    }

    /// Classify a canonical request URL. Total and side-effect free.
    pub fn classify(&self, url: &Url) -> ResourceClass {
        let path = url.path();
        let local = same_origin(url, &self.origin);

        let in_manifest = self.critical_paths.contains(path);
        let in_critical_dir = self.critical_dirs.iter().any(|dir| path.starts_with(dir.as_str()));
        if local && (in_manifest || in_critical_dir) {
            return ResourceClass::Critical;
        }

        let full = url.as_str().to_lowercase();
        if self.api_markers.iter().any(|marker| full.contains(marker.as_str())) {
            return ResourceClass::Api;
        }

        let has_static_extension = self.static_extension.as_ref().is_some_and(|re| re.is_match(path));
        if has_static_extension || self.asset_dirs.iter().any(|dir| path.starts_with(dir.as_str())) {
            return ResourceClass::Static;
        }

        ResourceClass::Other
    }
}
