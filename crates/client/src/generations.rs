//! Cache generation lifecycle.
//!
//! Owns the current static and dynamic generations:
//! - `install` opens the static generation and pre-populates every critical resource
//! - `activate` retires every generation outside the current allow-list
//! - `open` / `match_request` / `put` are the only ways strategies touch stored entries

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use url::Url;
use waypost_core::store::request_key;
use waypost_core::{CacheMode, Error, FetchRequest, GenerationRole, Response, WorkerConfig, WorkerDb};

use crate::fetch::{Network, canonicalize};

/// Handle to one named generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub name: String,
    pub role: GenerationRole,
}

/// Result of pre-populating the static generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub generation: String,
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

/// Result of retiring stale generations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivateReport {
    pub current: Vec<String>,
    pub retired: Vec<String>,
}

#[derive(Clone)]
pub struct GenerationManager {
    db: WorkerDb,
    network: Arc<dyn Network>,
    config: Arc<WorkerConfig>,
    origin: Url,
}

impl GenerationManager {
    pub fn new(db: WorkerDb, network: Arc<dyn Network>, config: Arc<WorkerConfig>) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self { db, network, config, origin })
    }

    /// The current generation for `role`, without touching the store.
    pub fn current(&self, role: GenerationRole) -> Generation {
        let name = match role {
            GenerationRole::Static => self.config.static_cache_name(),
            GenerationRole::Dynamic => self.config.dynamic_cache_name(),
        };
        Generation { name, role }
    }

    /// Open (creating if needed) the current generation for `role`.
    pub async fn open(&self, role: GenerationRole) -> Result<Generation, Error> {
        let generation = self.current(role);
        self.db.create_generation(&generation.name, role).await?;
        Ok(generation)
    }

    /// Canonical URL of a request, resolved against the origin.
    pub fn canonical_url(&self, request: &FetchRequest) -> Result<Url, Error> {
        canonicalize(&request.url, &self.origin).map_err(|e| Error::InvalidUrl(e.to_string()))
    }

    /// Stored response for `request` in `generation`, if any.
    pub async fn match_request(&self, generation: &Generation, request: &FetchRequest) -> Result<Option<Response>, Error> {
        let url = self.canonical_url(request)?;
        let key = request_key(&request.method, &url);
        let entry = self.db.match_entry(&generation.name, &key).await?;
        Ok(entry.map(|e| e.response))
    }

    /// Store `response` for `request` in `generation`. Only GET requests are cacheable.
    pub async fn put(&self, generation: &Generation, request: &FetchRequest, response: &Response) -> Result<(), Error> {
        if !request.is_get() {
            return Err(Error::InvalidInput(format!("{} requests are not cacheable", request.method)));
        }
        let url = self.canonical_url(request)?;
        let key = request_key(&request.method, &url);
        self.db
            .put_entry(&generation.name, generation.role, &key, &request.method, url.as_str(), response)
            .await
    }

    /// Evict the oldest dynamic entries beyond the configured bound.
    pub async fn trim_dynamic(&self) -> Result<u64, Error> {
        let generation = self.current(GenerationRole::Dynamic);
        let evicted = self
            .db
            .trim_generation(&generation.name, self.config.max_dynamic_entries)
            .await?;
        if evicted > 0 {
            tracing::debug!(generation = %generation.name, evicted, "trimmed dynamic generation");
        }
        Ok(evicted)
    }

    /// Open the static generation and pre-populate every critical resource.
    ///
    /// Each resource is fetched bypassing HTTP caches. A failed fetch is logged
    /// and reported but does not fail the install.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        let generation = self.open(GenerationRole::Static).await?;

        let fetches = self.config.critical_resources.iter().map(|path| {
            let generation = generation.clone();
            async move {
                let request = FetchRequest::get(path.clone());
                match self.precache(&generation, &request).await {
                    Ok(()) => Ok(path.clone()),
                    Err(e) => {
                        tracing::warn!(url = %path, error = %e, "failed to pre-populate critical resource");
                        Err(path.clone())
                    }
                }
            }
        });

        let mut report = InstallReport { generation: generation.name.clone(), ..Default::default() };
        for outcome in join_all(fetches).await {
            match outcome {
                Ok(path) => report.cached.push(path),
                Err(path) => report.failed.push(path),
            }
        }

        tracing::info!(
            generation = %report.generation,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "installed"
        );
        Ok(report)
    }

    async fn precache(&self, generation: &Generation, request: &FetchRequest) -> Result<(), Error> {
        let response = self.network.fetch(request, CacheMode::Reload).await?;
        if !response.ok() {
            return Err(Error::NetworkFailure(format!("status {}", response.status)));
        }
        self.put(generation, request, &response).await
    }

    /// Ensure the current generations exist and delete every other one.
    ///
    /// Running this twice leaves the same two generations behind.
    pub async fn activate(&self) -> Result<ActivateReport, Error> {
        let static_generation = self.open(GenerationRole::Static).await?;
        let dynamic_generation = self.open(GenerationRole::Dynamic).await?;
        let allowed = [static_generation.name, dynamic_generation.name];

        let mut retired = Vec::new();
        for name in self.db.generation_names().await? {
            if allowed.contains(&name) {
                continue;
            }
            if self.db.delete_generation(&name).await? {
                tracing::info!(generation = %name, "retired stale generation");
                retired.push(name);
            }
        }

        Ok(ActivateReport { current: allowed.to_vec(), retired })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, MockNetwork};

    async fn manager(network: Arc<MockNetwork>, config: WorkerConfig) -> (GenerationManager, WorkerDb) {
        let db = WorkerDb::open_in_memory().await.unwrap();
        let manager = GenerationManager::new(db.clone(), network, Arc::new(config)).unwrap();
        (manager, db)
    }

    fn small_manifest() -> WorkerConfig {
        WorkerConfig { critical_resources: vec!["/".into(), "/styles.css".into(), "/logo.png".into()], ..Default::default() }
    }

    #[tokio::test]
    async fn test_install_prepopulates_with_reload() {
        let network = Arc::new(MockNetwork::online());
        let (manager, _db) = manager(Arc::clone(&network), small_manifest()).await;

        let report = manager.install().await.unwrap();
        assert_eq!(report.generation, "static-v1");
        assert_eq!(report.cached.len(), 3);
        assert!(report.failed.is_empty());
        assert!(network.calls().iter().all(|c| c.mode == CacheMode::Reload));

        let generation = manager.current(GenerationRole::Static);
        let cached = manager.match_request(&generation, &FetchRequest::get("/styles.css")).await.unwrap();
        assert_eq!(cached.unwrap().text(), "fresh:/styles.css");
    }

    #[tokio::test]
    async fn test_install_tolerates_failures() {
        let network = Arc::new(MockNetwork::online());
        network.route("/logo.png", Behavior::Fail);
        network.route("/styles.css", Behavior::Respond(Response::new(404, Vec::new(), "missing")));
        let (manager, _db) = manager(Arc::clone(&network), small_manifest()).await;

        let report = manager.install().await.unwrap();
        assert_eq!(report.cached, vec!["/".to_string()]);
        assert_eq!(report.failed.len(), 2);

        let generation = manager.current(GenerationRole::Static);
        assert!(manager.match_request(&generation, &FetchRequest::get("/logo.png")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activate_retires_stale_generations() {
        let network = Arc::new(MockNetwork::online());
        let (manager, db) = manager(network, WorkerConfig::default()).await;
        db.create_generation("static-v0", GenerationRole::Static).await.unwrap();
        db.create_generation("dynamic-v0", GenerationRole::Dynamic).await.unwrap();

        let report = manager.activate().await.unwrap();
        assert_eq!(report.retired, vec!["dynamic-v0".to_string(), "static-v0".to_string()]);
        assert_eq!(db.generation_names().await.unwrap(), vec!["dynamic-v1".to_string(), "static-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_activate_twice_is_idempotent() {
        let network = Arc::new(MockNetwork::online());
        let (manager, db) = manager(network, WorkerConfig::default()).await;
        db.create_generation("static-v0", GenerationRole::Static).await.unwrap();

        manager.activate().await.unwrap();
        let second = manager.activate().await.unwrap();

        assert!(second.retired.is_empty());
        assert_eq!(db.generation_names().await.unwrap(), vec!["dynamic-v1".to_string(), "static-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_activate_keeps_current_entries() {
        let network = Arc::new(MockNetwork::online());
        let (manager, _db) = manager(Arc::clone(&network), small_manifest()).await;
        manager.install().await.unwrap();
        manager.activate().await.unwrap();

        let generation = manager.current(GenerationRole::Static);
        assert!(manager.match_request(&generation, &FetchRequest::get("/")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_rejects_non_get() {
        let network = Arc::new(MockNetwork::online());
        let (manager, _db) = manager(network, WorkerConfig::default()).await;
        let generation = manager.open(GenerationRole::Dynamic).await.unwrap();
        let request = FetchRequest::post_json("/api/contact", &serde_json::json!({})).unwrap();

        let result = manager.put(&generation, &request, &Response::new(200, Vec::new(), "")).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_relative_and_absolute_share_identity() {
        let network = Arc::new(MockNetwork::online());
        let (manager, _db) = manager(network, WorkerConfig::default()).await;
        let generation = manager.open(GenerationRole::Dynamic).await.unwrap();

        manager
            .put(&generation, &FetchRequest::get("/about"), &Response::new(200, Vec::new(), "about"))
            .await
            .unwrap();
        let hit = manager
            .match_request(&generation, &FetchRequest::get("http://localhost:8080/about#team"))
            .await
            .unwrap();
        assert_eq!(hit.unwrap().text(), "about");
    }
}
