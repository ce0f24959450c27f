//! Strategy engine.
//!
//! Three interception strategies, chosen per resource class:
//!
//! | Class      | Strategy                     | Generation        |
//! |------------|------------------------------|-------------------|
//! | `critical` | cache-first                  | static            |
//! | `api`      | network-first, api timeout   | dynamic           |
//! | `static`   | stale-while-revalidate       | static            |
//! | `other`    | network-first, default timeout | dynamic         |
//!
//! Every path ends in a well-formed response. When neither network nor cache
//! can answer the caller gets the synthetic 503 from `Response::unavailable`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use waypost_core::{CacheMode, Error, FetchRequest, GenerationRole, ResourceClass, Response, WorkerConfig};

use crate::fetch::Network;
use crate::generations::{Generation, GenerationManager};
use crate::keep_alive::KeepAlive;

/// Caching discipline applied to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst(Duration),
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn for_class(class: ResourceClass, config: &WorkerConfig) -> Self {
        match class {
            ResourceClass::Critical => Strategy::CacheFirst,
            ResourceClass::Static => Strategy::StaleWhileRevalidate,
            ResourceClass::Api | ResourceClass::Other => Strategy::NetworkFirst(config.timeout_for(class)),
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedFrom {
    /// Stored entry, no network wait.
    Cache,
    /// Fresh network response.
    Network,
    /// Stored entry used because the network failed or timed out.
    CacheFallback,
    /// Synthetic 503.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct Served {
    pub response: Response,
    pub source: ServedFrom,
}

impl Served {
    fn new(response: Response, source: ServedFrom) -> Self {
        Self { response, source }
    }

    fn unavailable() -> Self {
        Self::new(Response::unavailable(), ServedFrom::Unavailable)
    }
}

#[derive(Clone)]
pub struct StrategyEngine {
    generations: GenerationManager,
    network: Arc<dyn Network>,
    config: Arc<WorkerConfig>,
}

impl StrategyEngine {
    pub fn new(generations: GenerationManager, network: Arc<dyn Network>, config: Arc<WorkerConfig>) -> Self {
        Self { generations, network, config }
    }

    /// Serve `request` with the strategy its class selects.
    pub async fn handle(&self, request: &FetchRequest, class: ResourceClass, keep_alive: &KeepAlive) -> Served {
        let strategy = Strategy::for_class(class, &self.config);
        tracing::debug!(url = %request.url, class = class.as_str(), ?strategy, "intercepted");

        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst(timeout) => self.network_first(request, timeout, keep_alive).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, keep_alive).await,
        }
    }

    /// Serve from the static generation; go to the network only on a miss.
    pub async fn cache_first(&self, request: &FetchRequest) -> Served {
        let generation = self.generations.current(GenerationRole::Static);
        if let Ok(response) = self.lookup(&generation, request).await {
            return Served::new(response, ServedFrom::Cache);
        }

        match self.network.fetch(request, CacheMode::Default).await {
            Ok(response) => {
                if response.ok() {
                    self.store(&generation, request, &response).await;
                }
                Served::new(response, ServedFrom::Network)
            }
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "cache-first miss while offline");
                Served::unavailable()
            }
        }
    }

    /// Race the network against `timeout`; fall back to stored entries.
    ///
    /// The result is handed back before the cache write, so store I/O never
    /// counts against `timeout`. The losing network call is not cancelled. If
    /// it succeeds after the timer fired it still refreshes the dynamic generation.
    pub async fn network_first(&self, request: &FetchRequest, timeout: Duration, keep_alive: &KeepAlive) -> Served {
        let (tx, rx) = oneshot::channel();
        let engine = self.clone();
        let owned = request.clone();
        keep_alive.extend(async move {
            let response = match engine.network.fetch(&owned, CacheMode::Default).await {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            let fresh = response.ok().then(|| response.clone());
            let _ = tx.send(Ok(response));

            if let Some(response) = fresh {
                let generation = engine.generations.current(GenerationRole::Dynamic);
                engine.store(&generation, &owned, &response).await;
                if let Err(e) = engine.generations.trim_dynamic().await {
                    tracing::warn!(error = %e, "failed to trim dynamic generation");
                }
            }
        });

        let failure = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(response))) => return Served::new(response, ServedFrom::Network),
            Ok(Ok(Err(e))) => e,
            Ok(Err(_)) => Error::NetworkFailure("fetch task ended without a result".into()),
            Err(_) => Error::Timeout(timeout.as_millis() as u64),
        };

        tracing::debug!(url = %request.url, error = %failure, "network-first falling back to cache");
        for role in [GenerationRole::Dynamic, GenerationRole::Static] {
            let generation = self.generations.current(role);
            if let Ok(response) = self.lookup(&generation, request).await {
                return Served::new(response, ServedFrom::CacheFallback);
            }
        }

        tracing::warn!(url = %request.url, error = %failure, "network-first failed with nothing cached");
        Served::unavailable()
    }

    /// Answer from cache immediately while refreshing the entry in the background.
    ///
    /// Without a stored entry the caller waits for that same background fetch.
    /// Background failures are logged and swallowed.
    pub async fn stale_while_revalidate(&self, request: &FetchRequest, keep_alive: &KeepAlive) -> Served {
        let generation = self.generations.current(GenerationRole::Static);

        let (tx, rx) = oneshot::channel();
        let engine = self.clone();
        let owned = request.clone();
        let target = generation.clone();
        keep_alive.extend(async move {
            let response = match engine.network.fetch(&owned, CacheMode::Default).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(url = %owned.url, error = %e, "revalidation failed");
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            if !response.ok() {
                tracing::debug!(url = %owned.url, status = response.status, "revalidation not cached");
                let _ = tx.send(Ok(response));
                return;
            }
            let fresh = response.clone();
            let _ = tx.send(Ok(response));
            engine.store(&target, &owned, &fresh).await;
        });

        if let Ok(response) = self.lookup(&generation, request).await {
            return Served::new(response, ServedFrom::Cache);
        }

        match rx.await {
            Ok(Ok(response)) => Served::new(response, ServedFrom::Network),
            Ok(Err(e)) => {
                tracing::warn!(url = %request.url, error = %e, "stale-while-revalidate miss while offline");
                Served::unavailable()
            }
            Err(_) => Served::unavailable(),
        }
    }

    /// Stored response for `request`, or `CacheMiss`.
    ///
    /// Storage failures are logged and returned; callers treat any error as a miss.
    async fn lookup(&self, generation: &Generation, request: &FetchRequest) -> Result<Response, Error> {
        match self.generations.match_request(generation, request).await {
            Ok(Some(response)) => {
                tracing::debug!(url = %request.url, generation = %generation.name, "cache hit");
                Ok(response)
            }
            Ok(None) => Err(Error::CacheMiss(format!("{} in {}", request.url, generation.name))),
            Err(e) => {
                tracing::warn!(url = %request.url, generation = %generation.name, error = %e, "cache read failed");
                Err(e)
            }
        }
    }

    /// Cache write that never fails the caller.
    async fn store(&self, generation: &Generation, request: &FetchRequest, response: &Response) {
        if let Err(e) = self.generations.put(generation, request, response).await {
            tracing::warn!(url = %request.url, generation = %generation.name, error = %e, "cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, MockNetwork};
    use waypost_core::WorkerDb;

    struct Fixture {
        engine: StrategyEngine,
        generations: GenerationManager,
        network: Arc<MockNetwork>,
    }

    async fn fixture(network: MockNetwork) -> Fixture {
        let config = Arc::new(WorkerConfig {
            critical_resources: vec!["/".into(), "/styles.css".into()],
            ..Default::default()
        });
        let network = Arc::new(network);
        let db = WorkerDb::open_in_memory().await.unwrap();
        let generations = GenerationManager::new(db, network.clone(), Arc::clone(&config)).unwrap();
        let engine = StrategyEngine::new(generations.clone(), network.clone(), config);
        Fixture { engine, generations, network }
    }

    fn page(body: &str) -> Response {
        Response::new(200, vec![("content-type".into(), "text/html".into())], body)
    }

    async fn seed(f: &Fixture, role: GenerationRole, url: &str, body: &str) {
        let generation = f.generations.open(role).await.unwrap();
        f.generations.put(&generation, &FetchRequest::get(url), &page(body)).await.unwrap();
    }

    async fn stored(f: &Fixture, role: GenerationRole, url: &str) -> Option<String> {
        let generation = f.generations.current(role);
        f.generations
            .match_request(&generation, &FetchRequest::get(url))
            .await
            .unwrap()
            .map(|r| r.text())
    }

    #[test]
    fn test_strategy_for_class() {
        let config = WorkerConfig::default();
        assert_eq!(Strategy::for_class(ResourceClass::Critical, &config), Strategy::CacheFirst);
        assert_eq!(Strategy::for_class(ResourceClass::Static, &config), Strategy::StaleWhileRevalidate);
        assert_eq!(
            Strategy::for_class(ResourceClass::Api, &config),
            Strategy::NetworkFirst(Duration::from_millis(2_500))
        );
        assert_eq!(
            Strategy::for_class(ResourceClass::Other, &config),
            Strategy::NetworkFirst(Duration::from_millis(3_000))
        );
    }

    #[tokio::test]
    async fn test_critical_served_without_network_after_install() {
        let f = fixture(MockNetwork::online()).await;
        f.generations.install().await.unwrap();
        f.network.reset_calls();

        for url in ["/", "/styles.css"] {
            let served = f.engine.handle(&FetchRequest::get(url), ResourceClass::Critical, &KeepAlive::new()).await;
            assert_eq!(served.source, ServedFrom::Cache);
            assert_eq!(served.response.text(), format!("fresh:{url}"));
        }
        assert_eq!(f.network.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let f = fixture(MockNetwork::online()).await;

        let served = f.engine.cache_first(&FetchRequest::get("/logos/acme.svg")).await;
        assert_eq!(served.source, ServedFrom::Network);
        assert_eq!(stored(&f, GenerationRole::Static, "/logos/acme.svg").await.as_deref(), Some("fresh:/logos/acme.svg"));
    }

    #[tokio::test]
    async fn test_cache_first_miss_offline_is_unavailable() {
        let f = fixture(MockNetwork::offline()).await;

        let served = f.engine.cache_first(&FetchRequest::get("/favicon.ico")).await;
        assert_eq!(served.source, ServedFrom::Unavailable);
        assert_eq!(served.response.status, 503);
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let f = fixture(MockNetwork::online()).await;
        f.network.route("/", Behavior::Respond(Response::new(500, Vec::new(), "boom")));

        let served = f.engine.cache_first(&FetchRequest::get("/")).await;
        assert_eq!(served.response.status, 500);
        assert!(stored(&f, GenerationRole::Static, "/").await.is_none());
    }

    #[tokio::test]
    async fn test_root_offline_served_from_static_generation() {
        let f = fixture(MockNetwork::offline()).await;
        seed(&f, GenerationRole::Static, "/", "<h1>home</h1>").await;

        let served = f.engine.handle(&FetchRequest::get("/"), ResourceClass::Critical, &KeepAlive::new()).await;
        assert_eq!(served.response, page("<h1>home</h1>"));
        assert!(served.response.ok());
        assert_eq!(f.network.call_count(), 0);
    }

    #[tokio::test]
    async fn test_static_returns_cached_and_revalidates() {
        let f = fixture(MockNetwork::online()).await;
        seed(&f, GenerationRole::Static, "/img/hero.png", "old").await;

        let keep_alive = KeepAlive::new();
        let served = f.engine.handle(&FetchRequest::get("/img/hero.png"), ResourceClass::Static, &keep_alive).await;
        assert_eq!(served.source, ServedFrom::Cache);
        assert_eq!(served.response.text(), "old");

        keep_alive.settled().await;
        assert_eq!(f.network.call_count(), 1);
        assert_eq!(stored(&f, GenerationRole::Static, "/img/hero.png").await.as_deref(), Some("fresh:/img/hero.png"));
    }

    #[tokio::test]
    async fn test_static_miss_waits_for_network() {
        let f = fixture(MockNetwork::online()).await;

        let keep_alive = KeepAlive::new();
        let served = f.engine.stale_while_revalidate(&FetchRequest::get("/app.js"), &keep_alive).await;
        assert_eq!(served.source, ServedFrom::Network);
        assert_eq!(served.response.text(), "fresh:/app.js");

        keep_alive.settled().await;
        assert_eq!(f.network.call_count(), 1);
        assert!(stored(&f, GenerationRole::Static, "/app.js").await.is_some());
    }

    #[tokio::test]
    async fn test_static_background_failure_is_swallowed() {
        let f = fixture(MockNetwork::offline()).await;
        seed(&f, GenerationRole::Static, "/fonts/a.woff2", "font").await;

        let keep_alive = KeepAlive::new();
        let served = f.engine.stale_while_revalidate(&FetchRequest::get("/fonts/a.woff2"), &keep_alive).await;
        keep_alive.settled().await;

        assert_eq!(served.response.text(), "font");
        assert_eq!(stored(&f, GenerationRole::Static, "/fonts/a.woff2").await.as_deref(), Some("font"));
    }

    #[tokio::test]
    async fn test_static_miss_offline_is_unavailable() {
        let f = fixture(MockNetwork::offline()).await;

        let served = f.engine.stale_while_revalidate(&FetchRequest::get("/missing.css"), &KeepAlive::new()).await;
        assert_eq!(served.source, ServedFrom::Unavailable);
        assert_eq!(served.response.status, 503);
    }

    #[tokio::test]
    async fn test_api_within_timeout_updates_dynamic() {
        let f = fixture(MockNetwork::online()).await;
        seed(&f, GenerationRole::Dynamic, "/api/posts", "stale").await;

        let keep_alive = KeepAlive::new();
        let served = f
            .engine
            .network_first(&FetchRequest::get("/api/posts"), Duration::from_millis(500), &keep_alive)
            .await;

        assert_eq!(served.source, ServedFrom::Network);
        assert_eq!(served.response.text(), "fresh:/api/posts");

        keep_alive.settled().await;
        assert_eq!(stored(&f, GenerationRole::Dynamic, "/api/posts").await.as_deref(), Some("fresh:/api/posts"));
    }

    #[tokio::test]
    async fn test_network_first_answers_before_cache_write() {
        let f = fixture(MockNetwork::online()).await;
        f.network.route(
            "/api/feed",
            Behavior::Delayed(Duration::from_millis(30), Response::new(200, Vec::new(), "feed")),
        );

        // Serving only has to wait for the network, not for the dynamic write.
        let keep_alive = KeepAlive::new();
        let served = f
            .engine
            .network_first(&FetchRequest::get("/api/feed"), Duration::from_millis(200), &keep_alive)
            .await;
        assert_eq!(served.source, ServedFrom::Network);
        assert_eq!(served.response.text(), "feed");

        keep_alive.settled().await;
        assert_eq!(keep_alive.pending(), 0);
        assert_eq!(stored(&f, GenerationRole::Dynamic, "/api/feed").await.as_deref(), Some("feed"));
    }

    #[tokio::test]
    async fn test_lookup_miss_is_cache_miss() {
        let f = fixture(MockNetwork::offline()).await;
        seed(&f, GenerationRole::Static, "/", "home").await;
        let generation = f.generations.current(GenerationRole::Static);

        let hit = f.engine.lookup(&generation, &FetchRequest::get("/")).await.unwrap();
        assert_eq!(hit.text(), "home");

        let miss = f.engine.lookup(&generation, &FetchRequest::get("/nowhere")).await.unwrap_err();
        assert!(matches!(miss, Error::CacheMiss(_)));
        assert!(miss.to_string().starts_with("CACHE_MISS"));
    }

    #[tokio::test]
    async fn test_api_past_timeout_returns_cached() {
        let f = fixture(MockNetwork::online()).await;
        f.network.route(
            "/api/posts",
            Behavior::Delayed(Duration::from_millis(300), Response::new(200, Vec::new(), "late")),
        );
        seed(&f, GenerationRole::Dynamic, "/api/posts", "cached").await;

        let keep_alive = KeepAlive::new();
        let served = f
            .engine
            .network_first(&FetchRequest::get("/api/posts"), Duration::from_millis(50), &keep_alive)
            .await;
        assert_eq!(served.source, ServedFrom::CacheFallback);
        assert_eq!(served.response.text(), "cached");

        keep_alive.settled().await;
        assert_eq!(stored(&f, GenerationRole::Dynamic, "/api/posts").await.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_network_first_offline_without_cache_is_unavailable() {
        let f = fixture(MockNetwork::offline()).await;

        let served = f.engine.handle(&FetchRequest::get("/about"), ResourceClass::Other, &KeepAlive::new()).await;
        assert_eq!(served.source, ServedFrom::Unavailable);
        assert_eq!(served.response.status, 503);
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_static() {
        let f = fixture(MockNetwork::offline()).await;
        seed(&f, GenerationRole::Static, "/about", "shell").await;

        let served = f.engine.handle(&FetchRequest::get("/about"), ResourceClass::Other, &KeepAlive::new()).await;
        assert_eq!(served.source, ServedFrom::CacheFallback);
        assert_eq!(served.response.text(), "shell");
    }

    #[tokio::test]
    async fn test_network_first_returns_error_status_uncached() {
        let f = fixture(MockNetwork::online()).await;
        f.network.route("/api/missing", Behavior::Respond(Response::new(404, Vec::new(), "nope")));

        let served = f
            .engine
            .network_first(&FetchRequest::get("/api/missing"), Duration::from_millis(500), &KeepAlive::new())
            .await;
        assert_eq!(served.source, ServedFrom::Network);
        assert_eq!(served.response.status, 404);
        assert!(stored(&f, GenerationRole::Dynamic, "/api/missing").await.is_none());
    }

    #[tokio::test]
    async fn test_network_first_bounds_dynamic_generation() {
        let network = Arc::new(MockNetwork::online());
        let config = Arc::new(WorkerConfig { max_dynamic_entries: 2, ..Default::default() });
        let db = WorkerDb::open_in_memory().await.unwrap();
        let generations = GenerationManager::new(db.clone(), network.clone(), Arc::clone(&config)).unwrap();
        let engine = StrategyEngine::new(generations, network, config);

        let keep_alive = KeepAlive::new();
        for path in ["/a", "/b", "/c"] {
            engine
                .network_first(&FetchRequest::get(path), Duration::from_millis(500), &keep_alive)
                .await;
            keep_alive.settled().await;
        }
        assert_eq!(db.entry_count("dynamic-v1").await.unwrap(), 2);
    }
}
