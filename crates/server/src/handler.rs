//! Worker event dispatcher.
//!
//! Routes each host event to the component that owns it and returns the
//! outcome together with the keep-alive handle for work that continues after
//! the reply. The host must not tear the worker down until that handle settles.

use std::borrow::Cow;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use waypost_client::{
    ActivateReport, ClickAction, ClickedNotification, GenerationManager, InstallReport, KeepAlive, Network,
    Notification, NotificationHost, NotificationRelay, PushOutcome, ReplayReport, ResourceClassifier, ServedFrom,
    StrategyEngine, SubmissionQueue, SubmitOutcome,
};
use waypost_core::{Error, FetchRequest, ResourceClass, Response, WorkerConfig, WorkerDb};

/// Event delivered by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchRequest),
    Sync { tag: String },
    Push { data: String },
    NotificationClick(ClickedNotification),
    /// A form submission to deliver now or queue.
    Submit { payload: Value },
    Message(WorkerMessage),
}

/// Control messages from page clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMessage {
    SkipWaiting,
    GetVersion,
    QueueStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Static generation populated; the worker asks to activate immediately.
    Installed { report: InstallReport, skip_waiting: bool },
    /// Stale generations retired; the worker claims open clients.
    Activated { report: ActivateReport, claim_clients: bool },
    Responded {
        #[serde(serialize_with = "wire_response")]
        response: Response,
        class: ResourceClass,
        source: ServedFrom,
    },
    /// Left to the host's own network stack.
    PassThrough { reason: String },
    Replayed(ReplayReport),
    SyncIgnored { tag: String },
    Notified { notification: Notification },
    PushDropped { reason: String },
    ClickRouted(ClickAction),
    Submitted(SubmitOutcome),
    Version { cache_id: String, generations: [String; 2] },
    QueueStatus { pending: u64 },
    SkipWaiting,
}

/// Outcome of one event plus the work it left running.
#[derive(Debug)]
pub struct Dispatched {
    pub outcome: Outcome,
    pub keep_alive: KeepAlive,
}

impl Dispatched {
    fn done(outcome: Outcome) -> Self {
        Self { outcome, keep_alive: KeepAlive::new() }
    }
}

/// Response bodies go over the wire as text when they are valid UTF-8 and as
/// standard base64 otherwise. `encoding` names which one the host must undo.
fn wire_response<S: Serializer>(response: &Response, serializer: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Wire<'a> {
        status: u16,
        headers: &'a [(String, String)],
        encoding: &'static str,
        body: Cow<'a, str>,
    }

    let (encoding, body) = match std::str::from_utf8(&response.body) {
        Ok(text) => ("utf8", Cow::Borrowed(text)),
        Err(_) => ("base64", Cow::Owned(STANDARD.encode(&response.body))),
    };
    Wire { status: response.status, headers: &response.headers, encoding, body }.serialize(serializer)
}

/// All worker components, wired from one configuration.
#[derive(Clone)]
pub struct Worker {
    config: Arc<WorkerConfig>,
    classifier: Arc<ResourceClassifier>,
    generations: GenerationManager,
    strategies: StrategyEngine,
    queue: SubmissionQueue,
    relay: NotificationRelay,
}

impl Worker {
    pub fn new(
        config: WorkerConfig, db: WorkerDb, network: Arc<dyn Network>, host: Arc<dyn NotificationHost>,
    ) -> Result<Self, Error> {
        let config = Arc::new(config);
        let classifier = Arc::new(ResourceClassifier::new(&config)?);
        let generations = GenerationManager::new(db.clone(), Arc::clone(&network), Arc::clone(&config))?;
        let strategies = StrategyEngine::new(generations.clone(), Arc::clone(&network), Arc::clone(&config));
        let queue = SubmissionQueue::new(db, network, &config)?;
        let relay = NotificationRelay::new(host, &config)?;

        Ok(Self { config, classifier, generations, strategies, queue, relay })
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> Result<Dispatched, Error> {
        match event {
            WorkerEvent::Install => {
                let report = self.generations.install().await?;
                Ok(Dispatched::done(Outcome::Installed { report, skip_waiting: true }))
            }
            WorkerEvent::Activate => {
                let report = self.generations.activate().await?;
                Ok(Dispatched::done(Outcome::Activated { report, claim_clients: true }))
            }
            WorkerEvent::Fetch(request) => Ok(self.fetch(request).await),
            WorkerEvent::Sync { tag } => {
                if tag != self.config.sync_tag {
                    tracing::debug!(%tag, "ignoring unknown sync tag");
                    return Ok(Dispatched::done(Outcome::SyncIgnored { tag }));
                }
                let report = self.queue.trigger_replay().await?;
                Ok(Dispatched::done(Outcome::Replayed(report)))
            }
            WorkerEvent::Push { data } => match self.relay.on_push(&data).await? {
                PushOutcome::Shown { notification } => Ok(Dispatched::done(Outcome::Notified { notification })),
                PushOutcome::Dropped { reason } => Ok(Dispatched::done(Outcome::PushDropped { reason })),
            },
            WorkerEvent::NotificationClick(clicked) => {
                let action = self.relay.on_click(&clicked).await?;
                Ok(Dispatched::done(Outcome::ClickRouted(action)))
            }
            WorkerEvent::Submit { payload } => {
                let outcome = self.queue.submit(&payload).await?;
                Ok(Dispatched::done(Outcome::Submitted(outcome)))
            }
            WorkerEvent::Message(message) => self.message(message).await,
        }
    }

    async fn fetch(&self, request: FetchRequest) -> Dispatched {
        if !request.is_get() {
            return Dispatched::done(Outcome::PassThrough { reason: format!("{} is not intercepted", request.method) });
        }
        let url = match self.generations.canonical_url(&request) {
            Ok(url) => url,
            Err(e) => return Dispatched::done(Outcome::PassThrough { reason: e.to_string() }),
        };

        let class = self.classifier.classify(&url);
        let keep_alive = KeepAlive::new();
        let served = self.strategies.handle(&request, class, &keep_alive).await;
        tracing::info!(
            url = %url,
            class = class.as_str(),
            source = ?served.source,
            status = served.response.status,
            offline = served.response.is_synthetic(),
            "served"
        );

        Dispatched {
            outcome: Outcome::Responded { response: served.response, class, source: served.source },
            keep_alive,
        }
    }

    async fn message(&self, message: WorkerMessage) -> Result<Dispatched, Error> {
        let outcome = match message {
            WorkerMessage::SkipWaiting => Outcome::SkipWaiting,
            WorkerMessage::GetVersion => Outcome::Version {
                cache_id: self.config.composite_cache_id(),
                generations: self.config.allowed_generations(),
            },
            WorkerMessage::QueueStatus => Outcome::QueueStatus { pending: self.queue.count().await? },
        };
        Ok(Dispatched::done(outcome))
    }
}
