//! Offline submission queue.
//!
//! Durable FIFO of form submissions that could not be delivered. Replay is
//! sequential and stops at the first failure so a retried item is never
//! overtaken by a later one. Passes never overlap: a trigger that arrives
//! while one is running waits for it and then replays whatever is left.
//!
//! Delivery is at-least-once: a crash between the endpoint accepting an item
//! and the local delete replays it again on the next trigger.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;
use waypost_core::{CacheMode, Error, FetchRequest, QueuedSubmission, WorkerConfig, WorkerDb};

use crate::fetch::Network;

/// What happened to a submission offered through [`SubmissionQueue::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Delivered,
    Queued { id: i64 },
    Rejected { status: u16 },
}

/// Summary of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub delivered: Vec<i64>,
    pub remaining: usize,
    /// Set when the pass stopped early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

#[derive(Clone)]
pub struct SubmissionQueue {
    db: WorkerDb,
    network: Arc<dyn Network>,
    endpoint: Url,
    replay_lock: Arc<Mutex<()>>,
}

impl SubmissionQueue {
    pub fn new(db: WorkerDb, network: Arc<dyn Network>, config: &WorkerConfig) -> Result<Self, Error> {
        let endpoint = config
            .resolve(&config.replay_endpoint)
            .map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self { db, network, endpoint, replay_lock: Arc::new(Mutex::new(())) })
    }

    /// Append `payload` to the durable queue.
    ///
    /// # Errors
    ///
    /// Storage failures are returned to the caller, never swallowed.
    pub async fn enqueue(&self, payload: &Value) -> Result<QueuedSubmission, Error> {
        let submission = self.db.insert_submission(payload).await?;
        tracing::info!(id = submission.id, "submission queued");
        Ok(submission)
    }

    /// Pending submissions in creation order.
    pub async fn pending(&self) -> Result<Vec<QueuedSubmission>, Error> {
        self.db.pending_submissions().await
    }

    pub async fn count(&self) -> Result<u64, Error> {
        self.db.submission_count().await
    }

    /// Try to deliver `payload` now, queueing it if the network is unreachable.
    pub async fn submit(&self, payload: &Value) -> Result<SubmitOutcome, Error> {
        match self.deliver(payload).await {
            Ok(()) => Ok(SubmitOutcome::Delivered),
            Err(Error::RemoteRejection { status }) => {
                tracing::info!(status, "submission rejected by endpoint");
                Ok(SubmitOutcome::Rejected { status })
            }
            Err(e) if e.is_network() => {
                tracing::debug!(error = %e, "delivery failed, queueing submission");
                let submission = self.enqueue(payload).await?;
                Ok(SubmitOutcome::Queued { id: submission.id })
            }
            Err(e) => Err(e),
        }
    }

    /// Replay every pending submission in order.
    ///
    /// Each item is removed only after a 2xx reply. The first network failure
    /// or non-2xx reply ends the pass and leaves that item and everything after
    /// it queued.
    pub async fn trigger_replay(&self) -> Result<ReplayReport, Error> {
        let _pass = self.replay_lock.lock().await;
        let pending = self.pending().await?;
        let total = pending.len();
        let mut report = ReplayReport::default();

        for submission in pending {
            if let Err(e) = self.deliver(&submission.payload).await {
                tracing::warn!(id = submission.id, error = %e, "replay halted");
                report.halted = Some(e.to_string());
                break;
            }
            self.db.delete_submission(submission.id).await?;
            tracing::debug!(id = submission.id, "submission replayed");
            report.delivered.push(submission.id);
        }

        report.remaining = total - report.delivered.len();
        tracing::info!(delivered = report.delivered.len(), remaining = report.remaining, "replay pass finished");
        Ok(report)
    }

    async fn deliver(&self, payload: &Value) -> Result<(), Error> {
        let request = FetchRequest::post_json(self.endpoint.as_str(), payload)?;
        let response = self.network.fetch(&request, CacheMode::Default).await?;
        if response.ok() {
            Ok(())
        } else {
            Err(Error::RemoteRejection { status: response.status })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, MockNetwork};
    use serde_json::json;
    use std::time::Duration;
    use waypost_core::Response;

    async fn queue(network: Arc<MockNetwork>) -> SubmissionQueue {
        let db = WorkerDb::open_in_memory().await.unwrap();
        SubmissionQueue::new(db, network, &WorkerConfig::default()).unwrap()
    }

    fn delivered_payloads(network: &MockNetwork) -> Vec<Value> {
        network
            .calls()
            .into_iter()
            .map(|c| serde_json::from_slice(c.request.body.as_deref().unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_enqueue_assigns_increasing_ids() {
        let q = queue(Arc::new(MockNetwork::offline())).await;
        let a = q.enqueue(&json!({"name": "a"})).await.unwrap();
        let b = q.enqueue(&json!({"name": "b"})).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(q.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replay_delivers_in_order_and_drains() {
        let network = Arc::new(MockNetwork::offline());
        let q = queue(Arc::clone(&network)).await;
        for name in ["A", "B", "C"] {
            q.enqueue(&json!({ "name": name })).await.unwrap();
        }

        network.set_default(Behavior::Respond(Response::new(201, Vec::new(), "")));
        let report = q.trigger_replay().await.unwrap();

        assert_eq!(report.delivered.len(), 3);
        assert_eq!(report.remaining, 0);
        assert!(report.halted.is_none());
        assert_eq!(
            delivered_payloads(&network),
            vec![json!({"name": "A"}), json!({"name": "B"}), json!({"name": "C"})]
        );
        assert!(q.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_posts_json_to_endpoint() {
        let network = Arc::new(MockNetwork::online());
        let q = queue(Arc::clone(&network)).await;
        q.enqueue(&json!({"email": "x@example.com"})).await.unwrap();

        q.trigger_replay().await.unwrap();

        let calls = network.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].request.method, "POST");
        assert_eq!(calls[0].request.url, "http://localhost:8080/api/contact");
        assert!(
            calls[0]
                .request
                .headers
                .iter()
                .any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v == "application/json")
        );
    }

    #[tokio::test]
    async fn test_replay_halts_at_first_failure() {
        let network = Arc::new(MockNetwork::offline());
        let q = queue(Arc::clone(&network)).await;
        q.enqueue(&json!({"name": "A"})).await.unwrap();
        q.enqueue(&json!({"name": "B"})).await.unwrap();

        let report = q.trigger_replay().await.unwrap();
        assert!(report.delivered.is_empty());
        assert_eq!(report.remaining, 2);
        assert!(report.halted.is_some());
        assert_eq!(network.call_count(), 1);
        let names: Vec<_> = q.pending().await.unwrap().into_iter().map(|s| s.payload["name"].clone()).collect();
        assert_eq!(names, vec![json!("A"), json!("B")]);

        network.set_default(Behavior::Echo);
        network.reset_calls();
        let report = q.trigger_replay().await.unwrap();
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(delivered_payloads(&network), vec![json!({"name": "A"}), json!({"name": "B"})]);
        assert_eq!(q.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replay_halts_on_rejection() {
        let network = Arc::new(MockNetwork::online());
        network.script([Behavior::Echo, Behavior::Respond(Response::new(500, Vec::new(), "down"))]);
        let q = queue(Arc::clone(&network)).await;
        for name in ["A", "B", "C"] {
            q.enqueue(&json!({ "name": name })).await.unwrap();
        }

        let report = q.trigger_replay().await.unwrap();
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(network.call_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_replay_delivers_once() {
        let network = Arc::new(MockNetwork::offline());
        let q = queue(Arc::clone(&network)).await;
        q.enqueue(&json!({"name": "A"})).await.unwrap();
        q.enqueue(&json!({"name": "B"})).await.unwrap();

        network.set_default(Behavior::Delayed(Duration::from_millis(50), Response::new(200, Vec::new(), "")));
        let second = q.clone();
        let (a, b) = tokio::join!(q.trigger_replay(), second.trigger_replay());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(network.call_count(), 2);
        assert_eq!(a.delivered.len() + b.delivered.len(), 2);
        assert_eq!(delivered_payloads(&network), vec![json!({"name": "A"}), json!({"name": "B"})]);
        assert_eq!(q.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replay_empty_queue() {
        let network = Arc::new(MockNetwork::online());
        let q = queue(Arc::clone(&network)).await;
        assert_eq!(q.trigger_replay().await.unwrap(), ReplayReport::default());
        assert_eq!(network.call_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_online_delivers() {
        let q = queue(Arc::new(MockNetwork::online())).await;
        assert_eq!(q.submit(&json!({"m": 1})).await.unwrap(), SubmitOutcome::Delivered);
        assert_eq!(q.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_offline_queues() {
        let q = queue(Arc::new(MockNetwork::offline())).await;
        let outcome = q.submit(&json!({"m": 1})).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(q.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejected_is_not_queued() {
        let network = Arc::new(MockNetwork::online());
        network.route("/api/contact", Behavior::Respond(Response::new(422, Vec::new(), "bad")));
        let q = queue(network).await;

        assert_eq!(q.submit(&json!({})).await.unwrap(), SubmitOutcome::Rejected { status: 422 });
        assert_eq!(q.count().await.unwrap(), 0);
    }
}
