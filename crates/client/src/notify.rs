//! Notification relay.
//!
//! Turns pushed payloads into notifications and routes clicks to an open
//! client window, opening a new one only when none already shows the target.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;
use waypost_core::{Error, WorkerConfig};

use crate::fetch::canonicalize;

/// Payload delivered by the push service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl PushPayload {
    /// Parse the raw push data.
    ///
    /// # Errors
    ///
    /// `MalformedPushPayload` when the data is not JSON, misses a required
    /// field, or carries an empty title.
    pub fn parse(data: &str) -> Result<Self, Error> {
        let payload: Self = serde_json::from_str(data).map_err(|e| Error::MalformedPushPayload(e.to_string()))?;
        if payload.title.trim().is_empty() {
            return Err(Error::MalformedPushPayload("empty title".into()));
        }
        Ok(payload)
    }
}

/// A notification as handed to the host for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Replaces any earlier notification with the same tag.
    pub tag: String,
    /// Click target.
    pub url: String,
}

/// A notification the user clicked, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickedNotification {
    pub tag: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// An open window controlled by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientWindow {
    pub id: String,
    pub url: String,
}

/// Display surface provided by the host runtime.
#[async_trait]
pub trait NotificationHost: Send + Sync {
    async fn show_notification(&self, notification: &Notification) -> Result<(), Error>;
    async fn close_notification(&self, tag: &str) -> Result<(), Error>;
    async fn clients(&self) -> Result<Vec<ClientWindow>, Error>;
    async fn focus(&self, client_id: &str) -> Result<(), Error>;
    async fn open_window(&self, url: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PushOutcome {
    Shown { notification: Notification },
    Dropped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClickAction {
    Focused { client_id: String, url: String },
    Opened { url: String },
}

#[derive(Clone)]
pub struct NotificationRelay {
    host: Arc<dyn NotificationHost>,
    origin: Url,
    icon: Option<String>,
    badge: Option<String>,
    default_url: String,
}

impl NotificationRelay {
    pub fn new(host: Arc<dyn NotificationHost>, config: &WorkerConfig) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self {
            host,
            origin,
            icon: config.notification_icon.clone(),
            badge: config.notification_badge.clone(),
            default_url: config.default_click_url.clone(),
        })
    }

    /// Show a notification for `data`.
    ///
    /// A malformed payload is dropped rather than returned as an error. The
    /// display call has been issued by the time this returns; a host failure
    /// is terminal for this notification.
    pub async fn on_push(&self, data: &str) -> Result<PushOutcome, Error> {
        let payload = match PushPayload::parse(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "dropping push event");
                return Ok(PushOutcome::Dropped { reason: e.to_string() });
            }
        };

        let target = self.target(payload.url.as_deref())?;
        let notification = Notification {
            title: payload.title,
            body: payload.body,
            icon: self.icon.clone(),
            badge: self.badge.clone(),
            tag: target.to_string(),
            url: target.to_string(),
        };

        self.host.show_notification(&notification).await?;
        tracing::info!(tag = %notification.tag, "notification shown");
        Ok(PushOutcome::Shown { notification })
    }

    /// Close the notification and bring its target into view.
    pub async fn on_click(&self, clicked: &ClickedNotification) -> Result<ClickAction, Error> {
        self.host.close_notification(&clicked.tag).await?;

        let target = self.target(clicked.url.as_deref())?;
        let existing = self
            .host
            .clients()
            .await?
            .into_iter()
            .find(|client| canonicalize(&client.url, &self.origin).is_ok_and(|url| url == target));

        match existing {
            Some(client) => {
                self.host.focus(&client.id).await?;
                tracing::debug!(client = %client.id, url = %target, "focused existing client");
                Ok(ClickAction::Focused { client_id: client.id, url: target.to_string() })
            }
            None => {
                self.host.open_window(target.as_str()).await?;
                tracing::debug!(url = %target, "opened new client");
                Ok(ClickAction::Opened { url: target.to_string() })
            }
        }
    }

    fn target(&self, url: Option<&str>) -> Result<Url, Error> {
        let raw = url.filter(|u| !u.trim().is_empty()).unwrap_or(&self.default_url);
        canonicalize(raw, &self.origin).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))
    }
}
