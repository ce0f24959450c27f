//! Host side of the notification relay.
//!
//! Display calls become commands written to stdout. The set of open client
//! windows is whatever the host last reported in a `clients` frame.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use waypost_client::{ClientWindow, Notification, NotificationHost};
use waypost_core::Error;

/// Instruction for the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    ShowNotification { notification: Notification },
    CloseNotification { tag: String },
    Focus { client_id: String },
    OpenWindow { url: String },
}

#[derive(Debug)]
pub struct StdioHost {
    commands: mpsc::UnboundedSender<HostCommand>,
    clients: Mutex<Vec<ClientWindow>>,
}

impl StdioHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands, clients: Mutex::new(Vec::new()) }, rx)
    }

    /// Replace the registry of open client windows.
    pub fn set_clients(&self, clients: Vec<ClientWindow>) {
        tracing::debug!(count = clients.len(), "client registry updated");
        match self.clients.lock() {
            Ok(mut current) => *current = clients,
            Err(poisoned) => *poisoned.into_inner() = clients,
        }
    }

    fn send(&self, command: HostCommand) -> Result<(), Error> {
        self.commands
            .send(command)
            .map_err(|_| Error::Host("host command channel closed".into()))
    }
}

#[async_trait]
impl NotificationHost for StdioHost {
    async fn show_notification(&self, notification: &Notification) -> Result<(), Error> {
        self.send(HostCommand::ShowNotification { notification: notification.clone() })
    }

    async fn close_notification(&self, tag: &str) -> Result<(), Error> {
        self.send(HostCommand::CloseNotification { tag: tag.to_string() })
    }

    async fn clients(&self) -> Result<Vec<ClientWindow>, Error> {
        match self.clients.lock() {
            Ok(clients) => Ok(clients.clone()),
            Err(poisoned) => Ok(poisoned.into_inner().clone()),
        }
    }

    async fn focus(&self, client_id: &str) -> Result<(), Error> {
        self.send(HostCommand::Focus { client_id: client_id.to_string() })
    }

    async fn open_window(&self, url: &str) -> Result<(), Error> {
        self.send(HostCommand::OpenWindow { url: url.to_string() })
    }
}
