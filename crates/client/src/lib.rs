//! Worker components for waypost.
//!
//! This crate provides the network seam, resource classification, cache
//! generation lifecycle, interception strategies, the offline submission queue
//! and the notification relay driven by the server's dispatcher.

pub mod classify;
pub mod fetch;
pub mod generations;
pub mod keep_alive;
pub mod notify;
pub mod queue;
pub mod strategy;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use classify::ResourceClassifier;
pub use fetch::{FetchConfig, HttpNetwork, Network};
pub use generations::{ActivateReport, Generation, GenerationManager, InstallReport};
pub use keep_alive::KeepAlive;
pub use notify::{
    ClickAction, ClickedNotification, ClientWindow, Notification, NotificationHost, NotificationRelay, PushOutcome,
    PushPayload,
};
pub use queue::{ReplayReport, SubmissionQueue, SubmitOutcome};
pub use strategy::{Served, ServedFrom, Strategy, StrategyEngine};
