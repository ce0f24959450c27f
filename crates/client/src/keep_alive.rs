//! Explicit lifetime extension for work that outlives a response.
//!
//! A strategy that keeps working after it has answered (background
//! revalidation, a network race that lost to its timer) registers that work
//! here. The dispatcher hands the handle back to the host, which must not tear
//! the worker down until `settled` returns.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

/// Cloneable handle over the tasks an event is still waiting on.
///
/// Dropping the last handle without awaiting `settled` aborts outstanding work.
#[derive(Clone, Default)]
pub struct KeepAlive {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl std::fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAlive").field("pending", &self.pending()).finish()
    }
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the worker alive until `work` completes.
    pub fn extend<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.tasks.lock() {
            Ok(mut tasks) => {
                tasks.spawn(work);
            }
            Err(poisoned) => {
                poisoned.into_inner().spawn(work);
            }
        }
    }

    /// Number of tasks not yet reaped by `settled`.
    pub fn pending(&self) -> usize {
        match self.tasks.lock() {
            Ok(tasks) => tasks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Wait for every registered task, including ones registered while waiting.
    pub async fn settled(&self) {
        loop {
            let mut batch = match self.tasks.lock() {
                Ok(mut tasks) => std::mem::take(&mut *tasks),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            if batch.is_empty() {
                return;
            }
            while let Some(result) = batch.join_next().await {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "keep-alive task failed");
                }
            }
        }
    }
}
