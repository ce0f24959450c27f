//! Scripted network for tests.
//!
//! Records every request it sees and answers according to, in order of
//! precedence: the next scripted behavior, a per-path route, the default.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use waypost_core::{CacheMode, Error, FetchRequest, Response};

use crate::fetch::Network;

/// How the mock answers one request.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// 200 with body `fresh:{path}`.
    Echo,
    Respond(Response),
    Delayed(Duration, Response),
    Fail,
}

/// A recorded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub request: FetchRequest,
    pub path: String,
    pub mode: CacheMode,
}

#[derive(Debug)]
pub struct MockNetwork {
    default: Mutex<Behavior>,
    routes: Mutex<HashMap<String, Behavior>>,
    script: Mutex<VecDeque<Behavior>>,
    calls: Mutex<Vec<Call>>,
}

impl MockNetwork {
    fn with_default(default: Behavior) -> Self {
        Self {
            default: Mutex::new(default),
            routes: Mutex::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every request succeeds with an echo of its path.
    pub fn online() -> Self {
        Self::with_default(Behavior::Echo)
    }

    /// Every request fails at the transport level.
    pub fn offline() -> Self {
        Self::with_default(Behavior::Fail)
    }

    pub fn set_default(&self, behavior: Behavior) {
        *self.default.lock().unwrap() = behavior;
    }

    /// Answer requests for `path` (including any query) with `behavior`.
    pub fn route(&self, path: &str, behavior: Behavior) -> &Self {
        self.routes.lock().unwrap().insert(path.to_string(), behavior);
        self
    }

    /// Queue behaviors consumed one per request before routes and the default apply.
    pub fn script(&self, behaviors: impl IntoIterator<Item = Behavior>) {
        self.script.lock().unwrap().extend(behaviors);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn path_of(request: &FetchRequest) -> String {
        match Url::parse("http://mock.invalid/").and_then(|base| base.join(&request.url)) {
            Ok(url) => match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            },
            Err(_) => request.url.clone(),
        }
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &FetchRequest, mode: CacheMode) -> Result<Response, Error> {
        let path = Self::path_of(request);
        self.calls
            .lock()
            .unwrap()
            .push(Call { request: request.clone(), path: path.clone(), mode });

        let scripted = self.script.lock().unwrap().pop_front();
        let behavior = match scripted {
            Some(behavior) => behavior,
            None => match self.routes.lock().unwrap().get(&path) {
                Some(behavior) => behavior.clone(),
                None => self.default.lock().unwrap().clone(),
            },
        };

        match behavior {
            Behavior::Echo => Ok(Response::new(200, Vec::new(), format!("fresh:{path}"))),
            Behavior::Respond(response) => Ok(response),
            Behavior::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Behavior::Fail => Err(Error::NetworkFailure(format!("mock network unreachable: {path}"))),
        }
    }
}
