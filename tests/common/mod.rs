//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use fieldsync::{DispatchError, Dispatcher, Operation};

/// Replies from a script, then falls back to `otherwise`. Records every call.
pub struct ScriptedDispatcher {
    replies: Mutex<VecDeque<Result<(), DispatchError>>>,
    otherwise: Result<(), DispatchError>,
    calls: Mutex<Vec<Operation>>,
}

impl ScriptedDispatcher {
    pub fn succeeding() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            otherwise: Ok(()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails the first `times` calls with `err`, then succeeds.
    pub fn failing(times: usize, err: DispatchError) -> Self {
        let d = Self::succeeding();
        d.replies
            .lock()
            .unwrap()
            .extend(std::iter::repeat(Err(err)).take(times));
        d
    }

    pub fn always_failing(err: DispatchError) -> Self {
        Self {
            otherwise: Err(err),
            ..Self::succeeding()
        }
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(&self, op: &Operation) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(op.clone());
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.otherwise.clone())
    }
}

/// Blocks every dispatch until released.
#[derive(Default)]
pub struct GatedDispatcher {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl Dispatcher for GatedDispatcher {
    async fn dispatch(&self, _op: &Operation) -> Result<(), DispatchError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

pub fn server_error() -> DispatchError {
    DispatchError::Http {
        status: 500,
        status_text: "Internal Server Error".to_string(),
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
