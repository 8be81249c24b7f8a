//! Test doubles for driving the engine without a network
//!
//! `ScriptedFetcher` answers fetches from a per-URL script and can hold
//! fetches open until the test releases them, which is how lane races are
//! reproduced deterministically.

use async_trait::async_trait;
use chartdex_repo::{
    AuthMaterial, FetchSource, IndexFetcher, NormalizedIndex, PackageRecord, RepoError, Result,
    VersionRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

/// Canned outcome for one repository URL
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Index(NormalizedIndex),
    /// The remote answered with an auth failure, e.g. `401 Unauthorized`
    AuthFailed(String),
    NetworkError(String),
    ParseError(String),
}

/// `IndexFetcher` that replays scripted responses
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, ScriptedResponse>>,
    seen_auth: Mutex<Vec<(String, &'static str)>>,
    calls: AtomicUsize,
    started: Notify,
    gate: Mutex<Option<Arc<Semaphore>>>,
    honor_cancel: bool,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            seen_auth: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            started: Notify::new(),
            gate: Mutex::new(None),
            honor_cancel: true,
        }
    }

    pub fn respond(self, url: &str, response: ScriptedResponse) -> Self {
        self.set_response(url, response);
        self
    }

    /// Keep running fetches to completion even after cancellation
    pub fn ignore_cancellation(mut self) -> Self {
        self.honor_cancel = false;
        self
    }

    pub fn set_response(&self, url: &str, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// Block every fetch until a permit is added to the returned semaphore
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Number of fetches started so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Auth kind passed with every fetch, by URL
    pub fn seen_auth(&self) -> Vec<(String, &'static str)> {
        self.seen_auth.lock().unwrap().clone()
    }

    /// Wait until at least `n` fetches have started
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.started.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.calls() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl IndexFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        source: &FetchSource,
        auth: &AuthMaterial,
        cancel: &CancellationToken,
    ) -> Result<NormalizedIndex> {
        self.seen_auth
            .lock()
            .unwrap()
            .push((source.url.clone(), auth.kind()));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_waiters();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = if self.honor_cancel {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RepoError::Cancelled),
                    permit = gate.acquire() => permit,
                }
            } else {
                gate.acquire().await
            };
            if let Ok(permit) = permit {
                permit.forget();
            }
        }

        if self.honor_cancel && cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }

        let response = self.responses.lock().unwrap().get(&source.url).cloned();
        match response {
            Some(ScriptedResponse::Index(index)) => Ok(index),
            Some(ScriptedResponse::AuthFailed(status)) => Err(RepoError::AuthFailed {
                url: source.index_url(),
                status,
            }),
            Some(ScriptedResponse::NetworkError(message)) => Err(RepoError::NetworkError { message }),
            Some(ScriptedResponse::ParseError(message)) => {
                Err(RepoError::IndexParseError { message })
            }
            None => Err(RepoError::HttpError {
                url: source.index_url(),
                status: "404 Not Found".to_string(),
            }),
        }
    }
}

/// Index with one `1.0.0` version per package name
pub fn sample_index(packages: &[&str]) -> NormalizedIndex {
    NormalizedIndex {
        packages: packages
            .iter()
            .map(|name| PackageRecord {
                name: name.to_string(),
                description: Some(format!("{} chart", name)),
                versions: vec![VersionRecord {
                    version: "1.0.0".to_string(),
                    app_version: Some("1.0.0".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .collect(),
    }
}
