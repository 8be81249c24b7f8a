//! Watch adapter
//!
//! Turns the `HelmRepository` watch stream into `RepositoryEvent`s. The
//! watcher re-lists on (re)connect; objects missing from a re-list were
//! deleted while the watch was down and are reported as `Deleted`. After the
//! first complete list, cache entries for repositories that no longer exist
//! (removed while the engine was not running) are deleted through their lanes.

use chartdex_repo::RepositoryRef;
use futures::{Stream, TryStreamExt};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, ResourceExt};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::resources::{HelmRepository, HelmRepositorySpec};
use crate::sequencer::{RepositoryEvent, Sequencer};

/// Tracks known objects to classify watch events
#[derive(Default)]
pub struct EventTranslator {
    known: HashMap<RepositoryRef, HelmRepository>,
    /// Keys seen since the current re-list started
    relisting: Option<HashSet<RepositoryRef>>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&mut self, event: watcher::Event<HelmRepository>) -> Vec<RepositoryEvent> {
        match event {
            watcher::Event::Apply(repo) | watcher::Event::InitApply(repo) => {
                self.applied(repo)
            }
            watcher::Event::Delete(repo) => {
                let key = repo.key();
                self.known.remove(&key);
                if let Some(seen) = self.relisting.as_mut() {
                    seen.remove(&key);
                }
                vec![RepositoryEvent::Deleted(repo)]
            }
            watcher::Event::Init => {
                self.relisting = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitDone => {
                let seen = self.relisting.take().unwrap_or_default();
                let gone: Vec<RepositoryRef> = self
                    .known
                    .keys()
                    .filter(|k| !seen.contains(*k))
                    .cloned()
                    .collect();
                let mut events = Vec::with_capacity(gone.len());
                for key in gone {
                    if let Some(repo) = self.known.remove(&key) {
                        tracing::debug!(key = %key, "repository vanished during re-list");
                        events.push(RepositoryEvent::Deleted(repo));
                    }
                }
                events
            }
        }
    }

    /// Keys among `cached` that no listed object accounts for
    pub fn untracked(&self, cached: Vec<RepositoryRef>) -> Vec<RepositoryRef> {
        cached
            .into_iter()
            .filter(|key| !self.known.contains_key(key))
            .collect()
    }

    fn applied(&mut self, repo: HelmRepository) -> Vec<RepositoryEvent> {
        let key = repo.key();
        if let Some(seen) = self.relisting.as_mut() {
            seen.insert(key.clone());
        }

        let events = match self.known.get(&key) {
            None => vec![RepositoryEvent::Created(repo.clone())],
            // re-list replays objects we already hold
            Some(prev) if prev.resource_version() == repo.resource_version() => return Vec::new(),
            // same name, new object: deleted and recreated while we were away
            Some(prev) if prev.uid() != repo.uid() => vec![
                RepositoryEvent::Deleted(prev.clone()),
                RepositoryEvent::Created(repo.clone()),
            ],
            Some(_) => vec![RepositoryEvent::Updated(repo.clone())],
        };
        self.known.insert(key, repo);
        events
    }
}

/// Drive a watch event stream into the sequencer until it ends or `shutdown` fires
///
/// Events are submitted one at a time, which keeps per-key order.
pub async fn run_stream<S>(stream: S, sequencer: &Sequencer, shutdown: &CancellationToken) -> Result<()>
where
    S: Stream<Item = std::result::Result<watcher::Event<HelmRepository>, watcher::Error>>,
{
    futures::pin_mut!(stream);
    let mut translator = EventTranslator::new();
    let mut swept = false;

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.try_next() => next,
        };
        match next {
            Ok(Some(event)) => {
                let listed = matches!(event, watcher::Event::InitDone);
                for event in translator.translate(event) {
                    sequencer.submit(event).await?;
                }
                if listed && !swept {
                    sweep_orphans(&translator, sequencer).await?;
                    swept = true;
                }
            }
            Ok(None) => break,
            Err(e) => tracing::warn!("repository watch failed, retrying: {}", e),
        }
    }
    Ok(())
}

/// Queue a delete for every cached key the first full list did not contain
async fn sweep_orphans(translator: &EventTranslator, sequencer: &Sequencer) -> Result<()> {
    let cached = sequencer.store().keys().await?;
    let orphans = translator.untracked(cached);
    if !orphans.is_empty() {
        tracing::info!(count = orphans.len(), "removing cached indexes of deleted repositories");
    }
    for key in orphans {
        // only the key is known; no secret reference, so no secret is touched
        let last_known = HelmRepository::build(&key, HelmRepositorySpec::for_url(""));
        sequencer.submit(RepositoryEvent::Deleted(last_known)).await?;
    }
    Ok(())
}

/// Watch `HelmRepository` objects through `api` and feed the sequencer
pub async fn run(
    api: Api<HelmRepository>,
    sequencer: &Sequencer,
    shutdown: &CancellationToken,
) -> Result<()> {
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    tracing::info!("watching helm repositories");
    run_stream(stream, sequencer, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::HelmRepositorySpec;

    fn repo(name: &str, uid: &str, rv: &str) -> HelmRepository {
        let mut repo = HelmRepository::build(
            &RepositoryRef::new("ns1", name),
            HelmRepositorySpec::for_url("https://example.com/charts"),
        );
        repo.metadata.uid = Some(uid.to_string());
        repo.metadata.resource_version = Some(rv.to_string());
        repo
    }

    fn kinds(events: &[RepositoryEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind()).collect()
    }

    #[test]
    fn test_apply_then_update_then_delete() {
        let mut t = EventTranslator::new();
        assert_eq!(kinds(&t.translate(watcher::Event::Apply(repo("a", "u1", "1")))), vec!["created"]);
        assert_eq!(kinds(&t.translate(watcher::Event::Apply(repo("a", "u1", "2")))), vec!["updated"]);
        assert_eq!(kinds(&t.translate(watcher::Event::Delete(repo("a", "u1", "3")))), vec!["deleted"]);
        assert_eq!(kinds(&t.translate(watcher::Event::Apply(repo("a", "u2", "4")))), vec!["created"]);
    }

    #[test]
    fn test_relist_reports_vanished_objects() {
        let mut t = EventTranslator::new();
        t.translate(watcher::Event::Init);
        t.translate(watcher::Event::InitApply(repo("a", "u1", "1")));
        t.translate(watcher::Event::InitApply(repo("b", "u2", "2")));
        assert!(t.translate(watcher::Event::InitDone).is_empty());

        // watch reconnects; "b" was deleted meanwhile, "a" unchanged
        t.translate(watcher::Event::Init);
        assert!(t.translate(watcher::Event::InitApply(repo("a", "u1", "1"))).is_empty());
        let events = t.translate(watcher::Event::InitDone);
        assert_eq!(kinds(&events), vec!["deleted"]);
        assert_eq!(events[0].key(), RepositoryRef::new("ns1", "b"));
    }

    #[test]
    fn test_untracked_keys() {
        let mut t = EventTranslator::new();
        t.translate(watcher::Event::Init);
        t.translate(watcher::Event::InitApply(repo("a", "u1", "1")));
        t.translate(watcher::Event::InitDone);

        let cached = vec![RepositoryRef::new("ns1", "a"), RepositoryRef::new("ns1", "old")];
        assert_eq!(t.untracked(cached), vec![RepositoryRef::new("ns1", "old")]);
    }

    #[test]
    fn test_recreated_during_outage_is_created() {
        let mut t = EventTranslator::new();
        t.translate(watcher::Event::Apply(repo("a", "u1", "1")));
        t.translate(watcher::Event::Init);
        let events = t.translate(watcher::Event::InitApply(repo("a", "u9", "7")));
        assert_eq!(kinds(&events), vec!["deleted", "created"]);
        assert_eq!(events[0].repository().metadata.uid.as_deref(), Some("u1"));
        assert!(t.translate(watcher::Event::InitDone).is_empty());
    }
}
