//! End-to-end scenarios: service writes, watch events, lanes and the cache
//!
//! The cluster is the in-memory `MockCluster`; watch events are fed through
//! the same translator the live watch loop uses.

use chartdex_kube::testing::{ScriptedFetcher, ScriptedResponse, sample_index};
use chartdex_kube::{
    AccessRule, Authorizer, Caller, CredentialInput, EngineConfig, EventTranslator, HelmRepository,
    KubeError, MockCluster, RepositoryEvent, RepositoryRequest, RepositoryService, Resource,
    RetryPolicy, SecretMode, Sequencer, StaticAccessReviewer, StatusReason, Verb, watch,
};
use chartdex_repo::{
    IndexCacheEntry, IndexFetcher, IndexStore, MemoryIndexStore, RemoteIndexFetcher, RepositoryRef,
};
use kube::runtime::watcher;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const URL: &str = "https://charts.bitnami.com/bitnami";

struct Engine {
    cluster: Arc<MockCluster>,
    store: Arc<MemoryIndexStore>,
    sequencer: Sequencer,
    service: RepositoryService,
    translator: EventTranslator,
}

impl Engine {
    fn new(fetcher: Arc<dyn IndexFetcher>, reviewer: StaticAccessReviewer, mode: SecretMode) -> Self {
        let config = EngineConfig {
            secret_mode: mode,
            retry: RetryPolicy {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(1),
            },
            ..Default::default()
        };
        let cluster = Arc::new(MockCluster::new());
        let store = Arc::new(MemoryIndexStore::new());
        let sequencer = Sequencer::new(store.clone(), fetcher, cluster.clone(), config.sequencer());
        let service = RepositoryService::new(
            cluster.clone(),
            Authorizer::new(Arc::new(reviewer)),
            store.clone(),
            &config,
        )
        .with_sequencer(sequencer.clone());

        Self {
            cluster,
            store,
            sequencer,
            service,
            translator: EventTranslator::new(),
        }
    }

    /// Deliver a watch event the way the watch loop does
    async fn observe(&mut self, event: watcher::Event<HelmRepository>) {
        for event in self.translator.translate(event) {
            self.sequencer.submit(event).await.unwrap();
        }
    }

    /// The source controller reconciles `key`, and the watch reports it
    async fn reconcile(&mut self, key: &RepositoryRef) -> HelmRepository {
        let ready = self.cluster.mark_ready(key, "sha256:0123").unwrap();
        self.observe(watcher::Event::Apply(ready.clone())).await;
        ready
    }

    async fn settle(&self) {
        self.sequencer.wait_idle().await;
    }
}

fn admin() -> Caller {
    Caller::new("admin")
}

fn basic(username: &str, password: &str) -> CredentialInput {
    CredentialInput::Basic {
        username: username.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn delete_during_fetch_leaves_nothing_behind() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().respond(URL, ScriptedResponse::Index(sample_index(&["nginx"]))),
    );
    let gate = fetcher.hold();
    let mut engine = Engine::new(
        fetcher.clone(),
        StaticAccessReviewer::permissive(),
        SecretMode::SystemManaged,
    );

    let key = RepositoryRef::new("default", "bitnami-1");
    engine
        .service
        .add_repository(
            &admin(),
            RepositoryRequest::new(key.clone(), URL).with_credentials(basic("foo", "bar")),
        )
        .await
        .unwrap();
    let ready = engine.reconcile(&key).await;
    fetcher.wait_for_calls(1).await;

    engine.service.delete_repository(&admin(), &key).await.unwrap();
    engine.observe(watcher::Event::Delete(ready)).await;
    gate.add_permits(1);
    engine.settle().await;

    assert!(engine.store.keys().await.unwrap().is_empty());
    assert_eq!(engine.cluster.repository_count(), 0);
    assert_eq!(engine.cluster.secret_count(), 0);
    assert_eq!(engine.sequencer.lane_count(), 0);
}

#[tokio::test]
async fn replayed_events_fetch_once() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().respond(URL, ScriptedResponse::Index(sample_index(&["nginx", "redis"]))),
    );
    let mut engine = Engine::new(
        fetcher.clone(),
        StaticAccessReviewer::permissive(),
        SecretMode::SystemManaged,
    );

    let key = RepositoryRef::new("default", "bitnami");
    engine
        .service
        .add_repository(&admin(), RepositoryRequest::new(key.clone(), URL))
        .await
        .unwrap();
    let ready = engine.reconcile(&key).await;
    engine.settle().await;

    for _ in 0..3 {
        engine
            .sequencer
            .submit(RepositoryEvent::Updated(ready.clone()))
            .await
            .unwrap();
    }
    engine.settle().await;

    assert_eq!(fetcher.calls(), 1);
    let detail = engine.service.get_repository_detail(&admin(), &key).await.unwrap();
    assert_eq!(detail.summary.status.reason, StatusReason::Succeeded);
    assert_eq!(detail.package_count, Some(2));
}

#[tokio::test]
async fn many_repositories_deleted_leave_no_orphans() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().respond(URL, ScriptedResponse::Index(sample_index(&["nginx"]))),
    );
    let mut engine = Engine::new(fetcher, StaticAccessReviewer::permissive(), SecretMode::SystemManaged);

    let mut ready = Vec::new();
    for i in 0..5 {
        let key = RepositoryRef::new("default", format!("repo-{}", i));
        engine
            .service
            .add_repository(
                &admin(),
                RepositoryRequest::new(key.clone(), URL).with_credentials(basic("foo", "bar")),
            )
            .await
            .unwrap();
        ready.push(engine.reconcile(&key).await);
    }
    engine.settle().await;
    assert_eq!(engine.store.keys().await.unwrap().len(), 5);
    assert_eq!(engine.cluster.secret_count(), 5);

    for repo in ready {
        engine.service.delete_repository(&admin(), &repo.key()).await.unwrap();
        engine.observe(watcher::Event::Delete(repo)).await;
    }
    engine.settle().await;

    assert!(engine.store.keys().await.unwrap().is_empty());
    assert_eq!(engine.cluster.secret_count(), 0);
}

#[tokio::test]
async fn wrong_basic_auth_fails_with_401_and_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private/index.yaml"))
        .and(header("Authorization", "Basic Zm9vOmJhcg=="))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "apiVersion: v1\nentries:\n  podinfo:\n    - name: podinfo\n      version: 6.1.6\n",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut engine = Engine::new(
        Arc::new(RemoteIndexFetcher::new()),
        StaticAccessReviewer::permissive(),
        SecretMode::SystemManaged,
    );
    let key = RepositoryRef::new("default", "private");
    let url = format!("{}/private", server.uri());

    engine
        .service
        .add_repository(
            &admin(),
            RepositoryRequest::new(key.clone(), &url).with_credentials(basic("foo", "wrong")),
        )
        .await
        .unwrap();
    engine.reconcile(&key).await;
    engine.settle().await;

    assert!(engine.store.get(&key).await.unwrap().is_none());
    let status = engine
        .service
        .get_repository_detail(&admin(), &key)
        .await
        .unwrap()
        .summary
        .status;
    assert_eq!(status.reason, StatusReason::Failed);
    assert!(status.user_message.contains("401 Unauthorized"), "{}", status.user_message);

    // Fixing the password refetches the same object version
    let updated = engine
        .service
        .update_repository(
            &admin(),
            RepositoryRequest::new(key.clone(), &url).with_credentials(basic("foo", "bar")),
        )
        .await
        .unwrap();
    engine.observe(watcher::Event::Apply(updated)).await;
    engine.settle().await;

    let detail = engine.service.get_repository_detail(&admin(), &key).await.unwrap();
    assert_eq!(detail.summary.status.reason, StatusReason::Succeeded);
    assert_eq!(detail.package_count, Some(1));
    assert!(engine.sequencer.failure(&key).is_none());
}

#[tokio::test]
async fn callers_only_see_what_they_may_list() {
    let reviewer = StaticAccessReviewer::new()
        .allow(
            AccessRule::for_user("admin")
                .verbs(&[Verb::Get, Verb::List, Verb::Create, Verb::Update, Verb::Delete])
                .resources(&[Resource::HelmRepositories, Resource::Secrets]),
        )
        .allow(
            AccessRule::for_group("team-a")
                .verbs(&[Verb::Get, Verb::List, Verb::Create])
                .resources(&[Resource::HelmRepositories])
                .in_namespaces(&["team-a"]),
        );
    let engine = Engine::new(
        Arc::new(ScriptedFetcher::new()),
        reviewer,
        SecretMode::SystemManaged,
    );
    for ns in ["team-a", "team-b"] {
        engine
            .service
            .add_repository(&admin(), RepositoryRequest::new(RepositoryRef::new(ns, "charts"), URL))
            .await
            .unwrap();
    }

    let dev = Caller::new("dev").with_groups(&["team-a"]);
    let visible = engine.service.get_repository_summaries(&dev, None).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].namespace, "team-a");

    let outsider = Caller::new("outsider");
    assert!(engine
        .service
        .get_repository_summaries(&outsider, None)
        .await
        .unwrap()
        .is_empty());

    let err = engine
        .service
        .add_repository(&dev, RepositoryRequest::new(RepositoryRef::new("team-b", "mine"), URL))
        .await
        .unwrap_err();
    assert!(matches!(err, KubeError::PermissionDenied { .. }));

    let err = engine
        .service
        .get_repository_detail(&outsider, &RepositoryRef::new("team-b", "charts"))
        .await
        .unwrap_err();
    assert!(matches!(err, KubeError::PermissionDenied { .. }));
}

#[tokio::test]
async fn user_managed_update_with_missing_secret_is_not_partial() {
    let engine = Engine::new(
        Arc::new(ScriptedFetcher::new()),
        StaticAccessReviewer::permissive(),
        SecretMode::UserManaged,
    );
    let key = RepositoryRef::new("default", "bitnami");
    engine
        .service
        .add_repository(&admin(), RepositoryRequest::new(key.clone(), URL))
        .await
        .unwrap();
    engine.cluster.reset_counts();

    let err = engine
        .service
        .update_repository(
            &admin(),
            RepositoryRequest::new(key.clone(), "https://example.com/other")
                .with_credentials(CredentialInput::SecretRef("does-not-exist".into())),
        )
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    let counts = engine.cluster.operation_counts();
    assert_eq!(counts.updates, 0);
    assert_eq!(counts.secret_creates, 0);
    assert_eq!(engine.cluster.repository(&key).unwrap().spec.url, URL);
}

#[tokio::test]
async fn update_conflicts_are_retried_then_given_up() {
    let engine = Engine::new(
        Arc::new(ScriptedFetcher::new()),
        StaticAccessReviewer::permissive(),
        SecretMode::SystemManaged,
    );
    let key = RepositoryRef::new("default", "bitnami");
    engine
        .service
        .add_repository(&admin(), RepositoryRequest::new(key.clone(), URL))
        .await
        .unwrap();

    engine.cluster.inject_conflicts(3);
    let updated = engine
        .service
        .update_repository(&admin(), RepositoryRequest::new(key.clone(), URL).with_interval("1m"))
        .await
        .unwrap();
    assert_eq!(updated.spec.interval, "1m");

    engine.cluster.inject_conflicts(50);
    let err = engine
        .service
        .update_repository(&admin(), RepositoryRequest::new(key.clone(), URL).with_interval("2m"))
        .await
        .unwrap_err();
    assert!(matches!(err, KubeError::RetriesExhausted { attempts: 5, .. }));
    assert_eq!(engine.cluster.repository(&key).unwrap().spec.interval, "1m");
}

#[tokio::test]
async fn watch_stream_drives_the_cache() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().respond(URL, ScriptedResponse::Index(sample_index(&["nginx"]))),
    );
    let engine = Engine::new(fetcher, StaticAccessReviewer::permissive(), SecretMode::SystemManaged);

    let keep = RepositoryRef::new("default", "keep");
    let gone = RepositoryRef::new("default", "gone");
    for key in [&keep, &gone] {
        engine
            .service
            .add_repository(&admin(), RepositoryRequest::new(key.clone(), URL))
            .await
            .unwrap();
    }
    let keep_ready = engine.cluster.mark_ready(&keep, "sha256:1").unwrap();
    let gone_ready = engine.cluster.mark_ready(&gone, "sha256:1").unwrap();

    // Initial list, then a reconnect whose re-list no longer contains "gone"
    let events: Vec<Result<watcher::Event<HelmRepository>, watcher::Error>> = vec![
        Ok(watcher::Event::Init),
        Ok(watcher::Event::InitApply(keep_ready.clone())),
        Ok(watcher::Event::InitApply(gone_ready)),
        Ok(watcher::Event::InitDone),
        Ok(watcher::Event::Init),
        Ok(watcher::Event::InitApply(keep_ready)),
        Ok(watcher::Event::InitDone),
    ];
    watch::run_stream(futures::stream::iter(events), &engine.sequencer, &CancellationToken::new())
        .await
        .unwrap();
    engine.settle().await;

    assert_eq!(engine.store.keys().await.unwrap(), vec![keep]);
}

#[tokio::test]
async fn restart_drops_indexes_of_repositories_deleted_while_down() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().respond(URL, ScriptedResponse::Index(sample_index(&["nginx"]))),
    );
    let engine = Engine::new(fetcher, StaticAccessReviewer::permissive(), SecretMode::SystemManaged);

    // Left behind by the previous run; the object is gone from the cluster
    engine
        .store
        .put(IndexCacheEntry::new(
            RepositoryRef::new("default", "deleted-while-down"),
            sample_index(&["nginx"]),
            "1@sha256:old",
        ))
        .await
        .unwrap();

    let keep = RepositoryRef::new("default", "keep");
    engine
        .service
        .add_repository(&admin(), RepositoryRequest::new(keep.clone(), URL))
        .await
        .unwrap();
    let keep_ready = engine.cluster.mark_ready(&keep, "sha256:1").unwrap();

    let events: Vec<Result<watcher::Event<HelmRepository>, watcher::Error>> = vec![
        Ok(watcher::Event::Init),
        Ok(watcher::Event::InitApply(keep_ready)),
        Ok(watcher::Event::InitDone),
    ];
    watch::run_stream(futures::stream::iter(events), &engine.sequencer, &CancellationToken::new())
        .await
        .unwrap();
    engine.settle().await;

    assert_eq!(engine.store.keys().await.unwrap(), vec![keep]);
}

#[tokio::test]
async fn watch_stops_on_shutdown() {
    let engine = Engine::new(
        Arc::new(ScriptedFetcher::new()),
        StaticAccessReviewer::permissive(),
        SecretMode::SystemManaged,
    );
    let shutdown = CancellationToken::new();
    let stream = futures::stream::pending::<Result<watcher::Event<HelmRepository>, watcher::Error>>();

    let cancel = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
    });
    watch::run_stream(stream, &engine.sequencer, &shutdown).await.unwrap();
}
