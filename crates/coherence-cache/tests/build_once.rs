use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coherence_cache::prelude::*;
use coherence_cache::PublishedStore;
use coherence_db::Db;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Briefing {
    title: String,
    build_no: usize,
    #[serde(default)]
    notes: Vec<String>,
}

/// Counts calls and stamps each payload with the call number, so two builds
/// can never produce equal payloads.
struct BriefingBuilder<const V: u32> {
    calls: AtomicUsize,
    delay: Duration,
}

impl<const V: u32> BriefingBuilder<V> {
    fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<const V: u32> ContentBuilder for BriefingBuilder<V> {
    const PAYLOAD_TYPE: &'static str = "briefing";
    const SCHEMA_VERSION: u32 = V;
    type Context = ();
    type Payload = Briefing;

    fn build(&self, _: &()) -> anyhow::Result<Briefing> {
        let build_no = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        std::thread::sleep(self.delay);
        Ok(Briefing {
            title: format!("briefing v{}", V),
            build_no,
            notes: Vec::new(),
        })
    }
}

struct FailingBuilder;

impl ContentBuilder for FailingBuilder {
    const PAYLOAD_TYPE: &'static str = "briefing";
    const SCHEMA_VERSION: u32 = 1;
    type Context = ();
    type Payload = Briefing;

    fn build(&self, _: &()) -> anyhow::Result<Briefing> {
        anyhow::bail!("content table missing column secret_col")
    }
}

struct PanickingBuilder;

impl ContentBuilder for PanickingBuilder {
    const PAYLOAD_TYPE: &'static str = "briefing";
    const SCHEMA_VERSION: u32 = 1;
    type Context = ();
    type Payload = Briefing;

    fn build(&self, _: &()) -> anyhow::Result<Briefing> {
        panic!("scenario index out of bounds")
    }
}

struct Node {
    db: Arc<Db>,
    mutex: Arc<SqlLeaseMutex>,
    cache: PublishedContentCache<SqlLeaseMutex>,
}

fn node(db: Db, lock_wait: Duration) -> Node {
    db.migrate().unwrap();
    let db = Arc::new(db);
    let mutex = Arc::new(SqlLeaseMutex::new(Arc::clone(&db), Duration::from_secs(60)));
    let settings = CacheSettings {
        lock_wait,
        built_by: "test-node".into(),
        local_ttl: Duration::ZERO,
        ..CacheSettings::default()
    };
    let cache = PublishedContentCache::new(Arc::clone(&db), Arc::clone(&mutex), settings);
    Node { db, mutex, cache }
}

fn memory_node(lock_wait: Duration) -> Node {
    node(Db::open_default().unwrap(), lock_wait)
}

fn dims() -> KeyDimensions {
    KeyDimensions::new().module("m01").scenario("flood").language("en")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_across_connections_build_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coherence.db");
    let path = path.to_str().unwrap();

    let nodes: Vec<Arc<Node>> = (0..3)
        .map(|_| Arc::new(node(Db::open(path).unwrap(), Duration::from_secs(10))))
        .collect();
    let builder = Arc::new(BriefingBuilder::<1>::new(Duration::from_millis(100)));

    let tasks = (0..12).map(|i| {
        let node = Arc::clone(&nodes[i % nodes.len()]);
        let builder = Arc::clone(&builder);
        tokio::spawn(async move { node.cache.get_or_build(&dims(), builder.as_ref(), &()).await })
    });
    let results: Vec<Published<Briefing>> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(builder.calls(), 1);
    assert!(results.iter().all(|r| r.payload == results[0].payload));
    assert_eq!(
        results.iter().filter(|r| r.status == CacheStatus::Built).count(),
        1
    );
}

#[tokio::test]
async fn schema_bump_publishes_a_new_row() {
    let node = memory_node(Duration::from_secs(1));
    let v1 = BriefingBuilder::<1>::new(Duration::ZERO);
    let v2 = BriefingBuilder::<2>::new(Duration::ZERO);

    let first = node.cache.get_or_build(&dims(), &v1, &()).await.unwrap();
    let second = node.cache.get_or_build(&dims(), &v2, &()).await.unwrap();
    assert_eq!(first.schema_version, 1);
    assert_eq!(second.schema_version, 2);
    assert_eq!(second.status, CacheStatus::Built);

    let store = PublishedStore::new(Arc::clone(&node.db));
    let key_code = "briefing:m01:-:flood:-:en";
    assert_eq!(store.versions(key_code).unwrap().len(), 2);

    // The v1 row is untouched and still served to v1 callers.
    let again = node.cache.get_or_build(&dims(), &v1, &()).await.unwrap();
    assert_eq!(again.payload, first.payload);
    assert_eq!(again.status, CacheStatus::Hit);
    assert_eq!(v1.calls(), 1);
}

#[tokio::test]
async fn lock_timeout_without_any_row_is_build_unavailable() {
    let node = memory_node(Duration::from_millis(60));
    let key = PublishKey::for_builder::<BriefingBuilder<1>>(&dims()).unwrap();
    let _held = node
        .mutex
        .acquire(&key.lock_name(), Duration::ZERO)
        .await
        .unwrap()
        .unwrap();

    let builder = BriefingBuilder::<1>::new(Duration::ZERO);
    let err = node.cache.get_or_build(&dims(), &builder, &()).await.unwrap_err();
    assert!(matches!(err, CacheError::BuildUnavailable { .. }));
    assert!(err.is_retryable());
    assert_eq!(builder.calls(), 0);
}

#[tokio::test]
async fn lock_timeout_serves_other_schema_version_as_degraded() {
    let node = memory_node(Duration::from_millis(60));
    let v1 = BriefingBuilder::<1>::new(Duration::ZERO);
    let published_v1 = node.cache.get_or_build(&dims(), &v1, &()).await.unwrap();

    let key = PublishKey::for_builder::<BriefingBuilder<2>>(&dims()).unwrap();
    let _held = node
        .mutex
        .acquire(&key.lock_name(), Duration::ZERO)
        .await
        .unwrap()
        .unwrap();

    let v2 = BriefingBuilder::<2>::new(Duration::ZERO);
    let degraded = node.cache.get_or_build(&dims(), &v2, &()).await.unwrap();
    assert!(degraded.is_degraded());
    assert_eq!(degraded.schema_version, 1);
    assert_eq!(degraded.payload, published_v1.payload);
    assert_eq!(v2.calls(), 0);
}

#[tokio::test]
async fn prewarm_reports_lock_timeout() {
    let node = memory_node(Duration::from_millis(40));
    let key = PublishKey::for_builder::<BriefingBuilder<1>>(&dims()).unwrap();
    let _held = node
        .mutex
        .acquire(&key.lock_name(), Duration::ZERO)
        .await
        .unwrap()
        .unwrap();

    let builder = BriefingBuilder::<1>::new(Duration::ZERO);
    let err = node.cache.prewarm(&dims(), &builder, &()).await.unwrap_err();
    assert!(matches!(err, CacheError::LockTimeout { .. }));
}

#[tokio::test]
async fn builder_failure_releases_the_lock() {
    let node = memory_node(Duration::from_millis(200));
    let err = node
        .cache
        .get_or_build(&dims(), &FailingBuilder, &())
        .await
        .unwrap_err();

    match &err {
        CacheError::BuildFailure { detail, .. } => assert!(detail.contains("secret_col")),
        other => panic!("expected build failure, got {other:?}"),
    }
    assert!(!err.public_message().contains("secret_col"));

    let key = PublishKey::for_builder::<FailingBuilder>(&dims()).unwrap();
    assert!(node.mutex.lease(&key.lock_name()).unwrap().is_none());

    // Nothing was published, and the next builder gets the lock right away.
    let builder = BriefingBuilder::<1>::new(Duration::ZERO);
    let published = node.cache.get_or_build(&dims(), &builder, &()).await.unwrap();
    assert_eq!(published.status, CacheStatus::Built);
}

#[tokio::test]
async fn builder_panic_releases_the_lock() {
    let node = Arc::new(memory_node(Duration::from_millis(200)));

    let worker = Arc::clone(&node);
    let joined = tokio::spawn(async move {
        worker
            .cache
            .get_or_build(&dims(), &PanickingBuilder, &())
            .await
    })
    .await;

    // The panic is contained and reported like any other build failure.
    match joined.unwrap() {
        Err(CacheError::BuildFailure { detail, .. }) => {
            assert!(detail.contains("scenario index out of bounds"))
        }
        other => panic!("expected build failure, got {other:?}"),
    }

    let key = PublishKey::for_builder::<PanickingBuilder>(&dims()).unwrap();
    assert!(node.mutex.lease(&key.lock_name()).unwrap().is_none());

    let builder = BriefingBuilder::<1>::new(Duration::ZERO);
    let published = node.cache.get_or_build(&dims(), &builder, &()).await.unwrap();
    assert_eq!(published.status, CacheStatus::Built);
}

#[tokio::test]
async fn prewarm_releases_the_lock_after_a_panic() {
    let node = memory_node(Duration::from_millis(200));
    let err = node
        .cache
        .prewarm(&dims(), &PanickingBuilder, &())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::BuildFailure { .. }));

    let key = PublishKey::for_builder::<PanickingBuilder>(&dims()).unwrap();
    assert!(node.mutex.lease(&key.lock_name()).unwrap().is_none());
}

#[tokio::test]
async fn older_schema_builds_its_own_row_beside_a_newer_one() {
    let node = memory_node(Duration::from_secs(1));
    let v2 = BriefingBuilder::<2>::new(Duration::ZERO);
    let v1 = BriefingBuilder::<1>::new(Duration::ZERO);

    node.cache.get_or_build(&dims(), &v2, &()).await.unwrap();
    let store = PublishedStore::new(Arc::clone(&node.db));
    let key_code = "briefing:m01:-:flood:-:en";
    let v2_row = store.get(key_code, 2).unwrap().unwrap();

    // A rolled-back deployment asks for v1 after v2 is live.
    let rolled_back = node.cache.get_or_build(&dims(), &v1, &()).await.unwrap();
    assert_eq!(rolled_back.status, CacheStatus::Built);
    assert_eq!(rolled_back.schema_version, 1);
    assert_eq!(rolled_back.payload.title, "briefing v1");
    assert_eq!(v1.calls(), 1);

    let versions = store.versions(key_code).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(store.highest_version(key_code).unwrap(), Some(2));
    assert_eq!(store.get(key_code, 2).unwrap().unwrap(), v2_row);
}

#[tokio::test]
async fn rows_record_builder_label() {
    let node = memory_node(Duration::from_secs(1));
    let builder = BriefingBuilder::<1>::new(Duration::ZERO);
    node.cache.get_or_build(&dims(), &builder, &()).await.unwrap();

    let row = PublishedStore::new(Arc::clone(&node.db))
        .get("briefing:m01:-:flood:-:en", 1)
        .unwrap()
        .unwrap();
    assert_eq!(row.built_by, "test-node");
    assert!(chrono::DateTime::parse_from_rfc3339(&row.built_at).is_ok());
}
