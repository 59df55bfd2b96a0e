//! Partial failures degrade, total failures are fatal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use brainsearch::error::{BsError, Reason, Result};
use brainsearch::search::{
    ErrorSink, KeywordIndex, OrchestratorSettings, SearchOrchestrator, SearchRequest, VectorStore,
};
use brainsearch::storage::{CollectionResolver, CollectionScope, FsCollectionResolver};
use brainsearch::test_utils::{CollectionFixture, init_test_tracing, refund_corpus};
use parking_lot::Mutex;

/// Wraps the on-disk resolver and sabotages chosen collections.
struct FaultyResolver {
    inner: Arc<FsCollectionResolver>,
    failing_keyword: HashSet<String>,
    failing_vectors: HashSet<String>,
    slow: HashSet<String>,
    delay: Duration,
}

impl FaultyResolver {
    fn new(fixture: &CollectionFixture) -> Self {
        Self {
            inner: Arc::clone(&fixture.resolver),
            failing_keyword: HashSet::new(),
            failing_vectors: HashSet::new(),
            slow: HashSet::new(),
            delay: Duration::from_millis(800),
        }
    }

    fn pause(&self, scope: &CollectionScope) {
        if self.slow.contains(&scope.collection) {
            std::thread::sleep(self.delay);
        }
    }
}

impl CollectionResolver for FaultyResolver {
    fn keyword_index(&self, scope: &CollectionScope) -> Result<Arc<dyn KeywordIndex>> {
        self.pause(scope);
        if self.failing_keyword.contains(&scope.collection) {
            return Err(BsError::Backend(format!("keyword index of {scope} is down")));
        }
        self.inner.keyword_index(scope)
    }

    fn vector_store(&self, scope: &CollectionScope) -> Result<Arc<dyn VectorStore>> {
        self.pause(scope);
        if self.failing_vectors.contains(&scope.collection) {
            return Err(BsError::Backend(format!("vector store of {scope} is down")));
        }
        self.inner.vector_store(scope)
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<(String, Reason)>>);

impl ErrorSink for RecordingSink {
    fn report_error(&self, message: &str, reason: Reason) {
        self.0.lock().push((message.to_string(), reason));
    }
}

fn two_collections() -> CollectionFixture {
    init_test_tracing();
    let fixture = CollectionFixture::new();
    fixture.add_collection("u1", "acme", "faq", &refund_corpus());
    fixture.add_collection("u1", "acme", "mirror", &refund_corpus());
    fixture
}

fn orchestrator(fixture: &CollectionFixture, resolver: FaultyResolver, timeout: Duration) -> SearchOrchestrator {
    let settings = OrchestratorSettings {
        backend_timeout: timeout,
        ..fixture.settings()
    };
    SearchOrchestrator::new(Arc::new(resolver), settings)
}

fn both() -> SearchRequest {
    SearchRequest::new(
        "u1",
        "acme",
        "refund policy",
        vec!["faq".to_string(), "mirror".to_string()],
    )
}

#[tokio::test]
async fn one_failing_keyword_index_is_skipped() {
    let fixture = two_collections();
    let mut resolver = FaultyResolver::new(&fixture);
    resolver.failing_keyword.insert("mirror".to_string());
    let orchestrator = orchestrator(&fixture, resolver, Duration::from_secs(5));

    let output = orchestrator.search(&both()).await.unwrap();
    assert!(!output.is_empty());
}

#[tokio::test]
async fn all_vector_stores_failing_is_fatal() {
    let fixture = two_collections();
    let mut resolver = FaultyResolver::new(&fixture);
    resolver.failing_vectors.insert("faq".to_string());
    resolver.failing_vectors.insert("mirror".to_string());
    let orchestrator = orchestrator(&fixture, resolver, Duration::from_secs(5));

    let sink = RecordingSink::default();
    assert!(orchestrator.search_reporting(&both(), &sink).await.is_none());
    let reports = sink.0.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1, Reason::Internal);
    assert!(reports[0].0.contains("vector store"));
}

#[tokio::test]
async fn slow_collection_is_dropped_at_the_deadline() {
    let fixture = two_collections();
    let mut resolver = FaultyResolver::new(&fixture);
    resolver.slow.insert("mirror".to_string());
    let orchestrator = orchestrator(&fixture, resolver, Duration::from_millis(150));

    let started = Instant::now();
    let output = orchestrator.search(&both()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(750));
    assert!(!output.is_empty());
}

#[tokio::test]
async fn every_collection_late_is_fatal() {
    let fixture = two_collections();
    let mut resolver = FaultyResolver::new(&fixture);
    resolver.slow.insert("faq".to_string());
    resolver.slow.insert("mirror".to_string());
    let orchestrator = orchestrator(&fixture, resolver, Duration::from_millis(100));

    let err = orchestrator.search(&both()).await.unwrap_err();
    assert!(matches!(err, BsError::NoBackends { stage: "keyword index", .. }));
    assert_eq!(err.reason(), Reason::Internal);
}

#[tokio::test]
async fn invalid_requests_are_bad_requests() {
    let fixture = two_collections();
    let orchestrator = fixture.orchestrator();
    let sink = RecordingSink::default();

    let mut zero_k = both();
    zero_k.top_k_vectors = 0;
    let no_collections = SearchRequest::new("u1", "acme", "refund", Vec::<String>::new());
    let escaping = SearchRequest::new("u1", "acme", "refund", "../other");

    assert!(orchestrator.search_reporting(&zero_k, &sink).await.is_none());
    assert!(orchestrator.search_reporting(&no_collections, &sink).await.is_none());

    let reports = sink.0.lock();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|(_, reason)| *reason == Reason::BadRequest));
    drop(reports);

    // A path-escaping id only fails its own collection, which is the only one
    let err = orchestrator.search(&escaping).await.unwrap_err();
    assert!(matches!(err, BsError::NoBackends { .. }));
}
