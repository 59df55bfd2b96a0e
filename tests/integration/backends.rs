//! Keyword backends behave the same behind the orchestrator.

use std::sync::Arc;

use brainsearch::search::{KeywordBackend, SearchOrchestrator, SearchRequest};
use brainsearch::storage::{CollectionResolver, FsCollectionResolver};
use brainsearch::test_utils::{CollectionFixture, init_test_tracing, refund_corpus};

const QUERIES: [&str; 5] = [
    "refund policy",
    "refund",
    "shipping days",
    "returned items",
    "refnd polcy",
];

async fn run_all(orchestrator: &SearchOrchestrator) -> Vec<serde_json::Value> {
    let mut outputs = Vec::new();
    for query in QUERIES {
        let request = SearchRequest::new("u1", "acme", query, "faq");
        let output = orchestrator.search(&request).await.unwrap();
        outputs.push(serde_json::to_value(output).unwrap());
    }
    outputs
}

#[tokio::test]
async fn tfidf_and_tantivy_rank_identically() {
    init_test_tracing();
    let tfidf = CollectionFixture::with_backend(KeywordBackend::TfIdf);
    tfidf.add_collection("u1", "acme", "faq", &refund_corpus());
    let tantivy = CollectionFixture::with_backend(KeywordBackend::Tantivy);
    tantivy.add_collection("u1", "acme", "faq", &refund_corpus());

    let a = run_all(&tfidf.orchestrator()).await;
    let b = run_all(&tantivy.orchestrator()).await;
    assert_eq!(a, b);
    assert!(a.iter().all(|out| !out.as_array().unwrap().is_empty()));
}

#[tokio::test]
async fn collections_survive_reopening() {
    init_test_tracing();
    for backend in [KeywordBackend::TfIdf, KeywordBackend::Tantivy] {
        let fixture = CollectionFixture::with_backend(backend);
        fixture.add_collection("u1", "acme", "faq", &refund_corpus());
        let before = run_all(&fixture.orchestrator()).await;

        // A fresh resolver has nothing cached and must read from disk
        let reopened: Arc<dyn CollectionResolver> = Arc::new(FsCollectionResolver::new(
            &fixture.root,
            backend,
            fixture.config.storage.cache_size(),
            &fixture.config.metadata.docid_field,
            &fixture.config.metadata.langid_field,
        ));
        let orchestrator = SearchOrchestrator::new(reopened, fixture.settings());
        let after = run_all(&orchestrator).await;
        assert_eq!(before, after, "backend {backend}");
    }
}
