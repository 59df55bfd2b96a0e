//! End-to-end searches over on-disk collections.

use std::collections::BTreeSet;
use std::sync::Arc;

use brainsearch::error::Reason;
use brainsearch::search::{
    ErrorSink, KeywordBackend, KeywordIndex, KeywordQuery, MetadataFilter, SearchOutput,
    SearchRequest,
};
use brainsearch::storage::{CollectionResolver, CollectionScope};
use brainsearch::test_utils::{CollectionFixture, FixtureDocument, init_test_tracing, refund_corpus};
use parking_lot::Mutex;

const USER: &str = "u1";
const ORG: &str = "acme";

#[derive(Default)]
struct RecordingSink(Mutex<Vec<(String, Reason)>>);

impl ErrorSink for RecordingSink {
    fn report_error(&self, message: &str, reason: Reason) {
        self.0.lock().push((message.to_string(), reason));
    }
}

fn faq_fixture() -> CollectionFixture {
    init_test_tracing();
    let fixture = CollectionFixture::new();
    fixture.add_collection(USER, ORG, "faq", &refund_corpus());
    fixture
}

fn doc_ids(output: &SearchOutput) -> BTreeSet<String> {
    output
        .fragments()
        .unwrap_or_default()
        .iter()
        .filter_map(|f| f.document_id("docid"))
        .collect()
}

// =============================================================================
// Scenario A: keyword top-k bounds the fragment stage
// =============================================================================

#[tokio::test]
async fn keyword_stage_keeps_top_documents_and_their_fragments() {
    let fixture = faq_fixture();

    let index = fixture
        .resolver
        .keyword_index(&CollectionScope::new(USER, ORG, "faq"))
        .unwrap();
    let stage: Vec<String> = index
        .query(&KeywordQuery::new("refund policy", 2))
        .unwrap()
        .iter()
        .filter_map(|e| e.document_id("docid"))
        .collect();
    assert_eq!(stage, vec!["refunds", "returns"]);

    let mut request = SearchRequest::new(USER, ORG, "refund policy", "faq");
    request.top_k_tfidf = 2;
    request.cutoff_score_tfidf = 0.0;
    request.top_k_vectors = 2;

    let output = fixture.orchestrator().search(&request).await.unwrap();
    let fragments = output.fragments().unwrap();
    assert!(!fragments.is_empty());
    assert!(fragments.len() <= 2);

    let allowed: BTreeSet<String> = stage.into_iter().collect();
    assert!(doc_ids(&output).is_subset(&allowed));
}

#[tokio::test]
async fn best_fragment_ranks_first() {
    let fixture = faq_fixture();
    let request = SearchRequest::new(USER, ORG, "refund policy", "faq");
    let output = fixture.orchestrator().search(&request).await.unwrap();
    let fragments = output.fragments().unwrap();
    assert_eq!(
        fragments[0].text,
        "The refund policy excludes gift cards and refund abuse."
    );
    assert!(fragments.len() <= request.top_k_vectors);
}

// =============================================================================
// Scenario B: a broken vector store is skipped
// =============================================================================

#[tokio::test]
async fn broken_vector_store_is_skipped() {
    let fixture = faq_fixture();

    // Keyword index only, with a vector store file that is not a database
    let broken = CollectionScope::new(USER, ORG, "broken");
    let dir = fixture.resolver.collection_dir(&broken).unwrap();
    let index = KeywordBackend::TfIdf
        .create(&dir.join("keyword"), "langid")
        .unwrap();
    let mut metadata = serde_json::Map::new();
    metadata.insert("docid".into(), "broken-doc".into());
    index
        .insert("Refund policy for the broken collection.", metadata)
        .unwrap();
    index.commit().unwrap();
    drop(index);
    std::fs::write(dir.join("vectors.db"), b"definitely not sqlite").unwrap();

    let sink = RecordingSink::default();
    let request = SearchRequest::new(
        USER,
        ORG,
        "refund policy",
        vec!["broken".to_string(), "faq".to_string()],
    );
    let output = fixture
        .orchestrator()
        .search_reporting(&request, &sink)
        .await
        .expect("surviving collection answers");

    assert!(sink.0.lock().is_empty());
    let ids = doc_ids(&output);
    assert!(!ids.is_empty());
    assert!(!ids.contains("broken-doc"));
}

// =============================================================================
// Scenario C: LLM format joins ranked texts
// =============================================================================

#[tokio::test]
async fn llm_format_joins_ranked_texts_with_blank_lines() {
    let fixture = faq_fixture();
    let orchestrator = fixture.orchestrator();

    let mut request = SearchRequest::new(USER, ORG, "refund", "faq");
    request.top_k_vectors = 3;
    let ranked = orchestrator.search(&request).await.unwrap();
    let texts: Vec<&str> = ranked
        .fragments()
        .unwrap()
        .iter()
        .map(|f| f.text.as_str())
        .collect();
    assert_eq!(texts.len(), 3);

    let joined = orchestrator
        .search(&request.clone().llm_format(true))
        .await
        .unwrap();
    assert_eq!(joined.text(), Some(texts.join("\n\n").as_str()));
}

// =============================================================================
// Scenario D: no keyword index anywhere is fatal
// =============================================================================

#[tokio::test]
async fn missing_keyword_indexes_are_reported_fatal() {
    let fixture = faq_fixture();
    let sink = RecordingSink::default();
    let request = SearchRequest::new(
        USER,
        ORG,
        "refund",
        vec!["ghost".to_string(), "phantom".to_string()],
    );

    let output = fixture
        .orchestrator()
        .search_reporting(&request, &sink)
        .await;
    assert!(output.is_none());

    let reports = sink.0.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1, Reason::Internal);
    assert!(reports[0].0.contains("keyword index"));
}

// =============================================================================
// Empty results and filters
// =============================================================================

#[tokio::test]
async fn no_keyword_match_is_empty_not_an_error() {
    let fixture = faq_fixture();
    let sink = RecordingSink::default();
    let mut request = SearchRequest::new(USER, ORG, "xylophone", "faq");
    request.autocorrect_query = false;

    let output = fixture
        .orchestrator()
        .search_reporting(&request, &sink)
        .await
        .unwrap();
    assert_eq!(output, SearchOutput::empty(false));
    assert!(sink.0.lock().is_empty());

    let text = fixture
        .orchestrator()
        .search(&request.llm_format(true))
        .await
        .unwrap();
    assert_eq!(text.text(), Some(""));
}

#[tokio::test]
async fn metadata_filter_applies_to_documents() {
    let fixture = faq_fixture();
    let request = SearchRequest::new(USER, ORG, "refund policy", "faq")
        .with_filter(MetadataFilter::new().equals("docid", "returns"));
    let output = fixture.orchestrator().search(&request).await.unwrap();
    assert_eq!(
        doc_ids(&output),
        BTreeSet::from(["returns".to_string()])
    );
}

#[tokio::test]
async fn predicate_filter_can_exclude_everything() {
    let fixture = faq_fixture();
    let request = SearchRequest::new(USER, ORG, "refund", "faq")
        .with_filter(MetadataFilter::new().predicate(|_| false));
    let output = fixture.orchestrator().search(&request).await.unwrap();
    assert!(output.is_empty());
}

#[tokio::test]
async fn collections_are_isolated_per_user() {
    let fixture = faq_fixture();
    fixture.add_collection(
        "someone-else",
        ORG,
        "faq",
        &[FixtureDocument::new("private", "Private refund notes.")],
    );

    let request = SearchRequest::new(USER, ORG, "refund", "faq");
    let output = fixture.orchestrator().search(&request).await.unwrap();
    assert!(!doc_ids(&output).contains("private"));
}

#[tokio::test]
async fn results_merge_across_collections() {
    let fixture = faq_fixture();
    fixture.add_collection(
        USER,
        ORG,
        "manuals",
        &[FixtureDocument::new("manual", "The refund policy in the manual.")
            .fragment("Manual section on the refund policy.")],
    );

    let request = SearchRequest::new(
        USER,
        ORG,
        "refund policy",
        vec!["faq".to_string(), "manuals".to_string()],
    );
    let output = fixture.orchestrator().search(&request).await.unwrap();
    let ids = doc_ids(&output);
    assert!(ids.contains("manual"));
    assert!(ids.contains("refunds"));
}

#[tokio::test]
async fn orchestrator_is_shareable_across_tasks() {
    let fixture = faq_fixture();
    let orchestrator = Arc::new(fixture.orchestrator());

    let mut handles = Vec::new();
    for query in ["refund", "shipping", "refund policy", "returned items"] {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            let request = SearchRequest::new(USER, ORG, query, "faq");
            orchestrator.search(&request).await.map(|out| out.is_empty())
        }));
    }
    for handle in handles {
        assert!(!handle.await.unwrap().unwrap());
    }
}
