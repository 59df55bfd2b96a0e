//! Property tests over randomly generated corpora.

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;

use brainsearch::search::{
    EphemeralReranker, Fragment, KeywordBackend, KeywordIndex, KeywordQuery, Metadata,
    SearchOutput, SearchRequest, SyntheticIdGenerator,
};
use brainsearch::storage::{CollectionResolver, CollectionScope};
use brainsearch::test_utils::{CollectionFixture, FixtureDocument};

const WORDS: [&str; 12] = [
    "refund", "policy", "shipping", "return", "invoice", "credit", "order", "parcel", "billing",
    "receipt", "warranty", "account",
];

fn arb_text() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(WORDS.to_vec()), 1..12).prop_map(|w| w.join(" "))
}

fn arb_document(id: usize) -> impl Strategy<Value = FixtureDocument> {
    (arb_text(), prop::collection::vec(arb_text(), 1..4)).prop_map(move |(text, fragments)| {
        fragments.iter().fold(
            FixtureDocument::new(&format!("d{id}"), &text).meta("langid", "en"),
            |doc, fragment| doc.fragment(fragment),
        )
    })
}

fn arb_corpus() -> impl Strategy<Value = Vec<FixtureDocument>> {
    (1usize..8).prop_flat_map(|n| (0..n).map(arb_document).collect::<Vec<_>>())
}

fn arb_query() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(WORDS.to_vec()), 1..4).prop_map(|w| w.join(" "))
}

fn search(fixture: &CollectionFixture, request: &SearchRequest) -> SearchOutput {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fixture.orchestrator().search(request))
        .unwrap()
}

fn doc_id(fragment: &Fragment) -> String {
    fragment.document_id("docid").unwrap_or_default()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn results_respect_both_bounds(
        corpus in arb_corpus(),
        query in arb_query(),
        top_k_tfidf in 1usize..5,
        top_k_vectors in 1usize..6,
    ) {
        let fixture = CollectionFixture::new();
        fixture.add_collection("u1", "acme", "c", &corpus);

        let index = fixture
            .resolver
            .keyword_index(&CollectionScope::new("u1", "acme", "c"))
            .unwrap();
        let stage = index.query(&KeywordQuery::new(&query, top_k_tfidf)).unwrap();
        prop_assert!(stage.len() <= top_k_tfidf);
        let allowed: BTreeSet<String> =
            stage.iter().filter_map(|e| e.document_id("docid")).collect();

        let mut request = SearchRequest::new("u1", "acme", query.as_str(), "c");
        request.top_k_tfidf = top_k_tfidf;
        request.top_k_vectors = top_k_vectors;
        let output = search(&fixture, &request);

        let fragments = output.fragments().unwrap();
        prop_assert!(fragments.len() <= top_k_vectors);
        for fragment in fragments {
            prop_assert!(allowed.contains(&doc_id(fragment)));
        }
        if stage.is_empty() {
            prop_assert!(fragments.is_empty());
        }
    }

    #[test]
    fn identical_requests_give_identical_output(
        corpus in arb_corpus(),
        query in arb_query(),
        llm_format in any::<bool>(),
    ) {
        let fixture = CollectionFixture::new();
        fixture.add_collection("u1", "acme", "c", &corpus);

        let request = SearchRequest::new("u1", "acme", query.as_str(), "c").llm_format(llm_format);
        let first = search(&fixture, &request);
        let second = search(&fixture, &request);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn rerank_never_invents_fragments(
        texts in prop::collection::vec(arb_text(), 0..20),
        query in arb_query(),
        top_k in 1usize..10,
    ) {
        let fragments: Vec<Fragment> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let mut metadata = Metadata::new();
                metadata.insert("docid".into(), format!("d{i}").into());
                Fragment::new(text.as_str(), metadata)
            })
            .collect();

        let reranker =
            EphemeralReranker::build(KeywordBackend::TfIdf, "langid", fragments.clone()).unwrap();
        let ranked = reranker.rank(&KeywordQuery::new(&query, 100), top_k).unwrap();

        prop_assert!(ranked.len() <= top_k);
        let mut seen = HashSet::new();
        for fragment in &ranked {
            prop_assert!(fragments.contains(fragment));
            prop_assert!(seen.insert(doc_id(fragment)));
        }
    }

    #[test]
    fn synthetic_ids_never_collide(per_request in 1usize..50, requests in 2usize..6) {
        let mut all = HashSet::new();
        for _ in 0..requests {
            let mut ids = SyntheticIdGenerator::new();
            for _ in 0..per_request {
                prop_assert!(all.insert(ids.next_id()));
            }
        }
    }
}

#[test]
fn later_requests_see_no_earlier_fragments() {
    let first = vec![Fragment::new("refund policy secret", Metadata::new())];
    let reranker = EphemeralReranker::build(KeywordBackend::TfIdf, "langid", first).unwrap();
    assert_eq!(reranker.rank(&KeywordQuery::new("secret", 10), 10).unwrap().len(), 1);

    let second = vec![Fragment::new("shipping policy", Metadata::new())];
    let reranker = EphemeralReranker::build(KeywordBackend::TfIdf, "langid", second).unwrap();
    let ranked = reranker
        .rank(&KeywordQuery::new("secret", 10).autocorrect(false), 10)
        .unwrap();
    assert!(ranked.is_empty());
}
