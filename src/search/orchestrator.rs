//! Two-stage retrieval across collections
//!
//! ## Pipeline
//!
//! 1. Keyword stage: every target collection's keyword index is queried in
//!    parallel; results are concatenated in collection order, re-sorted by
//!    raw term frequency and capped at `top_k_tfidf`.
//! 2. Fragment stage: every collection's vector store is scanned in parallel
//!    for fragments of the surviving documents.
//! 3. Re-ranking: the fragments go through an [`EphemeralReranker`] built
//!    for this request only and are capped at `top_k_vectors`.
//! 4. Formatting through [`ResultFormatter`].
//!
//! ## Failure policy
//!
//! A collection whose backend cannot be opened, fails or misses the stage
//! deadline is logged and skipped. A stage where no collection succeeds is
//! fatal ([`BsError::NoBackends`]). An empty stage result is not an error;
//! it yields an empty output.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::filters::FragmentFilter;
use super::format::ResultFormatter;
use super::keyword::{KeywordBackend, KeywordQuery};
use super::rerank::EphemeralReranker;
use super::scoring;
use super::types::{Fragment, ScoredEntry, SearchOutput, SearchRequest};
use crate::config::Config;
use crate::error::{BsError, Reason, Result};
use crate::storage::{CollectionResolver, CollectionScope};

/// Receives fatal search failures.
pub trait ErrorSink: Send + Sync {
    fn report_error(&self, message: &str, reason: Reason);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report_error(&self, message: &str, reason: Reason) {
        error!(reason = reason.as_str(), "{message}");
    }
}

/// Settings the orchestrator takes from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Backend used for the per-request re-ranking index
    pub rerank_backend: KeywordBackend,
    pub docid_field: String,
    pub langid_field: String,
    /// Deadline for each parallel stage
    pub backend_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            rerank_backend: KeywordBackend::TfIdf,
            docid_field: "docid".to_string(),
            langid_field: "langid".to_string(),
            backend_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rerank_backend: config.storage.keyword_backend,
            docid_field: config.metadata.docid_field.clone(),
            langid_field: config.metadata.langid_field.clone(),
            backend_timeout: config.search.backend_timeout,
        }
    }
}

/// Coordinates keyword indexes, vector stores and re-ranking for searches.
///
/// Holds no per-request state; one instance serves concurrent searches.
#[derive(Clone)]
pub struct SearchOrchestrator {
    resolver: Arc<dyn CollectionResolver>,
    settings: OrchestratorSettings,
}

impl SearchOrchestrator {
    pub fn new(resolver: Arc<dyn CollectionResolver>, settings: OrchestratorSettings) -> Self {
        Self { resolver, settings }
    }

    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run a search and hand fatal failures to `sink` instead of returning
    /// them; `None` means the failure was reported.
    pub async fn search_reporting(
        &self,
        request: &SearchRequest,
        sink: &dyn ErrorSink,
    ) -> Option<SearchOutput> {
        match self.search(request).await {
            Ok(output) => Some(output),
            Err(err) => {
                sink.report_error(&err.to_string(), err.reason());
                None
            }
        }
    }

    /// Resolve `request` into ranked fragments (or their joined text).
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutput> {
        request.validate()?;
        let started = Instant::now();
        let scopes: Vec<CollectionScope> = request
            .collections
            .ids()
            .into_iter()
            .map(|collection| CollectionScope::new(&request.id, &request.org, collection))
            .collect();

        info!(
            user = %request.id,
            org = %request.org,
            collections = scopes.len(),
            "search started"
        );

        let candidates = self.keyword_stage(request, &scopes).await?;
        if candidates.is_empty() {
            info!(user = %request.id, "no keyword matches");
            return Ok(SearchOutput::empty(request.llm_format));
        }

        let doc_ids = self.document_ids(&candidates);
        if doc_ids.is_empty() {
            warn!(
                field = %self.settings.docid_field,
                "keyword matches carry no document id"
            );
            return Ok(SearchOutput::empty(request.llm_format));
        }

        let fragments = self.fragment_stage(request, &scopes, doc_ids).await?;
        if fragments.is_empty() {
            info!(user = %request.id, "no fragments for matched documents");
            return Ok(SearchOutput::empty(request.llm_format));
        }

        let ranked = self.rerank(request, fragments).await?;
        info!(
            user = %request.id,
            results = ranked.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "search finished"
        );
        Ok(ResultFormatter::format(ranked, request.llm_format))
    }

    /// Query every keyword index, merge, re-sort by raw term frequency, cap.
    async fn keyword_stage(
        &self,
        request: &SearchRequest,
        scopes: &[CollectionScope],
    ) -> Result<Vec<ScoredEntry>> {
        let resolver = Arc::clone(&self.resolver);
        let text = request.query.clone();
        let language = request.language.clone();
        let filter = request.metadata_filter.clone();
        let (top_k, cutoff, options, autocorrect) = (
            request.top_k_tfidf,
            request.cutoff_score_tfidf,
            request.scoring,
            request.autocorrect_query,
        );

        let per_collection = self
            .fan_out("keyword index", &request.id, scopes, move |scope| {
                let index = resolver.keyword_index(scope)?;
                let query = KeywordQuery::new(&text, top_k)
                    .cutoff(cutoff)
                    .filter(filter.as_ref())
                    .options(options)
                    .autocorrect(autocorrect)
                    .language(language.as_deref());
                index.query(&query)
            })
            .await?;

        let mut merged: Vec<ScoredEntry> = per_collection.into_iter().flatten().collect();
        let matched = merged.len();
        scoring::sort_by_raw_term_frequency(&mut merged);
        merged.truncate(request.top_k_tfidf);
        debug!(matched, kept = merged.len(), "keyword stage merged");
        Ok(merged)
    }

    /// Distinct owning-document ids of the keyword candidates.
    fn document_ids(&self, candidates: &[ScoredEntry]) -> BTreeSet<String> {
        candidates
            .iter()
            .filter_map(|entry| entry.document_id(&self.settings.docid_field))
            .collect()
    }

    /// Fetch every fragment of the given documents from every vector store.
    async fn fragment_stage(
        &self,
        request: &SearchRequest,
        scopes: &[CollectionScope],
        doc_ids: BTreeSet<String>,
    ) -> Result<Vec<Fragment>> {
        let resolver = Arc::clone(&self.resolver);
        let filter = FragmentFilter::DocumentIn {
            field: self.settings.docid_field.clone(),
            ids: doc_ids,
        };

        let per_collection = self
            .fan_out("vector store", &request.id, scopes, move |scope| {
                resolver.vector_store(scope)?.query(None, None, None, &filter)
            })
            .await?;

        let fragments: Vec<Fragment> = per_collection
            .into_iter()
            .flatten()
            .map(ScoredEntry::into_fragment)
            .collect();
        debug!(fragments = fragments.len(), "fragment stage merged");
        Ok(fragments)
    }

    async fn rerank(&self, request: &SearchRequest, fragments: Vec<Fragment>) -> Result<Vec<Fragment>> {
        let backend = self.settings.rerank_backend;
        let langid_field = self.settings.langid_field.clone();
        let text = request.query.clone();
        let language = request.language.clone();
        let (top_k, cutoff, options, autocorrect, keep) = (
            request.top_k_tfidf,
            request.cutoff_score_tfidf,
            request.scoring,
            request.autocorrect_query,
            request.top_k_vectors,
        );

        tokio::task::spawn_blocking(move || {
            let reranker = EphemeralReranker::build(backend, &langid_field, fragments)?;
            let query = KeywordQuery::new(&text, top_k)
                .cutoff(cutoff)
                .options(options)
                .autocorrect(autocorrect)
                .language(language.as_deref());
            reranker.rank(&query, keep)
        })
        .await
        .map_err(|err| BsError::Internal(format!("re-ranking task failed: {err}")))?
    }

    /// Run `work` for every collection in parallel under the stage deadline.
    ///
    /// Returns the successful results in collection order. Failed or late
    /// collections are logged and left out; if none succeeds the stage fails.
    async fn fan_out<T, F>(
        &self,
        stage: &'static str,
        user: &str,
        scopes: &[CollectionScope],
        work: F,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(&CollectionScope) -> Result<T> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut tasks = JoinSet::new();
        for (position, scope) in scopes.iter().enumerate() {
            let work = Arc::clone(&work);
            let scope = scope.clone();
            tasks.spawn_blocking(move || (position, work(&scope)));
        }

        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(scopes.len()).collect();
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((position, Ok(value))) => slots[position] = Some(value),
                    Ok((position, Err(err))) => warn!(
                        stage,
                        collection = %scopes[position],
                        error = %err,
                        "skipping collection"
                    ),
                    Err(err) => error!(stage, error = %err, "collection task failed"),
                }
            }
        };
        if tokio::time::timeout(self.settings.backend_timeout, collect).await.is_err() {
            warn!(
                stage,
                timeout_ms = self.settings.backend_timeout.as_millis(),
                pending = tasks.len(),
                "stage deadline passed; skipping unfinished collections"
            );
            tasks.abort_all();
        }

        let succeeded: Vec<T> = slots.into_iter().flatten().collect();
        if succeeded.is_empty() {
            error!(stage, user, "no collection could be searched");
            return Err(BsError::NoBackends {
                stage,
                user: user.to_string(),
            });
        }
        Ok(succeeded)
    }
}
