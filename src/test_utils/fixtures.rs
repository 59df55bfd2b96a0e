use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;

use crate::config::Config;
use crate::search::{
    Fragment, KeywordBackend, KeywordIndex, Metadata, OrchestratorSettings, SearchOrchestrator,
    VectorStore,
};
use crate::storage::{CollectionResolver, CollectionScope, FsCollectionResolver};

/// A document with the fragments it is split into.
#[derive(Debug, Clone)]
pub struct FixtureDocument {
    pub docid: String,
    pub text: String,
    pub metadata: Metadata,
    pub fragments: Vec<String>,
}

impl FixtureDocument {
    pub fn new(docid: &str, text: &str) -> Self {
        Self {
            docid: docid.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
            fragments: Vec::new(),
        }
    }

    #[must_use]
    pub fn fragment(mut self, text: &str) -> Self {
        self.fragments.push(text.to_string());
        self
    }

    #[must_use]
    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// One JSON Lines record in the `import` format.
    pub fn to_jsonl(&self) -> String {
        let fragments: Vec<Value> = self
            .fragments
            .iter()
            .map(|text| json!({ "text": text }))
            .collect();
        json!({
            "docid": self.docid,
            "text": self.text,
            "metadata": self.metadata,
            "fragments": fragments,
        })
        .to_string()
    }
}

/// Three refund/shipping documents, two of them about refunds.
pub fn refund_corpus() -> Vec<FixtureDocument> {
    vec![
        FixtureDocument::new(
            "refunds",
            "Refund policy: every refund request is reviewed under the refund policy.",
        )
        .meta("langid", "en")
        .meta("category", "billing")
        .fragment("Refund policy overview: refunds are issued within 30 days.")
        .fragment("The refund policy excludes gift cards and refund abuse.")
        .fragment("Contact billing to start a refund."),
        FixtureDocument::new(
            "returns",
            "Returns follow the refund policy once items arrive back.",
        )
        .meta("langid", "en")
        .meta("category", "billing")
        .fragment("Items must be returned unused.")
        .fragment("Returned items trigger the refund policy."),
        FixtureDocument::new("shipping", "Shipping takes five business days.")
            .meta("langid", "en")
            .meta("category", "logistics")
            .fragment("Shipping takes five business days.")
            .fragment("Express shipping takes two days."),
    ]
}

/// Collections on disk under a temporary root, plus the resolver over them.
pub struct CollectionFixture {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
    pub resolver: Arc<FsCollectionResolver>,
}

impl CollectionFixture {
    pub fn new() -> Self {
        Self::with_backend(KeywordBackend::TfIdf)
    }

    pub fn with_backend(backend: KeywordBackend) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        let mut config = Config::default();
        config.storage.root.clone_from(&root);
        config.storage.keyword_backend = backend;

        let resolver = Arc::new(FsCollectionResolver::new(
            &root,
            backend,
            config.storage.cache_size(),
            &config.metadata.docid_field,
            &config.metadata.langid_field,
        ));

        Self {
            temp_dir,
            root,
            config,
            resolver,
        }
    }

    /// Create `collection` for `user`/`org` and load `docs` into it.
    ///
    /// Documents without fragments are stored as a single fragment.
    pub fn add_collection(&self, user: &str, org: &str, collection: &str, docs: &[FixtureDocument]) {
        let docid_field = &self.config.metadata.docid_field;
        let scope = CollectionScope::new(user, org, collection);
        let (index, store) = self
            .resolver
            .create(&scope)
            .expect("Failed to create collection");

        for doc in docs {
            let mut metadata = doc.metadata.clone();
            metadata.insert(docid_field.clone(), doc.docid.clone().into());
            index
                .insert(&doc.text, metadata.clone())
                .expect("Failed to index document");

            let texts = if doc.fragments.is_empty() {
                vec![doc.text.clone()]
            } else {
                doc.fragments.clone()
            };
            for text in texts {
                store
                    .insert(&Fragment::new(text, metadata.clone()), None)
                    .expect("Failed to store fragment");
            }
        }
        index.commit().expect("Failed to commit keyword index");
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings::from_config(&self.config)
    }

    pub fn orchestrator(&self) -> SearchOrchestrator {
        let resolver: Arc<dyn CollectionResolver> = self.resolver.clone();
        SearchOrchestrator::new(resolver, self.settings())
    }

    /// Write `docs` as an import file and return its path.
    pub fn write_jsonl(&self, name: &str, docs: &[FixtureDocument]) -> PathBuf {
        let path = self.root.join(name);
        let body: Vec<String> = docs.iter().map(FixtureDocument::to_jsonl).collect();
        std::fs::write(&path, body.join("\n")).expect("Failed to write file");
        path
    }
}

impl Default for CollectionFixture {
    fn default() -> Self {
        Self::new()
    }
}
