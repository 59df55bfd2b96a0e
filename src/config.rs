use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BsError, Result};
use crate::search::keyword::KeywordBackend;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit file (argument or `BRAINSEARCH_CONFIG`) is used alone.
    /// Otherwise the global file is merged first, then `<root>/config.toml`.
    /// Environment overrides apply last; `root_override` beats everything.
    pub fn load(explicit_path: Option<&Path>, root_override: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("BRAINSEARCH_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            let patch = Self::load_patch(&path)?.ok_or_else(|| {
                BsError::Config(format!("config file {} does not exist", path.display()))
            })?;
            config.merge_patch(patch);
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            let root = root_override
                .map(PathBuf::from)
                .or_else(|| std::env::var("BRAINSEARCH_ROOT").ok().map(PathBuf::from))
                .unwrap_or_else(|| config.storage.root.clone());
            if let Some(project) = Self::load_project(&root)? {
                config.merge_patch(project);
            }
        }

        config.apply_env_overrides()?;
        if let Some(root) = root_override {
            config.storage.root = root.to_path_buf();
        }
        config.validate()?;

        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        match dirs::config_dir() {
            Some(dir) => Self::load_patch(&dir.join("brainsearch/config.toml")),
            None => Ok(None),
        }
    }

    fn load_project(root: &Path) -> Result<Option<ConfigPatch>> {
        let path = root.join("config.toml");
        Self::load_patch(&path)
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| BsError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| BsError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.storage {
            self.storage.merge(patch);
        }
        if let Some(patch) = patch.search {
            self.search.merge(patch);
        }
        if let Some(patch) = patch.metadata {
            self.metadata.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(&|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, env: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = env("BRAINSEARCH_ROOT") {
            self.storage.root = PathBuf::from(value);
        }
        if let Some(value) = env("BRAINSEARCH_KEYWORD_BACKEND") {
            self.storage.keyword_backend = value.parse()?;
        }
        if let Some(value) = env_parse::<usize>(env, "BRAINSEARCH_HANDLE_CACHE_SIZE")? {
            self.storage.handle_cache_size = value;
        }

        if let Some(value) = env_parse::<usize>(env, "BRAINSEARCH_TOP_K_TFIDF")? {
            self.search.top_k_tfidf = value;
        }
        if let Some(value) = env_parse::<f32>(env, "BRAINSEARCH_CUTOFF_SCORE_TFIDF")? {
            self.search.cutoff_score_tfidf = value;
        }
        if let Some(value) = env_parse::<usize>(env, "BRAINSEARCH_TOP_K_VECTORS")? {
            self.search.top_k_vectors = value;
        }
        if let Some(value) = env_bool(env, "BRAINSEARCH_AUTOCORRECT_QUERY") {
            self.search.autocorrect_query = value;
        }
        if let Some(value) = env_bool(env, "BRAINSEARCH_BM25") {
            self.search.bm25 = value;
        }
        if let Some(value) = env_bool(env, "BRAINSEARCH_PUNISH_VERYSMALL_DOCUMENTS") {
            self.search.punish_verysmall_documents = value;
        }
        if let Some(value) = env_bool(env, "BRAINSEARCH_IGNORE_COORD") {
            self.search.ignore_coord = value;
        }
        if let Some(value) = env_parse::<f32>(env, "BRAINSEARCH_MAX_COORD_BOOST")? {
            self.search.max_coord_boost = value;
        }
        if let Some(value) = env("BRAINSEARCH_BACKEND_TIMEOUT") {
            self.search.backend_timeout = humantime_serde::re::humantime::parse_duration(&value)
                .map_err(|err| {
                    BsError::Config(format!("invalid BRAINSEARCH_BACKEND_TIMEOUT value {value}: {err}"))
                })?;
        }

        if let Some(value) = env("BRAINSEARCH_DOCID_FIELD") {
            self.metadata.docid_field = value;
        }
        if let Some(value) = env("BRAINSEARCH_LANGID_FIELD") {
            self.metadata.langid_field = value;
        }

        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.handle_cache_size == 0 {
            return Err(BsError::Config(
                "storage.handle_cache_size must be greater than 0".to_string(),
            ));
        }
        if self.search.top_k_tfidf == 0 || self.search.top_k_vectors == 0 {
            return Err(BsError::Config(
                "search.top_k_tfidf and search.top_k_vectors must be greater than 0".to_string(),
            ));
        }
        if !self.search.cutoff_score_tfidf.is_finite() {
            return Err(BsError::Config(
                "search.cutoff_score_tfidf must be a finite number".to_string(),
            ));
        }
        if !self.search.max_coord_boost.is_finite() || self.search.max_coord_boost < 0.0 {
            return Err(BsError::Config(
                "search.max_coord_boost must be a non-negative number".to_string(),
            ));
        }
        if self.search.backend_timeout.is_zero() {
            return Err(BsError::Config(
                "search.backend_timeout must be greater than 0".to_string(),
            ));
        }
        if self.metadata.docid_field.trim().is_empty() {
            return Err(BsError::MissingConfig("metadata.docid_field".to_string()));
        }
        if self.metadata.langid_field.trim().is_empty() {
            return Err(BsError::MissingConfig("metadata.langid_field".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `<org>/<user>/<collection>/` trees
    pub root: PathBuf,
    pub keyword_backend: KeywordBackend,
    /// Opened collection handles kept per backend kind
    pub handle_cache_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            keyword_backend: KeywordBackend::default(),
            handle_cache_size: 64,
        }
    }
}

impl StorageConfig {
    fn merge(&mut self, patch: StoragePatch) {
        if let Some(value) = patch.root {
            self.root = value;
        }
        if let Some(value) = patch.keyword_backend {
            self.keyword_backend = value;
        }
        if let Some(value) = patch.handle_cache_size {
            self.handle_cache_size = value;
        }
    }

    /// Cache size as the LRU wants it; validated configs are never zero.
    pub fn cache_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.handle_cache_size).unwrap_or(NonZeroUsize::MIN)
    }
}

fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("brainsearch"))
        .unwrap_or_else(|| PathBuf::from(".brainsearch"))
}

/// Defaults for every per-request tunable, plus stage deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k_tfidf: usize,
    pub cutoff_score_tfidf: f32,
    pub top_k_vectors: usize,
    pub autocorrect_query: bool,
    pub punish_verysmall_documents: bool,
    pub bm25: bool,
    pub ignore_coord: bool,
    pub max_coord_boost: f32,
    #[serde(with = "humantime_serde")]
    pub backend_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k_tfidf: 10,
            cutoff_score_tfidf: 0.0,
            top_k_vectors: 5,
            autocorrect_query: true,
            punish_verysmall_documents: false,
            bm25: false,
            ignore_coord: false,
            max_coord_boost: 0.1,
            backend_timeout: Duration::from_secs(30),
        }
    }
}

impl SearchConfig {
    fn merge(&mut self, patch: SearchPatch) {
        if let Some(value) = patch.top_k_tfidf {
            self.top_k_tfidf = value;
        }
        if let Some(value) = patch.cutoff_score_tfidf {
            self.cutoff_score_tfidf = value;
        }
        if let Some(value) = patch.top_k_vectors {
            self.top_k_vectors = value;
        }
        if let Some(value) = patch.autocorrect_query {
            self.autocorrect_query = value;
        }
        if let Some(value) = patch.punish_verysmall_documents {
            self.punish_verysmall_documents = value;
        }
        if let Some(value) = patch.bm25 {
            self.bm25 = value;
        }
        if let Some(value) = patch.ignore_coord {
            self.ignore_coord = value;
        }
        if let Some(value) = patch.max_coord_boost {
            self.max_coord_boost = value;
        }
        if let Some(value) = patch.backend_timeout {
            self.backend_timeout = value;
        }
    }
}

/// Metadata keys the pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub docid_field: String,
    pub langid_field: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            docid_field: "docid".to_string(),
            langid_field: "langid".to_string(),
        }
    }
}

impl MetadataConfig {
    fn merge(&mut self, patch: MetadataPatch) {
        if let Some(value) = patch.docid_field {
            self.docid_field = value;
        }
        if let Some(value) = patch.langid_field {
            self.langid_field = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub storage: Option<StoragePatch>,
    pub search: Option<SearchPatch>,
    pub metadata: Option<MetadataPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoragePatch {
    pub root: Option<PathBuf>,
    pub keyword_backend: Option<KeywordBackend>,
    pub handle_cache_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SearchPatch {
    pub top_k_tfidf: Option<usize>,
    pub cutoff_score_tfidf: Option<f32>,
    pub top_k_vectors: Option<usize>,
    pub autocorrect_query: Option<bool>,
    pub punish_verysmall_documents: Option<bool>,
    pub bm25: Option<bool>,
    pub ignore_coord: Option<bool>,
    pub max_coord_boost: Option<f32>,
    #[serde(default, with = "humantime_serde")]
    pub backend_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MetadataPatch {
    pub docid_field: Option<String>,
    pub langid_field: Option<String>,
}

fn env_bool(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    env(key).map(|value| {
        matches!(
            value.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_parse<T>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env(key) {
        Some(value) => value.trim().parse::<T>().map(Some).map_err(|err| {
            BsError::Config(format!("invalid {key} value {value}: {err}"))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.keyword_backend, KeywordBackend::TfIdf);
        assert_eq!(config.storage.handle_cache_size, 64);
        assert_eq!(config.search.top_k_tfidf, 10);
        assert_eq!(config.search.top_k_vectors, 5);
        assert!(config.search.autocorrect_query);
        assert!(!config.search.bm25);
        assert!(!config.search.punish_verysmall_documents);
        assert!((config.search.max_coord_boost - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.search.backend_timeout, Duration::from_secs(30));
        assert_eq!(config.metadata.docid_field, "docid");
        assert_eq!(config.metadata.langid_field, "langid");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("backend_timeout = \"30s\""));
        assert!(toml.contains("keyword_backend = \"tfidf\""));
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.search.backend_timeout, config.search.backend_timeout);
    }

    // =========================================================================
    // Patch merging
    // =========================================================================

    #[test]
    fn patch_overrides_only_given_fields() {
        let mut config = Config::default();
        let patch: ConfigPatch = toml::from_str(
            r#"
            [storage]
            keyword_backend = "tantivy"

            [search]
            top_k_tfidf = 3
            backend_timeout = "2s 500ms"
            "#,
        )
        .unwrap();
        config.merge_patch(patch);

        assert_eq!(config.storage.keyword_backend, KeywordBackend::Tantivy);
        assert_eq!(config.storage.handle_cache_size, 64);
        assert_eq!(config.search.top_k_tfidf, 3);
        assert_eq!(config.search.top_k_vectors, 5);
        assert_eq!(config.search.backend_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[search]\nbm25 = true\ntop_k_vectors = 2\n").unwrap();

        let config = Config::load(Some(&path), Some(dir.path())).unwrap();
        assert!(config.search.bm25);
        assert_eq!(config.search.top_k_vectors, 2);
        assert_eq!(config.storage.root, dir.path());
    }

    #[test]
    fn load_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing), None).is_err());
    }

    #[test]
    fn load_project_file_from_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[metadata]\ndocid_field = \"document_id\"\n",
        )
        .unwrap();

        let config = Config::load(None, Some(dir.path())).unwrap();
        assert_eq!(config.metadata.docid_field, "document_id");
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[search\ntop_k_tfidf = ").unwrap();
        let err = Config::load(Some(&path), None).unwrap_err();
        assert!(matches!(err, BsError::Config(_)));
    }

    // =========================================================================
    // Environment overrides
    // =========================================================================

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_overrides(&overrides(&[
                ("BRAINSEARCH_KEYWORD_BACKEND", "tantivy"),
                ("BRAINSEARCH_TOP_K_TFIDF", "25"),
                ("BRAINSEARCH_BM25", "yes"),
                ("BRAINSEARCH_AUTOCORRECT_QUERY", "0"),
                ("BRAINSEARCH_MAX_COORD_BOOST", "0.25"),
                ("BRAINSEARCH_BACKEND_TIMEOUT", "250ms"),
                ("BRAINSEARCH_LANGID_FIELD", "lang"),
            ]))
            .unwrap();

        assert_eq!(config.storage.keyword_backend, KeywordBackend::Tantivy);
        assert_eq!(config.search.top_k_tfidf, 25);
        assert!(config.search.bm25);
        assert!(!config.search.autocorrect_query);
        assert!((config.search.max_coord_boost - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.search.backend_timeout, Duration::from_millis(250));
        assert_eq!(config.metadata.langid_field, "lang");
    }

    #[test]
    fn env_overrides_reject_bad_values() {
        let mut config = Config::default();
        assert!(
            config
                .apply_overrides(&overrides(&[("BRAINSEARCH_TOP_K_TFIDF", "many")]))
                .is_err()
        );
        assert!(
            config
                .apply_overrides(&overrides(&[("BRAINSEARCH_KEYWORD_BACKEND", "solr")]))
                .is_err()
        );
        assert!(
            config
                .apply_overrides(&overrides(&[("BRAINSEARCH_BACKEND_TIMEOUT", "soon")]))
                .is_err()
        );
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.search.top_k_vectors = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.max_coord_boost = -0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.handle_cache_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.metadata.docid_field = " ".to_string();
        assert!(matches!(config.validate(), Err(BsError::MissingConfig(_))));
    }
}
