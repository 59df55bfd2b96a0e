//! Collection resolution: (user, org, collection) to opened backends
//!
//! On disk a collection is a directory
//! `<root>/<org>/<user>/<collection>/` holding the keyword index under
//! `keyword/` and the vector store in `vectors.db`.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{BsError, Result};
use crate::search::keyword::{KeywordBackend, KeywordIndex};
use crate::search::vector::{SqliteVectorStore, VectorStore};

const KEYWORD_DIR: &str = "keyword";
const VECTOR_DB: &str = "vectors.db";

/// Identifies one collection of one user in one organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionScope {
    pub user: String,
    pub org: String,
    pub collection: String,
}

impl CollectionScope {
    pub fn new(
        user: impl Into<String>,
        org: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            org: org.into(),
            collection: collection.into(),
        }
    }

    fn not_found(&self) -> BsError {
        BsError::CollectionNotFound {
            user: self.user.clone(),
            org: self.org.clone(),
            collection: self.collection.clone(),
        }
    }
}

impl fmt::Display for CollectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.user, self.collection)
    }
}

/// Hands out the keyword index and vector store backing a collection.
pub trait CollectionResolver: Send + Sync {
    fn keyword_index(&self, scope: &CollectionScope) -> Result<Arc<dyn KeywordIndex>>;

    fn vector_store(&self, scope: &CollectionScope) -> Result<Arc<dyn VectorStore>>;
}

/// One cache entry: filled by the first successful open of its path.
type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

type Cache<T> = Mutex<LruCache<PathBuf, Slot<T>>>;

/// Resolver over the on-disk collection layout.
///
/// Opened handles are kept in LRU caches so repeated searches reuse them.
/// Searching never creates a collection; [`FsCollectionResolver::create`]
/// does.
pub struct FsCollectionResolver {
    root: PathBuf,
    backend: KeywordBackend,
    docid_field: String,
    langid_field: String,
    keyword_cache: Cache<dyn KeywordIndex>,
    vector_cache: Cache<dyn VectorStore>,
}

impl FsCollectionResolver {
    pub fn new(
        root: impl Into<PathBuf>,
        backend: KeywordBackend,
        cache_size: NonZeroUsize,
        docid_field: &str,
        langid_field: &str,
    ) -> Self {
        Self {
            root: root.into(),
            backend,
            docid_field: docid_field.to_string(),
            langid_field: langid_field.to_string(),
            keyword_cache: Mutex::new(LruCache::new(cache_size)),
            vector_cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Directory of a collection; rejects ids that would escape the root.
    pub fn collection_dir(&self, scope: &CollectionScope) -> Result<PathBuf> {
        for (what, part) in [
            ("org", &scope.org),
            ("user", &scope.user),
            ("collection", &scope.collection),
        ] {
            if !is_safe_component(part) {
                return Err(BsError::InvalidRequest(format!(
                    "{what} id '{part}' is not a valid path component"
                )));
            }
        }
        Ok(self
            .root
            .join(&scope.org)
            .join(&scope.user)
            .join(&scope.collection))
    }

    /// Open both backends of a collection, creating them when missing.
    pub fn create(
        &self,
        scope: &CollectionScope,
    ) -> Result<(Arc<dyn KeywordIndex>, Arc<dyn VectorStore>)> {
        let dir = self.collection_dir(scope)?;
        std::fs::create_dir_all(&dir)?;

        let keyword_path = dir.join(KEYWORD_DIR);
        let keyword = cached(&self.keyword_cache, &keyword_path, || {
            let index: Arc<dyn KeywordIndex> = Arc::from(
                self.backend
                    .create(&keyword_path, &self.langid_field)?,
            );
            Ok(index)
        })?;

        let vector_path = dir.join(VECTOR_DB);
        let vectors = cached(&self.vector_cache, &vector_path, || {
            let store: Arc<dyn VectorStore> =
                Arc::new(SqliteVectorStore::open(&vector_path, &self.docid_field)?);
            Ok(store)
        })?;

        debug!(collection = %scope, path = %dir.display(), "collection ready");
        Ok((keyword, vectors))
    }
}

impl CollectionResolver for FsCollectionResolver {
    fn keyword_index(&self, scope: &CollectionScope) -> Result<Arc<dyn KeywordIndex>> {
        let path = self.collection_dir(scope)?.join(KEYWORD_DIR);
        cached(&self.keyword_cache, &path, || {
            if !self.backend.exists_at(&path) {
                return Err(scope.not_found());
            }
            let index = self
                .backend
                .open(&path, &self.langid_field)
                .map_err(|err| BsError::CollectionUnavailable {
                    collection: scope.collection.clone(),
                    reason: err.to_string(),
                })?;
            debug!(collection = %scope, backend = %self.backend, "opened keyword index");
            let index: Arc<dyn KeywordIndex> = Arc::from(index);
            Ok(index)
        })
    }

    fn vector_store(&self, scope: &CollectionScope) -> Result<Arc<dyn VectorStore>> {
        let path = self.collection_dir(scope)?.join(VECTOR_DB);
        cached(&self.vector_cache, &path, || {
            if !path.is_file() {
                return Err(scope.not_found());
            }
            let store = SqliteVectorStore::open(&path, &self.docid_field).map_err(|err| {
                BsError::CollectionUnavailable {
                    collection: scope.collection.clone(),
                    reason: err.to_string(),
                }
            })?;
            debug!(collection = %scope, "opened vector store");
            let store: Arc<dyn VectorStore> = Arc::new(store);
            Ok(store)
        })
    }
}

/// Look up `path` in `cache`, opening and inserting it on a miss.
///
/// The cache lock only guards slot lookup. Opening happens under the
/// path's own slot lock, so a slow open delays lookups of that path alone
/// and one path is still opened at most once at a time.
fn cached<T: ?Sized, F>(cache: &Cache<T>, path: &Path, open: F) -> Result<Arc<T>>
where
    F: FnOnce() -> Result<Arc<T>>,
{
    let slot = {
        let mut guard = cache.lock();
        match guard.get(path) {
            Some(slot) => Arc::clone(slot),
            None => {
                let slot: Slot<T> = Arc::new(Mutex::new(None));
                guard.put(path.to_path_buf(), Arc::clone(&slot));
                slot
            }
        }
    };

    let mut opened = slot.lock();
    if let Some(handle) = opened.as_ref() {
        return Ok(Arc::clone(handle));
    }
    match open() {
        Ok(handle) => {
            *opened = Some(Arc::clone(&handle));
            Ok(handle)
        }
        Err(err) => {
            drop(opened);
            let mut guard = cache.lock();
            if guard.peek(path).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                guard.pop(path);
            }
            Err(err)
        }
    }
}

fn is_safe_component(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part.contains(['/', '\\'])
        && !part.contains('\0')
}
