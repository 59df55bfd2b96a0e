//! brainsearch import - Load pre-chunked documents into a collection
//!
//! Input is JSON Lines, one document per line:
//!
//! ```text
//! {"docid": "d1", "text": "...", "metadata": {...},
//!  "fragments": [{"text": "...", "metadata": {...}, "embedding": [0.1, ...]}]}
//! ```
//!
//! A document without `fragments` becomes its own single fragment.
//! Fragments inherit the document's language when they carry none.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::app::AppContext;
use crate::cli::output;
use crate::config::MetadataConfig;
use crate::error::{BsError, Result};
use crate::search::{Fragment, KeywordIndex, Metadata, VectorStore};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Collection to load into; created when missing
    pub collection: String,

    /// JSON Lines file of documents
    pub file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct DocumentRecord {
    docid: String,
    text: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    fragments: Option<Vec<FragmentRecord>>,
}

#[derive(Debug, Deserialize)]
struct FragmentRecord {
    text: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub documents: usize,
    pub fragments: usize,
}

pub fn run(ctx: &AppContext, args: &ImportArgs) -> Result<()> {
    let scope = ctx.scope(&args.collection);
    let (index, store) = ctx.resolver.create(&scope)?;
    let summary = import_file(
        &args.file,
        index.as_ref(),
        store.as_ref(),
        &ctx.config.metadata,
    )?;
    info!(
        collection = %scope,
        documents = summary.documents,
        fragments = summary.fragments,
        "import finished"
    );

    if ctx.robot_mode {
        return output::emit_robot(&output::robot_ok(json!({
            "collection": args.collection,
            "documents": summary.documents,
            "fragments": summary.fragments,
        })));
    }
    println!(
        "{} Imported {} documents ({} fragments) into {}",
        "✓".green(),
        summary.documents.to_string().bold(),
        summary.fragments,
        args.collection.cyan()
    );
    Ok(())
}

/// Load every document of `path` into `index` and `store`.
///
/// Nothing becomes visible unless the whole file is stored: a malformed
/// line aborts before any write, the fragments go in as one batch, and the
/// keyword index is rolled back when staging or that batch fails.
pub fn import_file(
    path: &Path,
    index: &dyn KeywordIndex,
    store: &dyn VectorStore,
    fields: &MetadataConfig,
) -> Result<ImportSummary> {
    let records = read_records(path)?;

    let mut summary = ImportSummary::default();
    let mut batch: Vec<(Fragment, Option<Vec<f32>>)> = Vec::new();
    let mut documents: Vec<(String, Metadata)> = Vec::with_capacity(records.len());
    for record in records {
        let mut doc_metadata = record.metadata;
        doc_metadata.insert(fields.docid_field.clone(), record.docid.clone().into());
        let language = doc_metadata.get(&fields.langid_field).cloned();

        let parts = record.fragments.unwrap_or_else(|| {
            vec![FragmentRecord {
                text: record.text.clone(),
                metadata: doc_metadata.clone(),
                embedding: None,
            }]
        });
        for part in parts {
            let mut metadata = part.metadata;
            metadata.insert(fields.docid_field.clone(), record.docid.clone().into());
            if let Some(language) = &language {
                metadata
                    .entry(fields.langid_field.clone())
                    .or_insert_with(|| language.clone());
            }
            batch.push((Fragment::new(part.text, metadata), part.embedding));
        }
        debug!(docid = %record.docid, "document staged");
        documents.push((record.text, doc_metadata));
    }

    summary.documents = documents.len();
    let stored = documents
        .into_iter()
        .try_for_each(|(text, metadata)| index.insert(&text, metadata))
        .and_then(|()| store.insert_batch(&batch));
    summary.fragments = match stored {
        Ok(stored) => stored,
        Err(err) => {
            index.rollback()?;
            return Err(err);
        }
    };
    index.commit()?;
    Ok(summary)
}

fn read_records(path: &Path) -> Result<Vec<DocumentRecord>> {
    let file = std::fs::File::open(path)
        .map_err(|err| BsError::Import(format!("open {}: {err}", path.display())))?;
    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: DocumentRecord = serde_json::from_str(&line).map_err(|err| {
            BsError::Import(format!("{}:{}: {err}", path.display(), number + 1))
        })?;
        if record.docid.trim().is_empty() {
            return Err(BsError::Import(format!(
                "{}:{}: empty docid",
                path.display(),
                number + 1
            )));
        }
        records.push(record);
    }
    Ok(records)
}
