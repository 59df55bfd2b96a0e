//! brainsearch search - Search one or more collections
//!
//! Keyword indexes pick the documents, their fragments are re-ranked against
//! the same query and the best ones printed.

use clap::Args;
use colored::Colorize;
use serde_json::json;

use crate::app::AppContext;
use crate::cli::output::{self, HumanLayout};
use crate::error::Result;
use crate::search::{CollectionSelector, MetadataFilter, SearchOutput, SearchRequest};

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Collection to search (repeatable)
    #[arg(long = "collection", short = 'c', required = true)]
    pub collections: Vec<String>,

    /// Documents kept after the keyword stage
    #[arg(long)]
    pub top_k_tfidf: Option<usize>,

    /// Minimum keyword score for a document
    #[arg(long)]
    pub cutoff: Option<f32>,

    /// Fragments returned
    #[arg(long, short = 'k')]
    pub top_k_vectors: Option<usize>,

    /// Language of the query text (ISO 639-1), selecting its stop words
    #[arg(long = "lang")]
    pub language: Option<String>,

    /// Keep query terms as typed
    #[arg(long)]
    pub no_autocorrect: bool,

    /// Use BM25 term weighting
    #[arg(long)]
    pub bm25: bool,

    /// Penalize very short documents
    #[arg(long)]
    pub punish_small: bool,

    /// Disable the coordination boost
    #[arg(long)]
    pub ignore_coord: bool,

    /// Upper bound of the coordination boost
    #[arg(long)]
    pub max_coord_boost: Option<f32>,

    /// Keep only documents whose metadata matches key=value (repeatable)
    #[arg(long = "filter", short = 'f')]
    pub filters: Vec<String>,

    /// Print the fragment texts joined by blank lines
    #[arg(long)]
    pub llm_format: bool,
}

impl SearchArgs {
    /// Request for `ctx`'s user with config defaults under the flags.
    pub fn to_request(&self, ctx: &AppContext) -> Result<SearchRequest> {
        let collections = if self.collections.len() == 1 {
            CollectionSelector::One(self.collections[0].clone())
        } else {
            CollectionSelector::Many(self.collections.clone())
        };
        let mut request = SearchRequest::with_defaults(
            &ctx.config.search,
            &ctx.user,
            &ctx.org,
            &self.query,
            collections,
        )
        .llm_format(self.llm_format);

        if let Some(value) = self.top_k_tfidf {
            request.top_k_tfidf = value;
        }
        if let Some(value) = self.cutoff {
            request.cutoff_score_tfidf = value;
        }
        if let Some(value) = self.top_k_vectors {
            request.top_k_vectors = value;
        }
        if let Some(value) = self.max_coord_boost {
            request.scoring.max_coord_boost = value;
        }
        if let Some(language) = &self.language {
            request = request.language(language.as_str());
        }
        if self.no_autocorrect {
            request.autocorrect_query = false;
        }
        request.scoring.bm25 |= self.bm25;
        request.scoring.punish_verysmall_documents |= self.punish_small;
        request.scoring.ignore_coord |= self.ignore_coord;

        if !self.filters.is_empty() {
            request = request.with_filter(MetadataFilter::parse_pairs(&self.filters)?);
        }
        Ok(request)
    }
}

pub fn run(ctx: &AppContext, args: &SearchArgs) -> Result<()> {
    let request = args.to_request(ctx)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(ctx.orchestrator.search(&request))?;
    display_results(ctx, args, &result)
}

fn display_results(ctx: &AppContext, args: &SearchArgs, result: &SearchOutput) -> Result<()> {
    if ctx.robot_mode {
        let count = result.fragments().map_or(usize::from(!result.is_empty()), <[_]>::len);
        return output::emit_robot(&output::robot_ok(json!({
            "query": args.query,
            "collections": args.collections,
            "count": count,
            "results": result,
        })));
    }

    match result {
        SearchOutput::Text(text) => {
            if !text.is_empty() {
                println!("{text}");
            }
        }
        SearchOutput::Fragments(fragments) if fragments.is_empty() => {
            println!(
                "{} No results for '{}'",
                "!".yellow(),
                args.query.cyan()
            );
            println!();
            println!("Try:");
            println!("  - Using different keywords");
            println!("  - Raising --top-k-tfidf or lowering --cutoff");
            println!("  - Removing --filter conditions");
        }
        SearchOutput::Fragments(fragments) => {
            let docid_field = &ctx.config.metadata.docid_field;
            let mut layout = HumanLayout::new();
            layout.title(&format!(
                "{} results for '{}'",
                fragments.len(),
                args.query.cyan()
            ));
            for (i, fragment) in fragments.iter().enumerate() {
                let rank = format!("{}.", i + 1);
                let doc = fragment
                    .document_id(docid_field)
                    .unwrap_or_else(|| "-".to_string());
                layout.push_line(format!("{:4} {}", rank.dimmed(), doc.bold()));
                layout.paragraph(&fragment.text, 5);
                layout.blank();
            }
            output::emit_human(layout);
        }
    }
    Ok(())
}
