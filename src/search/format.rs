//! Final shaping of ranked fragments.

use super::types::{Fragment, SearchOutput};

/// Separator between fragment texts in LLM format.
pub const LLM_SEPARATOR: &str = "\n\n";

/// Shapes ranked fragments for the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultFormatter;

impl ResultFormatter {
    /// Texts joined by a blank line when `llm_format`, otherwise the
    /// fragments themselves; order is kept either way.
    pub fn format(fragments: Vec<Fragment>, llm_format: bool) -> SearchOutput {
        if llm_format {
            let texts: Vec<&str> = fragments.iter().map(|f| f.text.as_str()).collect();
            SearchOutput::Text(texts.join(LLM_SEPARATOR))
        } else {
            SearchOutput::Fragments(fragments)
        }
    }
}
