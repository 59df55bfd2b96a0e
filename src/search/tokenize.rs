//! Text analysis shared by every keyword backend
//!
//! Documents and queries go through the same pipeline so that term
//! statistics line up regardless of which backend stores them:
//!
//! 1. Unicode NFKC normalization (folds full-width forms used in CJK text)
//! 2. Lowercasing
//! 3. Splitting on non-alphanumerics; CJK ideographs and kana become
//!    single-character tokens since those scripts carry no word spacing
//! 4. Stop-word removal using the ISO 639-1 list of the text's language
//!    (English when untagged, nothing for languages without a list)

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use unicode_normalization::UnicodeNormalization;

/// Language id assumed for documents and queries that carry none.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Languages shipped in the `stop-words` ISO lists; `stop_words::get`
/// panics on any other code.
const ISO_LANGUAGES: &[&str] = &[
    "af", "ar", "bg", "bn", "br", "ca", "cs", "da", "de", "el", "en", "eo", "es", "et", "eu",
    "fa", "fi", "fr", "ga", "gl", "gu", "ha", "he", "hi", "hr", "hu", "hy", "id", "it", "ja",
    "ko", "ku", "la", "lt", "lv", "mr", "ms", "nl", "no", "pl", "pt", "ro", "ru", "sk", "sl",
    "so", "st", "sv", "sw", "th", "tl", "tr", "uk", "ur", "vi", "yo", "zh", "zu",
];

static STOP_WORDS: LazyLock<HashMap<&'static str, HashSet<&'static str>>> = LazyLock::new(|| {
    ISO_LANGUAGES
        .iter()
        .map(|&code| (code, stop_words::get(code).iter().copied().collect()))
        .collect()
});

/// Primary ISO 639-1 subtag of a language id: `"pt-BR"` and `"PT_br"` give `"pt"`.
pub fn primary_language(langid: &str) -> String {
    langid
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Stop-word list for a language id, `None` meaning [`DEFAULT_LANGUAGE`].
///
/// Unknown languages get no list, so none of their tokens are dropped.
pub fn stop_words_for(language: Option<&str>) -> Option<&'static HashSet<&'static str>> {
    let code = primary_language(language.unwrap_or(DEFAULT_LANGUAGE));
    STOP_WORDS.get(code.as_str())
}

/// True for scripts tokenized one character at a time.
fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF      // hiragana, katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xF900..=0xFAFF    // CJK compatibility ideographs
        | 0x20000..=0x2FA1F  // supplementary ideographs
    )
}

pub fn is_stopword(token: &str, language: Option<&str>) -> bool {
    stop_words_for(language).is_some_and(|list| list.contains(token))
}

/// Split text into normalized tokens, keeping stop-words.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized: String = text.nfkc().collect::<String>().to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in normalized.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Tokens of a stored document in the given language.
pub fn analyze_document(text: &str, language: Option<&str>) -> Vec<String> {
    let tokens = tokenize(text);
    match stop_words_for(language) {
        Some(list) => tokens.into_iter().filter(|t| !list.contains(t.as_str())).collect(),
        None => tokens,
    }
}

/// Distinct query terms in first-occurrence order, stop-words removed.
pub fn analyze_query(text: &str, language: Option<&str>) -> Vec<String> {
    let list = stop_words_for(language);
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(text) {
        let stop = list.is_some_and(|list| list.contains(token.as_str()));
        if !stop && !terms.contains(&token) {
            terms.push(token);
        }
    }
    terms
}

/// Edit distance between two strings, counted in chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Largest edit distance accepted when correcting a term of `len` chars.
const fn max_correction_distance(len: usize) -> usize {
    match len {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// Nearest vocabulary term for a query term that the index does not contain.
///
/// `vocabulary` yields `(term, document_frequency)`. The winner has the
/// smallest distance, then the highest document frequency, then sorts first;
/// iteration order therefore never changes the outcome.
pub fn correct_term<'a, I>(term: &str, vocabulary: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, u64)>,
{
    let term_len = term.chars().count();
    let max_distance = max_correction_distance(term_len);
    if max_distance == 0 {
        return None;
    }

    let mut best: Option<(usize, u64, &str)> = None;
    for (candidate, df) in vocabulary {
        if candidate == term || df == 0 {
            continue;
        }
        if candidate.chars().count().abs_diff(term_len) > max_distance {
            continue;
        }
        let distance = levenshtein(term, candidate);
        if distance > max_distance {
            continue;
        }
        let better = best.is_none_or(|(best_distance, best_df, best_term)| {
            (distance, std::cmp::Reverse(df), candidate)
                < (best_distance, std::cmp::Reverse(best_df), best_term)
        });
        if better {
            best = Some((distance, df, candidate));
        }
    }
    best.map(|(_, _, candidate)| candidate.to_string())
}
