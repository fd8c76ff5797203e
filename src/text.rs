use once_cell::sync::Lazy;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;
use whatlang::{detect, Lang};

/// Number of words an average reader covers per minute, used for the
/// deterministic reading-time estimate.
pub const WORDS_PER_MINUTE: usize = 200;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be",
        "because", "been", "but", "by", "can", "could", "did", "do", "does", "for", "from",
        "had", "has", "have", "he", "her", "his", "how", "i", "if", "in", "into", "is", "it",
        "its", "just", "more", "most", "new", "no", "not", "of", "on", "one", "or", "other",
        "our", "out", "over", "said", "says", "she", "so", "some", "such", "than", "that",
        "the", "their", "them", "then", "there", "these", "they", "this", "to", "up", "was",
        "we", "were", "what", "when", "which", "who", "will", "with", "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

static ENGLISH_STEMMER: Lazy<Stemmer> = Lazy::new(|| Stemmer::create(Algorithm::English));

/// Tokenizes free text into normalized terms for feature extraction:
/// unicode word segmentation, lowercasing, stopword and short-token
/// removal, and stemming for English content.
pub fn tokens(text: &str) -> Vec<String> {
    let stem = matches!(detect(text).map(|info| info.lang()), Some(Lang::Eng));

    text.unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1 && !STOPWORDS.contains(w.as_str()))
        .map(|w| {
            if stem && w.is_ascii() {
                ENGLISH_STEMMER.stem(&w).into_owned()
            } else {
                w
            }
        })
        .collect()
}

/// Like [`tokens`] but keeps surface forms (no stemming), for user-facing
/// keyword extraction.
pub fn content_words(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1 && !STOPWORDS.contains(w.as_str()))
        .collect()
}

/// Counts unicode words, which works for both space-delimited and CJK text.
pub fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

/// Reading time in whole minutes, always at least 1 for non-empty text.
/// Monotonically non-decreasing in the word count.
pub fn reading_minutes(words: usize) -> u32 {
    if words == 0 {
        return 0;
    }
    (words.div_ceil(WORDS_PER_MINUTE)).max(1) as u32
}

/// Truncates text to at most `max_chars` characters on a char boundary,
/// collapsing whitespace first.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect()
}

/// Strips a Markdown code fence (```json ... ``` or bare ```) from an LLM
/// response, returning the inner payload. Returns the trimmed input when no
/// fence is present.
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip an optional language tag on the opening fence line
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
        return body.trim();
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_drop_stopwords_and_stem() {
        let toks = tokens("The markets are running toward new highs");
        assert!(!toks.contains(&"the".to_string()));
        assert!(toks.contains(&"market".to_string()));
        assert!(toks.contains(&"run".to_string()));
    }

    #[test]
    fn reading_time_is_monotonic() {
        let mut last = 0;
        for words in [0, 1, 150, 200, 201, 1000, 5000] {
            let minutes = reading_minutes(words);
            assert!(minutes >= last);
            last = minutes;
        }
        assert_eq!(reading_minutes(0), 0);
        assert_eq!(reading_minutes(1), 1);
        assert_eq!(reading_minutes(401), 3);
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let text = "日本語のテキストを  途中で   切り詰める";
        let cut = excerpt(text, 5);
        assert_eq!(cut.chars().count(), 5);
    }

    #[test]
    fn strips_fenced_json() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\ntrailing";
        assert_eq!(strip_code_fence(raw), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
    }
}
