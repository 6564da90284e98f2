//! Frequency-weighted word list.
//!
//! Two word lists are merged: a primary list (required) and an optional "enhanced" list layered
//! on top. Both are plain newline-separated word files, ranked by line order — frequency is
//! derived from rank, not stored explicitly. The enhanced list never overwrites a word the
//! primary list already ranked; it only adds words the primary list didn't have.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::error::InitError;

/// Hard cap on lexicon size. Lists longer than this are truncated, with a warning naming how
/// many entries were dropped.
pub const MAX_WORDS: usize = 150_000;

/// A frequency-ranked word list, plus a few derived views used by the re-ranker and the
/// nearest-key trajectory builder.
#[derive(Debug, Clone)]
pub struct Lexicon {
    /// word -> frequency weight, `1 / (rank + 1)`.
    freq: HashMap<String, f32>,
    /// word -> 0-based rank, for deterministic tie-breaking independent of float equality.
    rank: HashMap<String, usize>,
    by_length: HashMap<usize, Vec<String>>,
    common_words: Vec<String>,
    top5000: std::collections::HashSet<String>,
}

/// Size of the [`Lexicon::top5000`] boost set.
const TOP5000: usize = 5000;
/// Size of the [`Lexicon::common_words`] boost set.
const COMMON_WORDS: usize = 100;

impl Lexicon {
    /// Load the primary word list, optionally layering an enhanced list on top.
    ///
    /// Both files are newline-separated, one word per line, already rank-ordered (most
    /// frequent first). Blank lines are ignored.
    pub fn load(
        primary_path: impl AsRef<Path>,
        enhanced_path: Option<impl AsRef<Path>>,
    ) -> Result<Self, InitError> {
        let primary = read_word_list(primary_path.as_ref())?;
        if primary.is_empty() {
            return Err(InitError::InvalidLexicon(format!(
                "primary lexicon '{}' contains no words",
                primary_path.as_ref().display()
            )));
        }

        let mut words = primary;
        if let Some(enhanced_path) = enhanced_path {
            let enhanced = read_word_list(enhanced_path.as_ref())?;
            let seen: std::collections::HashSet<&str> =
                words.iter().map(String::as_str).collect();
            for word in enhanced {
                if !seen.contains(word.as_str()) {
                    words.push(word);
                }
            }
        }

        if words.len() > MAX_WORDS {
            let dropped = words.len() - MAX_WORDS;
            warn!(dropped, cap = MAX_WORDS, "lexicon exceeds cap, truncating");
            words.truncate(MAX_WORDS);
        }

        Ok(Self::from_ranked_words(words))
    }

    pub(crate) fn from_ranked_words(words: Vec<String>) -> Self {
        let mut freq = HashMap::with_capacity(words.len());
        let mut rank = HashMap::with_capacity(words.len());
        let mut by_length: HashMap<usize, Vec<String>> = HashMap::new();

        for (i, word) in words.iter().enumerate() {
            freq.insert(word.clone(), 1.0 / (i as f32 + 1.0));
            rank.insert(word.clone(), i);
            by_length.entry(word.chars().count()).or_default().push(word.clone());
        }

        let common_words = words.iter().take(COMMON_WORDS).cloned().collect();
        let top5000 = words.iter().take(TOP5000).cloned().collect();

        Self {
            freq,
            rank,
            by_length,
            common_words,
            top5000,
        }
    }

    /// Whether `word` is present in the lexicon.
    pub fn is_word(&self, word: &str) -> bool {
        self.freq.contains_key(word)
    }

    /// Frequency weight in `(0, 1]`, `1 / (rank + 1)`. `0.0` if the word is unknown.
    pub fn freq(&self, word: &str) -> f32 {
        self.freq.get(word).copied().unwrap_or(0.0)
    }

    /// 0-based rank (lower is more frequent), or `None` if the word is unknown.
    pub fn rank(&self, word: &str) -> Option<usize> {
        self.rank.get(word).copied()
    }

    /// All known words of exactly `len` characters, in frequency-descending order.
    pub fn words_of_length(&self, len: usize) -> &[String] {
        self.by_length.get(&len).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The 100 most frequent words.
    pub fn common_words(&self) -> &[String] {
        &self.common_words
    }

    /// Whether `word` is within the 5000 most frequent words.
    pub fn is_top5000(&self, word: &str) -> bool {
        self.top5000.contains(word)
    }

    /// Whether `word` is within the 100 most frequent words.
    pub fn is_common(&self, word: &str) -> bool {
        self.common_words.iter().any(|w| w == word)
    }

    pub fn len(&self) -> usize {
        self.freq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freq.is_empty()
    }
}

fn read_word_list(path: &Path) -> Result<Vec<String>, InitError> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}
