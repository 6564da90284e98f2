//! Re-ranking: turns raw beam-search hypotheses into word candidates ordered by a score
//! that blends the decoder's own confidence with how plausible the word is against the lexicon
//! and against the shape of the gesture that produced it.

use crate::beam::BeamResult;
use crate::vocab::{Lexicon, Tokenizer};

/// `boost_common`: applied when a word is among the lexicon's 100 most frequent entries.
const COMMON_BOOST: f32 = 2.0;
/// `boost_top5000`: applied when a word is among the lexicon's 5000 most frequent entries.
const TOP5000_BOOST: f32 = 1.5;
/// `length_penalty`: applied to words longer than 12 characters.
const LONG_WORD_PENALTY: f32 = 0.5;
const LONG_WORD_THRESHOLD: usize = 12;

/// Calibrates the length prior: average pixel distance a swiped path covers per character.
const PIXELS_PER_CHAR: f32 = 50.0;
/// Calibrates the duration prior: average seconds a swipe spends per character.
const SECONDS_PER_CHAR: f32 = 0.15;

/// A single ranked word prediction.
///
/// `score` is the raw blended value used for sorting;
/// `score_i32` is the externally-facing fixed-point representation (`round(score * 1000)`), the
/// form the facade and host actually consume.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPrediction {
    pub word: String,
    pub score: f32,
    pub score_i32: i32,
    /// The beam's own length-normalized decode confidence, pre-re-ranking.
    pub confidence: f32,
    pub vocab_score: f32,
    pub context_score: f32,
}

/// Re-rank `beams` into word predictions, best first.
///
/// `path_length` (pixel units) and `duration_s` come from the same
/// [`crate::trajectory::TrajectoryFeatures`] that produced the beams, and feed the context
/// prior: gestures that cover a long path in a long time are more likely to spell long words.
/// Words with no lexicon entry are dropped rather than penalized — there is no frequency to
/// score them against.
pub fn rerank(
    beams: &[BeamResult],
    tokenizer: &Tokenizer,
    lexicon: &Lexicon,
    path_length: f32,
    duration_s: f32,
) -> Vec<RankedPrediction> {
    let mut ranked: Vec<RankedPrediction> = beams
        .iter()
        .filter_map(|beam| {
            let word = tokenizer.decode(&beam.tokens);
            if word.is_empty() || !word.chars().all(|c| c.is_ascii_alphabetic()) {
                return None;
            }
            if !lexicon.is_word(&word) {
                return None;
            }

            let vocab_score = vocab_score(&word, lexicon);
            let context_score = context_score(&word, path_length, duration_s);
            let score = beam.confidence * vocab_score * context_score;

            Some(RankedPrediction {
                word,
                score,
                score_i32: (score * 1000.0).round() as i32,
                confidence: beam.confidence,
                vocab_score,
                context_score,
            })
        })
        .collect();

    // Two beams can decode to the same word (different token paths, same characters); keep the
    // higher-scoring one. Ties, including the post-dedup order, break on `(-len(w), w)`
    // ascending for byte-for-byte reproducibility.
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.word.chars().count().cmp(&a.word.chars().count()))
            .then_with(|| a.word.cmp(&b.word))
    });
    ranked.dedup_by(|a, b| a.word == b.word);

    ranked
}

/// A frequency-weighted score, boosted for common/top-5000
/// words and penalized for very long ones.
fn vocab_score(word: &str, lexicon: &Lexicon) -> f32 {
    let freq = lexicon.freq(word);
    let boost_common = if lexicon.is_common(word) { COMMON_BOOST } else { 1.0 };
    let boost_top5000 = if lexicon.is_top5000(word) { TOP5000_BOOST } else { 1.0 };
    let length_penalty = if word.chars().count() > LONG_WORD_THRESHOLD {
        LONG_WORD_PENALTY
    } else {
        1.0
    };
    (freq * 1000.0 + 1.0) * boost_common * boost_top5000 * length_penalty
}

/// The product of a length prior and a duration prior,
/// each floored so a wildly mismatched gesture dampens a word's score without zeroing it out.
fn context_score(word: &str, path_length: f32, duration_s: f32) -> f32 {
    let len = word.chars().count() as f32;
    let length_prior = (1.0 - (len - path_length / PIXELS_PER_CHAR).abs() * 0.1).max(0.5);
    let duration_prior = (1.0 - (duration_s - SECONDS_PER_CHAR * len).abs() * 0.2).max(0.7);
    length_prior * duration_prior
}
