//! Character↔token id mapping.
//!
//! The reserved ids are fixed forever: `PAD=0`, `UNK=1`, `SOS=2`, `EOS=3`. Everything above
//! that is loaded from a tokenizer JSON file (`char -> id`), which must be dense (`0..n` all
//! assigned, no gaps) and must agree with the reserved ids above.

use std::collections::HashMap;
use std::path::Path;

use crate::error::InitError;

pub const PAD: i64 = 0;
pub const UNK: i64 = 1;
pub const SOS: i64 = 2;
pub const EOS: i64 = 3;

/// The id space a freshly-shipped tokenizer file uses: the four reserved ids plus `a..z`.
/// Apostrophe (id `30`) is reserved for a coordinated future extension and is not part of the
/// default map.
pub const DEFAULT_VOCAB_SIZE: usize = 30;

/// Character↔token mapping plus the inverse lookup used by [`Tokenizer::decode`].
#[derive(Debug, Clone)]
pub struct Tokenizer {
    char_to_id: HashMap<char, i64>,
    id_to_char: HashMap<i64, char>,
    vocab_size: usize,
}

impl Tokenizer {
    /// Build a tokenizer from an explicit `char -> id` map, validating reserved ids and
    /// denseness.
    pub fn from_map(char_to_id: HashMap<char, i64>) -> Result<Self, InitError> {
        let max_id = char_to_id.values().copied().max().unwrap_or(-1);
        if max_id < 0 {
            return Err(InitError::InvalidTokenizer(
                "tokenizer map must not be empty".to_owned(),
            ));
        }
        let vocab_size = (max_id + 1) as usize;

        // Denseness: every id in 0..vocab_size must be assigned to exactly one character,
        // except for the reserved ids (PAD/UNK/SOS/EOS), which are implicit rather than
        // mapped from a character.
        let mut seen = vec![false; vocab_size];
        seen[PAD as usize] = true;
        seen[UNK as usize] = true;
        seen[SOS as usize] = true;
        seen[EOS as usize] = true;

        for (&ch, &id) in &char_to_id {
            if id < 0 || id as usize >= vocab_size {
                return Err(InitError::InvalidTokenizer(format!(
                    "token id {id} for char '{ch}' is out of range"
                )));
            }
            if id == PAD || id == UNK || id == SOS || id == EOS {
                return Err(InitError::InvalidTokenizer(format!(
                    "char '{ch}' maps to reserved id {id}"
                )));
            }
            let slot = &mut seen[id as usize];
            if *slot {
                return Err(InitError::InvalidTokenizer(format!(
                    "token id {id} is assigned more than once"
                )));
            }
            *slot = true;
        }

        if let Some(gap) = seen.iter().position(|&present| !present) {
            return Err(InitError::InvalidTokenizer(format!(
                "token id {gap} has no assigned character (id space must be dense)"
            )));
        }

        let id_to_char = char_to_id.iter().map(|(&c, &id)| (id, c)).collect();

        Ok(Self {
            char_to_id,
            id_to_char,
            vocab_size,
        })
    }

    /// Build the default tokenizer: reserved ids plus `a..z` at `4..=29`.
    pub fn default_english() -> Self {
        let mut map = HashMap::new();
        for (i, ch) in ('a'..='z').enumerate() {
            map.insert(ch, 4 + i as i64);
        }
        Self::from_map(map).expect("default_english tokenizer is internally consistent")
    }

    /// Load a tokenizer from a JSON file mapping `char -> id`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InitError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let raw: HashMap<String, i64> = serde_json::from_slice(&bytes).map_err(|err| {
            InitError::InvalidTokenizer(format!(
                "failed to parse tokenizer JSON at '{}': {err}",
                path.display()
            ))
        })?;

        let mut char_to_id = HashMap::with_capacity(raw.len());
        for (key, id) in raw {
            let mut chars = key.chars();
            let (Some(ch), None) = (chars.next(), chars.next()) else {
                return Err(InitError::InvalidTokenizer(format!(
                    "tokenizer key '{key}' is not a single character"
                )));
            };
            char_to_id.insert(ch, id);
        }

        Self::from_map(char_to_id)
    }

    /// The dense id-space size of this tokenizer (`0..vocab_size`).
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Encode a word into token ids (no `SOS`/`EOS` added).
    pub fn encode(&self, word: &str) -> Result<Vec<i64>, VocabError> {
        word.chars()
            .map(|c| {
                self.char_to_id
                    .get(&c)
                    .copied()
                    .ok_or(VocabError::UnknownChar(c))
            })
            .collect()
    }

    /// Decode token ids into a string, ignoring `SOS`/`PAD`/`EOS`/`UNK`.
    pub fn decode(&self, tokens: &[i64]) -> String {
        tokens
            .iter()
            .filter(|&&id| id != PAD && id != UNK && id != SOS && id != EOS)
            .filter_map(|id| self.id_to_char.get(id))
            .collect()
    }

    /// The nearest-key lookup domain: characters this tokenizer knows about.
    pub fn known_chars(&self) -> impl Iterator<Item = char> + '_ {
        self.char_to_id.keys().copied()
    }

    pub fn id_for_char(&self, ch: char) -> Option<i64> {
        self.char_to_id.get(&ch).copied()
    }
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum VocabError {
    #[error("character '{0}' has no token id")]
    UnknownChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_english_round_trips() {
        let tok = Tokenizer::default_english();
        for word in ["hello", "swipe", "a", "zzz"] {
            let ids = tok.encode(word).unwrap();
            assert_eq!(tok.decode(&ids), word);
        }
    }

    #[test]
    fn decode_ignores_reserved_tokens() {
        let tok = Tokenizer::default_english();
        let ids = vec![SOS, tok.id_for_char('h').unwrap(), tok.id_for_char('i').unwrap(), EOS, PAD];
        assert_eq!(tok.decode(&ids), "hi");
    }

    #[test]
    fn encode_unknown_char_errors() {
        let tok = Tokenizer::default_english();
        assert_eq!(tok.encode("a1").unwrap_err(), VocabError::UnknownChar('1'));
    }

    #[test]
    fn from_map_rejects_reserved_id_collision() {
        let mut map = HashMap::new();
        map.insert('a', PAD);
        let err = Tokenizer::from_map(map).unwrap_err();
        assert!(matches!(err, InitError::InvalidTokenizer(_)));
    }

    #[test]
    fn from_map_rejects_gaps() {
        let mut map = HashMap::new();
        map.insert('a', 4);
        map.insert('b', 6); // gap at id 5
        let err = Tokenizer::from_map(map).unwrap_err();
        assert!(matches!(err, InitError::InvalidTokenizer(_)));
    }

    #[test]
    fn vocab_size_matches_default_english() {
        let tok = Tokenizer::default_english();
        assert_eq!(tok.vocab_size(), DEFAULT_VOCAB_SIZE);
    }

    #[test]
    fn load_parses_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, r#"{"a": 4, "b": 5}"#).unwrap();
        let tok = Tokenizer::load(&path).unwrap();
        assert_eq!(tok.vocab_size(), 6);
        assert_eq!(tok.encode("ab").unwrap(), vec![4, 5]);
    }
}
