//! Passphrase generation from a deployment-bundled wordlist
//!
//! Derivation never consults the wordlist; this is only for minting new
//! passphrases and for front-end validation before a passphrase reaches
//! [`crate::IdentityDeriver`].

use anyhow::Context;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashSet;
use std::path::Path;

use tipdrop_core::{TipdropError, TipdropResult};

use crate::MAX_PASSPHRASE_LEN;

/// Minimum distinct words a usable list must hold
pub const MIN_WORDLIST_LEN: usize = 2;

#[derive(Debug, Clone)]
pub struct Wordlist {
    words: Vec<String>,
    index: HashSet<String>,
}

impl Wordlist {
    /// Load a newline-separated wordlist. Blank lines and `#` comments are
    /// skipped, words are lowercased and deduplicated.
    pub fn load(path: &Path) -> TipdropResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading wordlist: {}", path.display()))?;
        let list = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), words = list.len(), "wordlist loaded");
        Ok(list)
    }

    pub fn parse(content: &str) -> TipdropResult<Self> {
        let mut words = Vec::new();
        let mut index = HashSet::new();
        for line in content.lines() {
            let word = line.trim();
            if word.is_empty() || word.starts_with('#') {
                continue;
            }
            if word.chars().any(char::is_whitespace) {
                return Err(TipdropError::config(format!(
                    "wordlist entry contains whitespace: {word:?}"
                )));
            }
            let word = word.to_lowercase();
            if index.insert(word.clone()) {
                words.push(word);
            }
        }
        if words.len() < MIN_WORDLIST_LEN {
            return Err(TipdropError::config(format!(
                "wordlist has {} distinct words, need at least {MIN_WORDLIST_LEN}",
                words.len()
            )));
        }
        Ok(Self { words, index })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains(word)
    }

    /// Entropy in bits of a passphrase of `count` uniformly drawn words.
    pub fn entropy_bits(&self, count: usize) -> f64 {
        count as f64 * (self.words.len() as f64).log2()
    }

    /// Draw `count` words with the OS RNG.
    pub fn generate(&self, count: usize) -> TipdropResult<SecretString> {
        if count == 0 {
            return Err(TipdropError::config("passphrase must have at least one word"));
        }
        let mut rng = OsRng;
        let mut chosen = Vec::with_capacity(count);
        for _ in 0..count {
            // Parse guarantees at least MIN_WORDLIST_LEN entries
            if let Some(word) = self.words.choose(&mut rng) {
                chosen.push(word.as_str());
            }
        }
        let phrase = chosen.join(" ");
        if phrase.len() > MAX_PASSPHRASE_LEN {
            return Err(TipdropError::config(format!(
                "{count} words exceed the {MAX_PASSPHRASE_LEN}-byte passphrase limit"
            )));
        }
        Ok(SecretString::from(phrase))
    }

    /// Check a passphrase a source typed back in: word count in range, every
    /// word on the list, total length within bounds.
    ///
    /// Derivation is case-sensitive and list words are lowercase, so a word
    /// with any uppercase letter is rejected rather than folded.
    pub fn validate(
        &self,
        passphrase: &SecretString,
        min_words: usize,
        max_words: usize,
    ) -> TipdropResult<()> {
        let phrase = passphrase.expose_secret();
        if phrase.len() > MAX_PASSPHRASE_LEN {
            return Err(TipdropError::crypto("passphrase too long"));
        }
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.len() < min_words || words.len() > max_words {
            return Err(TipdropError::crypto(format!(
                "passphrase has {} words, expected {min_words}..={max_words}",
                words.len()
            )));
        }
        if words.iter().any(|w| w.chars().any(char::is_uppercase)) {
            return Err(TipdropError::crypto("passphrase words must be lowercase"));
        }
        if words.iter().any(|w| !self.contains(w)) {
            return Err(TipdropError::crypto("passphrase contains unknown words"));
        }
        Ok(())
    }
}
