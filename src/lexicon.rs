//! Word lists and optional Hunspell lookup for the reflow engine.
//!
//! The compound whitelist is a plain word list. The lexicon loads Hunspell
//! dictionaries (English, German, French) plus a plain Latin word list, and
//! a word matching ANY of them counts as known.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};
use zspell::Dictionary;

use crate::error::ConfigError;

/// Reads a word list: one entry per line, blank lines and `#` comments skipped.
pub fn load_word_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::WordList {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_word_list(&content))
}

pub fn parse_word_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Case-insensitive set of legitimate hyphenated compounds ("well-being").
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    words: HashSet<String>,
}

impl Whitelist {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, compound: &str) -> bool {
        self.words.contains(&compound.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Multi-language dictionary container
pub struct Lexicon {
    english: Option<Dictionary>,
    german: Option<Dictionary>,
    french: Option<Dictionary>,
    latin: HashSet<String>,
}

impl Lexicon {
    /// Load dictionaries from the given directory. Missing dictionaries are
    /// skipped; a directory with none of them yields an empty lexicon.
    pub fn load(dict_dir: &Path) -> Self {
        let lexicon = Self {
            english: load_dict(dict_dir, "en_US"),
            german: load_dict(dict_dir, "de_DE"),
            french: load_dict(dict_dir, "fr_FR"),
            latin: load_latin_wordlist(dict_dir),
        };
        debug!("{}", lexicon.stats());
        lexicon
    }

    /// A lexicon backed only by a plain word list.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            english: None,
            german: None,
            french: None,
            latin: words.into_iter().map(|w| w.as_ref().to_string()).collect(),
        }
    }

    /// Check if a word exists in ANY loaded dictionary
    pub fn check(&self, word: &str) -> bool {
        if self.check_exact(word) {
            return true;
        }
        let lower = word.to_lowercase();
        lower != word && self.check_exact(&lower)
    }

    fn check_exact(&self, word: &str) -> bool {
        [&self.english, &self.german, &self.french]
            .into_iter()
            .flatten()
            .any(|d| d.check_word(word))
            || self.latin.contains(word)
    }

    pub fn is_empty(&self) -> bool {
        self.english.is_none() && self.german.is_none() && self.french.is_none() && self.latin.is_empty()
    }

    pub fn stats(&self) -> String {
        format!(
            "Dictionaries loaded: en={}, de={}, fr={}, la={}",
            self.english.is_some(),
            self.german.is_some(),
            self.french.is_some(),
            !self.latin.is_empty()
        )
    }
}

/// Latin ships as a simple word list (its Hunspell affix file is not
/// something zspell can build).
fn load_latin_wordlist(dict_dir: &Path) -> HashSet<String> {
    let wordlist_path = dict_dir.join("la_words.txt");
    if !wordlist_path.exists() {
        debug!("Latin word list not found: la_words.txt");
        return HashSet::new();
    }
    match load_word_list(&wordlist_path) {
        Ok(words) => {
            debug!("Loaded Latin word list: {} words", words.len());
            words.into_iter().collect()
        }
        Err(e) => {
            warn!("{e}");
            HashSet::new()
        }
    }
}

fn load_dict(dict_dir: &Path, name: &str) -> Option<Dictionary> {
    let aff_path = dict_dir.join(format!("{name}.aff"));
    let dic_path = dict_dir.join(format!("{name}.dic"));

    if !aff_path.exists() || !dic_path.exists() {
        debug!("Dictionary not found: {name}");
        return None;
    }

    let aff_content = fs::read_to_string(&aff_path)
        .map_err(|e| warn!("Failed to read {name}.aff: {e}"))
        .ok()?;
    let dic_content = fs::read_to_string(&dic_path)
        .map_err(|e| warn!("Failed to read {name}.dic: {e}"))
        .ok()?;

    match zspell::builder()
        .config_str(&aff_content)
        .dict_str(&dic_content)
        .build()
    {
        Ok(dict) => {
            debug!("Loaded dictionary: {name}");
            Some(dict)
        }
        Err(e) => {
            warn!("Failed to build dictionary {name}: {e}");
            None
        }
    }
}
