//! Dictionary lookups for submitted words.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("failed to read word list {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("dictionary unavailable: {0}")]
    Unavailable(String),
}

/// Answers whether a word is playable.
///
/// The coordinator calls this synchronously while handling a submission and treats an
/// error as a rejection.
pub trait DictionaryOracle {
    fn check(&self, word: &str) -> Result<bool, OracleError>;
}

/// In-memory word list, case-insensitive.
#[derive(Clone, Debug, Default)]
pub struct WordList {
    words: HashSet<String>,
}

impl WordList {
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { words }
    }

    /// Read one word per line; blank lines and `#` comments are skipped.
    pub fn load(path: &Path) -> Result<Self, OracleError> {
        let content = std::fs::read_to_string(path).map_err(|source| OracleError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_words(
            content.lines().filter(|line| !line.trim_start().starts_with('#')),
        ))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl DictionaryOracle for WordList {
    fn check(&self, word: &str) -> Result<bool, OracleError> {
        Ok(self.words.contains(&word.to_lowercase()))
    }
}
