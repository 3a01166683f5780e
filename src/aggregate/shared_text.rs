use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

use crate::model::SharedQueryText;

/// Hex encoded SHA-256 of a full query text
pub fn full_text_sha(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Truncated prefix of `text`, counted in chars
pub fn truncate_text(text: &str, truncate_length: usize) -> String {
    text.chars().take(truncate_length).collect()
}

impl SharedQueryText {
    /// Short texts are kept whole; longer ones become prefix + hash
    pub fn from_full_text(text: &str, truncate_length: usize) -> Self {
        if text.chars().count() > truncate_length {
            Self {
                truncated_text: truncate_text(text, truncate_length),
                full_text_sha: Some(full_text_sha(text)),
            }
        } else {
            Self {
                truncated_text: text.to_string(),
                full_text_sha: None,
            }
        }
    }
}

/// Deduplicated text table referenced by index from aggregate query records
#[derive(Debug, Default)]
pub struct SharedQueryTextCollection {
    texts: Vec<SharedQueryText>,
    indexes: FxHashMap<SharedQueryText, i32>,
}

impl SharedQueryTextCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared_query_text_index(&mut self, text: SharedQueryText) -> i32 {
        if let Some(index) = self.indexes.get(&text) {
            return *index;
        }
        let index = self.texts.len() as i32;
        self.texts.push(text.clone());
        self.indexes.insert(text, index);
        index
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn texts(&self) -> &[SharedQueryText] {
        &self.texts
    }

    pub fn into_texts(self) -> Vec<SharedQueryText> {
        self.texts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_kept_whole() {
        let text = SharedQueryText::from_full_text("select 1", 120);
        assert_eq!(text.truncated_text, "select 1");
        assert!(text.full_text_sha.is_none());
    }

    #[test]
    fn test_long_text_truncated_with_hash() {
        let full = "x".repeat(130);
        let text = SharedQueryText::from_full_text(&full, 120);
        assert_eq!(text.truncated_text.len(), 120);
        assert_eq!(text.full_text_sha.as_deref(), Some(full_text_sha(&full).as_str()));
        assert_eq!(full_text_sha(&full).len(), 64);
    }

    #[test]
    fn test_indexes_are_deduplicated() {
        let mut collection = SharedQueryTextCollection::new();
        let a = collection.shared_query_text_index(SharedQueryText::from_full_text("a", 120));
        let b = collection.shared_query_text_index(SharedQueryText::from_full_text("b", 120));
        let again = collection.shared_query_text_index(SharedQueryText::from_full_text("a", 120));
        assert_eq!((a, b, again), (0, 1, 0));
        assert_eq!(collection.len(), 2);
    }
}
