//! The atomic unit of indexing (spec §3).

use std::collections::BTreeSet;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// A single identifier occurrence worth highlighting in a document's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRange {
    pub start: u32,
    pub end: u32,
}

impl SymbolRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    fn is_valid_for(&self, content_len: usize) -> bool {
        self.start < self.end && (self.end as usize) <= content_len
    }
}

/// One (name, content) pair belonging to a repository, plus the metadata the
/// shard builder needs to place it correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub content: Vec<u8>,
    /// Branches this (name, content) pair appears in. `None` means "all
    /// branches of the repository".
    pub branches: Option<BTreeSet<String>>,
    pub sub_repository_path: String,
    pub symbols: Vec<SymbolRange>,
    pub skip_reason: Option<String>,
    pub language: Option<String>,

    #[serde(skip)]
    content_hash: OnceCell<blake3::Hash>,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            branches: None,
            sub_repository_path: String::new(),
            symbols: Vec::new(),
            skip_reason: None,
            language: None,
            content_hash: OnceCell::new(),
        }
    }

    pub fn with_branches(mut self, branches: BTreeSet<String>) -> Self {
        self.branches = Some(branches);
        self
    }

    pub fn with_sub_repository_path(mut self, path: impl Into<String>) -> Self {
        self.sub_repository_path = path.into();
        self
    }

    pub fn with_symbols(mut self, symbols: Vec<SymbolRange>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_skip_reason(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Content-addressable digest, cached after first access. Used for the
    /// "identical (name, content, branches) is idempotent" `add` rule and for
    /// dedup-by-name within a flush batch.
    pub fn content_hash(&self) -> blake3::Hash {
        *self.content_hash.get_or_init(|| blake3::hash(&self.content))
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    /// True if `content` contains a null byte, the spec's binary heuristic.
    pub fn looks_binary(&self) -> bool {
        self.content.contains(&0)
    }

    /// Every symbol range must fall within `content`.
    pub fn symbols_in_bounds(&self) -> bool {
        self.symbols
            .iter()
            .all(|s| s.is_valid_for(self.content.len()))
    }
}

/// Intake policy described in spec §3. Applied by the caller (normally the
/// indexing pipeline) before a document reaches the shard builder.
pub struct IntakeLimits {
    pub size_max: u64,
    pub trigram_max: u64,
    pub large_file_patterns: globset::GlobSet,
}

/// Outcome of evaluating a freshly-walked document against [`IntakeLimits`].
/// `Admit` documents are indexed normally; `Skip` documents are recorded as
/// metadata-only with the given reason.
pub enum IntakeDecision {
    Admit,
    Skip { reason: String, force_binary: bool },
}

impl IntakeLimits {
    pub fn classify(&self, name: &str, content: &[u8]) -> IntakeDecision {
        if content.contains(&0) {
            return IntakeDecision::Skip {
                reason: "binary".to_owned(),
                force_binary: true,
            };
        }

        let bypasses_size_limit = self.large_file_patterns.is_match(name);
        if !bypasses_size_limit && content.len() as u64 > self.size_max {
            return IntakeDecision::Skip {
                reason: format!(
                    "document size {} larger than limit {}",
                    content.len(),
                    self.size_max
                ),
                force_binary: false,
            };
        }

        let distinct_trigrams = crate::shard::trigram::distinct_trigram_count(content);
        if distinct_trigrams > self.trigram_max {
            return IntakeDecision::Skip {
                reason: format!(
                    "too many distinct trigrams: {distinct_trigrams} > {}",
                    self.trigram_max
                ),
                force_binary: true,
            };
        }

        IntakeDecision::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_detection_via_null_byte() {
        let doc = Document::new("a.bin", vec![0x41, 0x00, 0x42]);
        assert!(doc.looks_binary());
    }

    #[test]
    fn content_hash_is_stable() {
        let doc = Document::new("a.rs", b"fn main() {}".to_vec());
        assert_eq!(doc.content_hash(), doc.content_hash());
    }

    #[test]
    fn symbol_bounds_are_validated() {
        let mut doc = Document::new("a.rs", b"hello".to_vec());
        doc.symbols = vec![SymbolRange::new(0, 5)];
        assert!(doc.symbols_in_bounds());
        doc.symbols = vec![SymbolRange::new(0, 6)];
        assert!(!doc.symbols_in_bounds());
    }

    #[test]
    fn zero_trigram_max_skips_every_non_empty_document() {
        let limits = IntakeLimits {
            size_max: u64::MAX,
            trigram_max: 0,
            large_file_patterns: globset::GlobSet::empty(),
        };
        // Even a 1-byte document has no true 3-byte trigram window, but
        // must still be skipped: trigram_max=0 means "no non-empty content
        // is admissible", not "short content is exempt".
        assert!(matches!(
            limits.classify("f.txt", b"a"),
            IntakeDecision::Skip { .. }
        ));
        assert!(matches!(
            limits.classify("f.txt", b"ab"),
            IntakeDecision::Skip { .. }
        ));
        assert!(matches!(
            limits.classify("f.txt", b"abc"),
            IntakeDecision::Skip { .. }
        ));
        assert!(matches!(limits.classify("f.txt", b""), IntakeDecision::Admit));
    }

    #[test]
    fn size_boundary_is_inclusive_at_size_max() {
        let limits = IntakeLimits {
            size_max: 4,
            trigram_max: u64::MAX,
            large_file_patterns: globset::GlobSet::empty(),
        };
        assert!(matches!(
            limits.classify("f.txt", b"abcd"),
            IntakeDecision::Admit
        ));
        assert!(matches!(
            limits.classify("f.txt", b"abcde"),
            IntakeDecision::Skip { .. }
        ));
    }
}
