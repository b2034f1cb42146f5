//! Document ranking (spec §4.4): a lexicographic rank vector, smaller is
//! better, computed before documents are handed to the shard builder so
//! earlier-ranked documents get lower internal ids. Deliberately a handful
//! of small pure functions rather than one scoring struct, so each factor is
//! independently testable.

use crate::document::Document;

/// `x / (1 + x)`, monotonic in `[0, 1)`, used to turn an unbounded count into
/// a bounded rank component without a magic cutoff.
pub fn squash(x: f64) -> f64 {
    x / (1.0 + x)
}

/// One document's rank vector; compared lexicographically, smaller first.
/// Fields are in priority order, matching spec §4.4's enumeration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankVector {
    is_test_file: f64,
    lacks_symbols: f64,
    content_length: f64,
    name_length: f64,
    lacks_branches: f64,
    original_index: f64,
}

impl RankVector {
    fn as_tuple(&self) -> (u64, u64, u64, u64, u64, u64) {
        // Compare as bit patterns: every component is non-negative and
        // produced by squash()/literal 0.0/1.0, so bitwise order on the raw
        // f64 representation matches numeric order (no NaN, no negative
        // zero ambiguity ever enters this path).
        (
            self.is_test_file.to_bits(),
            self.lacks_symbols.to_bits(),
            self.content_length.to_bits(),
            self.name_length.to_bits(),
            self.lacks_branches.to_bits(),
            self.original_index.to_bits(),
        )
    }
}

impl PartialOrd for RankVector {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.as_tuple().cmp(&other.as_tuple()))
    }
}

/// Builds the rank vector for `doc`, whose position in the pre-sort batch
/// was `original_index` (used only as the final, stable tie-break).
pub fn rank_vector(doc: &Document, original_index: usize) -> RankVector {
    let is_test_file = if doc.name.contains("test") { 1.0 } else { 0.0 };
    let lacks_symbols = 1.0 - squash(doc.symbols.len() as f64);
    let content_length = squash(doc.content.len() as f64);
    let name_length = squash(doc.name.len() as f64);
    let branch_count = doc.branches.as_ref().map_or(0, |b| b.len());
    let lacks_branches = 1.0 - squash(branch_count as f64);
    let original_index = squash(original_index as f64);

    RankVector {
        is_test_file,
        lacks_symbols,
        content_length,
        name_length,
        lacks_branches,
        original_index,
    }
}

/// Sorts `documents` in place by ascending rank vector, stable on ties (the
/// `original_index` component already encodes original position, but
/// `sort_by` is used anyway so any future factor collision still falls back
/// to insertion order).
pub fn sort_by_rank(documents: &mut [Document]) {
    let mut ranked: Vec<(RankVector, usize)> = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| (rank_vector(doc, i), i))
        .collect();
    ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let order: Vec<usize> = ranked.into_iter().map(|(_, i)| i).collect();
    let originals: Vec<Document> = documents.to_vec();
    for (slot, &original_i) in documents.iter_mut().zip(order.iter()) {
        *slot = originals[original_i].clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squash_is_bounded_and_monotonic() {
        assert_eq!(squash(0.0), 0.0);
        assert!(squash(1.0) < squash(2.0));
        assert!(squash(1_000_000.0) < 1.0);
    }

    #[test]
    fn shorter_name_ranks_first() {
        let mut docs = vec![
            Document::new("longlonglong", b"bla".to_vec()),
            Document::new("short", b"bla".to_vec()),
        ];
        sort_by_rank(&mut docs);
        assert_eq!(docs[0].name, "short");
        assert_eq!(docs[1].name, "longlonglong");
    }

    #[test]
    fn test_files_are_deprioritized_over_name_length() {
        let mut docs = vec![
            Document::new("test", b"bla".to_vec()),
            Document::new("longlonglong", b"bla".to_vec()),
        ];
        sort_by_rank(&mut docs);
        assert_eq!(docs[0].name, "longlonglong");
        assert_eq!(docs[1].name, "test");
    }

    #[test]
    fn more_symbols_ranks_first() {
        use crate::document::SymbolRange;
        let mut docs = vec![
            Document::new("a.rs", b"fn a() {}".to_vec()),
            Document::new("b.rs", b"fn b() {}".to_vec())
                .with_symbols(vec![SymbolRange::new(3, 4)]),
        ];
        sort_by_rank(&mut docs);
        assert_eq!(docs[0].name, "b.rs");
    }
}
