//! In-memory accumulation of documents into a structure [`super::writer`]
//! can serialise (spec §4.2, Shard Builder / C2).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::document::{Document, SymbolRange};
use crate::repo::types::RepositoryDescriptor;
use crate::shard::trigram::{self, Trigram};

const SENTINEL: u8 = 0;
/// File format assumption: branch masks are a single u64 (spec §4.2 "K <= 64").
pub const MAX_BRANCHES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("builder already finalized")]
    AlreadyFinalized,
    #[error("document references {0} branches, repository allows at most {MAX_BRANCHES}")]
    TooManyBranches(usize),
    #[error("document references unknown branch {0:?}")]
    UnknownBranch(String),
    #[error("symbol range out of bounds for document {name:?}: [{start}, {end}) vs content length {len}")]
    SymbolOutOfBounds {
        name: String,
        start: u32,
        end: u32,
        len: usize,
    },
    #[error("shard content ceiling of {max} bytes exceeded")]
    ContentCeilingExceeded { max: u64 },
    #[error("shard document-count ceiling of {max} exceeded")]
    DocumentCeilingExceeded { max: u64 },
}

/// A single document's placement inside a sealed shard's blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub name: String,
    /// Byte offset/length into the sealed shard's (case-folded) content blob.
    /// Zero length for skipped documents.
    pub content_offset: u64,
    pub content_len: u64,
    pub case_bits: Vec<u8>,
    pub newline_offsets: Vec<u32>,
    pub symbols: Vec<SymbolRange>,
    pub branch_mask: u64,
    pub sub_repository_id: u32,
    pub language: Option<String>,
    pub skip_reason: Option<String>,
}

impl DocumentRecord {
    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }
}

/// The output of [`ShardBuilder::finalize`], ready for [`super::writer`].
pub struct SealedShard {
    pub content_blob: Vec<u8>,
    pub filename_blob: Vec<u8>,
    pub documents: Vec<DocumentRecord>,
    /// Per-trigram sorted absolute offsets into `content_blob`.
    pub postings: HashMap<Trigram, Vec<u32>>,
    pub sub_repositories: Vec<String>,
    pub repository: RepositoryDescriptor,
    pub index_options_hash: [u8; 32],
}

pub struct ShardBuilder {
    repository: RepositoryDescriptor,
    branch_index: HashMap<String, usize>,
    index_options_hash: [u8; 32],

    documents: Vec<DocumentRecord>,
    content_blob: Vec<u8>,
    filename_blob: Vec<u8>,
    raw_trigram_pairs: Vec<(Trigram, u32)>,
    sub_repositories: Vec<String>,
    sub_repository_index: HashMap<String, u32>,

    content_bytes: u64,
    max_content_bytes: u64,
    max_documents: u64,
    finalized: bool,
}

impl ShardBuilder {
    pub fn new(
        repository: RepositoryDescriptor,
        index_options_hash: [u8; 32],
        max_content_bytes: u64,
        max_documents: u64,
    ) -> Self {
        let branch_index = repository
            .branches
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name.clone(), i))
            .collect();

        Self {
            repository,
            branch_index,
            index_options_hash,
            documents: Vec::new(),
            content_blob: Vec::new(),
            filename_blob: Vec::new(),
            raw_trigram_pairs: Vec::new(),
            sub_repositories: Vec::new(),
            sub_repository_index: HashMap::new(),
            content_bytes: 0,
            max_content_bytes,
            max_documents,
            finalized: false,
        }
    }

    pub fn content_size(&self) -> u64 {
        self.content_bytes
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn branch_mask(&self, doc: &Document) -> Result<u64, BuilderError> {
        let Some(branches) = &doc.branches else {
            // "all branches of the repository"
            let k = self.repository.branches.len().min(MAX_BRANCHES);
            return Ok(if k == MAX_BRANCHES {
                u64::MAX
            } else {
                (1u64 << k) - 1
            });
        };

        if branches.len() > MAX_BRANCHES {
            return Err(BuilderError::TooManyBranches(branches.len()));
        }

        let mut mask = 0u64;
        for name in branches {
            let idx = *self
                .branch_index
                .get(name)
                .ok_or_else(|| BuilderError::UnknownBranch(name.clone()))?;
            mask |= 1 << idx;
        }
        Ok(mask)
    }

    fn sub_repository_id(&mut self, path: &str) -> u32 {
        if let Some(id) = self.sub_repository_index.get(path) {
            return *id;
        }
        let id = self.sub_repositories.len() as u32;
        self.sub_repositories.push(path.to_owned());
        self.sub_repository_index.insert(path.to_owned(), id);
        id
    }

    /// Validates and records `doc`. See spec §4.2 for the error conditions.
    pub fn add(&mut self, doc: Document) -> Result<(), BuilderError> {
        if self.finalized {
            return Err(BuilderError::AlreadyFinalized);
        }

        if !doc.symbols_in_bounds() {
            let len = doc.content.len();
            let bad = doc
                .symbols
                .iter()
                .find(|s| s.start >= s.end || s.end as usize > len)
                .expect("symbols_in_bounds() is false so at least one range must be invalid");
            return Err(BuilderError::SymbolOutOfBounds {
                name: doc.name.clone(),
                start: bad.start,
                end: bad.end,
                len,
            });
        }

        let branch_mask = self.branch_mask(&doc)?;

        if self.documents.len() as u64 + 1 > self.max_documents {
            return Err(BuilderError::DocumentCeilingExceeded {
                max: self.max_documents,
            });
        }

        let sub_repository_id = self.sub_repository_id(&doc.sub_repository_path);

        self.filename_blob.extend_from_slice(doc.name.as_bytes());
        self.filename_blob.push(SENTINEL);

        if doc.is_skipped() {
            self.documents.push(DocumentRecord {
                name: doc.name,
                content_offset: self.content_blob.len() as u64,
                content_len: 0,
                case_bits: Vec::new(),
                newline_offsets: Vec::new(),
                symbols: Vec::new(),
                branch_mask,
                sub_repository_id,
                language: doc.language,
                skip_reason: doc.skip_reason,
            });
            return Ok(());
        }

        if self.content_bytes + doc.content.len() as u64 > self.max_content_bytes {
            return Err(BuilderError::ContentCeilingExceeded {
                max: self.max_content_bytes,
            });
        }

        let newline_offsets = trigram::newline_index(&doc.content);
        let (folded, case_bits) = trigram::case_fold(&doc.content);
        let base_offset = self.content_blob.len() as u64;

        for (t, offset) in trigram::extract(&folded) {
            self.raw_trigram_pairs.push((t, base_offset as u32 + offset));
        }

        let content_len = folded.len() as u64;
        self.content_bytes += content_len;
        self.content_blob.extend_from_slice(&folded);
        self.content_blob.push(SENTINEL);

        self.documents.push(DocumentRecord {
            name: doc.name,
            content_offset: base_offset,
            content_len,
            case_bits,
            newline_offsets,
            symbols: doc.symbols,
            branch_mask,
            sub_repository_id,
            language: doc.language,
            skip_reason: None,
        });

        Ok(())
    }

    /// Computes trigram postings, normalises section tables and attaches
    /// repository metadata. After this, the builder is consumed.
    pub fn finalize(mut self) -> SealedShard {
        self.finalized = true;
        let postings = trigram::group_postings(self.raw_trigram_pairs.drain(..));

        SealedShard {
            content_blob: self.content_blob,
            filename_blob: self.filename_blob,
            documents: self.documents,
            postings,
            sub_repositories: self.sub_repositories,
            repository: self.repository,
            index_options_hash: self.index_options_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::types::BranchVersion;

    fn repo_with_branches(names: &[&str]) -> RepositoryDescriptor {
        let mut repo = RepositoryDescriptor::new("widget");
        repo.branches = names
            .iter()
            .map(|n| BranchVersion {
                name: n.to_string(),
                version: "deadbeef".to_string(),
            })
            .collect();
        repo
    }

    #[test]
    fn add_then_finalize_produces_trigram_postings() {
        let repo = repo_with_branches(&["main"]);
        let mut builder = ShardBuilder::new(repo, [0; 32], 1 << 20, 1000);
        builder.add(Document::new("a.rs", b"abc".to_vec())).unwrap();
        let sealed = builder.finalize();

        assert_eq!(sealed.documents.len(), 1);
        let postings = sealed.postings.get(b"abc").expect("trigram present");
        assert_eq!(postings, &vec![0u32]);
    }

    #[test]
    fn rejects_out_of_bounds_symbol() {
        let repo = repo_with_branches(&["main"]);
        let mut builder = ShardBuilder::new(repo, [0; 32], 1 << 20, 1000);
        let doc = Document::new("a.rs", b"hi".to_vec())
            .with_symbols(vec![SymbolRange::new(0, 5)]);
        assert!(matches!(
            builder.add(doc),
            Err(BuilderError::SymbolOutOfBounds { .. })
        ));
    }

    #[test]
    fn rejects_too_many_branches() {
        let repo = repo_with_branches(&["main"]);
        let mut builder = ShardBuilder::new(repo, [0; 32], 1 << 20, 1000);
        let branches: std::collections::BTreeSet<String> =
            (0..65).map(|i| format!("b{i}")).collect();
        let doc = Document::new("a.rs", b"hi".to_vec()).with_branches(branches);
        assert!(matches!(
            builder.add(doc),
            Err(BuilderError::TooManyBranches(65))
        ));
    }

    #[test]
    fn skipped_documents_contribute_no_trigrams() {
        let repo = repo_with_branches(&["main"]);
        let mut builder = ShardBuilder::new(repo, [0; 32], 1 << 20, 1000);
        let doc = Document::new("big.bin", b"abc".to_vec()).with_skip_reason("binary");
        builder.add(doc).unwrap();
        let sealed = builder.finalize();

        assert_eq!(sealed.documents.len(), 1);
        assert!(sealed.documents[0].is_skipped());
        assert!(sealed.postings.is_empty());
    }

    #[test]
    fn add_after_finalize_fails() {
        // finalize consumes self, so this is enforced at the type level;
        // this test instead checks the document-ceiling hard error.
        let repo = repo_with_branches(&["main"]);
        let mut builder = ShardBuilder::new(repo, [0; 32], 1 << 20, 1);
        builder.add(Document::new("a.rs", b"abc".to_vec())).unwrap();
        assert!(matches!(
            builder.add(Document::new("b.rs", b"def".to_vec())),
            Err(BuilderError::DocumentCeilingExceeded { .. })
        ));
    }
}
