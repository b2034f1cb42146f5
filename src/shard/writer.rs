//! Serializes a [`SealedShard`] to bytes and publishes it atomically
//! (spec §4.1 "Shard Writer" / C1). Grounded on the fsync-then-rename
//! sequence in the `evisdrenova-helix` index-writer (`other_examples`),
//! generalized from a single canonical/cached index pair to the shard
//! section layout in [`super::format`].

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::atomic;
use super::builder::{DocumentRecord, SealedShard};
use super::format::{self, SectionKind, TocEntry};
use super::trigram::{self, Trigram};
use crate::repo::types::RepositoryDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct RepositoryMetadataSection<'a> {
    repository: &'a RepositoryDescriptor,
    sub_repositories: &'a [String],
    index_options_hash: [u8; 32],
}

/// Owned counterpart of [`RepositoryMetadataSection`], for readers that
/// deserialize it back out of a shard.
#[derive(Deserialize)]
pub struct RepositoryMetadataSectionOwned {
    pub repository: RepositoryDescriptor,
    pub sub_repositories: Vec<String>,
    pub index_options_hash: [u8; 32],
}

/// Bytes written, and the ratio of on-disk size to raw content size — logged
/// so an operator can see per-repository index overhead over time.
pub struct WriteReport {
    pub bytes_written: u64,
    pub overhead_ratio: f64,
}

pub struct ShardWriter;

impl ShardWriter {
    /// Serializes `sealed` and publishes it at `final_path` via
    /// temp-file-then-rename, so a reader never observes a partially
    /// written shard.
    pub fn write_to(sealed: &SealedShard, final_path: &Path) -> Result<WriteReport, WriterError> {
        let body = Self::serialize(sealed)?;
        atomic::write_atomically(final_path, &body)?;

        // spec's literal formula: file_size / (content_bytes + 1).
        let overhead_ratio = body.len() as f64 / (sealed.content_blob.len() as f64 + 1.0);

        tracing::info!(
            repository = %sealed.repository.name,
            bytes_written = body.len(),
            content_bytes = sealed.content_blob.len(),
            overhead_ratio,
            "wrote shard"
        );

        Ok(WriteReport {
            bytes_written: body.len() as u64,
            overhead_ratio,
        })
    }

    fn serialize(sealed: &SealedShard) -> Result<Vec<u8>, WriterError> {
        let postings_section = encode_postings(&sealed.postings)?;
        let documents_section = serde_json::to_vec(&sealed.documents)?;
        let branch_masks_section = encode_branch_masks(&sealed.documents)?;
        let metadata_section = serde_json::to_vec(&RepositoryMetadataSection {
            repository: &sealed.repository,
            sub_repositories: &sealed.sub_repositories,
            index_options_hash: sealed.index_options_hash,
        })?;

        let sections: [(SectionKind, &[u8]); 6] = [
            (SectionKind::Content, &sealed.content_blob),
            (SectionKind::Filenames, &sealed.filename_blob),
            (SectionKind::TrigramPostings, &postings_section),
            (SectionKind::Documents, &documents_section),
            (SectionKind::BranchMasks, &branch_masks_section),
            (SectionKind::RepositoryMetadata, &metadata_section),
        ];

        let mut header = Vec::new();
        format::write_header(&mut header, format::FEATURE_VERSION)?;

        // Section bodies are laid out right after the header; the TOC (whose
        // own length we only know once every entry is built) follows them.
        let mut offset = header.len() as u64;
        let mut toc = Vec::with_capacity(sections.len());
        for (kind, bytes) in &sections {
            toc.push(TocEntry {
                kind: *kind,
                offset,
                size: bytes.len() as u64,
            });
            offset += bytes.len() as u64;
        }

        let mut out = header;
        for (_, bytes) in &sections {
            out.extend_from_slice(bytes);
        }
        let toc_offset = out.len() as u64;
        format::write_toc(&mut out, &toc)?;
        format::write_footer(&mut out, toc_offset)?;

        Ok(out)
    }
}

fn encode_postings(postings: &std::collections::HashMap<Trigram, Vec<u32>>) -> io::Result<Vec<u8>> {
    // Sorted for determinism: two builds of identical input produce byte-identical shards.
    let sorted: BTreeMap<&Trigram, &Vec<u32>> = postings.iter().collect();

    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(sorted.len() as u32)?;
    for (trigram, offsets) in sorted {
        out.write_all(trigram)?;
        out.write_u32::<LittleEndian>(offsets.len() as u32)?;
        let deltas = trigram::encode_deltas(offsets);
        out.write_u32::<LittleEndian>(deltas.len() as u32)?;
        out.write_all(&deltas)?;
    }
    Ok(out)
}

fn encode_branch_masks(documents: &[DocumentRecord]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(documents.len() * 8);
    for doc in documents {
        out.write_u64::<LittleEndian>(doc.branch_mask)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::repo::types::RepositoryDescriptor;
    use crate::shard::builder::ShardBuilder;

    #[test]
    fn writes_a_shard_a_reader_can_parse_the_header_and_toc_of() {
        let repo = RepositoryDescriptor::new("widget");
        let mut builder = ShardBuilder::new(repo, [7; 32], 1 << 20, 1000);
        builder
            .add(Document::new("a.rs", b"fn main() {}".to_vec()))
            .unwrap();
        let sealed = builder.finalize();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget_v0.00000001.zoekt");
        let report = ShardWriter::write_to(&sealed, &path).unwrap();
        assert!(report.bytes_written > 0);

        let bytes = std::fs::read(&path).unwrap();
        let header = format::read_header(&mut &bytes[..]).unwrap();
        assert_eq!(header.feature_version, format::FEATURE_VERSION);
    }

    #[test]
    fn identical_input_produces_identical_bytes() {
        let build = || {
            let repo = RepositoryDescriptor::new("widget");
            let mut builder = ShardBuilder::new(repo, [1; 32], 1 << 20, 1000);
            builder
                .add(Document::new("a.rs", b"abcdef".to_vec()))
                .unwrap();
            builder.finalize()
        };

        let first = ShardWriter::serialize(&build()).unwrap();
        let second = ShardWriter::serialize(&build()).unwrap();
        assert_eq!(first, second);
    }
}
