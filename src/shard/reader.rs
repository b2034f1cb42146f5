//! Memory-mapped read access to a published shard (spec §4.1's "readers
//! mmap the file"). Used by the incremental-reindex check and, eventually,
//! by a query-serving surface outside this crate's scope.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use super::builder::DocumentRecord;
use super::format::{self, FormatError, SectionKind, TocEntry};
use super::writer::RepositoryMetadataSectionOwned;

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("shard is missing section {0:?}")]
    MissingSection(SectionKind),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A single opened, mmap'd shard. Holding one keeps the backing file mapped;
/// drop it to release the mapping.
pub struct ShardReader {
    mmap: Mmap,
    toc: Vec<TocEntry>,
    feature_version: u32,
}

impl ShardReader {
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let header = format::read_header(&mut &mmap[..])?;
        let toc_offset = format::read_footer(&mmap)? as usize;
        let toc = format::read_toc(&mut &mmap[toc_offset..])?;

        Ok(Self {
            mmap,
            toc,
            feature_version: header.feature_version,
        })
    }

    pub fn feature_version(&self) -> u32 {
        self.feature_version
    }

    fn section(&self, kind: SectionKind) -> Result<&[u8], ReaderError> {
        let entry = self
            .toc
            .iter()
            .find(|e| e.kind == kind)
            .ok_or(ReaderError::MissingSection(kind))?;
        let start = entry.offset as usize;
        let end = start + entry.size as usize;
        Ok(&self.mmap[start..end])
    }

    pub fn content(&self) -> Result<&[u8], ReaderError> {
        self.section(SectionKind::Content)
    }

    pub fn filenames(&self) -> Result<&[u8], ReaderError> {
        self.section(SectionKind::Filenames)
    }

    pub fn documents(&self) -> Result<Vec<DocumentRecord>, ReaderError> {
        let bytes = self.section(SectionKind::Documents)?;
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn branch_masks(&self) -> Result<Vec<u64>, ReaderError> {
        use byteorder::{LittleEndian, ReadBytesExt};
        let mut bytes = self.section(SectionKind::BranchMasks)?;
        let mut out = Vec::with_capacity(bytes.len() / 8);
        while !bytes.is_empty() {
            out.push(bytes.read_u64::<LittleEndian>()?);
        }
        Ok(out)
    }

    pub fn repository_metadata(&self) -> Result<RepositoryMetadataSectionOwned, ReaderError> {
        let bytes = self.section(SectionKind::RepositoryMetadata)?;
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decodes every trigram's posting list. Not cheap; callers that only
    /// need a handful of trigrams should scan `self.section` directly
    /// instead once a query surface exists.
    pub fn postings(&self) -> Result<HashMap<[u8; 3], Vec<u32>>, ReaderError> {
        use byteorder::{LittleEndian, ReadBytesExt};
        let mut bytes = self.section(SectionKind::TrigramPostings)?;
        let count = bytes.read_u32::<LittleEndian>()?;
        let mut out = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let mut trigram = [0u8; 3];
            io::Read::read_exact(&mut bytes, &mut trigram)?;
            let offset_count = bytes.read_u32::<LittleEndian>()?;
            let delta_len = bytes.read_u32::<LittleEndian>()? as usize;
            let (delta_bytes, rest) = bytes.split_at(delta_len);
            let offsets = super::trigram::decode_deltas(delta_bytes);
            debug_assert_eq!(offsets.len(), offset_count as usize);
            out.insert(trigram, offsets);
            bytes = rest;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::repo::types::RepositoryDescriptor;
    use crate::shard::builder::ShardBuilder;
    use crate::shard::writer::ShardWriter;

    #[test]
    fn roundtrips_a_real_shard() {
        let repo = RepositoryDescriptor::new("widget");
        let mut builder = ShardBuilder::new(repo, [3; 32], 1 << 20, 1000);
        builder
            .add(Document::new("a.rs", b"fn main() { println!(\"hi\"); }".to_vec()))
            .unwrap();
        let sealed = builder.finalize();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget_v0.00000001.zoekt");
        ShardWriter::write_to(&sealed, &path).unwrap();

        let reader = ShardReader::open(&path).unwrap();
        let docs = reader.documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "a.rs");

        let postings = reader.postings().unwrap();
        assert!(postings.contains_key(b"fn "));

        let metadata = reader.repository_metadata().unwrap();
        assert_eq!(metadata.repository.name, "widget");
        assert_eq!(metadata.index_options_hash, [3; 32]);
    }
}
