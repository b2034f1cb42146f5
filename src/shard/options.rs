//! Content-addressable options hashing and the incremental-reindex decision
//! (spec §4.6, C6). Grounded on the teacher's content-hash dedup pattern in
//! `document.rs`'s `blake3::hash` usage, generalized from hashing one
//! document's bytes to hashing the whole set of knobs that affect a shard's
//! bytes.

use std::path::Path;

use serde::Serialize;

use crate::repo::types::BranchVersion;
use crate::shard::reader::{ReaderError, ShardReader};

/// Every setting that, if changed, requires every affected repository to be
/// rebuilt from scratch rather than incrementally skipped.
#[derive(Debug, Clone, Serialize)]
pub struct IndexOptions {
    pub size_max: u64,
    pub trigram_max: u64,
    /// Sorted glob source strings (not the compiled `GlobSet`, which isn't
    /// hashable/comparable) bypassing `size_max`.
    pub large_file_globs: Vec<String>,
    pub ctags_enabled: bool,
    pub feature_version: u32,
}

impl IndexOptions {
    /// A digest of every field above, stable across process restarts and
    /// independent of field declaration order (each field is length-prefixed
    /// into the hasher explicitly rather than relying on derive(Hash)).
    pub fn hash_options(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.size_max.to_le_bytes());
        hasher.update(&self.trigram_max.to_le_bytes());
        hasher.update(&(self.large_file_globs.len() as u64).to_le_bytes());
        for glob in &self.large_file_globs {
            hasher.update(&(glob.len() as u64).to_le_bytes());
            hasher.update(glob.as_bytes());
        }
        hasher.update(&[self.ctags_enabled as u8]);
        hasher.update(&self.feature_version.to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// True if the shard at `existing_shard_path` (ordinal 0 of a repository's
/// shard set by convention) was already built with `options` and the same
/// branch set, so the pipeline can skip rebuilding every shard for this
/// repository (spec §4.6's incremental-reindex rule).
pub fn incremental_skip(
    existing_shard_path: &Path,
    options: &IndexOptions,
    branches: &[BranchVersion],
) -> Result<bool, ReaderError> {
    if !existing_shard_path.exists() {
        return Ok(false);
    }

    let reader = ShardReader::open(existing_shard_path)?;
    let metadata = reader.repository_metadata()?;

    if metadata.index_options_hash != options.hash_options() {
        return Ok(false);
    }

    Ok(metadata.repository.branches == branches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_options() -> IndexOptions {
        IndexOptions {
            size_max: 1 << 20,
            trigram_max: 20_000,
            large_file_globs: vec!["*.lock".to_string()],
            ctags_enabled: true,
            feature_version: 1,
        }
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let options = sample_options();
        assert_eq!(options.hash_options(), options.hash_options());
    }

    #[test]
    fn hash_changes_with_any_field() {
        let base = sample_options();
        let mut changed = sample_options();
        changed.trigram_max += 1;
        assert_ne!(base.hash_options(), changed.hash_options());
    }

    #[test]
    fn missing_shard_is_never_skippable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-shard.zoekt");
        assert!(!incremental_skip(&missing, &sample_options(), &[]).unwrap());
    }
}
