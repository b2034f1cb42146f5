//! Buffers documents, flushes at size thresholds, and drives
//! C3 (symbols) → C4 (rank) → C2 (build) → C1 (write) for one repository's
//! indexing job (spec §4.5, Indexing Pipeline / C5). Grounded on the
//! teacher's `Indexes::writers()` mutex-serialized writer acquisition
//! (`indexes/indexer.rs`), generalized from one mutex to a
//! `tokio::sync::Semaphore`-bounded worker pool, and on
//! `WriteHandleForIndexers::commit`/`rollback`'s "commit every handle or
//! roll back every handle" shape for the all-or-nothing publish step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::document::{Document, IntakeLimits};
use crate::rank;
use crate::repo::types::RepositoryDescriptor;
use crate::shard::builder::BuilderError;
use crate::shard::format::{self, FormatError};
use crate::shard::naming::{self, shard_basename, shard_prefix, shard_temp_basename};
use crate::shard::options::IndexOptions;
use crate::shard::writer::{ShardWriter, WriterError};
use crate::shard::ShardBuilder;
use crate::symbols::{self, ExtractorError, SymbolExtractorConfig, DEFAULT_CHUNK_LIMIT_BYTES};

/// Default worker-pool size, spec §4.5.
pub const DEFAULT_PARALLELISM: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("repository name must not be empty")]
    EmptyRepositoryName,
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("shard-build worker task failed: {0}")]
    Join(String),
}

/// Everything one pipeline run needs to know about the repository it is
/// building shards for. Immutable for the lifetime of the [`Pipeline`];
/// shared across worker tasks behind an `Arc`.
pub struct PipelineOptions {
    pub repository: RepositoryDescriptor,
    pub index_options: IndexOptions,
    pub index_dir: PathBuf,
    pub parallelism: usize,
    pub shard_max_bytes: u64,
    pub shard_max_documents: u64,
    pub intake_limits: IntakeLimits,
    pub symbol_extractor: Option<SymbolExtractorConfig>,
}

type BuildResult = Result<(PathBuf, PathBuf), PipelineError>;

/// Accumulates documents for one repository and drives them through the
/// shard-build/publish pipeline. Not `Clone`/`Sync`: one `Pipeline` is owned
/// by the single indexing job that created it (spec §5 "within one
/// repository, indexing jobs are serialised").
pub struct Pipeline {
    options: Arc<PipelineOptions>,
    batch: Vec<Document>,
    batch_index: HashMap<String, usize>,
    batch_bytes: u64,
    next_ordinal: u32,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<BuildResult>,
    completed: Vec<(PathBuf, PathBuf)>,
    first_error: Option<PipelineError>,
}

/// Validates `options` and constructs an empty pipeline ready for `add`.
pub fn new_pipeline(options: PipelineOptions) -> Result<Pipeline, PipelineError> {
    if options.repository.name.is_empty() {
        return Err(PipelineError::EmptyRepositoryName);
    }
    let parallelism = options.parallelism.max(1);

    Ok(Pipeline {
        options: Arc::new(options),
        batch: Vec::new(),
        batch_index: HashMap::new(),
        batch_bytes: 0,
        next_ordinal: 0,
        semaphore: Arc::new(Semaphore::new(parallelism)),
        tasks: JoinSet::new(),
        completed: Vec::new(),
        first_error: None,
    })
}

impl Pipeline {
    /// Applies the spec §3 intake classification, dedups by name within the
    /// current batch, and flushes if the accumulated content now exceeds
    /// `shard_max_bytes`.
    pub async fn add(&mut self, mut doc: Document) -> Result<(), PipelineError> {
        match self.options.intake_limits.classify(&doc.name, &doc.content) {
            crate::document::IntakeDecision::Admit => {}
            crate::document::IntakeDecision::Skip { reason, force_binary } => {
                doc.skip_reason = Some(reason);
                if force_binary {
                    doc.language = Some("binary".to_string());
                }
                doc.content.clear();
            }
        }

        self.dedup_insert(doc);

        if self.batch_bytes > self.options.shard_max_bytes {
            self.flush().await?;
        }
        Ok(())
    }

    fn dedup_insert(&mut self, doc: Document) {
        if let Some(&idx) = self.batch_index.get(&doc.name) {
            let existing = &self.batch[idx];
            if existing.content_hash() == doc.content_hash() && existing.branches == doc.branches {
                // identical (name, content, branches): add is a no-op.
                return;
            }
            self.batch_bytes -= existing.content.len() as u64;
            self.batch_bytes += doc.content.len() as u64;
            self.batch[idx] = doc;
        } else {
            self.batch_index.insert(doc.name.clone(), self.batch.len());
            self.batch_bytes += doc.content.len() as u64;
            self.batch.push(doc);
        }
    }

    /// Returns current accumulated content bytes, for callers that want to
    /// flush on their own schedule (mirrors [`ShardBuilder::content_size`]).
    pub fn content_size(&self) -> u64 {
        self.batch_bytes
    }

    /// Hands the current batch to a worker (or runs it inline when
    /// `parallelism == 1`) and clears the batch. Build/write errors are
    /// recorded, not returned here — they surface from [`Pipeline::finish`]
    /// so every worker gets a chance to run before the job is judged.
    pub async fn flush(&mut self) -> Result<(), PipelineError> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.batch);
        self.batch_index.clear();
        self.batch_bytes = 0;

        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        let options = Arc::clone(&self.options);

        if self.options.parallelism <= 1 {
            let result = build_one_shard(options, batch, ordinal).await;
            self.record(result);
        } else {
            let semaphore = Arc::clone(&self.semaphore);
            self.tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed while the pipeline is alive");
                build_one_shard(options, batch, ordinal).await
            });
        }
        Ok(())
    }

    fn record(&mut self, result: BuildResult) {
        match result {
            Ok(pair) => self.completed.push(pair),
            Err(err) => {
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                }
            }
        }
    }

    /// Flushes the last batch, waits for every worker, then either publishes
    /// every temp shard atomically or, on any failure, removes every temp
    /// file and returns the first error (spec §4.5 "all-or-nothing").
    pub async fn finish(mut self) -> Result<Vec<PathBuf>, PipelineError> {
        self.flush().await?;

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => self.record(result),
                Err(join_err) => {
                    if self.first_error.is_none() {
                        self.first_error = Some(PipelineError::Join(join_err.to_string()));
                    }
                }
            }
        }

        if let Some(err) = self.first_error {
            for (temp, _final) in &self.completed {
                let _ = std::fs::remove_file(temp);
            }
            return Err(err);
        }

        let mut published = Vec::with_capacity(self.completed.len());
        for (temp, final_path) in &self.completed {
            crate::shard::atomic::publish_temp_sibling(temp, final_path)?;
            published.push(final_path.clone());
        }

        self.delete_stale_shards()?;
        Ok(published)
    }

    /// Deletes any shard belonging to this repository whose ordinal is
    /// `>= next_ordinal`: leftovers from a prior, larger run (spec §4.5).
    fn delete_stale_shards(&self) -> Result<(), PipelineError> {
        let prefix = shard_prefix(&self.options.repository.name, format::FEATURE_VERSION)?;

        let entries = match std::fs::read_dir(&self.options.index_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !name.ends_with(".zoekt") {
                continue;
            }
            if let Some(ordinal) = naming::parse_ordinal(&name) {
                if ordinal >= self.next_ordinal {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }
}

/// Runs the C3→C4→C2→C1 chain for one batch, producing `(temp_path,
/// final_path)` on success. A free function (rather than a `Pipeline`
/// method) so it can run either inline or inside a spawned task without
/// borrowing `self`.
async fn build_one_shard(
    options: Arc<PipelineOptions>,
    mut batch: Vec<Document>,
    ordinal: u32,
) -> BuildResult {
    if let Some(extractor) = &options.symbol_extractor {
        let symbols = extract_symbols_for_batch(extractor, &batch).await?;
        for doc in &mut batch {
            if let Some(ranges) = symbols.get(&doc.name) {
                doc.symbols = ranges.clone();
            }
        }
    }

    rank::sort_by_rank(&mut batch);

    let index_options_hash = options.index_options.hash_options();
    let max_bytes = options.shard_max_bytes;
    let max_docs = options.shard_max_documents;
    let repository = options.repository.clone();
    let repo_name = repository.name.clone();

    let sealed = tokio::task::spawn_blocking(move || {
        let mut builder = ShardBuilder::new(repository, index_options_hash, max_bytes, max_docs);
        for doc in batch {
            builder.add(doc)?;
        }
        Ok::<_, BuilderError>(builder.finalize())
    })
    .await
    .map_err(|e| PipelineError::Join(e.to_string()))??;

    let final_basename = shard_basename(&repo_name, format::FEATURE_VERSION, ordinal)?;
    let temp_basename = shard_temp_basename(&repo_name, format::FEATURE_VERSION, ordinal)?;
    let final_path = options.index_dir.join(final_basename);
    let temp_path = options.index_dir.join(temp_basename);

    let write_temp_path = temp_path.clone();
    tokio::task::spawn_blocking(move || ShardWriter::write_to(&sealed, &write_temp_path))
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))??;

    Ok((temp_path, final_path))
}

/// Splits `batch` into groups of at most [`DEFAULT_CHUNK_LIMIT_BYTES`] and
/// runs the extractor over each, merging the results (spec §4.3 "batches
/// larger than that are split"). Skipped documents carry no content and are
/// never sent to the extractor.
async fn extract_symbols_for_batch(
    config: &SymbolExtractorConfig,
    batch: &[Document],
) -> Result<HashMap<String, Vec<crate::document::SymbolRange>>, ExtractorError> {
    let mut merged = HashMap::new();
    for chunk in chunk_batch(batch, DEFAULT_CHUNK_LIMIT_BYTES) {
        if chunk.is_empty() {
            continue;
        }
        let result = symbols::extract_symbols(config, &chunk).await?;
        merged.extend(result);
    }
    Ok(merged)
}

fn chunk_batch(batch: &[Document], chunk_limit: u64) -> Vec<HashMap<String, Vec<u8>>> {
    let mut chunks = Vec::new();
    let mut current: HashMap<String, Vec<u8>> = HashMap::new();
    let mut current_bytes = 0u64;

    for doc in batch {
        if doc.is_skipped() {
            continue;
        }
        let len = doc.content.len() as u64;
        if current_bytes + len > chunk_limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current.insert(doc.name.clone(), doc.content.clone());
        current_bytes += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Directory-scoped helper for [`crate::shard::options::incremental_skip`]:
/// path of the shard conventionally used to carry a repository's
/// incremental-reindex metadata (ordinal 0).
pub fn primary_shard_path(index_dir: &Path, repo_name: &str) -> Result<PathBuf, FormatError> {
    let basename = shard_basename(repo_name, format::FEATURE_VERSION, 0)?;
    Ok(index_dir.join(basename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::types::RepositoryDescriptor;
    use crate::shard::ShardReader;

    fn options(index_dir: &Path, shard_max_bytes: u64, parallelism: usize) -> PipelineOptions {
        PipelineOptions {
            repository: RepositoryDescriptor::new("widget"),
            index_options: IndexOptions {
                size_max: 1 << 20,
                trigram_max: 50_000,
                large_file_globs: vec![],
                ctags_enabled: false,
                feature_version: format::FEATURE_VERSION,
            },
            index_dir: index_dir.to_path_buf(),
            parallelism,
            shard_max_bytes,
            shard_max_documents: 10_000,
            intake_limits: IntakeLimits {
                size_max: 1 << 20,
                trigram_max: 50_000,
                large_file_patterns: globset::GlobSet::empty(),
            },
            symbol_extractor: None,
        }
    }

    #[tokio::test]
    async fn empty_repository_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), 1024, 2);
        opts.repository = RepositoryDescriptor::new("");
        assert!(matches!(new_pipeline(opts), Err(PipelineError::EmptyRepositoryName)));
    }

    #[tokio::test]
    async fn basic_scenario_splits_into_multiple_shards_and_is_searchable() {
        // spec §8 "Basic": shard_max=1024, parallelism=2, four 1000-byte docs.
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = new_pipeline(options(dir.path(), 1024, 2)).unwrap();

        for i in 0..4u8 {
            let content = vec![b'0' + i; 1000];
            pipeline
                .add(Document::new(format!("F{i}"), content))
                .await
                .unwrap();
        }

        let shards = pipeline.finish().await.unwrap();
        assert!(shards.len() > 1, "four 1000-byte docs with shard_max=1024 must split");

        // No temp files should remain.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        // Searching "111" (F1's content) should hit exactly one shard, exactly one document.
        let mut hits = Vec::new();
        for shard in &shards {
            let reader = ShardReader::open(shard).unwrap();
            let postings = reader.postings().unwrap();
            if postings.contains_key(b"111") {
                let docs = reader.documents().unwrap();
                for doc in docs {
                    if !doc.is_skipped() && doc.content_len > 0 {
                        hits.push(doc.name);
                    }
                }
            }
        }
        assert_eq!(hits, vec!["F1".to_string()]);
    }

    #[tokio::test]
    async fn partial_failure_leaves_zero_files_behind() {
        // spec §8 "Partial-failure cleanup": write permission is revoked
        // after the first flush, so the second flush can never create its
        // temp file. Permissions are restored before `finish()` so its
        // cleanup pass (which itself deletes files from `index_dir`) isn't
        // blocked by the very permission change the scenario is testing.
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = new_pipeline(options(dir.path(), 1024, 1)).unwrap();

        pipeline
            .add(Document::new("a.rs", vec![b'a'; 1000]))
            .await
            .unwrap();
        pipeline.flush().await.unwrap();

        set_dir_writable(dir.path(), false);
        pipeline
            .add(Document::new("b.rs", vec![b'b'; 1000]))
            .await
            .unwrap();
        // Flush explicitly while still read-only so the failure is recorded.
        pipeline.flush().await.unwrap();
        set_dir_writable(dir.path(), true);

        let result = pipeline.finish().await;

        assert!(result.is_err());
        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        assert!(remaining.is_empty(), "partial failure must leave zero files in index_dir");
    }

    fn set_dir_writable(dir: &Path, writable: bool) {
        let mode = if writable { 0o755 } else { 0o555 };
        let mut perms = std::fs::metadata(dir).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, mode);
        std::fs::set_permissions(dir, perms).unwrap();
    }
}
