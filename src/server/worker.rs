//! The worker half of the control loop (spec §4.8): a single consumer that
//! pops jobs from the C7 queue and drives them through the archive/git code
//! paths into the C5 pipeline. Grounded on the teacher's sequential
//! `periodic_repo_poll` loop in `bg_poll/background_polling.rs`, generalized
//! from "one task per repository" to "one task pops a shared priority
//! queue", matching spec §5's "worker pops from the queue and runs
//! indexing jobs sequentially".

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::document::Document;
use crate::pipeline::{self, PipelineOptions};
use crate::queue::QueuedOptions;
use crate::repo::types::{BranchVersion, RepositoryDescriptor};
use crate::shard::{incremental_skip, IndexOptions, ShardBuilder, ShardWriter};

use super::Server;

/// Per spec §4.8 "emit a per-repo histogram with the outcome label".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Fail,
    Success,
    Noop,
    Empty,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Fail => "fail",
            Outcome::Success => "success",
            Outcome::Noop => "noop",
            Outcome::Empty => "empty",
        }
    }
}

/// Runs forever: pop a job (sleep 1 s when empty), index it, update the
/// queue with the outcome.
pub async fn run_worker(server: Server) {
    loop {
        let Some((repo_name, queued_options)) = server.app.queue.pop() else {
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        };

        let outcome = index_one(&server, &repo_name, &queued_options).await;
        metrics::counter!("indexserver_job_outcome_total", "outcome" => outcome.label()).increment(1);

        match outcome {
            Outcome::Fail => {
                server.app.queue.set_last_index_failed(&repo_name);
            }
            _ => {
                server.app.queue.set_indexed(&repo_name, queued_options);
            }
        }
    }
}

pub(crate) async fn index_one(server: &Server, repo_name: &str, queued_options: &QueuedOptions) -> Outcome {
    let index_options = server.app.config.index_options();
    let branches: Vec<BranchVersion> = queued_options
        .branches
        .iter()
        .map(|(name, version)| BranchVersion {
            name: name.clone(),
            version: version.clone(),
        })
        .collect();

    let mut descriptor = match server.descriptors.read(&repo_name.to_string(), |_, d| d.clone()) {
        Some(descriptor) => descriptor,
        None => {
            warn!(repo = %repo_name, "no descriptor on file for this repository; skipping until next poll");
            return Outcome::Fail;
        }
    };
    descriptor.branches = branches.clone();

    if branches.is_empty() {
        return match write_empty_shard(&server.app.config.index_dir, &descriptor, index_options.hash_options()) {
            Ok(_) => Outcome::Empty,
            Err(err) => {
                error!(repo = %repo_name, error = %err, "failed to write empty shard");
                Outcome::Fail
            }
        };
    }

    if server.app.config.incremental {
        let primary = match pipeline::primary_shard_path(&server.app.config.index_dir, repo_name) {
            Ok(path) => path,
            Err(err) => {
                error!(repo = %repo_name, error = %err, "failed to compute primary shard path");
                return Outcome::Fail;
            }
        };
        match incremental_skip(&primary, &index_options, &branches) {
            Ok(true) => return Outcome::Noop,
            Ok(false) => {}
            Err(err) => warn!(repo = %repo_name, error = %err, "incremental check failed; rebuilding"),
        }
    }

    let documents = match fetch_documents(server, repo_name, &branches).await {
        Ok(docs) => docs,
        Err(err) => {
            error!(repo = %repo_name, error = %err, "fetching documents failed");
            return Outcome::Fail;
        }
    };

    let options = PipelineOptions {
        repository: descriptor,
        index_options,
        index_dir: server.app.config.index_dir.clone(),
        parallelism: server.app.config.parallelism,
        shard_max_bytes: server.app.config.shard_limit,
        shard_max_documents: 10_000_000,
        intake_limits: server.app.config.intake_limits(),
        symbol_extractor: server.app.config.symbol_extractor(),
    };

    let mut pipeline = match pipeline::new_pipeline(options) {
        Ok(p) => p,
        Err(err) => {
            error!(repo = %repo_name, error = %err, "failed to start pipeline");
            return Outcome::Fail;
        }
    };

    for doc in documents {
        if let Err(err) = pipeline.add(doc).await {
            error!(repo = %repo_name, error = %err, "pipeline add failed");
            return Outcome::Fail;
        }
    }

    match pipeline.finish().await {
        Ok(shards) => {
            info!(repo = %repo_name, shard_count = shards.len(), "indexing succeeded");
            Outcome::Success
        }
        Err(err) => {
            error!(repo = %repo_name, error = %err, "pipeline finish failed");
            Outcome::Fail
        }
    }
}

/// Dispatches the archive (single commit) or git (multi-branch, already
/// mirrored locally) code path, per spec §4.8. Mirror/clone tooling itself
/// is out of scope (spec §1); the git path only walks a clone assumed
/// already present at [`mirror_path`].
async fn fetch_documents(
    server: &Server,
    repo_name: &str,
    branches: &[BranchVersion],
) -> anyhow::Result<Vec<Document>> {
    if branches.len() == 1 {
        let commit = &branches[0].version;
        let tarball = server.frontend.fetch_tar(repo_name, commit).await?;
        let docs = crate::repo::archive::documents_from_tar(&tarball[..])?;
        Ok(docs)
    } else {
        let local_path = mirror_path(&server.app.config.index_dir, repo_name);
        let walker = crate::repo::git_walker::GitWalker::open_repository(&local_path)?;
        walker.walk(branches)
    }
}

fn mirror_path(index_dir: &Path, repo_name: &str) -> PathBuf {
    let sanitized: String = repo_name.chars().map(|c| if c == '/' { '_' } else { c }).collect();
    index_dir.join("mirrors").join(sanitized)
}

/// Writes a shard carrying only the repository descriptor, no documents
/// (spec §4.8 "so that the repository appears in listings").
fn write_empty_shard(
    index_dir: &Path,
    descriptor: &RepositoryDescriptor,
    index_options_hash: [u8; 32],
) -> anyhow::Result<PathBuf> {
    let builder = ShardBuilder::new(descriptor.clone(), index_options_hash, u64::MAX, u64::MAX);
    let sealed = builder.finalize();
    let path = pipeline::primary_shard_path(index_dir, &descriptor.name)?;
    ShardWriter::write_to(&sealed, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{Application, Configuration};
    use crate::queue::QueuedOptions;
    use crate::repo::state::StateSource;
    use crate::server::frontend::FakeFrontend;
    use crate::server::Server;
    use std::sync::Arc;

    async fn test_server(dir: &Path) -> Server {
        let config = Configuration {
            index_dir: dir.to_path_buf(),
            host: "127.0.0.1".to_string(),
            port: 0,
            parallelism: 1,
            file_limit: 1 << 20,
            shard_limit: 1 << 20,
            max_trigram_count: 50_000,
            large_file: vec![],
            require_ctags: false,
            disable_ctags: true,
            incremental: false,
            branches: vec![],
            ctags_binary: "universal-ctags".to_string(),
            ctags_sandboxed: true,
            frontend_url: "http://localhost:1".to_string(),
            poll_interval_secs: 60,
            node_name: "test-node".to_string(),
            state_source: StateSource::default(),
        };
        let app = Application::initialize(config).await.unwrap();
        Server::new(app, Arc::new(FakeFrontend::default()))
    }

    #[tokio::test]
    async fn empty_branch_list_writes_an_empty_shard() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path()).await;
        match server.descriptors.entry("widget".to_string()) {
            scc::hash_map::Entry::Occupied(mut occupied) => {
                *occupied.get_mut() = RepositoryDescriptor::new("widget");
            }
            scc::hash_map::Entry::Vacant(vacant) => {
                vacant.insert_entry(RepositoryDescriptor::new("widget"));
            }
        }

        let queued = QueuedOptions {
            options_hash: server.app.config.index_options().hash_options(),
            branches: vec![],
        };
        let outcome = index_one(&server, "widget", &queued).await;
        assert_eq!(outcome, Outcome::Empty);

        let path = pipeline::primary_shard_path(dir.path(), "widget").unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn unknown_repository_fails_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path()).await;
        let queued = QueuedOptions {
            options_hash: [0; 32],
            branches: vec![("main".to_string(), "deadbeef".to_string())],
        };
        let outcome = index_one(&server, "unknown", &queued).await;
        assert_eq!(outcome, Outcome::Fail);
    }
}
