//! Process-wide application state: configuration and the priority queue
//! (spec §5 "Shared mutable state"). Grounded on
//! `application/application.rs`'s `Application { config }` plus
//! `Application::install_logging`'s `OnceCell`-guarded, install-once
//! pattern, generalized to also own the C7 [`Queue`]. The per-repository
//! state a poll cycle actually needs lives in `Server.descriptors`
//! (`server/mod.rs`), rebuilt every cycle from `search_configuration` —
//! there is no second, file-persisted repository pool alongside it.

pub mod config;
pub mod logging;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::warn;

pub use config::Configuration;

use crate::queue::Queue;

static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

#[derive(Clone)]
pub struct Application {
    pub config: Arc<Configuration>,
    pub queue: Arc<Queue>,
}

impl Application {
    /// Creates the directory tree and returns a ready-to-run `Application`.
    /// Does not start the poller, worker or HTTP surface — that's
    /// [`crate::server`]'s job.
    pub async fn initialize(mut config: Configuration) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.index_dir)?;
        std::fs::create_dir_all(config.trash_dir())?;
        config.state_source.set_default_dir(&config.index_dir);
        raise_nofile_limit();

        Ok(Self {
            config: Arc::new(config),
            queue: Arc::new(Queue::new()),
        })
    }

    pub fn install_logging(config: &Configuration) {
        if let Some(true) = LOGGER_INSTALLED.get() {
            return;
        }

        if !logging::tracing_subscribe(config) {
            warn!("failed to install tracing subscriber; one is probably already installed");
        }

        if color_eyre::install().is_err() {
            warn!("failed to install color-eyre; one is probably already installed");
        }

        let _ = LOGGER_INSTALLED.set(true);
    }
}

/// Raises the process's open-file soft limit if the platform's default is
/// too low for this workload: a poll cycle can hold a shard reader mmap open
/// per repository, a worker builds several shards concurrently, and each
/// symbol-extraction subprocess adds its own stdio pipes. Grounded on the
/// teacher's `semantic_search/qdrant_process.rs` `RLIMIT_NOFILE` raise before
/// spawning its own long-lived, many-file-descriptor child process.
#[cfg(unix)]
fn raise_nofile_limit() {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};
    use tracing::{error, info};

    const WANT_SOFT: u64 = 4096;
    const WANT_HARD: u64 = 8192;

    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((current_soft, current_hard)) if current_soft < WANT_SOFT => {
            let new_hard = current_hard.max(WANT_HARD);
            if let Err(err) = setrlimit(Resource::RLIMIT_NOFILE, WANT_SOFT, new_hard) {
                error!(
                    ?err,
                    new_soft = WANT_SOFT,
                    new_hard,
                    current_soft,
                    current_hard,
                    "failed to set rlimit/nofile"
                );
            }
        }
        Ok((current_soft, current_hard)) => {
            info!(current_soft, current_hard, "no change to rlimit/nofile needed");
        }
        Err(err) => {
            error!(?err, "failed to get rlimit/nofile");
        }
    }
}

#[cfg(not(unix))]
fn raise_nofile_limit() {}
