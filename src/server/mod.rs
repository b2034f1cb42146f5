//! The indexserver control loop (spec §4.8, C8): a poller, a worker and an
//! HTTP surface sharing one [`Application`]. Grounded on `src/bin/webserver.rs`'s
//! `run()` (a `tokio::task::JoinSet` supervising the background poller and
//! the HTTP server side by side).

pub mod frontend;
pub mod http;
pub mod poller;
pub mod types;
pub mod watchdog;
pub mod worker;

use std::sync::{Arc, Mutex};

use crate::application::Application;
use crate::repo::types::RepositoryDescriptor;

pub use frontend::Frontend;

/// Everything the poller, worker and HTTP handlers need, cloned cheaply
/// (every field is an `Arc` or cheap-to-clone) into each task.
#[derive(Clone)]
pub struct Server {
    pub app: Application,
    pub frontend: Arc<dyn Frontend>,
    /// Per-repository options fetched from the frontend, keyed by name;
    /// populated by the poller, read by the worker. Not persisted: rebuilt
    /// every poll cycle.
    pub descriptors: Arc<scc::HashMap<String, RepositoryDescriptor>>,
    /// The most recent list of repositories the frontend assigned to this
    /// host, for the status page (spec §5 "last-seen assigned-repositories
    /// list... one mutex, read under lock, written only by the poller").
    pub last_assigned: Arc<Mutex<Vec<String>>>,
}

impl Server {
    pub fn new(app: Application, frontend: Arc<dyn Frontend>) -> Self {
        Self {
            app,
            frontend,
            descriptors: Arc::new(scc::HashMap::new()),
            last_assigned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runs the poller and worker loops forever, joined as one
    /// [`tokio::task::JoinSet`] (mirrors `src/bin/webserver.rs::run`).
    pub async fn run_background_loops(self) {
        let mut joins = tokio::task::JoinSet::new();
        let poll_interval = std::time::Duration::from_secs(self.app.config.poll_interval_secs);

        let poller_server = self.clone();
        joins.spawn(async move { poller::run_poller(poller_server, poll_interval).await });

        let worker_server = self.clone();
        joins.spawn(async move { worker::run_worker(worker_server).await });

        while joins.join_next().await.is_some() {}
    }
}
