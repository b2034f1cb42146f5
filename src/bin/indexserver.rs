//! Entrypoint for the indexserver control loop (spec §4.8). Mirrors
//! `src/bin/webserver.rs`'s `main`: parse configuration, install logging,
//! build the shared state, then run the background loops and the HTTP
//! surface side by side in one `tokio::task::JoinSet`.

use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

use corpus_index::application::{Application, Configuration};
use corpus_index::server::frontend::ReqwestFrontend;
use corpus_index::server::http::{self, AppState};
use corpus_index::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Configuration::parse();
    Application::install_logging(&config);

    let prometheus = Arc::new(
        PrometheusBuilder::new()
            .install_recorder()
            .expect("only one metrics recorder is installed per process"),
    );

    let app = Application::initialize(config).await?;
    let frontend = Arc::new(ReqwestFrontend::new(app.config.frontend_url.clone()));
    let server = Server::new(app, frontend);

    info!(
        host = %server.app.config.host,
        port = server.app.config.port,
        index_dir = %server.app.config.index_dir.display(),
        "starting indexserver"
    );

    let mut joins = tokio::task::JoinSet::new();

    let background_server = server.clone();
    joins.spawn(async move { background_server.run_background_loops().await });

    let http_state = AppState {
        server: server.clone(),
        prometheus,
    };
    joins.spawn(async move {
        if let Err(err) = http::serve(http_state).await {
            error!(error = %err, "http server exited");
        }
    });

    while joins.join_next().await.is_some() {}
    Ok(())
}
