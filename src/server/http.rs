//! The indexserver HTTP surface (spec §4.8, §6 "Indexserver HTTP surface
//! (exposed)"). Grounded on `src/bin/webserver.rs` (axum `Router`,
//! `CorsLayer::permissive()`, `CatchPanicLayer`) and `webserver/repos.rs`'s
//! handler shape (`Query`/`State` extractors, `ApiResponse` envelope).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use super::types::{json, AppError, Result as ApiResult};
use super::worker::Outcome;
use super::Server;

#[derive(Clone)]
pub struct AppState {
    pub server: Server,
    pub prometheus: Arc<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_page).post(force_index))
        .route("/enqueueforindex", post(enqueue_for_index).fallback(enqueueforindex_non_post))
        .route("/metrics", get(metrics))
        .route("/debug/*path", get(debug_placeholder))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind: SocketAddr = format!("{}:{}", state.server.app.config.host, state.server.app.config.port).parse()?;
    let app = router(state);
    axum::Server::bind(&bind).serve(app.into_make_service()).await?;
    Ok(())
}

async fn status_page(State(state): State<AppState>) -> Html<String> {
    let assigned = state.server.last_assigned.lock().unwrap().clone();
    let queue_len = state.server.app.queue.len();

    let rows: String = assigned.iter().map(|name| format!("<li>{name}</li>")).collect();
    Html(format!(
        "<html><body><h1>indexserver</h1><p>queued: {queue_len}</p><ul>{rows}</ul>\
         <form method=\"post\" action=\"/\"><input name=\"repo\"><button type=\"submit\">re-index</button></form>\
         </body></html>"
    ))
}

#[derive(Debug, Deserialize)]
struct ForceIndexForm {
    repo: String,
}

#[derive(Debug, Serialize)]
struct ForceIndexResponse {
    outcome: String,
    message: String,
}
impl super::types::ApiResponse for ForceIndexResponse {}

/// `POST /` with form `repo=<name>` (spec §6): indexes immediately, bypassing
/// the queue, and returns the outcome string verbatim.
async fn force_index(State(state): State<AppState>, Form(form): Form<ForceIndexForm>) -> impl IntoResponse {
    match super::poller::reconcile_one(&state.server, &form.repo).await {
        Ok(()) => {}
        Err(err) => {
            return json(ForceIndexResponse {
                outcome: Outcome::Fail.label().to_string(),
                message: err.to_string(),
            })
        }
    }

    let Some((name, queued)) = take_queued(&state.server, &form.repo) else {
        return json(ForceIndexResponse {
            outcome: Outcome::Fail.label().to_string(),
            message: "repository has no configuration on file".to_string(),
        });
    };

    let outcome = super::worker::index_one(&state.server, &name, &queued).await;
    json(ForceIndexResponse {
        outcome: outcome.label().to_string(),
        message: format!("{name}: {}", outcome.label()),
    })
}

#[derive(Debug, Deserialize)]
struct EnqueueParams {
    repo: Option<String>,
}

/// `POST /enqueueforindex?repo=<name>` (spec §6): `200` on enqueue, `400` on
/// a missing `repo` parameter.
async fn enqueue_for_index(State(state): State<AppState>, Query(params): Query<EnqueueParams>) -> ApiResult<impl IntoResponse> {
    let Some(repo) = params.repo else {
        return Err(AppError::bad_request("missing `repo` query parameter"));
    };

    super::poller::reconcile_one(&state.server, &repo)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;

    Ok(axum::http::StatusCode::OK)
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}

/// Any method but `POST` on `/enqueueforindex` (spec §6 "404 on non-POST").
async fn enqueueforindex_non_post() -> impl IntoResponse {
    axum::http::StatusCode::NOT_FOUND
}

/// `GET /debug/...` (spec §6): runtime profiling endpoints. Profiling
/// itself is an external collaborator the core only models the interface
/// for (spec §1's sandboxing/telemetry exclusions apply equally here); this
/// placeholder keeps the route live without pulling in a profiler crate.
async fn debug_placeholder() -> impl IntoResponse {
    (
        axum::http::StatusCode::NOT_IMPLEMENTED,
        "runtime profiling is not wired into this build",
    )
}

fn take_queued(server: &Server, repo: &str) -> Option<(String, crate::queue::QueuedOptions)> {
    // `force_index` just enqueued/updated `repo` via `reconcile_one`; take
    // that entry specifically rather than the heap's head, so a
    // higher-priority repository elsewhere in the queue can't steal this
    // request and leave `repo` incorrectly reported as unconfigured.
    let options = server.app.queue.pop_named(repo)?;
    Some((repo.to_string(), options))
}
