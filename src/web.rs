use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;
use tower::ServiceBuilder;

use crate::index::SearchResult;
use crate::lifecycle::IndexStats;
use crate::search::{SearchError, SearchService};

#[derive(Clone)]
struct SharedState {
    service: Arc<SearchService>,
}

pub fn router(service: Arc<SearchService>) -> Router {
    Router::new()
        .route("/api/search", get(search))
        .route("/api/rebuild", post(rebuild))
        .route("/api/stats", get(stats))
        .layer(
            ServiceBuilder::new().layer(
                tower_http::trace::TraceLayer::new_for_http()
                    .make_span_with(
                        tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                    )
                    .on_response(
                        tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                    ),
            ),
        )
        .with_state(SharedState { service })
}

/// Serve until Ctrl-C or SIGTERM, then persist the index.
pub async fn serve(service: Arc<SearchService>, listen: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("listening on {listen}");

    axum::serve(listener, router(service.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::warn!("shutting down, persisting search index");
    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    count: usize,
    results: Vec<SearchResult>,
}

async fn search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Json<SearchResponse> {
    let results = state.service.search(&params.q, params.limit).await;
    Json(SearchResponse {
        query: params.q,
        count: results.len(),
        results,
    })
}

async fn rebuild(State(state): State<SharedState>) -> Result<impl IntoResponse, HttpError> {
    let documents = state.service.rebuild_index().await?;
    Ok(Json(json!({ "documents": documents })))
}

async fn stats(State(state): State<SharedState>) -> Json<IndexStats> {
    Json(state.service.stats().await)
}

#[derive(Debug)]
struct HttpError(SearchError);

impl From<SearchError> for HttpError {
    fn from(err: SearchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        log::error!("{self:?}");
        let status = match self.0 {
            SearchError::Records(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
