use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use common_http_errors::{ApiError, ApiResult};
use lyrics_core::error::CoreError;
use lyrics_core::scoring::Query as ScoreQuery;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> ApiResult<axum::response::Response> {
    state.metrics.render().map_err(|e| ApiError::internal(e, None))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub term: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration_ms: i64,
    pub storefront: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LyricsResponse {
    pub song_id: String,
    pub ttml: String,
}

pub async fn search_lyrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<LyricsResponse>> {
    let started = Instant::now();
    let storefront = params
        .storefront
        .unwrap_or_else(|| state.default_storefront.clone());

    let query = ScoreQuery {
        song: params.term,
        artist: params.artist,
        album: params.album,
        target_duration_millis: params.duration_ms,
    };

    let result = search_and_fetch(&state, &storefront, &query).await;
    state.metrics.observe_pipeline_latency(started.elapsed().as_secs_f64());
    state.metrics.record_request(if result.is_ok() { "success" } else { "error" });
    result
}

async fn search_and_fetch(
    state: &AppState,
    storefront: &str,
    query: &ScoreQuery,
) -> ApiResult<Json<LyricsResponse>> {
    let candidate = state
        .pipeline
        .search_songs(storefront, query)
        .await
        .map_err(map_core_error)?;

    let ttml = state
        .pipeline
        .fetch_lyrics(storefront, &candidate.song_id)
        .await
        .map_err(map_core_error)?;

    Ok(Json(LyricsResponse {
        song_id: candidate.song_id,
        ttml,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    pub storefront: Option<String>,
}

pub async fn fetch_lyrics(
    State(state): State<Arc<AppState>>,
    Path(song_id): Path<String>,
    Query(params): Query<FetchParams>,
) -> ApiResult<Json<LyricsResponse>> {
    let started = Instant::now();
    let storefront = params
        .storefront
        .unwrap_or_else(|| state.default_storefront.clone());

    let result = state
        .pipeline
        .fetch_lyrics(&storefront, &song_id)
        .await
        .map_err(map_core_error)
        .map(|ttml| Json(LyricsResponse { song_id, ttml }));

    state.metrics.observe_pipeline_latency(started.elapsed().as_secs_f64());
    state.metrics.record_request(if result.is_ok() { "success" } else { "error" });
    result
}

fn map_core_error(err: CoreError) -> ApiError {
    match err {
        CoreError::NotAdmitted { .. } => ApiError::ServiceUnavailable {
            code: "breaker_open",
            trace_id: None,
            message: Some(err.to_string()),
        },
        CoreError::Exhausted { .. } => ApiError::BadGateway {
            code: "upstream_exhausted",
            trace_id: None,
            message: Some(err.to_string()),
        },
        CoreError::UpstreamUnreachable(_) => ApiError::BadGateway {
            code: "upstream_unreachable",
            trace_id: None,
            message: Some(err.to_string()),
        },
        CoreError::NoCredentials => ApiError::ServiceUnavailable {
            code: "no_credentials",
            trace_id: None,
            message: Some(err.to_string()),
        },
        CoreError::NoMatch => ApiError::NotFound {
            code: "no_match",
            trace_id: None,
        },
        CoreError::ConfigMissing(_) => ApiError::internal(err, None),
    }
}
