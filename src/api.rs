use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::classifier::LabelDetector;
use crate::error::FilterError;
use crate::orchestrator::BatchFilter;
use crate::types::{BatchImgFilterReq, BatchImgFilterRes, ImageRef, LabelsRes};

#[derive(Clone)]
pub struct AppState {
    filter: Arc<BatchFilter>,
    labeler: Arc<dyn LabelDetector>,
    shutdown: CancellationToken,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(
        filter: Arc<BatchFilter>,
        labeler: Arc<dyn LabelDetector>,
        shutdown: CancellationToken,
        request_timeout: Duration,
    ) -> Self {
        Self {
            filter,
            labeler,
            shutdown,
            request_timeout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/filter", post(filter_handler))
        .route("/labels", post(labels_handler))
        .route("/cache", delete(evict_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

#[tracing::instrument(skip(state, request), fields(input_count = request.img_uri_list.len()))]
async fn filter_handler(
    State(state): State<AppState>,
    Json(request): Json<BatchImgFilterReq>,
) -> Result<Json<BatchImgFilterRes>, FilterError> {
    counter!("filter_requests_total").increment(1);
    tracing::info!("Processing filter request");

    let cancel = state.shutdown.child_token();
    let work = state.filter.filter(&request.img_uri_list, &cancel);
    tokio::pin!(work);
    let verdicts = tokio::select! {
        result = &mut work => result?,
        _ = tokio::time::sleep(state.request_timeout) => {
            tracing::warn!(timeout = ?state.request_timeout, "Filter request timed out");
            // The batch stops at its next cancellation point. A write-back
            // already under way finishes and the batch is answered.
            cancel.cancel();
            work.await?
        }
    };

    tracing::info!("Filter request completed successfully");
    Ok(Json(BatchImgFilterRes {
        img_filter_res_list: verdicts.into_iter().map(Into::into).collect(),
    }))
}

#[tracing::instrument(skip(state, request), fields(uri = %request.uri))]
async fn labels_handler(
    State(state): State<AppState>,
    Json(request): Json<ImageRef>,
) -> Result<Json<LabelsRes>, FilterError> {
    let labels = state.labeler.labels(&request.uri).await?;
    Ok(Json(LabelsRes {
        uri: request.uri,
        labels,
    }))
}

#[tracing::instrument(skip(state, request), fields(uri = %request.uri))]
async fn evict_handler(
    State(state): State<AppState>,
    Json(request): Json<ImageRef>,
) -> Result<StatusCode, FilterError> {
    state.filter.evict(&request.uri).await?;
    Ok(StatusCode::NO_CONTENT)
}
