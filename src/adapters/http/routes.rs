use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::Path as FsPath;
use tracing::warn;

use crate::adapters::http::state::HttpState;
use crate::application::dto::{
    ArtifactQuery, CamerasResponse, DetectRequest, DetectResponse, ErrorResponse, OkResponse,
    StagedResponse, StartStreamRequest,
};
use crate::application::frame_source::StillSource;
use crate::application::services::Download;
use crate::domain::errors::DomainError;
use crate::domain::model::ConfidenceThreshold;

/// Domain failure rendered as `{ "error", "kind" }` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            DomainError::InvalidInput(_) | DomainError::Decode(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Busy(_) => StatusCode::CONFLICT,
            DomainError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, kind = self.0.kind(), "request failed");
        }
        let body = ErrorResponse { error: self.0.to_string(), kind: self.0.kind().to_string() };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn threshold(requested: Option<f32>, st: &HttpState) -> ApiResult<ConfidenceThreshold> {
    Ok(ConfidenceThreshold::new(requested.unwrap_or(st.config.confidence_threshold))?)
}

fn download_response(download: Download) -> Response {
    (
        [
            (header::CONTENT_TYPE, download.mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.file_name),
            ),
        ],
        download.bytes,
    )
        .into_response()
}

async fn asset_response(path: &FsPath) -> ApiResult<Response> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| DomainError::NotFound(format!("{}: {e}", path.display())))?;
    let mime = image::ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

pub async fn get_config(State(st): State<HttpState>) -> impl IntoResponse {
    Json(st.config.as_ref().clone())
}

pub async fn get_state(State(st): State<HttpState>) -> impl IntoResponse {
    Json(st.pipeline.status().await)
}

pub async fn list_cameras(State(st): State<HttpState>) -> ApiResult<Json<CamerasResponse>> {
    let cameras = st.camera.list_cameras().await?;
    Ok(Json(CamerasResponse { cameras }))
}

/// Stages the uploaded bytes; an empty body falls back to the default image.
pub async fn upload_image(
    State(st): State<HttpState>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<StagedResponse>> {
    let body = body.map_err(|e| DomainError::InvalidInput(format!("upload rejected: {}", e.body_text())))?;
    let source = if body.is_empty() { StillSource::DefaultAsset } else { StillSource::Upload(body.to_vec()) };
    let (width, height) = st.pipeline.select_image(source).await?;
    Ok(Json(StagedResponse { width, height }))
}

pub async fn use_default_image(State(st): State<HttpState>) -> ApiResult<Json<StagedResponse>> {
    let (width, height) = st.pipeline.select_image(StillSource::DefaultAsset).await?;
    Ok(Json(StagedResponse { width, height }))
}

pub async fn default_image(State(st): State<HttpState>) -> ApiResult<Response> {
    asset_response(&st.config.default_image_asset).await
}

pub async fn default_detected_image(State(st): State<HttpState>) -> ApiResult<Response> {
    asset_response(&st.config.default_detected_asset).await
}

pub async fn detect(
    State(st): State<HttpState>,
    req: Option<Json<DetectRequest>>,
) -> ApiResult<Json<DetectResponse>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let threshold = threshold(req.conf, &st)?;
    let report = st.pipeline.detect(threshold).await?;
    Ok(Json(DetectResponse::from(report)))
}

/// Annotated image of the last still detection, as PNG.
pub async fn displayed_result(State(st): State<HttpState>) -> ApiResult<Response> {
    let png = st.pipeline.displayed_png().await?;
    Ok(([(header::CONTENT_TYPE, "image/png"), (header::CACHE_CONTROL, "no-store")], png).into_response())
}

pub async fn reset(State(st): State<HttpState>) -> ApiResult<Json<OkResponse>> {
    st.pipeline.reset().await?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn start_stream(
    State(st): State<HttpState>,
    req: Option<Json<StartStreamRequest>>,
) -> ApiResult<Json<OkResponse>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let threshold = threshold(req.conf, &st)?;
    let device_index = req.device_index.unwrap_or(st.config.webcam_device_index);
    st.pipeline.start_stream(device_index, threshold)?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn stop_stream(State(st): State<HttpState>) -> ApiResult<impl IntoResponse> {
    let stopped = st.pipeline.stop_stream().await?;
    Ok(Json(json!({ "ok": true, "stopped": stopped })))
}

pub async fn latest_artifact(
    State(st): State<HttpState>,
    Query(query): Query<ArtifactQuery>,
) -> ApiResult<Response> {
    Ok(download_response(st.pipeline.latest_download(query.kind).await?))
}

pub async fn get_artifact(State(st): State<HttpState>, Path(name): Path<String>) -> ApiResult<Response> {
    Ok(download_response(st.pipeline.artifact(name).await?))
}
