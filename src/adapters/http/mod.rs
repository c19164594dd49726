pub mod routes;
pub mod state;
pub mod ws;

use axum::{extract::DefaultBodyLimit, routing::{get, post}, Router};
use crate::adapters::http::state::HttpState;
use crate::adapters::http::ws::ws_handler;

pub fn router(state: HttpState) -> Router {
    let upload_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/api/config", get(routes::get_config))
        .route("/api/state", get(routes::get_state))
        .route("/api/cameras", get(routes::list_cameras))
        .route("/api/image", post(routes::upload_image))
        .route("/api/image/default", get(routes::default_image).post(routes::use_default_image))
        .route("/api/image/default/detected", get(routes::default_detected_image))
        .route("/api/detect", post(routes::detect))
        .route("/api/result", get(routes::displayed_result))
        .route("/api/reset", post(routes::reset))
        .route("/api/stream/start", post(routes::start_stream))
        .route("/api/stream/stop", post(routes::stop_stream))
        .route("/api/artifacts/latest", get(routes::latest_artifact))
        .route("/api/artifacts/:name", get(routes::get_artifact))
        .route("/ws/stream", get(ws_handler))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{
        artifact_store::ArtifactStore,
        controller::{DetectorSlot, PipelineController},
        detector::Detector,
        frame_source::FrameSource,
        ports::CameraCatalogPort,
        services::{CameraService, PipelineService},
    };
    use crate::config::{AppConfig, SourceMode};
    use crate::domain::{
        artifact::ArtifactKind,
        camera::{CameraId, CameraInfo},
        detection::Detection,
        errors::DomainResult,
    };
    use crate::test_support::{encode, FakeCamera, FakeEngine};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, HeaderMap, Request, StatusCode};
    use image::{ImageFormat, RgbImage};
    use std::path::Path;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct OneCamera;

    #[async_trait]
    impl CameraCatalogPort for OneCamera {
        async fn list_cameras(&self) -> DomainResult<Vec<CameraInfo>> {
            Ok(vec![CameraInfo {
                id: CameraId::from_index(0),
                name: "Integrated Camera".into(),
                card: "Integrated Camera".into(),
                driver: "uvcvideo".into(),
                bus: "usb-0000:00:14.0-6".into(),
            }])
        }
    }

    fn app(dir: &Path, model_ready: bool) -> Router {
        app_with(dir, model_ready, AppConfig::default())
    }

    fn app_with(dir: &Path, model_ready: bool, config: AppConfig) -> Router {
        let config = AppConfig {
            output_dir: dir.join("results"),
            default_image_asset: dir.join("default.png"),
            ..config
        };
        let egg = Detection { cx: 30.0, cy: 30.0, w: 20.0, h: 24.0, score: 0.9, class_id: 0, label: "fertile".into() };
        let detector = if model_ready {
            DetectorSlot::Ready(Detector::new(Box::new(FakeEngine::returning(vec![egg])), config.yolo_params()))
        } else {
            DetectorSlot::Unavailable("model file not found: weights/best.onnx".into())
        };
        let controller = PipelineController::new(
            FrameSource::new(config.default_image_asset.clone(), Arc::new(FakeCamera::new(2))),
            detector,
            Arc::new(ArtifactStore::new(&config.output_dir, ArtifactKind::StillImage, config.latest_scope)),
            Arc::new(ArtifactStore::new(&config.output_dir, ArtifactKind::StreamFrame, config.latest_scope)),
        );
        router(HttpState {
            camera: Arc::new(CameraService::new(Arc::new(OneCamera))),
            pipeline: Arc::new(PipelineService::new(controller)),
            config: Arc::new(config),
        })
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, json: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn upload_detect_and_download_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), true);

        let (status, _, body) = send(&app, get("/api/artifacts/latest?kind=image")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["kind"], "not_found");

        let png = encode(&RgbImage::new(100, 100), ImageFormat::Png);
        let (status, _, body) = send(&app, Request::post("/api/image").body(Body::from(png)).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["width"], 100);

        let (status, _, body) = send(&app, post_json("/api/detect", r#"{"conf":0.5}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let report = json(&body);
        assert_eq!(report["artifact"], "detected_image_1.png");
        assert_eq!(report["summary"], "1 fertile");
        assert_eq!(report["detections"][0]["label"], "fertile");
        assert_eq!(report["detections"][0]["xywh"], serde_json::json!([30.0, 30.0, 20.0, 24.0]));

        let (status, headers, body) = send(&app, get("/api/artifacts/latest?kind=image")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert!(headers[header::CONTENT_DISPOSITION].to_str().unwrap().contains("detected_image_1.png"));
        assert_eq!(body, std::fs::read(tmp.path().join("results/detected_image_1.png")).unwrap());

        let (status, _, named) = send(&app, get("/api/artifacts/detected_image_1.png")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(named, body);

        let (_, _, body) = send(&app, get("/api/state")).await;
        assert_eq!(json(&body)["state"]["state"], "displaying");
        let (status, _, _) = send(&app, Request::post("/api/reset").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let (_, _, body) = send(&app, get("/api/state")).await;
        assert_eq!(json(&body)["state"]["state"], "idle");
        let (status, _, _) = send(&app, post_json("/api/detect", "{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "reset drops the staged image");
    }

    #[tokio::test]
    async fn request_errors_map_to_status_codes() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), true);

        let (status, _, body) = send(&app, post_json("/api/detect", "{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "nothing staged yet");
        assert_eq!(json(&body)["kind"], "not_found");

        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec();
        let (status, _, body) = send(&app, Request::post("/api/image").body(Body::from(gif)).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["kind"], "decode");

        let png = encode(&RgbImage::new(40, 30), ImageFormat::Png);
        send(&app, Request::post("/api/image").body(Body::from(png)).unwrap()).await;
        let (status, _, body) = send(&app, post_json("/api/detect", r#"{"conf":1.5}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["kind"], "invalid_input");

        let (status, _, _) = send(&app, get("/api/artifacts/passwd")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = send(&app, get("/api/artifacts/detected_frame_9.jpg")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn uploads_beyond_two_megabytes_are_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), true);

        let bmp = encode(&RgbImage::new(1200, 1000), ImageFormat::Bmp);
        assert!(bmp.len() > 2 * 1024 * 1024);
        let (status, _, body) = send(&app, Request::post("/api/image").body(Body::from(bmp)).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["width"], 1200);
    }

    #[tokio::test]
    async fn oversized_upload_is_a_json_error() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app_with(tmp.path(), true, AppConfig { max_upload_bytes: 1024, ..AppConfig::default() });

        let bmp = encode(&RgbImage::from_fn(64, 64, |x, y| image::Rgb([x as u8 * 4, y as u8 * 4, 7])), ImageFormat::Bmp);
        let (status, _, body) = send(&app, Request::post("/api/image").body(Body::from(bmp)).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = json(&body);
        assert_eq!(body["kind"], "invalid_input");
        assert!(body["error"].as_str().unwrap().contains("upload rejected"));
    }

    #[tokio::test]
    async fn result_is_served_when_saving_fails() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("results"), b"not a directory").unwrap();
        let app = app(tmp.path(), true);

        let (status, _, _) = send(&app, get("/api/result")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let png = encode(&RgbImage::new(100, 100), ImageFormat::Png);
        send(&app, Request::post("/api/image").body(Body::from(png)).unwrap()).await;
        let (status, _, body) = send(&app, post_json("/api/detect", "{}")).await;
        assert_eq!(status, StatusCode::OK);
        let report = json(&body);
        assert!(report["artifact"].is_null());
        assert!(report["warning"].as_str().unwrap().contains("could not save"));

        let (status, headers, body) = send(&app, get("/api/result")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        let shown = image::load_from_memory(&body).unwrap();
        assert_eq!((shown.width(), shown.height()), (100, 100));
    }

    #[tokio::test]
    async fn unloaded_model_disables_detection() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), false);

        let (status, _, body) = send(&app, get("/api/state")).await;
        assert_eq!(status, StatusCode::OK);
        let state = json(&body);
        assert_eq!(state["detection_enabled"], false);
        assert!(state["disabled_reason"].as_str().unwrap().contains("best.onnx"));

        let png = encode(&RgbImage::new(40, 30), ImageFormat::Png);
        send(&app, Request::post("/api/image").body(Body::from(png)).unwrap()).await;
        let (status, _, body) = send(&app, post_json("/api/detect", "{}")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(&body)["kind"], "model_load");

        let (status, _, _) = send(&app, post_json("/api/stream/start", "{}")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn default_asset_is_staged_and_served() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), true);

        let (status, _, _) = send(&app, Request::post("/api/image/default").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let jpeg_like = encode(&RgbImage::new(64, 36), ImageFormat::Png);
        std::fs::write(tmp.path().join("default.png"), &jpeg_like).unwrap();
        let (status, _, body) = send(&app, Request::post("/api/image/default").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["height"], 36);

        let (status, headers, body) = send(&app, get("/api/image/default")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(body, jpeg_like);
    }

    #[tokio::test]
    async fn config_cameras_and_stream_controls() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), true);

        let (_, _, body) = send(&app, get("/api/config")).await;
        assert_eq!(json(&body)["stream_width"], 720);
        assert_eq!(json(&body)["source_mode"], "Image");

        let webcam = app_with(tmp.path(), true, AppConfig { source_mode: SourceMode::Webcam, ..AppConfig::default() });
        let (_, _, body) = send(&webcam, get("/api/config")).await;
        assert_eq!(json(&body)["source_mode"], "Webcam");

        let (_, _, body) = send(&app, get("/api/cameras")).await;
        assert_eq!(json(&body)["cameras"][0]["id"]["path"], "/dev/video0");

        let (status, _, _) = send(&app, post_json("/api/stream/start", r#"{"device_index":0}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, body) = send(&app, Request::post("/api/stream/stop").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["stopped"], true);
        let (_, _, body) = send(&app, Request::post("/api/stream/stop").body(Body::empty()).unwrap()).await;
        assert_eq!(json(&body)["stopped"], false);
    }
}
