use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use detect_dashboard::adapters::{
    http::{router, state::HttpState},
    onnx::{model_catalog::OnnxModelCatalog, yolo_engine::OnnxYoloEngine},
    v4l2::{camera_repo::V4l2CameraCatalog, capture::V4l2Opener},
};
use detect_dashboard::application::{
    artifact_store::ArtifactStore,
    controller::{DetectorSlot, PipelineController},
    detector::Detector,
    frame_source::FrameSource,
    ports::ModelCatalogPort,
    services::{CameraService, PipelineService},
};
use detect_dashboard::config::AppConfig;
use detect_dashboard::domain::{
    artifact::ArtifactKind,
    errors::{DomainError, DomainResult},
};

#[derive(Debug, Parser)]
#[command(name = "detect-dashboard", about = "Still-image and webcam object detection dashboard")]
struct Args {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(long, env = "DETECT_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address, overriding `bind_addr` from the configuration.
    #[arg(long, env = "DETECT_BIND")]
    bind: Option<String>,
}

async fn load_detector(config: &AppConfig) -> DomainResult<Detector> {
    OnnxModelCatalog::new().validate_model(&config.model_id()).await?;
    let path = config.model_path.clone();
    let labels = config.labels.clone();
    let engine = tokio::task::spawn_blocking(move || OnnxYoloEngine::load(&path, labels))
        .await
        .map_err(|e| DomainError::ModelLoad(e.to_string()))??;
    Ok(Detector::new(Box::new(engine), config.yolo_params()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Inicializar logs (RUST_LOG=info por defecto)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Cargar configuración (TOML + flags de línea de comandos)
    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    info!(model = %config.model_path.display(), output_dir = %config.output_dir.display(), "configuration loaded");

    // 3. Cargar el modelo; si falla, la detección queda deshabilitada pero el dashboard arranca
    let detector = match load_detector(&config).await {
        Ok(detector) => DetectorSlot::Ready(detector),
        Err(e) => {
            error!(error = %e, "model unavailable; detection disabled");
            DetectorSlot::Unavailable(e.to_string())
        }
    };

    // 4. Instanciar Adaptadores y Servicios
    let source = FrameSource::with_stream_width(
        config.default_image_asset.clone(),
        Arc::new(V4l2Opener::new(config.capture_config())),
        config.stream_width,
    );
    let still_store = Arc::new(ArtifactStore::new(&config.output_dir, ArtifactKind::StillImage, config.latest_scope));
    let stream_store = Arc::new(ArtifactStore::new(&config.output_dir, ArtifactKind::StreamFrame, config.latest_scope));
    let controller = PipelineController::new(source, detector, still_store, stream_store)
        .with_inference_deadline(config.inference_deadline());

    let camera_service = Arc::new(CameraService::new(Arc::new(V4l2CameraCatalog::new())));
    let pipeline_service = Arc::new(PipelineService::new(controller));

    // 5. Configurar el Estado de la API y el Router de Axum
    let static_dir = config.static_dir.clone();
    let addr = config.bind_addr.clone();
    let state = HttpState {
        camera: camera_service,
        pipeline: pipeline_service.clone(),
        config: Arc::new(config),
    };

    let app = router(state).fallback_service(ServeDir::new(&static_dir));

    // 6. Lanzar el Servidor
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("dashboard listening on http://{addr}");
    info!(static_dir = %static_dir.display(), "serving static files");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Liberar la cámara si quedó un stream abierto
    if pipeline_service.stop_stream().await? {
        info!("webcam stream stopped on shutdown");
    }
    Ok(())
}
