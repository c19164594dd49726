use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex, TryLockError};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    application::{
        artifact_store::ArtifactStore,
        controller::{CancelFlag, PipelineController, PipelineState, StillReport, StreamEvent, StreamSummary},
        frame_source::StillSource,
        ports::CameraCatalogPort,
    },
    domain::{
        artifact::{ArtifactKind, StoredArtifact},
        camera::CameraInfo,
        errors::{DomainError, DomainResult},
        model::ConfidenceThreshold,
        stream::{FrameMeta, StreamMessage, StreamPacket},
    },
};

const STREAM_JPEG_QUALITY: u8 = 80;

/// Servicio encargado de listar los dispositivos físicos de captura.
#[derive(Clone)]
pub struct CameraService {
    catalog: Arc<dyn CameraCatalogPort>,
}

impl CameraService {
    pub fn new(catalog: Arc<dyn CameraCatalogPort>) -> Self {
        Self { catalog }
    }

    pub async fn list_cameras(&self) -> DomainResult<Vec<CameraInfo>> {
        self.catalog.list_cameras().await
    }
}

/// Artifact bytes ready to send, with the name and type to send them under.
#[derive(Debug)]
pub struct Download {
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// `state` is `None` while a still request holds the controller (`busy`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStatus {
    pub state: Option<PipelineState>,
    pub busy: bool,
    pub detection_enabled: bool,
    pub disabled_reason: Option<String>,
    pub streaming: bool,
    pub staged: Option<(u32, u32)>,
}

struct ActiveStream {
    cancel: CancelFlag,
    worker: std::thread::JoinHandle<()>,
}

/// Orquestador del pipeline (imagen fija + streaming de webcam).
#[derive(Clone)]
pub struct PipelineService {
    controller: Arc<Mutex<PipelineController>>,
    still_store: Arc<ArtifactStore>,
    stream_store: Arc<ArtifactStore>,
    stream: Arc<Mutex<Option<ActiveStream>>>,
    tx: broadcast::Sender<StreamPacket>,
    disabled_reason: Option<String>,
}

impl PipelineService {
    pub fn new(controller: PipelineController) -> Self {
        let (tx, _) = broadcast::channel(16);
        let still_store = controller.store(ArtifactKind::StillImage).clone();
        let stream_store = controller.store(ArtifactKind::StreamFrame).clone();
        let disabled_reason = controller.disabled_reason().map(str::to_string);
        Self {
            controller: Arc::new(Mutex::new(controller)),
            still_store,
            stream_store,
            stream: Arc::new(Mutex::new(None)),
            tx,
            disabled_reason,
        }
    }

    fn busy_error(&self) -> DomainError {
        if self.is_streaming() {
            DomainError::Busy("a webcam stream is running; stop it first".into())
        } else {
            DomainError::Busy("another request is still in progress".into())
        }
    }

    /// Runs `f` on the controller in a blocking task, or fails with `Busy`
    /// when a stream or another request holds it.
    async fn with_controller<T, F>(&self, f: F) -> DomainResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PipelineController) -> DomainResult<T> + Send + 'static,
    {
        let controller = self.controller.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut guard = match controller.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return None,
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
            };
            Some(f(&mut guard))
        })
        .await
        .map_err(|e| DomainError::Inference(format!("worker task failed: {e}")))?;
        outcome.unwrap_or_else(|| Err(self.busy_error()))
    }

    pub async fn status(&self) -> PipelineStatus {
        let snapshot = self
            .with_controller(|c| Ok((c.state().clone(), c.staged_frame().map(|f| (f.width(), f.height())))))
            .await;
        let streaming = self.is_streaming();
        let (state, busy, staged) = match snapshot {
            Ok((state, staged)) => (Some(state), false, staged),
            Err(_) if streaming => (Some(PipelineState::StreamOpen), false, None),
            Err(_) => (None, true, None),
        };
        PipelineStatus {
            state,
            busy,
            detection_enabled: self.disabled_reason.is_none(),
            disabled_reason: self.disabled_reason.clone(),
            streaming,
            staged,
        }
    }

    pub async fn select_image(&self, source: StillSource) -> DomainResult<(u32, u32)> {
        self.with_controller(move |c| c.select_image(source).map(|f| (f.width(), f.height())))
            .await
    }

    pub async fn detect(&self, threshold: ConfidenceThreshold) -> DomainResult<StillReport> {
        self.with_controller(move |c| c.detect(threshold)).await
    }

    /// PNG of the last still result; served even when saving it failed.
    pub async fn displayed_png(&self) -> DomainResult<Vec<u8>> {
        let frame = self
            .with_controller(|c| {
                c.displayed()
                    .cloned()
                    .ok_or_else(|| DomainError::NotFound("no detection result to show".into()))
            })
            .await?;
        blocking(move || {
            let mut png = Vec::new();
            frame
                .image()
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .map_err(|e| DomainError::Write(format!("encode result: {e}")))?;
            Ok(png)
        })
        .await
    }

    /// Clears the staged image and any displayed result.
    pub async fn reset(&self) -> DomainResult<()> {
        self.with_controller(|c| {
            c.reset();
            Ok(())
        })
        .await
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
            .lock()
            .map(|s| s.as_ref().is_some_and(|a| !a.worker.is_finished()))
            .unwrap_or(false)
    }

    /// Arranca el bucle de webcam en su propio hilo; los frames se publican
    /// en el canal de difusión (ver [`subscribe`](Self::subscribe)).
    pub fn start_stream(&self, device_index: u32, threshold: ConfidenceThreshold) -> DomainResult<()> {
        let mut slot = self
            .stream
            .lock()
            .map_err(|_| DomainError::Busy("stream registry poisoned".into()))?;
        if slot.as_ref().is_some_and(|a| !a.worker.is_finished()) {
            return Err(DomainError::Busy("a webcam stream is already running".into()));
        }
        if let Some(reason) = &self.disabled_reason {
            return Err(DomainError::ModelLoad(reason.clone()));
        }
        if let Err(TryLockError::WouldBlock) = self.controller.try_lock() {
            return Err(DomainError::Busy("another request is still in progress".into()));
        }
        let controller = self.controller.clone();

        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let tx = self.tx.clone();
        let worker = std::thread::Builder::new()
            .name(format!("stream-video{device_index}"))
            .spawn(move || {
                let mut guard = match controller.lock() {
                    Ok(guard) => guard,
                    Err(p) => p.into_inner(),
                };
                let outcome = guard.run_stream(device_index, threshold, &worker_cancel, |event| {
                    publish(&tx, event);
                });
                let message = match outcome {
                    Ok(StreamSummary { processed, skipped, reason }) => {
                        StreamMessage::Closed { reason, processed, skipped }
                    }
                    Err(e) => {
                        error!(error = %e, "stream could not start");
                        StreamMessage::Error { kind: e.kind().into(), message: e.to_string() }
                    }
                };
                let _ = tx.send(StreamPacket { message, jpeg: None });
            })
            .map_err(|e| DomainError::Device(format!("spawn stream worker: {e}")))?;

        info!(device_index, threshold = threshold.value(), "webcam stream started");
        *slot = Some(ActiveStream { cancel, worker });
        Ok(())
    }

    /// Requests cancellation and waits for the in-flight frame to finish.
    pub async fn stop_stream(&self) -> DomainResult<bool> {
        let active = self
            .stream
            .lock()
            .map_err(|_| DomainError::Busy("stream registry poisoned".into()))?
            .take();
        let Some(active) = active else { return Ok(false) };
        active.cancel.cancel();
        tokio::task::spawn_blocking(move || {
            if active.worker.join().is_err() {
                warn!("stream worker panicked");
            }
        })
        .await
        .map_err(|e| DomainError::Device(format!("join stream worker: {e}")))?;
        Ok(true)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamPacket> {
        self.tx.subscribe()
    }

    fn store(&self, kind: ArtifactKind) -> Arc<ArtifactStore> {
        match kind {
            ArtifactKind::StillImage => self.still_store.clone(),
            ArtifactKind::StreamFrame => self.stream_store.clone(),
        }
    }

    pub async fn latest_download(&self, kind: ArtifactKind) -> DomainResult<Download> {
        let store = self.store(kind);
        blocking(move || {
            let artifact = store.latest()?;
            read_download(&store, &artifact)
        })
        .await
    }

    pub async fn artifact(&self, file_name: String) -> DomainResult<Download> {
        let (kind, _) = ArtifactKind::classify(&file_name)
            .ok_or_else(|| DomainError::InvalidInput(format!("{file_name} is not an artifact name")))?;
        let store = self.store(kind);
        blocking(move || {
            let artifact = store.resolve(&file_name)?;
            read_download(&store, &artifact)
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> DomainResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> DomainResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DomainError::NotFound(format!("read task failed: {e}")))?
}

fn read_download(store: &ArtifactStore, artifact: &StoredArtifact) -> DomainResult<Download> {
    let mut opened = store.open_for_download(artifact)?;
    let mut bytes = Vec::new();
    opened
        .file
        .read_to_end(&mut bytes)
        .map_err(|e| DomainError::NotFound(format!("{}: {e}", opened.file_name)))?;
    Ok(Download { file_name: opened.file_name, mime: opened.mime, bytes })
}

fn publish(tx: &broadcast::Sender<StreamPacket>, event: StreamEvent) {
    let packet = match event {
        StreamEvent::Frame(frame) => {
            let image = frame.result.annotated.image();
            let mut jpeg = Vec::new();
            if let Err(e) = JpegEncoder::new_with_quality(&mut jpeg, STREAM_JPEG_QUALITY).encode_image(image) {
                warn!(error = %e, "could not encode frame for subscribers");
                return;
            }
            let meta = FrameMeta {
                width: image.width(),
                height: image.height(),
                infer_ms: frame.infer_ms,
                fps_est: frame.fps_est,
                sequence: frame.artifact.as_ref().map(|a| a.sequence),
                artifact: frame.artifact.as_ref().map(|a| a.file_name()),
                detections: frame.result.detections,
            };
            if let Some(reason) = frame.persist_error {
                let _ = tx.send(StreamPacket {
                    message: StreamMessage::Error { kind: "write".into(), message: reason },
                    jpeg: None,
                });
            }
            StreamPacket { message: StreamMessage::Frame { meta }, jpeg: Some(jpeg) }
        }
        StreamEvent::Skipped(e) => StreamPacket {
            message: StreamMessage::Error { kind: e.kind().into(), message: e.to_string() },
            jpeg: None,
        },
    };
    if tx.receiver_count() > 0 {
        let _ = tx.send(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{
        detector::Detector,
        frame_source::FrameSource,
        controller::DetectorSlot,
    };
    use crate::domain::{artifact::LatestScope, model::YoloParams, stream::StopReason};
    use crate::test_support::{encode, FakeCamera, FakeEngine};
    use image::{ImageFormat, RgbImage};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn service(dir: &Path, camera: &FakeCamera) -> PipelineService {
        service_with(dir, camera, FakeEngine::returning(vec![]))
    }

    fn service_with(dir: &Path, camera: &FakeCamera, engine: FakeEngine) -> PipelineService {
        let results = dir.join("results");
        let controller = PipelineController::new(
            FrameSource::new(PathBuf::from("missing.jpg"), Arc::new(camera.clone())),
            DetectorSlot::Ready(Detector::new(Box::new(engine), YoloParams::default())),
            Arc::new(ArtifactStore::new(&results, ArtifactKind::StillImage, LatestScope::Directory)),
            Arc::new(ArtifactStore::new(&results, ArtifactKind::StreamFrame, LatestScope::Directory)),
        );
        PipelineService::new(controller)
    }

    fn t(v: f32) -> ConfidenceThreshold {
        ConfidenceThreshold::new(v).unwrap()
    }

    #[tokio::test]
    async fn still_detection_then_download_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path(), &FakeCamera::new(0));
        assert!(matches!(
            svc.latest_download(ArtifactKind::StillImage).await,
            Err(DomainError::NotFound(_))
        ));

        let png = encode(&RgbImage::new(100, 100), ImageFormat::Png);
        assert_eq!(svc.select_image(StillSource::Upload(png)).await.unwrap(), (100, 100));
        svc.detect(t(0.4)).await.unwrap();
        svc.detect(t(0.4)).await.unwrap();

        let download = svc.latest_download(ArtifactKind::StillImage).await.unwrap();
        assert_eq!(download.file_name, "detected_image_2.png");
        assert_eq!(download.mime, "image/png");
        let on_disk = std::fs::read(tmp.path().join("results/detected_image_2.png")).unwrap();
        assert_eq!(download.bytes, on_disk);
    }

    #[tokio::test]
    async fn status_during_a_slow_still_detect_reports_busy() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = FakeEngine::returning(vec![]).with_delay(Duration::from_millis(500));
        let svc = service_with(tmp.path(), &FakeCamera::new(0), engine);
        let png = encode(&RgbImage::new(32, 32), ImageFormat::Png);
        svc.select_image(StillSource::Upload(png)).await.unwrap();

        let running = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.detect(t(0.4)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = svc.status().await;
        assert!(status.busy);
        assert!(status.state.is_none());
        assert!(!status.streaming);
        assert!(status.detection_enabled);

        match svc.detect(t(0.4)).await {
            Err(DomainError::Busy(message)) => assert!(message.contains("in progress"), "{message}"),
            other => panic!("expected busy, got {other:?}"),
        }
        assert!(matches!(svc.start_stream(0, t(0.4)), Err(DomainError::Busy(_))));

        running.await.unwrap().unwrap();
        let status = svc.status().await;
        assert!(!status.busy);
        assert_eq!(status.state, Some(PipelineState::Displaying));
    }

    #[tokio::test]
    async fn displayed_result_survives_a_failing_store() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("results"), b"not a directory").unwrap();
        let svc = service(tmp.path(), &FakeCamera::new(0));
        assert!(matches!(svc.displayed_png().await, Err(DomainError::NotFound(_))));

        let png = encode(&RgbImage::new(48, 20), ImageFormat::Png);
        svc.select_image(StillSource::Upload(png)).await.unwrap();
        let report = svc.detect(t(0.4)).await.unwrap();
        assert!(report.artifact.is_none());

        let shown = image::load_from_memory(&svc.displayed_png().await.unwrap()).unwrap();
        assert_eq!((shown.width(), shown.height()), (48, 20));
    }

    #[tokio::test]
    async fn stream_publishes_frames_then_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let camera = FakeCamera::new(2);
        let svc = service(tmp.path(), &camera);
        let mut rx = svc.subscribe();

        svc.start_stream(0, t(0.4)).unwrap();
        let mut frames = 0;
        loop {
            let packet = match rx.recv().await {
                Ok(packet) => packet,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("stream channel closed early: {e}"),
            };
            match packet.message {
                StreamMessage::Frame { meta } => {
                    frames += 1;
                    assert_eq!((meta.width, meta.height), (720, 405));
                    assert!(packet.jpeg.is_some());
                }
                StreamMessage::Closed { reason, processed, .. } => {
                    assert_eq!(reason, StopReason::Exhausted);
                    assert_eq!(processed, 2);
                    break;
                }
                StreamMessage::Error { message, .. } => panic!("unexpected error: {message}"),
            }
        }
        assert_eq!(frames, 2);
        svc.stop_stream().await.unwrap();
        assert_eq!(camera.releases(), 1);
    }

    #[tokio::test]
    async fn stopping_a_stream_frees_camera_for_the_next_one() {
        let tmp = tempfile::tempdir().unwrap();
        let camera = FakeCamera::new(1_000_000);
        let svc = service(tmp.path(), &camera);
        let mut rx = svc.subscribe();

        svc.start_stream(0, t(0.4)).unwrap();
        loop {
            match rx.recv().await {
                Ok(StreamPacket { message: StreamMessage::Frame { .. }, .. }) => break,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("stream channel closed early: {e}"),
            }
        }
        assert!(svc.stop_stream().await.unwrap());
        assert_eq!(camera.releases(), 1);
        assert!(!svc.stop_stream().await.unwrap());

        svc.start_stream(0, t(0.4)).unwrap();
        assert!(svc.stop_stream().await.unwrap());
        assert_eq!(camera.opens(), 2);
        assert_eq!(camera.releases(), 2);
    }
}
