use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::application::{
    artifact_store::ArtifactStore,
    detector::Detector,
    frame_source::{FrameSource, StillSource},
};
use crate::domain::{
    artifact::{ArtifactKind, StoredArtifact},
    detection::{summarize_detections, DetectionResult},
    errors::{DomainError, DomainResult},
    frame::{AnnotatedFrame, Frame},
    model::ConfidenceThreshold,
    stream::StopReason,
};

/// Consecutive capture failures after which a stream is abandoned.
pub const MAX_CONSECUTIVE_READ_FAILURES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    AwaitingInput,
    Detecting,
    Displaying,
    StreamOpen,
    StreamClosed,
    Failed(String),
}

/// The model as it came out of startup: usable, or disabled with the load error.
pub enum DetectorSlot {
    Ready(Detector),
    Unavailable(String),
}

impl DetectorSlot {
    pub fn from_load<E: std::fmt::Display>(loaded: Result<Detector, E>) -> Self {
        match loaded {
            Ok(detector) => DetectorSlot::Ready(detector),
            Err(e) => DetectorSlot::Unavailable(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct StillReport {
    pub result: DetectionResult,
    pub artifact: Option<StoredArtifact>,
    pub persist_error: Option<String>,
    pub latest: Option<StoredArtifact>,
    pub summary: String,
}

#[derive(Debug)]
pub struct StreamFrame {
    pub result: DetectionResult,
    pub artifact: Option<StoredArtifact>,
    pub persist_error: Option<String>,
    pub infer_ms: f32,
    pub fps_est: f32,
}

#[derive(Debug)]
pub enum StreamEvent {
    Frame(StreamFrame),
    /// A frame that could not be read or inferred; the stream carries on.
    Skipped(DomainError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub processed: u64,
    pub skipped: u64,
    pub reason: StopReason,
}

pub struct PipelineController {
    source: FrameSource,
    detector: DetectorSlot,
    still_store: Arc<ArtifactStore>,
    stream_store: Arc<ArtifactStore>,
    inference_deadline: Option<Duration>,
    state: PipelineState,
    staged: Option<Frame>,
    displayed: Option<AnnotatedFrame>,
}

impl PipelineController {
    pub fn new(
        source: FrameSource,
        detector: DetectorSlot,
        still_store: Arc<ArtifactStore>,
        stream_store: Arc<ArtifactStore>,
    ) -> Self {
        if let DetectorSlot::Unavailable(reason) = &detector {
            warn!(%reason, "detection disabled for this session");
        }
        Self {
            source,
            detector,
            still_store,
            stream_store,
            inference_deadline: None,
            state: PipelineState::Idle,
            staged: None,
            displayed: None,
        }
    }

    pub fn with_inference_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.inference_deadline = deadline;
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        match &self.detector {
            DetectorSlot::Ready(_) => None,
            DetectorSlot::Unavailable(reason) => Some(reason),
        }
    }

    pub fn staged_frame(&self) -> Option<&Frame> {
        self.staged.as_ref()
    }

    /// Last still result, kept whether or not it could be saved.
    pub fn displayed(&self) -> Option<&AnnotatedFrame> {
        self.displayed.as_ref()
    }

    pub fn store(&self, kind: ArtifactKind) -> &Arc<ArtifactStore> {
        match kind {
            ArtifactKind::StillImage => &self.still_store,
            ArtifactKind::StreamFrame => &self.stream_store,
        }
    }

    /// Stages a still frame. Never runs detection by itself.
    pub fn select_image(&mut self, source: StillSource) -> DomainResult<&Frame> {
        match self.source.next_still_frame(source) {
            Ok(frame) => {
                self.displayed = None;
                self.state = PipelineState::AwaitingInput;
                Ok(self.staged.insert(frame))
            }
            Err(e) => {
                self.staged = None;
                self.state = PipelineState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Runs detection on the staged frame and saves the annotated result.
    pub fn detect(&mut self, threshold: ConfidenceThreshold) -> DomainResult<StillReport> {
        let detector = match &mut self.detector {
            DetectorSlot::Ready(detector) => detector,
            DetectorSlot::Unavailable(reason) => return Err(DomainError::ModelLoad(reason.clone())),
        };
        let Some(frame) = self.staged.as_ref() else {
            return Err(DomainError::NotFound("no image is uploaded yet".into()));
        };

        self.state = PipelineState::Detecting;
        let result = match detector.run_within(frame, threshold, self.inference_deadline) {
            Ok((result, _)) => result,
            Err(e) => {
                warn!(error = %e, "still detection failed");
                self.state = PipelineState::Failed(e.to_string());
                return Err(e);
            }
        };

        let (artifact, persist_error) = match self.still_store.persist(&result.annotated) {
            Ok(artifact) => (Some(artifact), None),
            Err(e) => {
                warn!(error = %e, "annotated image not saved");
                (None, Some(e.to_string()))
            }
        };
        let latest = self.still_store.latest().ok();
        let summary = summarize_detections(&result.detections);
        info!(
            detections = result.detections.len(),
            artifact = ?artifact.as_ref().map(|a| a.file_name()),
            "still detection done"
        );

        self.displayed = Some(result.annotated.clone());
        self.state = PipelineState::Displaying;
        Ok(StillReport { result, artifact, persist_error, latest, summary })
    }

    pub fn reset(&mut self) {
        self.staged = None;
        self.displayed = None;
        self.state = PipelineState::Idle;
    }

    /// Processes frames from `device_index` until the device is exhausted,
    /// `cancel` is raised, or reads keep failing. Cancellation is checked
    /// before each frame, so an inference already in progress completes.
    pub fn run_stream<F>(
        &mut self,
        device_index: u32,
        threshold: ConfidenceThreshold,
        cancel: &CancelFlag,
        mut on_event: F,
    ) -> DomainResult<StreamSummary>
    where
        F: FnMut(StreamEvent),
    {
        let detector = match &mut self.detector {
            DetectorSlot::Ready(detector) => detector,
            DetectorSlot::Unavailable(reason) => return Err(DomainError::ModelLoad(reason.clone())),
        };
        let mut frames = match self.source.stream_frames(device_index) {
            Ok(frames) => frames,
            Err(e) => {
                self.state = PipelineState::Failed(e.to_string());
                return Err(e);
            }
        };
        self.state = PipelineState::StreamOpen;

        let mut processed = 0u64;
        let mut skipped = 0u64;
        let mut consecutive_failures = 0u32;
        let mut fps_est: f32 = 0.0;
        let mut last_t = Instant::now();

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            let frame = match frames.next() {
                None => break StopReason::Exhausted,
                Some(Ok(frame)) => {
                    consecutive_failures = 0;
                    frame
                }
                Some(Err(e)) => {
                    skipped += 1;
                    consecutive_failures += 1;
                    warn!(error = %e, consecutive_failures, "frame capture failed");
                    on_event(StreamEvent::Skipped(e));
                    if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                        break StopReason::DeviceFailed;
                    }
                    continue;
                }
            };

            self.state = PipelineState::Detecting;
            let (result, elapsed) = match detector.run_within(&frame, threshold, self.inference_deadline) {
                Ok(done) => done,
                Err(e) => {
                    skipped += 1;
                    warn!(error = %e, "frame skipped");
                    on_event(StreamEvent::Skipped(e));
                    continue;
                }
            };

            let dt = last_t.elapsed().as_secs_f32().max(0.001);
            last_t = Instant::now();
            fps_est = 0.9 * fps_est + 0.1 * (1.0 / dt);

            let (artifact, persist_error) = match self.stream_store.persist(&result.annotated) {
                Ok(artifact) => (Some(artifact), None),
                Err(e) => {
                    warn!(error = %e, "stream frame not saved");
                    (None, Some(e.to_string()))
                }
            };

            self.state = PipelineState::Displaying;
            processed += 1;
            on_event(StreamEvent::Frame(StreamFrame {
                result,
                artifact,
                persist_error,
                infer_ms: elapsed.as_secs_f32() * 1000.0,
                fps_est,
            }));
        };

        drop(frames);
        self.state = PipelineState::StreamClosed;
        info!(device_index, processed, skipped, ?reason, "stream closed");
        Ok(StreamSummary { processed, skipped, reason })
    }
}
