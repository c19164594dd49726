use std::time::{Duration, Instant};
use tracing::debug;

use crate::application::{plot::plot, ports::InferenceEngine};
use crate::domain::{
    detection::DetectionResult,
    errors::{DomainError, DomainResult},
    frame::Frame,
    model::{ConfidenceThreshold, YoloParams},
};

/// Loaded model plus the rendering of its results.
pub struct Detector {
    engine: Box<dyn InferenceEngine>,
    params: YoloParams,
}

impl Detector {
    pub fn new(engine: Box<dyn InferenceEngine>, params: YoloParams) -> Self {
        Self { engine, params }
    }

    pub fn run(&mut self, frame: &Frame, threshold: ConfidenceThreshold) -> DomainResult<DetectionResult> {
        let params = self.params.with_threshold(threshold);
        let mut detections = self.engine.infer(frame.image(), &params)?;

        detections.retain(|d| threshold.admits(d.score));
        detections.sort_by(|a, b| b.score.total_cmp(&a.score));
        detections.truncate(params.max_detections);

        let annotated = plot(frame, &detections).into_annotated();
        debug!(count = detections.len(), threshold = threshold.value(), "frame inferred");
        Ok(DetectionResult { detections, annotated })
    }

    /// Like [`run`](Self::run), but reports `InferenceTimeout` when the call
    /// overran `deadline`. The call itself is never interrupted.
    pub fn run_within(
        &mut self,
        frame: &Frame,
        threshold: ConfidenceThreshold,
        deadline: Option<Duration>,
    ) -> DomainResult<(DetectionResult, Duration)> {
        let started = Instant::now();
        let result = self.run(frame, threshold)?;
        let elapsed = started.elapsed();
        if let Some(deadline) = deadline {
            if elapsed > deadline {
                return Err(DomainError::InferenceTimeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    deadline_ms: deadline.as_millis() as u64,
                });
            }
        }
        Ok((result, elapsed))
    }
}
