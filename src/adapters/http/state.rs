use std::sync::Arc;

use crate::application::services::{CameraService, PipelineService};
use crate::config::AppConfig;

/// Estado compartido por los handlers de Axum.
#[derive(Clone)]
pub struct HttpState {
    pub camera: Arc<CameraService>,
    /// Detección de imagen fija, streaming y descargas de artefactos.
    pub pipeline: Arc<PipelineService>,
    pub config: Arc<AppConfig>,
}
