use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("model could not be loaded: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("inference took {elapsed_ms} ms, over the {deadline_ms} ms deadline")]
    InferenceTimeout { elapsed_ms: u64, deadline_ms: u64 },
    #[error("could not save artifact: {0}")]
    Write(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("capture device error: {0}")]
    Device(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("pipeline busy: {0}")]
    Busy(String),
}

impl DomainError {
    /// Stable identifier used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Decode(_) => "decode",
            DomainError::ModelLoad(_) => "model_load",
            DomainError::Inference(_) => "inference",
            DomainError::InferenceTimeout { .. } => "inference_timeout",
            DomainError::Write(_) => "write",
            DomainError::NotFound(_) => "not_found",
            DomainError::Device(_) => "device",
            DomainError::InvalidInput(_) => "invalid_input",
            DomainError::Busy(_) => "busy",
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
