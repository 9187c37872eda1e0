use thiserror::Error;

/// All errors produced by morpher-core.
#[derive(Debug, Error)]
pub enum MorpherError {
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("failed to spawn inference worker: {0}")]
    WorkerSpawn(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MorpherError>;
