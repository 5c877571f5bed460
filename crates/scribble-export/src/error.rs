use crate::checkpoint::CheckpointError;
use crate::onnx::ExportError;

/// Errors returned by the export pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<burn::config::ConfigError> for Error {
    fn from(error: burn::config::ConfigError) -> Self {
        Error::Config(error.to_string())
    }
}
