use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] ani_core::Error),

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("ONNX runtime error: {0}")]
    Onnx(String),

    /// A species of the model has no network in the network directory.
    #[error("no network for species '{species}' in {dir}")]
    MissingNetwork { species: String, dir: PathBuf },

    #[error("network directory {0} does not exist")]
    MissingNetworkDir(PathBuf),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("model has no output named '{0}'")]
    MissingOutput(String),

    /// A metric was read before it saw any example.
    #[error("metric '{0}' has no examples")]
    EmptyMetric(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub(crate) fn onnx_err(e: impl std::fmt::Display) -> Error {
    Error::Onnx(e.to_string())
}

pub type Result<T> = std::result::Result<T, Error>;
