//! Error type shared by the constants, self energy and dataset loaders.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// The serialized dataset collection could not be decoded or encoded.
    #[error("invalid dataset collection: {0}")]
    Collection(#[from] bincode::Error),

    #[error("invalid constants file: {0}")]
    Constants(String),

    #[error("invalid self energy table: {0}")]
    SelfEnergies(String),

    /// A species of the model has no entry in the self energy table.
    #[error("no self energy for species '{0}'")]
    MissingSelfEnergy(String),

    #[error("unknown species '{0}'")]
    UnknownSpecies(String),

    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("no HDF5 files found in {0}")]
    NoHdf5Files(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
