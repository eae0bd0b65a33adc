use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Fast5Error {
    #[error("{0}")]
    IOError(#[from] io::Error),

    #[error("Median window size must be odd, got {0}")]
    EvenMedianWindow(usize),

    #[error("Container is missing required path {0}")]
    MissingPath(String),

    #[error("Attribute {name} at {path} has an unexpected type")]
    BadAttribute { path: String, name: String },

    #[error("Dataset {path} is missing column {column}")]
    MissingColumn { path: String, column: String },

    #[error("Failed to build strip worker pool, {0}")]
    PoolBuild(String),

    #[cfg(feature = "hdf5")]
    #[error("{0}")]
    Hdf5Error(#[from] hdf5::Error),
}
