use thiserror::Error;

/// Library error type for slideshow operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied an unknown action, a malformed setting, or any
    /// other request the slideshow cannot act on.
    #[error("{0}")]
    InvalidArgument(String),

    /// No image or group exists under the given key.
    #[error("{0} not found")]
    NotFound(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored JSON document could not be read or written.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An upload could not be decoded while probing its dimensions.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Wraps a model validation failure, keeping its context chain readable.
    pub fn invalid(err: anyhow::Error) -> Self {
        Self::InvalidArgument(format!("{err:#}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
