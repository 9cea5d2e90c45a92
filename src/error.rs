//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning, capturing, or stitching
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid viewport/overlap/cap/crop combination, rejected before any
    /// capture begins
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The browser driver failed (launch, navigation, evaluation, screenshot)
    #[error("Driver error: {0}")]
    Driver(String),

    /// A page's capture pipeline aborted; tiles captured before the failure
    /// remain persisted
    #[error("Capture failed at tile {index}: {message}")]
    Capture { index: u32, message: String },

    /// Stitching failed: zero tiles, mismatched tile widths, or degenerate
    /// crop bands
    #[error("Stitch failed: {0}")]
    Stitch(String),

    /// Filesystem error while persisting tiles or metadata
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    Cdp(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Cdp(err.to_string())
    }
}
