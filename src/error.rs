//! Error type shared by every engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while converting between images and PDFs.
///
/// Validation and document-level variants abort a run. The remaining variants
/// describe a single image or page and end up in a [`crate::UnitFailure`]
/// instead of stopping the pass.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),

    #[error("target width must be a positive number, got {0}")]
    InvalidTargetWidth(f32),

    #[error("{0}")]
    InvalidPath(String),

    #[error("failed to load PDF {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("failed to save PDF {}: {message}", path.display())]
    Save { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("PDF structure error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("malformed PDF: {0}")]
    Malformed(String),

    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    #[error("failed to encode image: {0}")]
    ImageEncode(String),

    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("unsupported color space: {0}")]
    UnsupportedColorSpace(String),

    #[error("page {0} has no usable media box")]
    MissingPageBox(u32),

    #[error("image #{index} (key: {key}) on page {page} failed: {source}")]
    ImageResource {
        page: u32,
        key: String,
        index: usize,
        #[source]
        source: Box<ConvertError>,
    },
}

impl From<image::ImageError> for ConvertError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Encoding(e) => ConvertError::ImageEncode(e.to_string()),
            other => ConvertError::ImageDecode(other.to_string()),
        }
    }
}

impl From<jpeg_encoder::EncodingError> for ConvertError {
    fn from(err: jpeg_encoder::EncodingError) -> Self {
        ConvertError::ImageEncode(err.to_string())
    }
}

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;
