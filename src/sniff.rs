//! Format sniffing for image bytes that carry no trustworthy encoding hint.

use image::ImageFormat;

/// Extension used when no signature matches.
pub const FALLBACK_EXTENSION: &str = "dat";

/// Identify an image format from its leading magic bytes.
///
/// Returns `None` when nothing matches. Never fails.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    // guess_format needs a handful of bytes to say anything useful
    if bytes.len() < 4 {
        return None;
    }
    image::guess_format(bytes).ok()
}

/// Pick a file extension for `bytes`, falling back to [`FALLBACK_EXTENSION`].
pub fn detect(bytes: &[u8]) -> &'static str {
    detect_format(bytes)
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or(FALLBACK_EXTENSION)
}
