//! pdfkiln library
//!
//! Converts between images and PDFs: merges images into a PDF with one page
//! per image, rescales existing PDF pages to a fixed width, and extracts
//! embedded images back to files. Shared between CLI and WASM targets.
//!
//! Each engine makes one sequential pass over its units (images or pages).
//! A unit that fails is reported through a [`ProgressSink`] and recorded in
//! the returned [`RunReport`]; the pass always continues. Only problems with
//! the run as a whole come back as `Err`.

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub mod codec;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod merge;
#[cfg(not(target_arch = "wasm32"))]
pub mod paths;
pub mod pdf;
pub mod report;
pub mod resize;
pub mod sniff;

use lopdf::Document;

pub use error::{ConvertError, Result};
pub use extract::{Classification, DirectorySink, ExtractedImage, ImageSink, MemorySink};
pub use geometry::{PageBox, PageTransform, A4_WIDTH_POINTS};
pub use merge::ImageSource;
pub use report::{FailureLog, Outcome, ProgressSink, RunReport, UnitFailure, UnitRef};

/// Quality used when PNGs are converted to JPEG during a merge.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

fn validate_quality(quality: u8) -> Result<()> {
    if quality == 0 || quality > 100 {
        return Err(ConvertError::InvalidQuality(quality));
    }
    Ok(())
}

fn validate_target_width(width: f32) -> Result<()> {
    if !width.is_finite() || width <= 0.0 {
        return Err(ConvertError::InvalidTargetWidth(width));
    }
    Ok(())
}

/// Options for merging images into a PDF
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Rescale every page to `target_width`
    pub resize: bool,
    /// Page width in points when resizing
    pub target_width: f32,
    /// JPEG quality for non-JPEG inputs; `None` keeps them lossless
    pub png_jpeg_quality: Option<u8>,
    /// Compress PDF streams (reduces file size)
    pub compress_streams: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            resize: false,
            target_width: A4_WIDTH_POINTS,
            png_jpeg_quality: Some(DEFAULT_JPEG_QUALITY),
            compress_streams: true,
        }
    }
}

impl MergeOptions {
    pub fn validate(&self) -> Result<()> {
        validate_target_width(self.target_width)?;
        if let Some(quality) = self.png_jpeg_quality {
            validate_quality(quality)?;
        }
        Ok(())
    }
}

/// Options for resizing the pages of a PDF
#[derive(Debug, Clone)]
pub struct ResizeOptions {
    /// New page width in points
    pub target_width: f32,
    /// Compress PDF streams (reduces file size)
    pub compress_streams: bool,
}

impl Default for ResizeOptions {
    fn default() -> Self {
        Self {
            target_width: A4_WIDTH_POINTS,
            compress_streams: true,
        }
    }
}

impl ResizeOptions {
    pub fn validate(&self) -> Result<()> {
        validate_target_width(self.target_width)
    }
}

/// Options for extracting images from a PDF
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Keep each image's stored encoding instead of converting to JPEG
    pub raw: bool,
    /// JPEG quality (1-100) for converted images
    pub jpeg_quality: u8,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            raw: false,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl ExtractOptions {
    pub fn validate(&self) -> Result<()> {
        validate_quality(self.jpeg_quality)
    }
}

/// Merge in-memory images and return the PDF bytes
pub fn merge_images_bytes(
    sources: &[ImageSource],
    options: &MergeOptions,
) -> Result<(Vec<u8>, RunReport)> {
    let (mut doc, report) = merge::merge_images(sources, options, &mut ())?;
    let bytes = pdf::document_bytes(&mut doc)?;
    Ok((bytes, report))
}

/// Resize the pages of a PDF held in memory and return the new PDF bytes
pub fn resize_pdf_bytes(input_bytes: &[u8], options: &ResizeOptions) -> Result<(Vec<u8>, RunReport)> {
    options.validate()?;
    let mut doc = Document::load_mem(input_bytes)?;
    let report = resize::resize_pages(&mut doc, options, &mut ())?;
    let bytes = pdf::document_bytes(&mut doc)?;
    Ok((bytes, report))
}

/// Extract every embedded image of a PDF held in memory
pub fn extract_images_bytes(
    pdf_bytes: &[u8],
    options: &ExtractOptions,
) -> Result<(Vec<ExtractedImage>, RunReport)> {
    options.validate()?;
    let doc = Document::load_mem(pdf_bytes)?;
    let mut out = MemorySink::default();
    let report = extract::extract_images(&doc, options, &mut out, &mut ())?;
    Ok((out.images, report))
}

#[cfg(not(target_arch = "wasm32"))]
pub mod file_ops {
    use super::*;
    use std::path::{Path, PathBuf};
    use tracing::{info, instrument};

    /// Merge image files into a PDF written to `output_path`.
    ///
    /// The output is written in one go after every image has been attempted,
    /// so it is a complete document even when some images failed.
    #[instrument(skip(image_paths, options, sink), fields(images = image_paths.len()))]
    pub fn merge_images_to_pdf(
        image_paths: &[PathBuf],
        output_path: &Path,
        options: &MergeOptions,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport> {
        let sources: Vec<ImageSource> = image_paths.iter().cloned().map(ImageSource::from).collect();
        let (mut doc, report) = merge::merge_images(&sources, options, sink)?;
        pdf::save_document(&mut doc, output_path)?;
        info!(output = %output_path.display(), pages = report.produced, "saved merged PDF");
        Ok(report)
    }

    /// Resize every page of `input_path` and save the result to `output_path`.
    #[instrument(skip(options, sink))]
    pub fn resize_pdf_pages(
        input_path: &Path,
        output_path: &Path,
        options: &ResizeOptions,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport> {
        options.validate()?;
        let mut doc = pdf::load_document(input_path)?;
        let report = resize::resize_pages(&mut doc, options, sink)?;
        pdf::save_document(&mut doc, output_path)?;
        info!(output = %output_path.display(), "saved resized PDF");
        Ok(report)
    }

    /// Extract every embedded image of `input_path` into `output_dir`.
    #[instrument(skip(options, sink))]
    pub fn extract_images(
        input_path: &Path,
        output_dir: &Path,
        options: &ExtractOptions,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport> {
        options.validate()?;
        if !output_dir.is_dir() {
            return Err(ConvertError::InvalidPath(format!(
                "output directory does not exist: {}",
                output_dir.display()
            )));
        }
        let doc = pdf::load_document(input_path)?;
        let mut out = DirectorySink::new(output_dir);
        let report = extract::extract_images(&doc, options, &mut out, sink)?;
        info!(dir = %output_dir.display(), images = report.produced, "extracted images");
        Ok(report)
    }
}
