//! WebAssembly bindings for pdfkiln

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::{
    extract_images_bytes, merge_images_bytes, resize_pdf_bytes, ExtractOptions, ImageSource,
    MergeOptions, ResizeOptions, RunReport, A4_WIDTH_POINTS, DEFAULT_JPEG_QUALITY,
};

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

fn to_js_error(err: crate::ConvertError) -> JsError {
    JsError::new(&err.to_string())
}

#[derive(Serialize)]
struct FailureJs {
    unit: String,
    message: String,
}

fn failures_json(report: &RunReport) -> String {
    let failures: Vec<FailureJs> = report
        .failures
        .iter()
        .map(|f| FailureJs {
            unit: f.unit.to_string(),
            message: f.message.clone(),
        })
        .collect();
    serde_json::to_string(&failures).unwrap_or_else(|_| "[]".to_string())
}

fn warn_failures(report: &RunReport) {
    for failure in &report.failures {
        web_sys::console::warn_1(&JsValue::from_str(&failure.to_string()));
    }
}

/// Resize every page of a PDF to a fixed width
///
/// # Arguments
/// * `pdf_bytes` - The input PDF file as a byte array
/// * `target_width` - Page width in points (default: 595, A4)
///
/// # Returns
/// A `ConvertResultJs` with the new PDF and any per-page failures
#[wasm_bindgen]
pub fn resize_pdf(pdf_bytes: &[u8], target_width: Option<f32>) -> Result<ConvertResultJs, JsError> {
    let options = ResizeOptions {
        target_width: target_width.unwrap_or(A4_WIDTH_POINTS),
        ..ResizeOptions::default()
    };
    let (bytes, report) = resize_pdf_bytes(pdf_bytes, &options).map_err(to_js_error)?;
    warn_failures(&report);
    Ok(ConvertResultJs::new(bytes, &report))
}

/// Merge images into a PDF, one page per image
///
/// # Arguments
/// * `images` - Array of `Uint8Array`, one per image, in page order
/// * `resize` - Scale pages to A4 width (default: false)
/// * `quality` - JPEG quality for PNG inputs; omit for the default, 0 keeps them lossless
#[wasm_bindgen]
pub fn merge_images(
    images: js_sys::Array,
    resize: Option<bool>,
    quality: Option<u8>,
) -> Result<ConvertResultJs, JsError> {
    let sources: Vec<ImageSource> = images
        .iter()
        .enumerate()
        .map(|(i, value)| ImageSource::Memory {
            name: format!("image {}", i + 1),
            data: js_sys::Uint8Array::new(&value).to_vec(),
        })
        .collect();

    let options = MergeOptions {
        resize: resize.unwrap_or(false),
        png_jpeg_quality: match quality {
            Some(0) => None,
            Some(q) => Some(q),
            None => Some(DEFAULT_JPEG_QUALITY),
        },
        ..MergeOptions::default()
    };
    let (bytes, report) = merge_images_bytes(&sources, &options).map_err(to_js_error)?;
    warn_failures(&report);
    Ok(ConvertResultJs::new(bytes, &report))
}

/// Extract all embedded images from a PDF
///
/// Returns an array of `{ name, data }` objects where `data` is a `Uint8Array`.
#[wasm_bindgen]
pub fn extract_images(
    pdf_bytes: &[u8],
    raw: Option<bool>,
    quality: Option<u8>,
) -> Result<js_sys::Array, JsError> {
    let options = ExtractOptions {
        raw: raw.unwrap_or(false),
        jpeg_quality: quality.unwrap_or(DEFAULT_JPEG_QUALITY),
    };
    let (images, report) = extract_images_bytes(pdf_bytes, &options).map_err(to_js_error)?;
    warn_failures(&report);

    let out = js_sys::Array::new();
    for image in images {
        let entry = js_sys::Object::new();
        js_sys::Reflect::set(&entry, &"name".into(), &JsValue::from_str(&image.file_name))
            .map_err(|_| JsError::new("failed to build result object"))?;
        js_sys::Reflect::set(
            &entry,
            &"data".into(),
            &js_sys::Uint8Array::from(image.data.as_slice()).into(),
        )
        .map_err(|_| JsError::new("failed to build result object"))?;
        out.push(&entry);
    }
    Ok(out)
}

/// A converted PDF plus what happened to each unit
#[wasm_bindgen]
pub struct ConvertResultJs {
    pdf_bytes: Vec<u8>,
    total_units: usize,
    produced: usize,
    failures_json: String,
}

impl ConvertResultJs {
    fn new(pdf_bytes: Vec<u8>, report: &RunReport) -> Self {
        ConvertResultJs {
            pdf_bytes,
            total_units: report.total_units,
            produced: report.produced,
            failures_json: failures_json(report),
        }
    }
}

#[wasm_bindgen]
impl ConvertResultJs {
    /// Get the output PDF bytes
    #[wasm_bindgen(getter)]
    pub fn pdf_bytes(&self) -> Vec<u8> {
        self.pdf_bytes.clone()
    }

    /// Number of images or pages attempted
    #[wasm_bindgen(getter)]
    pub fn total_units(&self) -> usize {
        self.total_units
    }

    /// Number of pages written or resized
    #[wasm_bindgen(getter)]
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Per-unit failures as a JSON array of `{ unit, message }`
    #[wasm_bindgen(getter)]
    pub fn failures_json(&self) -> String {
        self.failures_json.clone()
    }
}
