//! Pull embedded images out of a PDF, one file per image XObject.

use std::fs;
use std::path::PathBuf;

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info, instrument};

use crate::codec::encode_jpeg;
use crate::pdf::{self, DecodedStream};
use crate::report::{ProgressSink, RunReport, Tracker, UnitRef};
use crate::sniff;
use crate::{ConvertError, ExtractOptions, Result};

/// Receives extracted image files.
pub trait ImageSink {
    /// Store `data` under `<stem>.<extension>`.
    fn write_image(&mut self, stem: &str, extension: &str, data: &[u8]) -> Result<()>;
}

/// Writes each image into an existing directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectorySink { dir: dir.into() }
    }
}

impl ImageSink for DirectorySink {
    fn write_image(&mut self, stem: &str, extension: &str, data: &[u8]) -> Result<()> {
        let path = self.dir.join(format!("{}.{}", stem, extension));
        fs::write(&path, data)?;
        debug!(path = %path.display(), bytes = data.len(), "wrote image");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Collects images in memory, in extraction order.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub images: Vec<ExtractedImage>,
}

impl ImageSink for MemorySink {
    fn write_image(&mut self, stem: &str, extension: &str, data: &[u8]) -> Result<()> {
        self.images.push(ExtractedImage {
            file_name: format!("{}.{}", stem, extension),
            data: data.to_vec(),
        });
        Ok(())
    }
}

/// How a raw-mode extension was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The stream's filter chain names an image codec.
    KnownByFilter(&'static str),
    /// A magic-byte signature matched the decoded bytes.
    DetectedBySniffing(&'static str),
    /// Nothing matched; the generic fallback is used.
    Unknown,
}

impl Classification {
    pub fn extension(self) -> &'static str {
        match self {
            Classification::KnownByFilter(ext) | Classification::DetectedBySniffing(ext) => ext,
            Classification::Unknown => sniff::FALLBACK_EXTENSION,
        }
    }
}

type Classifier = fn(&DecodedStream) -> Option<Classification>;

/// Tried in order; the first definitive answer wins.
const RAW_CLASSIFIERS: &[Classifier] = &[by_filter, by_signature];

fn by_filter(decoded: &DecodedStream) -> Option<Classification> {
    decoded
        .codec
        .map(|codec| Classification::KnownByFilter(codec.extension()))
}

// A flate image is either raw samples or a whole embedded file. Only a
// signature match says which, so anything else stays unknown.
fn by_signature(decoded: &DecodedStream) -> Option<Classification> {
    match sniff::detect(&decoded.data) {
        ext if ext == sniff::FALLBACK_EXTENSION => None,
        ext => Some(Classification::DetectedBySniffing(ext)),
    }
}

/// Classify decoded image bytes for raw extraction.
pub fn classify(decoded: &DecodedStream) -> Classification {
    RAW_CLASSIFIERS
        .iter()
        .find_map(|classifier| classifier(decoded))
        .unwrap_or(Classification::Unknown)
}

/// Extract every image XObject of every page into `out`.
///
/// Files are named `page_<n>_img_<k>` where `k` counts image resources on the
/// page, starting at 1. Empty or undecodable streams are skipped without
/// being reported. Other per-image and per-page problems are reported to
/// `sink` against the page number and the pass continues.
#[instrument(skip_all, fields(raw = options.raw, quality = options.jpeg_quality))]
pub fn extract_images(
    doc: &Document,
    options: &ExtractOptions,
    out: &mut dyn ImageSink,
    sink: &mut dyn ProgressSink,
) -> Result<RunReport> {
    options.validate()?;

    let pages = doc.get_pages();
    let mut tracker = Tracker::new(sink, pages.len());

    for (index, (&page_no, &page_id)) in pages.iter().enumerate() {
        match extract_page(doc, page_no, page_id, options, out, &mut tracker) {
            Ok(written) => debug!(page = page_no, written, "page scanned"),
            Err(err) => tracker.fail(UnitRef::Page(page_no), &err),
        }
        tracker.step(index + 1);
    }

    let report = tracker.finish();
    info!(
        pages = report.total_units,
        images = report.produced,
        failed = report.failures.len(),
        "extraction finished"
    );
    Ok(report)
}

/// Returns the number of files written. Per-image failures go straight to the
/// tracker; an `Err` is a page-level failure.
fn extract_page(
    doc: &Document,
    page_no: u32,
    page_id: ObjectId,
    options: &ExtractOptions,
    out: &mut dyn ImageSink,
    tracker: &mut Tracker<'_>,
) -> Result<usize> {
    let resources = match pdf::page_resources(doc, page_id)? {
        Some(r) => r,
        None => return Ok(0),
    };

    let mut image_index = 0;
    let mut written = 0;
    for (key, stream) in pdf::xobject_streams(doc, resources)? {
        if pdf::dict_name(&stream.dict, b"Subtype").as_deref() != Some("Image") {
            continue;
        }
        image_index += 1;
        let stem = format!("page_{}_img_{}", page_no, image_index);

        let result = render_image(doc, stream, options)
            .and_then(|rendered| match rendered {
                Some((extension, data)) => out.write_image(&stem, extension, &data).map(|_| true),
                None => Ok(false),
            });
        match result {
            Ok(true) => {
                written += 1;
                tracker.produced(1);
            }
            Ok(false) => debug!(page = page_no, key = %key, "skipped empty or undecodable image"),
            Err(err) => {
                let wrapped = ConvertError::ImageResource {
                    page: page_no,
                    key,
                    index: image_index,
                    source: Box::new(err),
                };
                tracker.fail(UnitRef::Page(page_no), &wrapped);
            }
        }
    }
    Ok(written)
}

/// Produce the extension and file bytes for one image, or `None` to skip it.
fn render_image(
    doc: &Document,
    stream: &Stream,
    options: &ExtractOptions,
) -> Result<Option<(&'static str, Vec<u8>)>> {
    if stream.content.is_empty() {
        return Ok(None);
    }
    let decoded = match pdf::decode_stream(doc, stream) {
        Ok(d) if !d.data.is_empty() => d,
        Ok(_) => return Ok(None),
        Err(err) => {
            debug!(%err, "stream does not decode");
            return Ok(None);
        }
    };

    if options.raw {
        let extension = classify(&decoded).extension();
        return Ok(Some((extension, decoded.data)));
    }

    if pdf::is_dct_encoded(doc, &stream.dict) {
        return Ok(Some(("jpg", decoded.data)));
    }

    let img = to_image(doc, stream, &decoded)?;
    let jpeg = encode_jpeg(&img, options.jpeg_quality)?;
    Ok(Some(("jpg", jpeg)))
}

/// Turn decoded stream bytes into pixels.
///
/// Complete image files embedded in the stream are loaded directly; anything
/// else is read as raw samples described by the image dictionary.
fn to_image(doc: &Document, stream: &Stream, decoded: &DecodedStream) -> Result<DynamicImage> {
    if let Some(codec) = decoded.codec {
        return image::load_from_memory(&decoded.data).map_err(|_| {
            ConvertError::UnsupportedFilter(format!("{:?} images cannot be re-encoded", codec))
        });
    }
    if sniff::detect_format(&decoded.data).is_some() {
        if let Ok(img) = image::load_from_memory(&decoded.data) {
            return Ok(img);
        }
    }
    decode_samples(doc, stream, &decoded.data)
}

#[derive(Debug, Clone)]
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    Indexed { base: Box<ColorModel>, lookup: Vec<u8> },
}

impl ColorModel {
    fn components(&self) -> usize {
        match self {
            ColorModel::Gray | ColorModel::Indexed { .. } => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
        }
    }
}

fn color_space_name(doc: &Document, obj: &Object) -> String {
    match pdf::resolve(doc, obj) {
        Ok(Object::Name(n)) => String::from_utf8_lossy(n).to_string(),
        Ok(Object::Array(arr)) => arr
            .first()
            .and_then(pdf::name_of)
            .unwrap_or_else(|| "Unknown".to_string()),
        _ => "Unknown".to_string(),
    }
}

fn color_model(doc: &Document, obj: &Object) -> Result<ColorModel> {
    let name = color_space_name(doc, obj);
    match name.as_str() {
        "DeviceGray" | "CalGray" | "G" => Ok(ColorModel::Gray),
        "DeviceRGB" | "CalRGB" | "RGB" => Ok(ColorModel::Rgb),
        "DeviceCMYK" | "CMYK" => Ok(ColorModel::Cmyk),
        "ICCBased" => {
            let n = icc_components(doc, obj);
            match n {
                Some(1) => Ok(ColorModel::Gray),
                Some(3) => Ok(ColorModel::Rgb),
                Some(4) => Ok(ColorModel::Cmyk),
                _ => Err(ConvertError::UnsupportedColorSpace(format!(
                    "ICCBased with {:?} components",
                    n
                ))),
            }
        }
        "Indexed" | "I" => indexed_model(doc, obj),
        other => Err(ConvertError::UnsupportedColorSpace(other.to_string())),
    }
}

fn icc_components(doc: &Document, obj: &Object) -> Option<i64> {
    let arr = match pdf::resolve(doc, obj).ok()? {
        Object::Array(arr) => arr,
        _ => return None,
    };
    match pdf::resolve(doc, arr.get(1)?).ok()? {
        Object::Stream(s) => pdf::dict_integer(&s.dict, b"N"),
        _ => None,
    }
}

/// `[/Indexed base hival lookup]`
fn indexed_model(doc: &Document, obj: &Object) -> Result<ColorModel> {
    let arr = match pdf::resolve(doc, obj)? {
        Object::Array(arr) if arr.len() >= 4 => arr,
        _ => {
            return Err(ConvertError::UnsupportedColorSpace(
                "malformed Indexed color space".to_string(),
            ))
        }
    };
    let base = color_model(doc, &arr[1])?;
    if matches!(base, ColorModel::Indexed { .. }) {
        return Err(ConvertError::UnsupportedColorSpace(
            "nested Indexed color space".to_string(),
        ));
    }
    let lookup = match pdf::resolve(doc, &arr[3])? {
        Object::String(bytes, _) => bytes.clone(),
        Object::Stream(s) => pdf::decode_stream(doc, s)?.data,
        _ => {
            return Err(ConvertError::UnsupportedColorSpace(
                "Indexed lookup table is missing".to_string(),
            ))
        }
    };
    Ok(ColorModel::Indexed {
        base: Box::new(base),
        lookup,
    })
}

/// Interpret raw samples using Width, Height, BitsPerComponent and ColorSpace.
fn decode_samples(doc: &Document, stream: &Stream, data: &[u8]) -> Result<DynamicImage> {
    let dict = &stream.dict;
    let width = pdf::dict_integer(dict, b"Width").unwrap_or(0);
    let height = pdf::dict_integer(dict, b"Height").unwrap_or(0);
    if width <= 0 || height <= 0 {
        return Err(ConvertError::ImageDecode(format!(
            "invalid image size {}x{}",
            width, height
        )));
    }
    let (width, height) = match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(ConvertError::ImageDecode(format!(
                "image size {}x{} is out of range",
                width, height
            )))
        }
    };

    let image_mask = matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
    let (model, bpc) = if image_mask {
        (ColorModel::Gray, 1)
    } else {
        let cs = dict.get(b"ColorSpace").map_err(|_| {
            ConvertError::UnsupportedColorSpace("image has no ColorSpace".to_string())
        })?;
        let bpc = pdf::dict_integer(dict, b"BitsPerComponent").unwrap_or(8);
        (color_model(doc, cs)?, bpc)
    };
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(ConvertError::ImageDecode(format!(
            "unsupported bits per component: {}",
            bpc
        )));
    }

    let scale = !matches!(model, ColorModel::Indexed { .. });
    let mut samples = unpack_samples(data, width, height, model.components(), bpc as u32, scale)?;
    if scale {
        apply_decode_array(doc, dict, &mut samples, model.components());
    }

    let (pixels, model) = match model {
        ColorModel::Indexed { base, lookup } => (expand_indexed(&samples, &base, &lookup), *base),
        other => (samples, other),
    };
    to_dynamic(pixels, width, height, &model)
}

/// Unpack byte-aligned rows of `bpc`-bit samples into one byte per sample.
///
/// With `scale`, sub-byte values are stretched to 0..=255; 16-bit samples keep
/// their high byte.
fn unpack_samples(
    data: &[u8],
    width: u32,
    height: u32,
    components: usize,
    bpc: u32,
    scale: bool,
) -> Result<Vec<u8>> {
    let too_large = || ConvertError::ImageDecode(format!("image of {}x{} is too large", width, height));
    let per_row = (width as usize).checked_mul(components).ok_or_else(too_large)?;
    let row_bytes = per_row
        .checked_mul(bpc as usize)
        .ok_or_else(too_large)?
        .div_ceil(8);
    let expected = row_bytes.checked_mul(height as usize).ok_or_else(too_large)?;
    let samples = per_row.checked_mul(height as usize).ok_or_else(too_large)?;
    if data.len() < expected {
        return Err(ConvertError::ImageDecode(format!(
            "sample data too short: {} bytes (expected {})",
            data.len(),
            expected
        )));
    }

    if bpc == 8 {
        return Ok(data[..expected].to_vec());
    }

    let max = (1u32 << bpc.min(8)) - 1;
    let mut out = Vec::with_capacity(samples);
    for row in data[..expected].chunks(row_bytes) {
        for i in 0..per_row {
            let value = match bpc {
                16 => row[i * 2] as u32,
                _ => {
                    let bit = i * bpc as usize;
                    let shift = 8 - bpc as usize - (bit % 8);
                    (row[bit / 8] as u32 >> shift) & max
                }
            };
            let value = if scale && bpc < 8 {
                value * 255 / max
            } else {
                value
            };
            out.push(value as u8);
        }
    }
    Ok(out)
}

/// Invert each component whose `/Decode` range runs high to low, such as
/// `[1 0]` on a gray image or stencil mask.
fn apply_decode_array(doc: &Document, dict: &Dictionary, samples: &mut [u8], components: usize) {
    let ranges = match dict.get(b"Decode").ok().map(|obj| pdf::resolve(doc, obj)) {
        Some(Ok(Object::Array(items))) => items,
        _ => return,
    };
    let bounds: Vec<f32> = ranges
        .iter()
        .filter_map(|item| match item {
            Object::Integer(i) => Some(*i as f32),
            Object::Real(r) => Some(*r as f32),
            _ => None,
        })
        .collect();
    let inverted: Vec<bool> = bounds
        .chunks_exact(2)
        .take(components)
        .map(|pair| pair[0] > pair[1])
        .collect();
    if inverted.len() != components || !inverted.contains(&true) {
        return;
    }
    for pixel in samples.chunks_mut(components) {
        for (value, &flip) in pixel.iter_mut().zip(&inverted) {
            if flip {
                *value = 255 - *value;
            }
        }
    }
}

fn expand_indexed(indices: &[u8], base: &ColorModel, lookup: &[u8]) -> Vec<u8> {
    let n = base.components();
    let mut out = Vec::with_capacity(indices.len() * n);
    for &index in indices {
        let start = index as usize * n;
        for c in 0..n {
            out.push(lookup.get(start + c).copied().unwrap_or(0));
        }
    }
    out
}

fn to_dynamic(pixels: Vec<u8>, width: u32, height: u32, model: &ColorModel) -> Result<DynamicImage> {
    let img = match model {
        ColorModel::Gray => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        ColorModel::Rgb => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        ColorModel::Cmyk => {
            RgbImage::from_raw(width, height, cmyk_to_rgb(&pixels)).map(DynamicImage::ImageRgb8)
        }
        ColorModel::Indexed { .. } => None,
    };
    img.ok_or_else(|| {
        ConvertError::ImageDecode(format!("cannot build {:?} image of {}x{}", model, width, height))
    })
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(cmyk.len() / 4 * 3);
    for chunk in cmyk.chunks_exact(4) {
        let k = 1.0 - chunk[3] as f32 / 255.0;
        for &ink in &chunk[..3] {
            rgb.push(((1.0 - ink as f32 / 255.0) * k * 255.0) as u8);
        }
    }
    rgb
}
