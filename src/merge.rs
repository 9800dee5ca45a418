//! Merge a sequence of images into a PDF, one full-bleed page per image.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info, instrument};

use crate::codec::{encode_jpeg, has_alpha, is_grayscale, jpeg_components, zlib_compress};
use crate::geometry::{self, PageBox};
use crate::report::{ProgressSink, RunReport, Tracker, UnitRef};
use crate::{sniff, ConvertError, MergeOptions, Result};

/// Resource name of the image on every merged page.
const IMAGE_RESOURCE: &[u8] = b"Im1";

/// One image to place on its own page.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Memory { name: String, data: Vec<u8> },
}

impl ImageSource {
    /// Name used when reporting a failure for this image.
    pub fn display_name(&self) -> String {
        match self {
            ImageSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            ImageSource::Memory { name, .. } => name.clone(),
        }
    }

    fn read(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            ImageSource::Path(path) => Ok(Cow::Owned(std::fs::read(path)?)),
            ImageSource::Memory { data, .. } => Ok(Cow::Borrowed(data)),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

/// An encoded image ready to become a page: its XObject, optional soft mask,
/// and native pixel size.
struct PreparedImage {
    xobject: Stream,
    smask: Option<Stream>,
    width: u32,
    height: u32,
}

/// Build a new document with one page per decodable image, in input order.
///
/// Images that fail to read, decode or encode are reported to `sink` and
/// contribute no page. The returned document is always well formed, even when
/// it has no pages.
#[instrument(skip_all, fields(images = sources.len(), resize = options.resize))]
pub fn merge_images(
    sources: &[ImageSource],
    options: &MergeOptions,
    sink: &mut dyn ProgressSink,
) -> Result<(Document, RunReport)> {
    options.validate()?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(sources.len());
    let mut tracker = Tracker::new(sink, sources.len());

    for (index, source) in sources.iter().enumerate() {
        let name = source.display_name();
        let placed = source
            .read()
            .and_then(|bytes| prepare_image(&bytes, options))
            .and_then(|prepared| add_page(&mut doc, pages_id, prepared, options));

        match placed {
            Ok(page_id) => {
                debug!(image = %name, ?page_id, "placed image");
                kids.push(Object::Reference(page_id));
                tracker.produced(1);
            }
            Err(err) => tracker.fail(UnitRef::Item(name), &err),
        }
        tracker.step(index + 1);
    }

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(kids.len() as i64));
    pages.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    if options.compress_streams {
        doc.compress();
    }

    let report = tracker.finish();
    info!(
        pages = report.produced,
        failed = report.failures.len(),
        "merge finished"
    );
    Ok((doc, report))
}

/// Decode `bytes` and encode them as an image XObject.
fn prepare_image(bytes: &[u8], options: &MergeOptions) -> Result<PreparedImage> {
    let format = sniff::detect_format(bytes);
    let img = image::load_from_memory(bytes)?;
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(ConvertError::ImageDecode("image has no pixels".to_string()));
    }

    if format == Some(ImageFormat::Jpeg) {
        // Embed as-is when the viewer can paint the components directly.
        match jpeg_components(bytes) {
            Some(1) => return Ok(jpeg_passthrough(bytes, "DeviceGray", width, height)),
            Some(3) => return Ok(jpeg_passthrough(bytes, "DeviceRGB", width, height)),
            other => debug!(components = ?other, "re-encoding JPEG"),
        }
    }

    let alpha = has_alpha(&img);
    let xobject = match options.png_jpeg_quality {
        Some(quality) => {
            let jpeg = encode_jpeg(&img, quality)?;
            let color_space = if is_grayscale(&img) {
                "DeviceGray"
            } else {
                "DeviceRGB"
            };
            image_stream(jpeg, "DCTDecode", color_space, width, height)
        }
        None => lossless_stream(&img)?,
    };
    let smask = if alpha {
        Some(alpha_stream(&img)?)
    } else {
        None
    };

    Ok(PreparedImage {
        xobject,
        smask,
        width,
        height,
    })
}

fn jpeg_passthrough(bytes: &[u8], color_space: &str, width: u32, height: u32) -> PreparedImage {
    PreparedImage {
        xobject: image_stream(bytes.to_vec(), "DCTDecode", color_space, width, height),
        smask: None,
        width,
        height,
    }
}

fn image_stream(data: Vec<u8>, filter: &str, color_space: &str, width: u32, height: u32) -> Stream {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    Stream::new(dict, data)
}

/// Flate-compressed samples, gray or RGB, without alpha.
fn lossless_stream(img: &DynamicImage) -> Result<Stream> {
    let (width, height) = (img.width(), img.height());
    if is_grayscale(img) {
        let data = zlib_compress(img.to_luma8().as_raw())?;
        Ok(image_stream(data, "FlateDecode", "DeviceGray", width, height))
    } else {
        let data = zlib_compress(img.to_rgb8().as_raw())?;
        Ok(image_stream(data, "FlateDecode", "DeviceRGB", width, height))
    }
}

/// Soft mask carrying the alpha channel.
fn alpha_stream(img: &DynamicImage) -> Result<Stream> {
    let alpha: Vec<u8> = img.to_rgba8().pixels().map(|p| p.0[3]).collect();
    let data = zlib_compress(&alpha)?;
    Ok(image_stream(
        data,
        "FlateDecode",
        "DeviceGray",
        img.width(),
        img.height(),
    ))
}

/// Content stream painting the image over its native pixel rectangle,
/// preceded by the page-level resize matrix when there is one.
fn page_content(width: u32, height: u32, resize: Option<&geometry::PageTransform>) -> Result<Vec<u8>> {
    let mut operations = Vec::with_capacity(5);
    if let Some(transform) = resize {
        operations.push(transform.to_operation());
    }
    operations.push(Operation::new("q", vec![]));
    operations.push(Operation::new(
        "cm",
        vec![
            Object::Real(width as f32),
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(height as f32),
            Object::Integer(0),
            Object::Integer(0),
        ],
    ));
    operations.push(Operation::new(
        "Do",
        vec![Object::Name(IMAGE_RESOURCE.to_vec())],
    ));
    operations.push(Operation::new("Q", vec![]));
    Ok(Content { operations }.encode()?)
}

/// Add the image and a page showing it. Nothing is added on error.
fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    prepared: PreparedImage,
    options: &MergeOptions,
) -> Result<ObjectId> {
    let PreparedImage {
        mut xobject,
        smask,
        width,
        height,
    } = prepared;

    let native = PageBox::new(0.0, 0.0, width as f32, height as f32);
    let transform = options
        .resize
        .then(|| geometry::compute(native, options.target_width));
    let content = page_content(width, height, transform.as_ref())?;

    if let Some(smask) = smask {
        let smask_id = doc.add_object(smask);
        xobject.dict.set("SMask", Object::Reference(smask_id));
    }
    let image_id = doc.add_object(xobject);
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

    let mut xobjects = Dictionary::new();
    xobjects.set(IMAGE_RESOURCE.to_vec(), Object::Reference(image_id));
    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));

    let mut page = Dictionary::new();
    page.set("Type", Object::Name(b"Page".to_vec()));
    page.set("Parent", Object::Reference(pages_id));
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Reference(content_id));
    match transform {
        Some(t) => {
            page.set("MediaBox", t.new_box.to_pdf_array());
            page.set("CropBox", t.new_box.to_pdf_array());
        }
        None => page.set("MediaBox", native.to_pdf_array()),
    }

    Ok(doc.add_object(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Outcome;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([0, 128, 255]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 9, 9])));
        encode_jpeg(&img, 90).unwrap()
    }

    fn mem(name: &str, data: Vec<u8>) -> ImageSource {
        ImageSource::Memory {
            name: name.to_string(),
            data,
        }
    }

    fn page_media_box(doc: &Document, page_id: ObjectId) -> PageBox {
        crate::pdf::media_box(doc, page_id).unwrap()
    }

    #[test]
    fn one_page_per_image_at_native_size() {
        let sources = vec![mem("a.jpg", jpeg_bytes(40, 30)), mem("b.png", png_bytes(20, 50))];
        let (doc, report) = merge_images(&sources, &MergeOptions::default(), &mut ()).unwrap();

        assert_eq!(report.outcome(), Outcome::Complete);
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        assert_eq!(page_media_box(&doc, pages[&1]), PageBox::new(0.0, 0.0, 40.0, 30.0));
        assert_eq!(page_media_box(&doc, pages[&2]), PageBox::new(0.0, 0.0, 20.0, 50.0));
    }

    #[test]
    fn jpeg_input_is_embedded_unchanged() {
        let jpeg = jpeg_bytes(16, 16);
        let (doc, _) = merge_images(
            &[mem("x.jpg", jpeg.clone())],
            &MergeOptions::default(),
            &mut (),
        )
        .unwrap();
        let embedded = doc.objects.values().any(|o| match o {
            Object::Stream(s) => s.content == jpeg,
            _ => false,
        });
        assert!(embedded);
    }

    #[test]
    fn undecodable_image_is_reported_and_skipped() {
        let sources = vec![
            mem("a.png", png_bytes(10, 10)),
            mem("broken.png", b"not an image at all".to_vec()),
            mem("c.png", png_bytes(12, 12)),
        ];
        let (doc, report) = merge_images(&sources, &MergeOptions::default(), &mut ()).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
        assert_eq!(report.outcome(), Outcome::Partial { failed: 1 });
        assert_eq!(report.failures[0].unit, UnitRef::Item("broken.png".into()));
    }

    #[test]
    fn all_failures_still_yield_a_loadable_document() {
        let sources = vec![mem("x", vec![0; 8]), mem("y", vec![1; 8])];
        let (mut doc, report) = merge_images(&sources, &MergeOptions::default(), &mut ()).unwrap();
        assert_eq!(report.failures.len(), 2);
        let bytes = crate::pdf::document_bytes(&mut doc).unwrap();
        let reloaded = Document::load_mem(&bytes).unwrap();
        assert_eq!(reloaded.get_pages().len(), 0);
    }

    #[test]
    fn resize_sets_a4_width_boxes_and_leading_matrix() {
        let options = MergeOptions {
            resize: true,
            compress_streams: false,
            ..MergeOptions::default()
        };
        let (doc, _) = merge_images(&[mem("wide.png", png_bytes(1190, 100))], &options, &mut ()).unwrap();
        let page_id = doc.get_pages()[&1];
        let mb = page_media_box(&doc, page_id);
        assert!((mb.width - 595.0).abs() < 1e-3);
        assert!((mb.height - 50.0).abs() < 1e-3);

        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let ops: Vec<&str> = content.operations.iter().map(|o| o.operator.as_str()).collect();
        assert_eq!(ops, vec!["cm", "q", "cm", "Do", "Q"]);
    }

    #[test]
    fn alpha_png_gets_a_soft_mask() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 10]));
        let mut data = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .unwrap();
        let options = MergeOptions {
            png_jpeg_quality: None,
            ..MergeOptions::default()
        };
        let (doc, _) = merge_images(&[mem("a.png", data)], &options, &mut ()).unwrap();
        let has_smask = doc.objects.values().any(|o| match o {
            Object::Stream(s) => s.dict.get(b"SMask").is_ok(),
            _ => false,
        });
        assert!(has_smask);
    }

    #[test]
    fn progress_reaches_100_after_each_attempt() {
        #[derive(Default)]
        struct Progress(Vec<f64>);
        impl ProgressSink for Progress {
            fn on_progress(&mut self, percent: f64) {
                self.0.push(percent);
            }
        }
        let mut progress = Progress::default();
        let sources = vec![mem("a.png", png_bytes(2, 2)), mem("bad", vec![])];
        merge_images(&sources, &MergeOptions::default(), &mut progress).unwrap();
        assert_eq!(progress.0, vec![50.0, 100.0]);
    }

    #[test]
    fn invalid_quality_is_rejected_before_work() {
        let options = MergeOptions {
            png_jpeg_quality: Some(0),
            ..MergeOptions::default()
        };
        assert!(matches!(
            merge_images(&[], &options, &mut ()),
            Err(ConvertError::InvalidQuality(0))
        ));
    }
}
