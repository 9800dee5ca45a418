//! Rescale every page of an existing PDF to a fixed width.
//!
//! Page content is never decoded. Each page gets a new leading content stream
//! carrying the scale matrix, and its MediaBox/CropBox are replaced.

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info, instrument};

use crate::geometry::{self, PageTransform};
use crate::pdf;
use crate::report::{ProgressSink, RunReport, Tracker, UnitRef};
use crate::{ConvertError, ResizeOptions, Result};

/// Everything needed to rewrite one page, computed before touching it.
struct PagePlan {
    transform: PageTransform,
    prefix: Option<Vec<u8>>,
    existing: Vec<Object>,
}

/// Resize all pages of `doc` in place.
///
/// A page that cannot be resized is reported to `sink` and left exactly as it
/// was. Only a top-level problem, such as invalid options, returns `Err`.
#[instrument(skip_all, fields(target_width = options.target_width))]
pub fn resize_pages(
    doc: &mut Document,
    options: &ResizeOptions,
    sink: &mut dyn ProgressSink,
) -> Result<RunReport> {
    options.validate()?;

    let pages = doc.get_pages();
    let mut tracker = Tracker::new(sink, pages.len());

    for (index, (&page_no, &page_id)) in pages.iter().enumerate() {
        let result = plan_page(doc, page_no, page_id, options.target_width)
            .and_then(|plan| apply_plan(doc, page_id, plan));
        match result {
            Ok(()) => tracker.produced(1),
            Err(err) => tracker.fail(UnitRef::Page(page_no), &err),
        }
        tracker.step(index + 1);
    }

    if options.compress_streams {
        doc.compress();
    }

    let report = tracker.finish();
    info!(
        pages = report.total_units,
        resized = report.produced,
        failed = report.failures.len(),
        "resize finished"
    );
    Ok(report)
}

fn plan_page(doc: &Document, page_no: u32, page_id: ObjectId, target_width: f32) -> Result<PagePlan> {
    let original = pdf::media_box(doc, page_id).ok_or(ConvertError::MissingPageBox(page_no))?;
    let transform = geometry::compute(original, target_width);
    debug!(page = page_no, ?original, new_box = ?transform.new_box, "computed transform");

    let page = doc.get_dictionary(page_id)?;
    let existing = existing_contents(doc, page)?;

    let prefix = if transform.is_identity() {
        None
    } else {
        let content = Content {
            operations: vec![transform.to_operation()],
        };
        Some(content.encode()?)
    };

    Ok(PagePlan {
        transform,
        prefix,
        existing,
    })
}

/// The page's content streams as a flat list of references, in order.
fn existing_contents(doc: &Document, page: &Dictionary) -> Result<Vec<Object>> {
    let contents = match page.get(b"Contents") {
        Ok(c) => c,
        Err(_) => return Ok(Vec::new()),
    };
    match contents {
        Object::Reference(id) => match doc.get_object(*id)? {
            // an indirect array of streams
            Object::Array(items) => Ok(items.clone()),
            Object::Stream(_) => Ok(vec![contents.clone()]),
            _ => Err(ConvertError::Malformed(
                "page Contents is neither a stream nor an array".to_string(),
            )),
        },
        Object::Array(items) => Ok(items.clone()),
        Object::Null => Ok(Vec::new()),
        _ => Err(ConvertError::Malformed(
            "page Contents must be an indirect stream or an array".to_string(),
        )),
    }
}

fn apply_plan(doc: &mut Document, page_id: ObjectId, plan: PagePlan) -> Result<()> {
    let PagePlan {
        transform,
        prefix,
        existing,
    } = plan;

    let contents = match prefix {
        Some(data) => {
            let prefix_id = doc.add_object(Stream::new(Dictionary::new(), data));
            let mut contents = Vec::with_capacity(existing.len() + 1);
            contents.push(Object::Reference(prefix_id));
            contents.extend(existing);
            Some(contents)
        }
        None => None,
    };

    let page = match doc.get_object_mut(page_id)? {
        Object::Dictionary(d) => d,
        _ => return Err(ConvertError::Malformed("page is not a dictionary".to_string())),
    };
    page.set("MediaBox", transform.new_box.to_pdf_array());
    page.set("CropBox", transform.new_box.to_pdf_array());
    if let Some(contents) = contents {
        page.set("Contents", Object::Array(contents));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PageBox;
    use crate::report::Outcome;
    use lopdf::content::Operation;

    /// Build a document with one page per entry. `None` leaves the MediaBox out.
    fn build_doc(boxes: &[Option<[f32; 4]>]) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();

        for media_box in boxes {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
            let mut page = Dictionary::new();
            page.set("Type", Object::Name(b"Page".to_vec()));
            page.set("Parent", Object::Reference(pages_id));
            page.set("Contents", Object::Reference(content_id));
            if let Some(b) = media_box {
                page.set(
                    "MediaBox",
                    Object::Array(b.iter().map(|v| Object::Real(*v)).collect()),
                );
            }
            kids.push(Object::Reference(doc.add_object(page)));
        }

        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(kids.len() as i64));
        pages.set("Kids", Object::Array(kids));
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object({
            let mut c = Dictionary::new();
            c.set("Type", Object::Name(b"Catalog".to_vec()));
            c.set("Pages", Object::Reference(pages_id));
            c
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc
    }

    fn uncompressed() -> ResizeOptions {
        ResizeOptions {
            compress_streams: false,
            ..ResizeOptions::default()
        }
    }

    #[test]
    fn every_page_gets_target_width() {
        let mut doc = build_doc(&[
            Some([0.0, 0.0, 612.0, 792.0]),
            Some([0.0, 0.0, 1190.0, 842.0]),
            Some([0.0, 0.0, 300.0, 300.0]),
        ]);
        let report = resize_pages(&mut doc, &uncompressed(), &mut ()).unwrap();
        assert_eq!(report.outcome(), Outcome::Complete);
        assert_eq!(report.produced, 3);

        for (_, page_id) in doc.get_pages() {
            let mb = pdf::media_box(&doc, page_id).unwrap();
            assert!((mb.width - 595.0).abs() < 1e-3, "width was {}", mb.width);
        }
        let first = pdf::media_box(&doc, doc.get_pages()[&1]).unwrap();
        assert!((first.height - 792.0 * 595.0 / 612.0).abs() < 1e-2);
    }

    #[test]
    fn matrix_runs_before_existing_content() {
        let mut doc = build_doc(&[Some([100.0, 50.0, 1290.0, 892.0])]);
        resize_pages(&mut doc, &uncompressed(), &mut ()).unwrap();

        let page_id = doc.get_pages()[&1];
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let ops: Vec<&str> = content.operations.iter().map(|o| o.operator.as_str()).collect();
        assert_eq!(ops, vec!["cm", "BT", "ET"]);

        let page = doc.get_dictionary(page_id).unwrap();
        let crop = match page.get(b"CropBox").unwrap() {
            Object::Array(a) => PageBox::from_pdf_array(a).unwrap(),
            other => panic!("unexpected CropBox {:?}", other),
        };
        assert_eq!(crop.x, 0.0);
        assert_eq!(crop.y, 0.0);
        assert!((crop.width - 595.0).abs() < 1e-3);
    }

    #[test]
    fn page_without_box_is_reported_and_left_alone() {
        let mut doc = build_doc(&[Some([0.0, 0.0, 612.0, 792.0]), None]);
        let second = doc.get_pages()[&2];
        let before = doc.get_dictionary(second).unwrap().clone();

        let report = resize_pages(&mut doc, &uncompressed(), &mut ()).unwrap();
        assert_eq!(report.outcome(), Outcome::Partial { failed: 1 });
        assert_eq!(report.failures[0].unit, UnitRef::Page(2));

        let after = doc.get_dictionary(second).unwrap();
        assert!(after.get(b"MediaBox").is_err());
        assert_eq!(format!("{:?}", after), format!("{:?}", before));
    }

    #[test]
    fn inherited_media_box_is_used() {
        let mut doc = build_doc(&[None]);
        let page_id = doc.get_pages()[&1];
        let pages_id = match doc.get_dictionary(page_id).unwrap().get(b"Parent").unwrap() {
            Object::Reference(id) => *id,
            other => panic!("unexpected Parent {:?}", other),
        };
        if let Ok(Object::Dictionary(pages)) = doc.get_object_mut(pages_id) {
            pages.set(
                "MediaBox",
                Object::Array(
                    [0, 0, 1190, 1684]
                        .iter()
                        .map(|v| Object::Integer(*v))
                        .collect(),
                ),
            );
        }
        let report = resize_pages(&mut doc, &uncompressed(), &mut ()).unwrap();
        assert_eq!(report.outcome(), Outcome::Complete);
        let mb = pdf::media_box(&doc, doc.get_pages()[&1]).unwrap();
        assert!((mb.height - 842.0).abs() < 1e-2);
    }

    #[test]
    fn progress_is_reported_per_page() {
        #[derive(Default)]
        struct Progress(Vec<f64>);
        impl ProgressSink for Progress {
            fn on_progress(&mut self, percent: f64) {
                self.0.push(percent);
            }
        }
        let mut doc = build_doc(&[Some([0.0, 0.0, 10.0, 10.0]), None]);
        let mut progress = Progress::default();
        resize_pages(&mut doc, &uncompressed(), &mut progress).unwrap();
        assert_eq!(progress.0, vec![50.0, 100.0]);
    }

    #[test]
    fn non_positive_target_width_is_fatal() {
        let mut doc = build_doc(&[Some([0.0, 0.0, 10.0, 10.0])]);
        let options = ResizeOptions {
            target_width: 0.0,
            ..ResizeOptions::default()
        };
        assert!(matches!(
            resize_pages(&mut doc, &options, &mut ()),
            Err(ConvertError::InvalidTargetWidth(_))
        ));
    }
}
