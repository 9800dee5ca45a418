//! Page geometry: rescaling a page box to a fixed width.

use lopdf::content::Operation;
use lopdf::Object;

/// ISO A4 portrait width in PDF points.
pub const A4_WIDTH_POINTS: f32 = 595.0;

/// A rectangle in PDF user space (1 unit = 1/72 inch).
///
/// Stored as origin plus extent; the origin need not be (0, 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PageBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        PageBox {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from a PDF rectangle `[llx lly urx ury]`.
    ///
    /// PDF allows any two opposite corners, so the coordinates are normalized.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        PageBox {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    /// Read a box from a four-number PDF array.
    pub fn from_pdf_array(values: &[Object]) -> Option<Self> {
        if values.len() != 4 {
            return None;
        }
        let mut nums = [0.0f32; 4];
        for (slot, value) in nums.iter_mut().zip(values) {
            *slot = match value {
                Object::Integer(n) => *n as f32,
                Object::Real(n) => *n,
                _ => return None,
            };
        }
        Some(PageBox::from_corners(nums[0], nums[1], nums[2], nums[3]))
    }

    /// The `[llx lly urx ury]` array stored in MediaBox/CropBox entries.
    pub fn to_pdf_array(&self) -> Object {
        Object::Array(vec![
            Object::Real(self.x),
            Object::Real(self.y),
            Object::Real(self.x + self.width),
            Object::Real(self.y + self.height),
        ])
    }
}

/// Affine transform `[a b c d e f]` plus the page box it produces.
///
/// Represents: | a b 0 |
///             | c d 0 |
///             | e f 1 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTransform {
    pub new_box: PageBox,
    pub scale_x: f32,
    pub skew_y: f32,
    pub skew_x: f32,
    pub scale_y: f32,
    pub shift_x: f32,
    pub shift_y: f32,
}

impl PageTransform {
    fn identity(page_box: PageBox) -> Self {
        PageTransform {
            new_box: page_box,
            scale_x: 1.0,
            skew_y: 0.0,
            skew_x: 0.0,
            scale_y: 1.0,
            shift_x: 0.0,
            shift_y: 0.0,
        }
    }

    pub fn matrix(&self) -> [f32; 6] {
        [
            self.scale_x,
            self.skew_y,
            self.skew_x,
            self.scale_y,
            self.shift_x,
            self.shift_y,
        ]
    }

    pub fn is_identity(&self) -> bool {
        self.matrix() == [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]
    }

    /// The `a b c d e f cm` operator that applies this transform.
    pub fn to_operation(&self) -> Operation {
        Operation::new(
            "cm",
            self.matrix().iter().map(|v| Object::Real(*v)).collect(),
        )
    }
}

/// Compute the transform that scales `original` to `target_width`.
///
/// Scaling is uniform, so the aspect ratio is kept. The translation undoes the
/// original lower-left offset in scaled units, which moves the new box to the
/// origin. A box with no width yields the identity and is returned unchanged.
pub fn compute(original: PageBox, target_width: f32) -> PageTransform {
    if original.width <= 0.0 || original.width.is_nan() {
        return PageTransform::identity(original);
    }

    let scale = target_width / original.width;
    let target_height = original.height * scale;

    PageTransform {
        new_box: PageBox::new(0.0, 0.0, target_width, target_height),
        scale_x: scale,
        skew_y: 0.0,
        skew_x: 0.0,
        scale_y: scale,
        shift_x: -original.x * scale,
        shift_y: -original.y * scale,
    }
}
