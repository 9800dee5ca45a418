//! Raster encoding shared by merge and extraction.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::DynamicImage;

use crate::{ConvertError, Result};

/// Encode an image as a baseline JPEG.
///
/// Grayscale sources stay single-channel; everything else is flattened to RGB.
/// Alpha is dropped.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = (img.width(), img.height());
    let (w, h) = jpeg_dimensions(width, height)?;

    let mut jpeg_bytes = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
    if is_grayscale(img) {
        let luma = img.to_luma8();
        encoder.encode(luma.as_raw(), w, h, jpeg_encoder::ColorType::Luma)?;
    } else {
        encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
        let rgb = img.to_rgb8();
        encoder.encode(rgb.as_raw(), w, h, jpeg_encoder::ColorType::Rgb)?;
    }
    Ok(jpeg_bytes)
}

fn jpeg_dimensions(width: u32, height: u32) -> Result<(u16, u16)> {
    match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(ConvertError::ImageEncode(format!(
            "{}x{} is outside the JPEG size range",
            width, height
        ))),
    }
}

pub fn is_grayscale(img: &DynamicImage) -> bool {
    matches!(
        img,
        DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
    )
}

/// Check if an image has meaningful alpha
pub fn has_alpha(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    let rgba = img.to_rgba8();
    let sample_rate = std::cmp::max(1, rgba.pixels().len() / 10000);
    rgba.pixels().step_by(sample_rate).any(|p| p.0[3] < 255)
}

pub fn zlib_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Number of color components declared in a JPEG's frame header.
pub fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        // fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            return bytes.get(pos + 9).copied();
        }
        pos += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn rgb_jpeg_round_trips_through_image_crate() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([200, 10, 10])));
        let jpeg = encode_jpeg(&img, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(jpeg_components(&jpeg), Some(3));
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn gray_jpeg_stays_single_channel() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([128])));
        let jpeg = encode_jpeg(&img, 80).unwrap();
        assert_eq!(jpeg_components(&jpeg), Some(1));
    }

    #[test]
    fn alpha_detection_ignores_opaque_rgba() {
        let opaque = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 255])));
        let clear = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 0])));
        assert!(!has_alpha(&opaque));
        assert!(has_alpha(&clear));
    }

    #[test]
    fn components_of_non_jpeg_is_none() {
        assert_eq!(jpeg_components(b"\x89PNG\r\n\x1a\n"), None);
        assert_eq!(jpeg_components(&[]), None);
    }
}
