//! Image preprocessing for model input.
//!
//! Normalizes an uploaded diagnostic image (DICOM or raster) to the fixed
//! single-channel tensor the inference backends consume: 224x224, intensities
//! min-max scaled to [0,1]. Resizing uses bilinear (Triangle) filtering so
//! repeated runs over the same bytes are bit-identical.

use image::imageops::FilterType;
use image::{ImageBuffer, Luma};
use ndarray::Array2;
use thiserror::Error;

/// Square input dimension expected by the vision classifier.
pub const MODEL_INPUT_SIZE: u32 = 224;

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Smallest input worth attempting to decode.
const MIN_IMAGE_BYTES: usize = 16;

/// Guard against a zero denominator on flat images.
pub(crate) const NORM_EPSILON: f32 = 1e-6;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image decode failed: {0}")]
    Decode(String),
}

/// Recognized source encodings for diagnostic uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Dicom,
    Png,
    Jpeg,
}

/// A decoded, normalized, fixed-size grayscale image.
///
/// `pixels` is row-major `[height, width]` with every value in [0,1].
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub pixels: Array2<f32>,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.pixels.dim().1 as u32
    }

    pub fn height(&self) -> u32 {
        self.pixels.dim().0 as u32
    }
}

/// Decode and normalize an uploaded image to model input.
///
/// `format_hint` is the original filename (or extension); it only matters
/// when the byte signature is ambiguous.
pub fn prepare(bytes: &[u8], format_hint: Option<&str>) -> Result<NormalizedImage, PreprocessError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(PreprocessError::Decode(format!(
            "input too small to be an image ({} bytes)",
            bytes.len()
        )));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PreprocessError::Decode(format!(
            "input exceeds {} MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }

    let format = detect_format(bytes, format_hint)?;
    tracing::debug!("preparing {} byte upload as {:?}", bytes.len(), format);

    let raw = match format {
        SourceFormat::Dicom => super::dicom::decode(bytes)?,
        SourceFormat::Png => decode_raster(bytes, image::ImageFormat::Png)?,
        SourceFormat::Jpeg => decode_raster(bytes, image::ImageFormat::Jpeg)?,
    };

    let normalized = min_max_normalize(raw);
    let pixels = resize_to_square(normalized, MODEL_INPUT_SIZE)?;
    Ok(NormalizedImage { pixels })
}

/// Sniff the source format from byte signatures, falling back to the
/// filename extension.
pub fn detect_format(bytes: &[u8], hint: Option<&str>) -> Result<SourceFormat, PreprocessError> {
    // DICOM part-10: 128-byte preamble then "DICM".
    if bytes.len() > 132 && &bytes[128..132] == b"DICM" {
        return Ok(SourceFormat::Dicom);
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Ok(SourceFormat::Png);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Ok(SourceFormat::Jpeg);
    }

    let extension = hint
        .and_then(|name| name.rsplit('.').next())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("dcm") | Some("dicom") => Ok(SourceFormat::Dicom),
        Some("png") => Ok(SourceFormat::Png),
        Some("jpg") | Some("jpeg") => Ok(SourceFormat::Jpeg),
        Some(other) => Err(PreprocessError::UnsupportedFormat(format!(
            ".{other} (expected DICOM, PNG or JPEG)"
        ))),
        None => Err(PreprocessError::UnsupportedFormat(
            "unrecognized byte signature and no filename hint".into(),
        )),
    }
}

fn decode_raster(bytes: &[u8], format: image::ImageFormat) -> Result<Array2<f32>, PreprocessError> {
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| PreprocessError::Decode(e.to_string()))?;
    let gray = img.to_luma8();
    let (width, height) = gray.dimensions();

    let values: Vec<f32> = gray.pixels().map(|p| p.0[0] as f32).collect();
    Array2::from_shape_vec((height as usize, width as usize), values)
        .map_err(|e| PreprocessError::Decode(e.to_string()))
}

/// Scale intensities to [0,1]. Flat images (max == min) become all-zero
/// rather than dividing by zero.
pub(crate) fn min_max_normalize(mut pixels: Array2<f32>) -> Array2<f32> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in pixels.iter() {
        min = min.min(v);
        max = max.max(v);
    }
    if !min.is_finite() || !max.is_finite() {
        pixels.fill(0.0);
        return pixels;
    }
    let range = max - min + NORM_EPSILON;
    pixels.mapv_inplace(|v| (v - min) / range);
    pixels
}

fn resize_to_square(pixels: Array2<f32>, target: u32) -> Result<Array2<f32>, PreprocessError> {
    let (height, width) = pixels.dim();
    if height == 0 || width == 0 {
        return Err(PreprocessError::Decode("empty pixel matrix".into()));
    }
    if height as u32 == target && width as u32 == target {
        return Ok(pixels);
    }

    let raw: Vec<f32> = pixels.iter().copied().collect();
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(width as u32, height as u32, raw)
            .ok_or_else(|| PreprocessError::Decode("pixel buffer size mismatch".into()))?;

    let resized = image::imageops::resize(&buffer, target, target, FilterType::Triangle);
    Array2::from_shape_vec((target as usize, target as usize), resized.into_raw())
        .map_err(|e| PreprocessError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageOutputFormat};
    use std::io::Cursor;

    fn encode(img: GrayImage, format: ImageOutputFormat) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut cursor, format)
            .unwrap();
        cursor.into_inner()
    }

    fn gradient_image(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| image::Luma([((x + y) % 256) as u8]))
    }

    #[test]
    fn png_prepares_to_fixed_size_unit_range() {
        let bytes = encode(gradient_image(64, 48), ImageOutputFormat::Png);
        let prepared = prepare(&bytes, Some("scan.png")).unwrap();

        assert_eq!(prepared.width(), MODEL_INPUT_SIZE);
        assert_eq!(prepared.height(), MODEL_INPUT_SIZE);
        assert!(prepared.pixels.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn jpeg_prepares_to_fixed_size_unit_range() {
        let bytes = encode(gradient_image(300, 200), ImageOutputFormat::Jpeg(90));
        let prepared = prepare(&bytes, Some("scan.jpg")).unwrap();

        assert_eq!(prepared.width(), MODEL_INPUT_SIZE);
        assert_eq!(prepared.height(), MODEL_INPUT_SIZE);
        assert!(prepared.pixels.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn preparation_is_deterministic() {
        let bytes = encode(gradient_image(64, 64), ImageOutputFormat::Png);
        let a = prepare(&bytes, None).unwrap();
        let b = prepare(&bytes, None).unwrap();
        assert_eq!(a.pixels, b.pixels);
    }

    #[test]
    fn flat_image_normalizes_without_dividing_by_zero() {
        let flat = Array2::from_elem((8, 8), 42.0f32);
        let normalized = min_max_normalize(flat);
        assert!(normalized.iter().all(|&v| v.abs() < 1e-3));
    }

    #[test]
    fn unknown_bytes_are_unsupported() {
        let err = prepare(&[0u8; 64], Some("notes.txt")).unwrap_err();
        assert!(matches!(err, PreprocessError::UnsupportedFormat(_)));
    }

    #[test]
    fn unknown_bytes_without_hint_are_unsupported() {
        let err = prepare(&[7u8; 64], None).unwrap_err();
        assert!(matches!(err, PreprocessError::UnsupportedFormat(_)));
    }

    #[test]
    fn truncated_png_is_a_decode_error() {
        let mut bytes = encode(gradient_image(64, 64), ImageOutputFormat::Png);
        bytes.truncate(40);
        let err = prepare(&bytes, Some("scan.png")).unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }

    #[test]
    fn dcm_extension_routes_to_dicom_decoder() {
        // No DICM magic, but the extension says DICOM; the decoder then
        // rejects the garbage body.
        let err = prepare(&[0u8; 256], Some("scan.dcm")).unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }
}
