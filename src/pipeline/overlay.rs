//! Heatmap presentation: colorize the class activation map and blend it over
//! the source image.
//!
//! Output contract: PNG bytes at the source image's dimensions, blended
//! 60/40 (source/heatmap), every channel clamped to [0,1] before the final
//! byte quantization. The whole path is deterministic.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageOutputFormat, RgbImage};
use ndarray::Array2;

use super::gradcam::ExplainError;
use super::preprocess::NormalizedImage;

/// Source/heatmap blend split.
const SOURCE_WEIGHT: f32 = 0.6;
const HEATMAP_WEIGHT: f32 = 0.4;

/// Render the activation map over the source image as PNG bytes.
pub fn render(source: &NormalizedImage, cam: &Array2<f32>) -> Result<Vec<u8>, ExplainError> {
    let (cam_height, cam_width) = cam.dim();
    if cam_height == 0 || cam_width == 0 {
        return Err(ExplainError::ActivationNotCaptured);
    }

    let width = source.width();
    let height = source.height();

    // Quantize the [0,1] map and bring it up to source resolution.
    let cam_gray = GrayImage::from_fn(cam_width as u32, cam_height as u32, |x, y| {
        let v = cam[[y as usize, x as usize]].clamp(0.0, 1.0);
        image::Luma([(v * 255.0).round() as u8])
    });
    let cam_resized = image::imageops::resize(&cam_gray, width, height, FilterType::Triangle);

    let mut blended = RgbImage::new(width, height);
    for (x, y, pixel) in blended.enumerate_pixels_mut() {
        let gray = source.pixels[[y as usize, x as usize]].clamp(0.0, 1.0);
        let heat = jet(cam_resized.get_pixel(x, y).0[0]);
        let mut channels = [0u8; 3];
        for (c, slot) in channels.iter_mut().enumerate() {
            let value = (SOURCE_WEIGHT * gray + HEATMAP_WEIGHT * heat[c]).clamp(0.0, 1.0);
            *slot = (value * 255.0).round() as u8;
        }
        *pixel = image::Rgb(channels);
    }

    encode_png(&blended)
}

/// Jet color map: byte intensity -> RGB in [0,1].
fn jet(value: u8) -> [f32; 3] {
    let t = value as f32 / 255.0;
    let r = (1.5 - (4.0 * t - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * t - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * t - 1.0).abs()).clamp(0.0, 1.0);
    [r, g, b]
}

fn encode_png(img: &RgbImage) -> Result<Vec<u8>, ExplainError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExplainError::Encode(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess::MODEL_INPUT_SIZE;
    use ndarray::Array2;

    fn source() -> NormalizedImage {
        let size = MODEL_INPUT_SIZE as usize;
        NormalizedImage {
            pixels: Array2::from_shape_fn((size, size), |(y, x)| {
                ((x + y) % 64) as f32 / 63.0
            }),
        }
    }

    #[test]
    fn overlay_matches_source_dimensions() {
        let cam = Array2::from_elem((7, 7), 0.5f32);
        let png = render(&source(), &cam).unwrap();

        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.to_rgb8().dimensions(), (MODEL_INPUT_SIZE, MODEL_INPUT_SIZE));
    }

    #[test]
    fn overlay_is_deterministic() {
        let cam = Array2::from_shape_fn((7, 7), |(y, x)| (x as f32 + y as f32) / 12.0);
        let src = source();
        assert_eq!(render(&src, &cam).unwrap(), render(&src, &cam).unwrap());
    }

    #[test]
    fn empty_map_is_rejected() {
        let cam = Array2::<f32>::zeros((0, 0));
        let err = render(&source(), &cam).unwrap_err();
        assert!(matches!(err, ExplainError::ActivationNotCaptured));
    }

    #[test]
    fn jet_endpoints_are_blue_and_red() {
        let [r0, _, b0] = jet(0);
        assert!(b0 > 0.4 && r0 == 0.0, "low end should be blue");
        let [r1, _, b1] = jet(255);
        assert!(r1 > 0.4 && b1 == 0.0, "high end should be red");
    }
}
