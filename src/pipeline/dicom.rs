//! DICOM ingest for the preprocessing path.
//!
//! Only native (uncompressed, little-endian) pixel data is handled: modality
//! exports in the screening programs this serves are plain part-10 files.
//! Compressed transfer syntaxes are rejected as decode errors rather than
//! silently producing garbage intensities.

use dicom_object::from_reader;
use ndarray::Array2;

use super::preprocess::PreprocessError;

const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

const PREAMBLE_LEN: usize = 128;

/// Decode DICOM bytes to a raw intensity matrix `[rows, cols]`.
///
/// Applies RescaleSlope/RescaleIntercept (defaulting 1.0/0.0) and, when both
/// WindowCenter and WindowWidth are present, clips to the window. The result
/// is *not* normalized; the caller owns min-max scaling.
pub(crate) fn decode(bytes: &[u8]) -> Result<Array2<f32>, PreprocessError> {
    // Part-10 files carry a 128-byte preamble before the DICM magic; the
    // parser expects the stream to start at the magic itself.
    let stream = if bytes.len() > PREAMBLE_LEN + 4 && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] == b"DICM"
    {
        &bytes[PREAMBLE_LEN..]
    } else {
        bytes
    };

    let obj = from_reader(stream).map_err(|e| PreprocessError::Decode(format!("DICOM parse: {e}")))?;

    let transfer_syntax = obj.meta().transfer_syntax().trim_end_matches('\0');
    if transfer_syntax != IMPLICIT_VR_LE && transfer_syntax != EXPLICIT_VR_LE {
        return Err(PreprocessError::Decode(format!(
            "unsupported transfer syntax {transfer_syntax} (compressed pixel data)"
        )));
    }

    let rows = required_u32(&obj, "Rows")?;
    let cols = required_u32(&obj, "Columns")?;
    if rows == 0 || cols == 0 {
        return Err(PreprocessError::Decode("zero-sized pixel matrix".into()));
    }

    let bits_allocated = required_u32(&obj, "BitsAllocated")?;
    let signed = optional_f64(&obj, "PixelRepresentation").map(|v| v as u32) == Some(1);

    let data = obj
        .element_by_name("PixelData")
        .map_err(|e| PreprocessError::Decode(format!("missing PixelData: {e}")))?
        .to_bytes()
        .map_err(|e| PreprocessError::Decode(format!("PixelData read: {e}")))?;

    let pixel_count = (rows * cols) as usize;
    let mut values = match bits_allocated {
        8 => {
            if data.len() < pixel_count {
                return Err(PreprocessError::Decode("truncated 8-bit pixel data".into()));
            }
            data[..pixel_count].iter().map(|&b| b as f32).collect::<Vec<f32>>()
        }
        16 => {
            if data.len() < pixel_count * 2 {
                return Err(PreprocessError::Decode("truncated 16-bit pixel data".into()));
            }
            data[..pixel_count * 2]
                .chunks_exact(2)
                .map(|pair| {
                    let raw = [pair[0], pair[1]];
                    if signed {
                        i16::from_le_bytes(raw) as f32
                    } else {
                        u16::from_le_bytes(raw) as f32
                    }
                })
                .collect::<Vec<f32>>()
        }
        other => {
            return Err(PreprocessError::Decode(format!(
                "unsupported BitsAllocated: {other}"
            )))
        }
    };

    let slope = optional_f64(&obj, "RescaleSlope").unwrap_or(1.0) as f32;
    let intercept = optional_f64(&obj, "RescaleIntercept").unwrap_or(0.0) as f32;
    let window = match (
        optional_f64(&obj, "WindowCenter"),
        optional_f64(&obj, "WindowWidth"),
    ) {
        (Some(center), Some(width)) => Some((center as f32, width as f32)),
        _ => None,
    };
    rescale_and_window(&mut values, slope, intercept, window);

    Array2::from_shape_vec((rows as usize, cols as usize), values)
        .map_err(|e| PreprocessError::Decode(e.to_string()))
}

/// Modality LUT then windowing, in acquisition order: stored value ->
/// slope*v + intercept -> clip to center +/- width/2 when a window is set.
pub(crate) fn rescale_and_window(
    values: &mut [f32],
    slope: f32,
    intercept: f32,
    window: Option<(f32, f32)>,
) {
    for v in values.iter_mut() {
        *v = *v * slope + intercept;
    }
    if let Some((center, width)) = window {
        let lo = center - width / 2.0;
        let hi = center + width / 2.0;
        for v in values.iter_mut() {
            *v = v.clamp(lo, hi);
        }
    }
}

fn required_u32(
    obj: &dicom_object::DefaultDicomObject,
    name: &str,
) -> Result<u32, PreprocessError> {
    obj.element_by_name(name)
        .map_err(|e| PreprocessError::Decode(format!("missing {name}: {e}")))?
        .to_int::<u32>()
        .map_err(|e| PreprocessError::Decode(format!("bad {name}: {e}")))
}

fn optional_f64(obj: &dicom_object::DefaultDicomObject, name: &str) -> Option<f64> {
    obj.element_by_name(name)
        .ok()
        .and_then(|element| element.to_float64().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let err = decode(&[0u8; 256]).unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }

    #[test]
    fn rescale_defaults_are_identity() {
        let mut values = vec![0.0, 100.0, 4095.0];
        rescale_and_window(&mut values, 1.0, 0.0, None);
        assert_eq!(values, vec![0.0, 100.0, 4095.0]);
    }

    #[test]
    fn rescale_applies_slope_and_intercept() {
        // CT-style: HU = 1.0 * stored - 1024
        let mut values = vec![0.0, 1024.0, 2048.0];
        rescale_and_window(&mut values, 1.0, -1024.0, None);
        assert_eq!(values, vec![-1024.0, 0.0, 1024.0]);
    }

    #[test]
    fn window_clips_to_center_plus_minus_half_width() {
        let mut values = vec![-500.0, 0.0, 40.0, 500.0];
        rescale_and_window(&mut values, 1.0, 0.0, Some((40.0, 400.0)));
        assert_eq!(values, vec![-160.0, 0.0, 40.0, 240.0]);
    }
}
