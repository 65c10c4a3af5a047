//! RAW decode adapter boundary.
//!
//! The demosaicing math lives in an external decoder library; this module
//! only defines the contract (bytes in, pixel grid + color-filter metadata
//! out) and performs the one piece of pixel work the engine owns: cropping
//! the decoded grid to the sensor's active area before handing it to the
//! caller.

use thiserror::Error;

/// Failure from the external RAW decoder.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The payload could not be parsed as the vendor RAW container.
    #[error("malformed RAW payload: {0}")]
    Malformed(String),
    /// The device format code is not handled by the decoder.
    #[error("unsupported RAW format code {0}")]
    UnsupportedFormat(i32),
}

/// Rectangle of photosensitive pixels within the full decoded grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveArea {
    /// Left edge, pixels.
    pub x: u32,
    /// Top edge, pixels.
    pub y: u32,
    /// Width, pixels.
    pub width: u32,
    /// Height, pixels.
    pub height: u32,
}

/// Decoder output: the full pixel grid plus calibration metadata.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Row-major `u16` samples, `width * height` long.
    pub pixels: Vec<u16>,
    /// Grid width in pixels.
    pub width: u32,
    /// Grid height in pixels.
    pub height: u32,
    /// Color-filter pattern string (e.g. "RGGB", or the 6x6 X-Trans layout).
    pub cfa_pattern: String,
    /// Pattern repeat width.
    pub pattern_width: u32,
    /// Pattern repeat height.
    pub pattern_height: u32,
    /// Photosensitive region within the grid.
    pub active_area: ActiveArea,
    /// Sensor black level.
    pub black_level: u16,
    /// Sensor white level.
    pub white_level: u16,
}

/// Black-box RAW decoder collaborator.
pub trait RawDecoder: Send + Sync {
    /// Decode a downloaded RAW payload into a pixel grid with metadata.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// Decoded grid cropped to the active area, ready for the caller's
/// metadata/packaging stage.
#[derive(Debug, Clone)]
pub struct CalibratedFrame {
    /// Row-major `u16` samples of the active area only.
    pub pixels: Vec<u16>,
    /// Active-area width.
    pub width: u32,
    /// Active-area height.
    pub height: u32,
    /// Color-filter pattern string.
    pub cfa_pattern: String,
    /// Pattern repeat width.
    pub pattern_width: u32,
    /// Pattern repeat height.
    pub pattern_height: u32,
    /// Sensor black level.
    pub black_level: u16,
    /// Sensor white level.
    pub white_level: u16,
}

/// Decode `bytes` and crop the grid to the decoder-reported active area.
pub fn decode_cropped(
    decoder: &dyn RawDecoder,
    bytes: &[u8],
) -> Result<CalibratedFrame, DecodeError> {
    let image = decoder.decode(bytes)?;
    let area = image.active_area;

    if u64::from(area.x) + u64::from(area.width) > u64::from(image.width)
        || u64::from(area.y) + u64::from(area.height) > u64::from(image.height)
        || image.pixels.len() != (image.width as usize) * (image.height as usize)
    {
        return Err(DecodeError::Malformed(format!(
            "active area {}x{}+{}+{} does not fit {}x{} grid",
            area.width, area.height, area.x, area.y, image.width, image.height
        )));
    }

    let mut pixels = Vec::with_capacity((area.width as usize) * (area.height as usize));
    for row in area.y..area.y + area.height {
        let start = (row as usize) * (image.width as usize) + area.x as usize;
        pixels.extend_from_slice(&image.pixels[start..start + area.width as usize]);
    }

    Ok(CalibratedFrame {
        pixels,
        width: area.width,
        height: area.height,
        cfa_pattern: image.cfa_pattern,
        pattern_width: image.pattern_width,
        pattern_height: image.pattern_height,
        black_level: image.black_level,
        white_level: image.white_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct GradientDecoder {
        active: ActiveArea,
    }

    impl RawDecoder for GradientDecoder {
        fn decode(&self, _bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
            let (w, h) = (4u32, 4u32);
            let pixels = (0..w * h).map(|i| i as u16).collect();
            Ok(DecodedImage {
                pixels,
                width: w,
                height: h,
                cfa_pattern: "RGGB".to_string(),
                pattern_width: 2,
                pattern_height: 2,
                active_area: self.active,
                black_level: 64,
                white_level: 16383,
            })
        }
    }

    #[test]
    fn test_crop_to_active_area() {
        let decoder = GradientDecoder {
            active: ActiveArea {
                x: 1,
                y: 1,
                width: 2,
                height: 2,
            },
        };
        let frame = decode_cropped(&decoder, &[]).unwrap();
        assert_eq!(frame.width, 2);
        assert_eq!(frame.height, 2);
        // rows 1..3, cols 1..3 of the 4x4 gradient
        assert_eq!(frame.pixels, vec![5, 6, 9, 10]);
        assert_eq!(frame.cfa_pattern, "RGGB");
    }

    #[test]
    fn test_oversized_active_area_is_rejected() {
        let decoder = GradientDecoder {
            active: ActiveArea {
                x: 2,
                y: 2,
                width: 3,
                height: 3,
            },
        };
        assert!(matches!(
            decode_cropped(&decoder, &[]),
            Err(DecodeError::Malformed(_))
        ));
    }
}
