//! Orientation metadata and upload normalization.

use std::io::Cursor;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};

use super::TRACING_TARGET;
use crate::{Error, Result};

/// Returns the counter-clockwise rotation, in degrees, that turns the image
/// upright according to its embedded orientation tag.
///
/// Tag 6 maps to 270, tag 3 to 180, tag 8 to 90. Anything else, including a
/// missing or unreadable tag, maps to 0.
pub fn detect_rotation(data: &[u8]) -> u16 {
    match read_orientation(data) {
        Ok(Orientation::Rotate90) => 270,
        Ok(Orientation::Rotate180) => 180,
        Ok(Orientation::Rotate270) => 90,
        Ok(_) => 0,
        Err(err) => {
            tracing::debug!(
                target: TRACING_TARGET,
                error = %err,
                "orientation metadata unreadable, assuming upright"
            );
            0
        }
    }
}

fn read_orientation(data: &[u8]) -> image::ImageResult<Orientation> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_decoder()?;
    decoder.orientation()
}

/// Rotates `image` counter-clockwise by `angle` degrees.
///
/// Angles other than 90, 180, and 270 leave the image untouched.
pub fn apply_rotation(image: DynamicImage, angle: u16) -> DynamicImage {
    match angle {
        90 => image.rotate270(),
        180 => image.rotate180(),
        270 => image.rotate90(),
        _ => image,
    }
}

/// Decodes an upload and rotates it upright.
///
/// Stored originals are assumed to have gone through this once, so the
/// cache-miss path never looks at orientation again.
pub fn normalize_upload(data: &[u8]) -> Result<(DynamicImage, ImageFormat)> {
    let format = image::guess_format(data).map_err(Error::decode)?;
    let image = image::load_from_memory_with_format(data, format).map_err(Error::decode)?;
    let angle = detect_rotation(data);

    tracing::debug!(
        target: TRACING_TARGET,
        format = ?format,
        angle,
        width = image.width(),
        height = image.height(),
        "normalized upload"
    );

    Ok((apply_rotation(image, angle), format))
}
