//! Proportional resize, centered square crop, and GIF flattening.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use super::{Encoded, TRACING_TARGET, is_supported};
use crate::{Error, Result};

/// Quality used when re-encoding JPEG derivatives.
const JPEG_QUALITY: u8 = 95;

const FILTER: FilterType = FilterType::Lanczos3;

/// Output dimensions for a source of `src_width` x `src_height`.
///
/// With `crop` the result is a square whose side never exceeds the shorter
/// source edge; width `0` selects that edge. Without `crop` the height is
/// scaled proportionally and rounded half-up.
pub fn target_dimensions(src_width: u32, src_height: u32, width: u32, crop: bool) -> (u32, u32) {
    let shorter = src_width.min(src_height);
    if crop {
        let side = if width == 0 { shorter } else { width.min(shorter) };
        return (side, side);
    }
    if width == 0 || src_width == 0 {
        return (src_width, src_height);
    }

    let (x, y, w) = (u64::from(src_width), u64::from(src_height), u64::from(width));
    let height = (2 * y * w + x) / (2 * x);
    (width, u32::try_from(height).unwrap_or(u32::MAX).max(1))
}

/// Resizes a decoded image.
pub fn resize_image(image: &DynamicImage, width: u32, crop: bool) -> DynamicImage {
    let (w, h) = target_dimensions(image.width(), image.height(), width, crop);
    if (w, h) == (image.width(), image.height()) {
        return image.clone();
    }
    if crop {
        image.resize_to_fill(w, h, FILTER)
    } else {
        image.resize_exact(w, h, FILTER)
    }
}

/// Decodes `data`, resizes it, and re-encodes it in its source format.
///
/// Only JPEG, PNG, TIFF, and BMP sources are accepted.
pub fn resize(data: &[u8], width: u32, crop: bool) -> Result<Encoded> {
    let format = image::guess_format(data).map_err(Error::decode)?;
    if !is_supported(format) {
        return Err(Error::unsupported_format(format_name(format)));
    }

    let source = image::load_from_memory_with_format(data, format).map_err(Error::decode)?;
    let resized = resize_image(&source, width, crop);
    let encoded = encode(&resized, format)?;

    tracing::debug!(
        target: TRACING_TARGET,
        format = format_name(format),
        src_width = source.width(),
        src_height = source.height(),
        width = encoded.width,
        height = encoded.height,
        size = encoded.data.len(),
        "resized image"
    );

    Ok(encoded)
}

/// Flattens a GIF to its first frame as PNG, then resizes it.
///
/// The result is always a single static PNG frame.
pub fn resize_animated(data: &[u8], width: u32, crop: bool) -> Result<Encoded> {
    let format = image::guess_format(data).map_err(Error::decode)?;
    if format != ImageFormat::Gif {
        return Err(Error::unsupported_format(format_name(format)));
    }

    let frame = image::load_from_memory_with_format(data, format).map_err(Error::decode)?;
    let flattened = encode(&frame, ImageFormat::Png)?;

    tracing::debug!(
        target: TRACING_TARGET,
        width = flattened.width,
        height = flattened.height,
        "flattened gif to png"
    );

    resize(&flattened.data, width, crop)
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Encoded> {
    let mut buf = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
            let rgb = match image {
                DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.clone(),
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            };
            rgb.write_with_encoder(encoder).map_err(Error::encode)?;
        }
        other => {
            image
                .write_to(&mut Cursor::new(&mut buf), other)
                .map_err(Error::encode)?;
        }
    }

    Ok(Encoded {
        data: Bytes::from(buf),
        format,
        width: image.width(),
        height: image.height(),
    })
}

fn format_name(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| (*ext).to_owned())
        .unwrap_or_else(|| format!("{format:?}").to_lowercase())
}
