//! Image transform engine.
//!
//! All functions here are synchronous and CPU bound. Async callers should
//! run them on the blocking pool.

mod orientation;
mod resize;

use bytes::Bytes;
use image::ImageFormat;

pub use orientation::{apply_rotation, detect_rotation, normalize_upload};
pub use resize::{resize, resize_animated, resize_image, target_dimensions};

/// Tracing target for transform operations.
pub const TRACING_TARGET: &str = "vip_core::transform";

/// Formats the resize path can decode and re-encode.
pub const SUPPORTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
];

/// An encoded transform result.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Encoded image bytes.
    pub data: Bytes,
    /// Output format.
    pub format: ImageFormat,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

impl Encoded {
    /// MIME type of the encoded bytes.
    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Whether `format` is accepted by [`resize`].
pub fn is_supported(format: ImageFormat) -> bool {
    SUPPORTED_FORMATS.contains(&format)
}

/// Guesses the MIME type of encoded image bytes from their magic number.
pub fn sniff_content_type(data: &[u8]) -> Option<&'static str> {
    image::guess_format(data)
        .ok()
        .map(|format| format.to_mime_type())
}

/// Whether a stored content type marks a source that must be flattened
/// through [`resize_animated`] first.
pub fn is_animated(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("image/gif"))
}
