//! Derivative addressing.
//!
//! A [`DerivativeRequest`] names one variant of a stored original. Its
//! [`derivative_key`](DerivativeRequest::derivative_key) is the storage path
//! of the cached variant inside the bucket, and its
//! [`cache_key`](DerivativeRequest::cache_key) scopes that path by bucket for
//! the distributed cache.

use std::fmt;

use crate::{Error, Result};

/// Widths above this are clamped unless configured otherwise.
pub const DEFAULT_MAX_WIDTH: u32 = 720;

const SIZE_MARKER: &str = "s";
const CROP_MARKER: &str = "c";

/// One requested variant of an original image.
///
/// `width == 0` without crop denotes the untouched original.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivativeRequest {
    bucket: String,
    image_id: String,
    width: u32,
    crop: bool,
}

impl DerivativeRequest {
    /// Builds a request, clamping `width` to `max_width`.
    ///
    /// Bucket and image id must be non-empty single path segments.
    pub fn new(
        bucket: impl Into<String>,
        image_id: impl Into<String>,
        width: u32,
        crop: bool,
        max_width: u32,
    ) -> Result<Self> {
        let bucket = bucket.into();
        let image_id = image_id.into();
        validate_segment("bucket", &bucket)?;
        validate_segment("image id", &image_id)?;

        Ok(Self {
            bucket,
            image_id,
            width: width.min(max_width),
            crop,
        })
    }

    /// Parses a bucket-scoped cache key produced by [`cache_key`](Self::cache_key).
    pub fn from_cache_key(key: &str) -> Result<Self> {
        let (bucket, rest) = key
            .split_once('/')
            .ok_or_else(|| Error::invalid_key(format!("missing bucket in '{key}'")))?;

        let segments: Vec<&str> = rest.split('/').collect();
        let (image_id, width, crop) = match segments.as_slice() {
            [id] => (*id, 0, false),
            [id, SIZE_MARKER, w] => (*id, parse_width(w)?, false),
            [id, CROP_MARKER, SIZE_MARKER, w] => (*id, parse_width(w)?, true),
            _ => return Err(Error::invalid_key(format!("unrecognized key '{key}'"))),
        };

        Self::new(bucket, image_id, width, crop, u32::MAX)
    }

    /// Returns the bucket that holds the original.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Returns the id of the original.
    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// Returns the clamped target width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns whether a centered square crop was requested.
    pub fn crop(&self) -> bool {
        self.crop
    }

    /// Whether this request asks for the original, unmodified.
    pub fn is_original(&self) -> bool {
        self.width == 0 && !self.crop
    }

    /// Storage path of this variant within its bucket.
    pub fn derivative_key(&self) -> String {
        derivative_key(&self.image_id, self.width, self.crop)
    }

    /// Memoization key for the distributed cache: `{bucket}/{derivative_key}`.
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.bucket, self.derivative_key())
    }
}

impl fmt::Display for DerivativeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Maps an image id, width, and crop flag to the canonical variant key.
///
/// A crop with width `0` yields `{id}/c/s/0`, the largest centered square.
pub fn derivative_key(image_id: &str, width: u32, crop: bool) -> String {
    match (width, crop) {
        (0, false) => image_id.to_owned(),
        (w, false) => format!("{image_id}/{SIZE_MARKER}/{w}"),
        (w, true) => format!("{image_id}/{CROP_MARKER}/{SIZE_MARKER}/{w}"),
    }
}

fn validate_segment(what: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_key(format!("{what} must not be empty")));
    }
    if value.contains('/') {
        return Err(Error::invalid_key(format!(
            "{what} '{value}' must not contain '/'"
        )));
    }
    Ok(())
}

fn parse_width(raw: &str) -> Result<u32> {
    raw.parse()
        .map_err(|_| Error::invalid_key(format!("invalid width '{raw}'")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn request(id: &str, width: u32, crop: bool) -> DerivativeRequest {
        DerivativeRequest::new("photos", id, width, crop, DEFAULT_MAX_WIDTH).unwrap()
    }

    #[test]
    fn key_scheme() {
        assert_eq!(derivative_key("abc", 0, false), "abc");
        assert_eq!(derivative_key("abc", 250, false), "abc/s/250");
        assert_eq!(derivative_key("abc", 250, true), "abc/c/s/250");
        assert_eq!(derivative_key("abc", 0, true), "abc/c/s/0");
    }

    #[test]
    fn width_is_clamped_before_keying() {
        let req = DerivativeRequest::new("photos", "abc", 5000, false, 720).unwrap();
        assert_eq!(req.width(), 720);
        assert_eq!(req.derivative_key(), "abc/s/720");
    }

    #[test]
    fn cache_key_is_bucket_scoped() {
        let req = request("abc", 250, true);
        assert_eq!(req.cache_key(), "photos/abc/c/s/250");
        assert_eq!(req.to_string(), req.cache_key());
    }

    #[test]
    fn keys_are_injective() {
        let mut seen = HashSet::new();
        for bucket in ["a", "b"] {
            for id in ["x", "y", "s", "c"] {
                for width in [0, 1, 250, 720] {
                    for crop in [false, true] {
                        let req =
                            DerivativeRequest::new(bucket, id, width, crop, DEFAULT_MAX_WIDTH)
                                .unwrap();
                        assert!(seen.insert(req.cache_key()), "collision for {req:?}");
                    }
                }
            }
        }
        assert_eq!(seen.len(), 2 * 4 * 4 * 2);
    }

    #[test]
    fn keys_are_deterministic() {
        assert_eq!(
            request("abc", 100, true).cache_key(),
            request("abc", 100, true).cache_key()
        );
    }

    #[test]
    fn cache_key_parses_back() {
        for (width, crop) in [(0, false), (250, false), (250, true), (0, true)] {
            let req = request("abc", width, crop);
            let parsed = DerivativeRequest::from_cache_key(&req.cache_key()).unwrap();
            assert_eq!(parsed, req);
        }
    }

    #[test]
    fn malformed_cache_keys_are_rejected() {
        for key in ["", "photos", "photos/", "photos/abc/s", "photos/abc/s/x", "photos/abc/z/1"] {
            assert!(
                DerivativeRequest::from_cache_key(key).is_err(),
                "accepted '{key}'"
            );
        }
    }

    #[test]
    fn segments_must_not_contain_slash() {
        assert!(DerivativeRequest::new("a/b", "x", 0, false, 720).is_err());
        assert!(DerivativeRequest::new("a", "x/s/1", 0, false, 720).is_err());
        assert!(DerivativeRequest::new("", "x", 0, false, 720).is_err());
    }

    #[test]
    fn original_detection() {
        assert!(request("abc", 0, false).is_original());
        assert!(!request("abc", 0, true).is_original());
        assert!(!request("abc", 10, false).is_original());
    }
}
