#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;
pub mod key;
pub mod transform;

pub use error::{Error, Result};
pub use key::{DEFAULT_MAX_WIDTH, DerivativeRequest, derivative_key};
pub use transform::{
    Encoded, detect_rotation, is_animated, normalize_upload, resize, resize_animated,
    sniff_content_type,
};
