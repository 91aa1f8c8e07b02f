#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod client;
mod config;
mod error;
pub mod store;

pub use client::{GetOutput, ObjectStoreClient};
pub use config::{S3Config, StorageBackend, StorageConfig};
pub use error::{Error, Result};
pub use store::{ImageStore, ObjectImageStore};

/// Tracing target for storage operations.
pub const TRACING_TARGET: &str = "vip_object::store";
