#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod error;
pub mod queue;
pub mod warmup;

pub use config::QueueConfig;
pub use error::{Error, Result};
pub use queue::{Job, JobQueue};
pub use warmup::WarmupJob;
