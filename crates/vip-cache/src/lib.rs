#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod error;
pub mod group;
pub mod orchestrator;

pub use config::CacheConfig;
pub use error::{Error, ErrorKind, Result};
pub use group::{CacheGroup, Getter, GroupStats, PeerGetter, PeerPicker, StatsSnapshot};
pub use orchestrator::Orchestrator;
