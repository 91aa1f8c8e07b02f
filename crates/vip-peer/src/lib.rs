#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod client;
mod config;
pub mod discovery;
mod error;
pub mod handler;
pub mod pool;
pub mod ring;
mod topology;

pub use client::{ControlClient, HttpPeer};
pub use config::{DEFAULT_CLUSTER_TAG, DiscoveryKind, PeerConfig, PeerMode};
pub use discovery::{Discovery, StaticDiscovery};
pub use error::{Error, Result};
pub use pool::{CachePool, ClusteredPool, ContextHook, StandalonePool, default_context};
pub use ring::HashRing;
pub use topology::{Topology, member_url};
