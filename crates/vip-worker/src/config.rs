//! Job queue configuration.

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

/// Intake capacity and worker count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct QueueConfig {
    /// Jobs that may wait for a worker before pushes block.
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-capacity", env = "VIP_QUEUE_CAPACITY", default_value_t = 100)
    )]
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Long-lived workers started with the queue.
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-workers", env = "VIP_QUEUE_WORKERS", default_value_t = 4)
    )]
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_capacity() -> usize {
    100
}

fn default_workers() -> usize {
    4
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            workers: default_workers(),
        }
    }
}
