//! EC2 instance inventory discovery.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::{Filter, InstanceStateName};

use super::{Discovery, TRACING_TARGET, normalize};
use crate::{Error, Result};

/// Finds running instances that carry the cluster tag.
#[derive(Debug, Clone)]
pub struct Ec2Discovery {
    client: Client,
    tag_key: String,
    tag_value: String,
}

impl Ec2Discovery {
    /// Wraps an existing EC2 client.
    pub fn new(client: Client, tag_key: impl Into<String>, tag_value: impl Into<String>) -> Self {
        Self {
            client,
            tag_key: tag_key.into(),
            tag_value: tag_value.into(),
        }
    }

    /// Loads credentials from the environment and connects to `region`.
    pub async fn connect(region: &str, tag_key: &str, tag_value: &str) -> Self {
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;
        Self::new(Client::new(&shared_config), tag_key, tag_value)
    }
}

#[async_trait]
impl Discovery for Ec2Discovery {
    async fn discover(&self) -> Result<Vec<String>> {
        let tag = Filter::builder()
            .name(format!("tag:{}", self.tag_key))
            .values(&self.tag_value)
            .build();
        let running = Filter::builder()
            .name("instance-state-name")
            .values(InstanceStateName::Running.as_str())
            .build();

        let mut pages = self
            .client
            .describe_instances()
            .filters(tag)
            .filters(running)
            .into_paginator()
            .send();

        let mut addresses = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| Error::upstream("describe instances failed", err))?;
            let instances = page
                .reservations()
                .iter()
                .flat_map(|reservation| reservation.instances());
            for instance in instances {
                let running = instance
                    .state()
                    .and_then(|state| state.name())
                    .is_some_and(|name| *name == InstanceStateName::Running);
                if let (true, Some(ip)) = (running, instance.private_ip_address()) {
                    addresses.push(ip.to_owned());
                }
            }
        }

        let addresses = normalize(addresses.into_iter());
        tracing::info!(
            target: TRACING_TARGET,
            tag_key = %self.tag_key,
            tag_value = %self.tag_value,
            peers = ?addresses,
            "discovered ec2 peers"
        );
        Ok(addresses)
    }
}
