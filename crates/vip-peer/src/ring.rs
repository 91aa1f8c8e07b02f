//! Consistent-hash ring.
//!
//! Each member is hashed onto the ring `replicas` times as `"{i}{member}"`
//! with SHA-256, keeping the first eight bytes as a big-endian `u64`. A key
//! belongs to the first point at or after its own hash, wrapping around.
//!
//! The ring is a pure function of its member set and replica count: order
//! and duplicates in the input do not matter.

use std::collections::BTreeSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Default virtual points per member.
pub const DEFAULT_REPLICAS: usize = 50;

/// Immutable consistent-hash ring over member addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRing {
    replicas: usize,
    members: Vec<Arc<str>>,
    points: Vec<(u64, Arc<str>)>,
}

impl HashRing {
    /// Builds a ring with `replicas` points per distinct member.
    pub fn new<I, S>(replicas: usize, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let replicas = replicas.max(1);
        let members: Vec<Arc<str>> = members
            .into_iter()
            .map(|member| member.as_ref().to_owned())
            .filter(|member| !member.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(Arc::from)
            .collect();

        let mut points: Vec<(u64, Arc<str>)> = members
            .iter()
            .flat_map(|member| {
                (0..replicas).map(move |i| {
                    let point = hash(format!("{i}{member}").as_bytes());
                    (point, Arc::clone(member))
                })
            })
            .collect();
        // Ties between members are broken by address so the order is total.
        points.sort_unstable();

        Self {
            replicas,
            members,
            points,
        }
    }

    /// Returns the owner of `key`, or `None` for an empty ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let h = hash(key.as_bytes());
        let idx = self.points.partition_point(|(point, _)| *point < h);
        let (_, member) = &self.points[idx % self.points.len()];
        Some(member.as_ref())
    }

    /// Distinct members in sorted order.
    pub fn members(&self) -> &[Arc<str>] {
        &self.members
    }

    /// Whether `member` is on the ring.
    pub fn contains(&self, member: &str) -> bool {
        self.members
            .binary_search_by(|probe| probe.as_ref().cmp(member))
            .is_ok()
    }

    /// Number of distinct members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the ring has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Virtual points per member.
    pub fn replicas(&self) -> usize {
        self.replicas
    }
}

fn hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
