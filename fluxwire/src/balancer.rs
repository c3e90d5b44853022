//! Producer partition selection

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use murmur2::{murmur2, KAFKA_SEED};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Strategy used by a writer to pick the partition of a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Balancer {
    /// Cycle through partitions
    #[default]
    RoundRobin,
    /// FNV-1a of the key modulo the partition count
    Hash,
    /// Same placement as the Java client's default partitioner
    Murmur2,
    /// Partition that received the fewest bytes from this writer so far
    LeastBytes,
}

/// FNV-1a, 32-bit
pub fn fnv1a(key: &[u8]) -> u32 {
    let mut hash = 2166136261u32;
    for byte in key {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Index into a list of `count` partitions chosen the way the Java client does
pub fn murmur2_index(key: &[u8], count: usize) -> usize {
    (murmur2(key, KAFKA_SEED) & 0x7fff_ffff) as usize % count
}

/// A balancer plus the state it needs; one per writer
#[derive(Debug)]
pub struct PartitionSelector {
    balancer: Balancer,
    next: AtomicUsize,
    bytes: Mutex<HashMap<(String, i32), u64>>,
}

impl PartitionSelector {
    pub fn new(balancer: Balancer) -> Self {
        Self {
            balancer,
            next: AtomicUsize::new(0),
            bytes: Mutex::new(HashMap::new()),
        }
    }

    pub fn balancer(&self) -> Balancer {
        self.balancer
    }

    /// Pick one of `topic`'s `partitions` for a message of `size` bytes.
    ///
    /// Keyless messages fall back to round-robin under the hash balancers.
    /// Returns `None` when `partitions` is empty.
    pub fn select(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        size: usize,
        partitions: &[i32],
    ) -> Option<i32> {
        if partitions.is_empty() {
            return None;
        }
        let index = match (self.balancer, key) {
            (Balancer::Hash, Some(key)) => fnv1a(key) as usize % partitions.len(),
            (Balancer::Murmur2, Some(key)) => murmur2_index(key, partitions.len()),
            (Balancer::LeastBytes, _) => return Some(self.least_bytes(topic, size, partitions)),
            _ => self.next.fetch_add(1, Ordering::Relaxed) % partitions.len(),
        };
        Some(partitions[index])
    }

    /// Byte counts are tracked per topic so partition ids never collide
    fn least_bytes(&self, topic: &str, size: usize, partitions: &[i32]) -> i32 {
        let mut bytes = self.bytes.lock();
        let chosen = partitions
            .iter()
            .copied()
            .min_by_key(|p| {
                let sent = bytes.get(&(topic.to_string(), *p)).copied().unwrap_or(0);
                (sent, *p)
            })
            .unwrap_or(partitions[0]);
        *bytes.entry((topic.to_string(), chosen)).or_insert(0) += size as u64;
        chosen
    }
}
