//! Scheduling-key fingerprints.
//!
//! A scheduling key is an opaque digest of everything that determines
//! whether a job fits on a node: its queue, priority, resource request,
//! selectors, affinities, and tolerations. Two jobs with equal keys are
//! interchangeable from the node database's point of view, so a key that
//! failed to schedule once can be skipped for the rest of the round.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::types::PodRequirements;

/// SHA-256 fingerprint of a job's scheduling requirements.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulingKey([u8; 32]);

impl SchedulingKey {
    /// Compute the key for a job in the given queue.
    ///
    /// Map entries are hashed in sorted order so the key never depends
    /// on hash-map iteration order.
    pub fn of(queue: &str, reqs: &PodRequirements) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(queue.as_bytes());
        hasher.update(reqs.priority_class_priority.to_le_bytes());
        hasher.update(reqs.resources.memory_bytes.to_le_bytes());
        hasher.update(reqs.resources.cpu_millis.to_le_bytes());

        let mut selector: Vec<_> = reqs.node_selector.iter().collect();
        selector.sort();
        for (k, v) in selector {
            hasher.update(k.as_bytes());
            hasher.update([0]);
            hasher.update(v.as_bytes());
            hasher.update([0]);
        }

        let mut affinity: Vec<_> = reqs.affinity.iter().collect();
        affinity.sort();
        for (k, v) in affinity {
            hasher.update(k.as_bytes());
            hasher.update([1]);
            hasher.update(v.as_bytes());
            hasher.update([1]);
        }

        let mut tolerations = reqs.tolerations.clone();
        tolerations.sort();
        for t in tolerations {
            hasher.update(t.as_bytes());
            hasher.update([2]);
        }

        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for SchedulingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First eight bytes are plenty for log output.
        write!(f, "SchedulingKey(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "…)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resources;

    fn reqs() -> PodRequirements {
        PodRequirements::new(Resources::new(1024, 500))
            .with_priority(3)
            .with_node_selector("zone", "a")
            .with_toleration("gpu")
    }

    #[test]
    fn equal_requirements_produce_equal_keys() {
        assert_eq!(
            SchedulingKey::of("batch", &reqs()),
            SchedulingKey::of("batch", &reqs())
        );
    }

    #[test]
    fn queue_is_part_of_the_key() {
        assert_ne!(
            SchedulingKey::of("batch", &reqs()),
            SchedulingKey::of("interactive", &reqs())
        );
    }

    #[test]
    fn selector_changes_the_key() {
        let other = reqs().with_node_selector("zone", "b");
        assert_ne!(
            SchedulingKey::of("batch", &reqs()),
            SchedulingKey::of("batch", &other)
        );
    }

    #[test]
    fn selector_insertion_order_does_not_matter() {
        let a = PodRequirements::new(Resources::new(1, 1))
            .with_node_selector("x", "1")
            .with_node_selector("y", "2");
        let b = PodRequirements::new(Resources::new(1, 1))
            .with_node_selector("y", "2")
            .with_node_selector("x", "1");
        assert_eq!(SchedulingKey::of("q", &a), SchedulingKey::of("q", &b));
    }
}
