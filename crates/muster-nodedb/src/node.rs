//! A single node's capacity, labels, and priority-bucketed allocation.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use muster_core::Resources;

/// The best possible scheduled-at priority: admission at this level
/// displaced nothing.
pub const MIN_PRIORITY: i32 = 0;

/// One compute node in the fleet.
///
/// Allocations are bucketed by the priority-class priority of the
/// occupying pods. A pod admitted at level `p` may use capacity held
/// only by pods strictly below `p`; the level at which it first fits is
/// its scheduled-at priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub labels: HashMap<String, String>,
    pub taints: Vec<String>,
    /// Total capacity.
    pub total: Resources,
    /// Resources held per priority level.
    pub allocated: BTreeMap<i32, Resources>,
}

impl Node {
    pub fn new(id: &str, total: Resources) -> Self {
        Self {
            id: id.to_string(),
            labels: HashMap::new(),
            taints: Vec::new(),
            total,
            allocated: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_taint(mut self, taint: &str) -> Self {
        self.taints.push(taint.to_string());
        self
    }

    /// Capacity visible to a pod admitted at `priority`: everything not
    /// held at that level or above.
    pub fn allocatable_at(&self, priority: i32) -> Resources {
        let mut held = Resources::default();
        for (_, resources) in self.allocated.range(priority..) {
            held += *resources;
        }
        self.total.saturating_sub(held)
    }

    /// Record an allocation at the given priority level.
    pub fn allocate(&mut self, priority: i32, resources: Resources) {
        *self.allocated.entry(priority).or_default() += resources;
    }

    /// True if every taint on this node is tolerated.
    pub fn tolerated_by(&self, tolerations: &[String]) -> bool {
        self.taints.iter().all(|taint| tolerations.contains(taint))
    }

    /// True if every selector entry matches this node's labels.
    pub fn matches_selector(&self, selector: &HashMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|label| label == v))
    }

    /// Number of affinity entries this node's labels satisfy.
    pub fn affinity_matches(&self, affinity: &HashMap<String, String>) -> usize {
        affinity
            .iter()
            .filter(|(k, v)| self.labels.get(*k).is_some_and(|label| &label == v))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocatable_excludes_own_level_and_above() {
        let mut node = Node::new("n1", Resources::new(1000, 1000));
        node.allocate(0, Resources::new(400, 400));
        node.allocate(5, Resources::new(300, 300));

        // At level 0 everything allocated counts against capacity.
        assert_eq!(node.allocatable_at(0), Resources::new(300, 300));
        // At level 1 the level-0 allocation is displaceable.
        assert_eq!(node.allocatable_at(1), Resources::new(700, 700));
        // Above every allocation the full capacity is visible.
        assert_eq!(node.allocatable_at(6), Resources::new(1000, 1000));
    }

    #[test]
    fn selector_matching() {
        let node = Node::new("n1", Resources::new(1, 1)).with_label("zone", "a");
        let mut selector = HashMap::new();
        assert!(node.matches_selector(&selector));
        selector.insert("zone".to_string(), "a".to_string());
        assert!(node.matches_selector(&selector));
        selector.insert("zone".to_string(), "b".to_string());
        assert!(!node.matches_selector(&selector));
    }

    #[test]
    fn taints_require_toleration() {
        let node = Node::new("n1", Resources::new(1, 1)).with_taint("gpu-only");
        assert!(!node.tolerated_by(&[]));
        assert!(node.tolerated_by(&["gpu-only".to_string()]));
    }

    #[test]
    fn affinity_counts_matches() {
        let node = Node::new("n1", Resources::new(1, 1))
            .with_label("disk", "ssd")
            .with_label("arch", "arm64");
        let mut affinity = HashMap::new();
        affinity.insert("disk".to_string(), "ssd".to_string());
        affinity.insert("arch".to_string(), "amd64".to_string());
        assert_eq!(node.affinity_matches(&affinity), 1);
    }
}
