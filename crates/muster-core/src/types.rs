//! Resource and pod-requirement types.
//!
//! These types describe what a job asks of a node: how much memory and
//! CPU it needs, which node labels it requires or prefers, and which
//! node taints it tolerates.

use std::collections::HashMap;
use std::ops::{AddAssign, SubAssign};

use serde::{Deserialize, Serialize};

/// A resource request or capacity.
///
/// Arithmetic saturates at zero so accounting bugs surface as wrong
/// totals rather than panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Memory in bytes.
    pub memory_bytes: u64,
    /// CPU in millicores (1000 = one core).
    pub cpu_millis: u64,
}

impl Resources {
    pub fn new(memory_bytes: u64, cpu_millis: u64) -> Self {
        Self {
            memory_bytes,
            cpu_millis,
        }
    }

    /// True if this request fits inside the given capacity.
    pub fn fits_within(&self, capacity: Resources) -> bool {
        self.memory_bytes <= capacity.memory_bytes && self.cpu_millis <= capacity.cpu_millis
    }

    /// True if both dimensions are zero.
    pub fn is_zero(&self) -> bool {
        self.memory_bytes == 0 && self.cpu_millis == 0
    }

    pub fn saturating_sub(self, other: Resources) -> Resources {
        Resources {
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, other: Resources) {
        self.memory_bytes = self.memory_bytes.saturating_add(other.memory_bytes);
        self.cpu_millis = self.cpu_millis.saturating_add(other.cpu_millis);
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, other: Resources) {
        self.memory_bytes = self.memory_bytes.saturating_sub(other.memory_bytes);
        self.cpu_millis = self.cpu_millis.saturating_sub(other.cpu_millis);
    }
}

/// Placement requirements for a single pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodRequirements {
    /// Resources requested per pod.
    pub resources: Resources,
    /// Required label matches (all must match).
    pub node_selector: HashMap<String, String>,
    /// Preferred label matches (soft affinity, breaks ties).
    pub affinity: HashMap<String, String>,
    /// Node taints this pod tolerates.
    pub tolerations: Vec<String>,
    /// Priority-class priority. Determines the highest level at which
    /// the node database may admit the pod; higher values may displace
    /// lower-priority allocations.
    pub priority_class_priority: i32,
}

impl PodRequirements {
    pub fn new(resources: Resources) -> Self {
        Self {
            resources,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority_class_priority: i32) -> Self {
        self.priority_class_priority = priority_class_priority;
        self
    }

    pub fn with_node_selector(mut self, key: &str, value: &str) -> Self {
        self.node_selector.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_affinity(mut self, key: &str, value: &str) -> Self {
        self.affinity.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_toleration(mut self, taint: &str) -> Self {
        self.tolerations.push(taint.to_string());
        self
    }
}
