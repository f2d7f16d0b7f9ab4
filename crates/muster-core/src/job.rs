//! The job abstraction consumed by the scheduler.
//!
//! Schedulers never depend on a concrete job representation; they work
//! against the `SchedulerJob` trait. The `Job` struct is the in-tree
//! implementation used by queue repositories and tests.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::key::SchedulingKey;
use crate::types::PodRequirements;

/// Shared handle to a job.
pub type JobRef = Arc<dyn SchedulerJob>;

/// Capability set the scheduler requires of a job.
pub trait SchedulerJob: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    fn queue(&self) -> &str;

    /// Precomputed scheduling key, if the producer attached one.
    fn scheduling_key(&self) -> Option<SchedulingKey>;

    fn pod_requirements(&self) -> &PodRequirements;

    /// In-queue priority; smaller values schedule first.
    fn queue_priority(&self) -> u32;

    /// Submission time as a unix timestamp in seconds.
    fn submitted_at(&self) -> u64;

    /// Total order used to sort queued jobs:
    /// priority-class priority descending, then in-queue priority
    /// ascending, then submit time ascending, then id.
    fn scheduling_order_compare(&self, other: &dyn SchedulerJob) -> Ordering {
        other
            .pod_requirements()
            .priority_class_priority
            .cmp(&self.pod_requirements().priority_class_priority)
            .then_with(|| self.queue_priority().cmp(&other.queue_priority()))
            .then_with(|| self.submitted_at().cmp(&other.submitted_at()))
            .then_with(|| self.id().cmp(other.id()))
    }
}

/// Concrete job carried by the in-memory repository.
#[derive(Debug, Clone)]
pub struct Job {
    id: String,
    queue: String,
    queue_priority: u32,
    submitted_at: u64,
    pod_requirements: PodRequirements,
    scheduling_key: Option<SchedulingKey>,
}

impl Job {
    pub fn new(id: &str, queue: &str, pod_requirements: PodRequirements) -> Self {
        Self {
            id: id.to_string(),
            queue: queue.to_string(),
            queue_priority: 0,
            submitted_at: 0,
            pod_requirements,
            scheduling_key: None,
        }
    }

    pub fn with_queue_priority(mut self, queue_priority: u32) -> Self {
        self.queue_priority = queue_priority;
        self
    }

    pub fn with_submitted_at(mut self, submitted_at: u64) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    /// Attach the scheduling key derived from the current requirements.
    pub fn with_scheduling_key(mut self) -> Self {
        self.scheduling_key = Some(SchedulingKey::of(&self.queue, &self.pod_requirements));
        self
    }
}

impl SchedulerJob for Job {
    fn id(&self) -> &str {
        &self.id
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    fn scheduling_key(&self) -> Option<SchedulingKey> {
        self.scheduling_key
    }

    fn pod_requirements(&self) -> &PodRequirements {
        &self.pod_requirements
    }

    fn queue_priority(&self) -> u32 {
        self.queue_priority
    }

    fn submitted_at(&self) -> u64 {
        self.submitted_at
    }
}
