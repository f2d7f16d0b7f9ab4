//! The per-attempt gang unit.

use muster_core::JobRef;

use crate::job::JobSchedulingContext;

/// A gang handed to the gang scheduler: a set of jobs from one queue
/// that must be placed together.
///
/// Constructed by the outer scheduler, consumed by exactly one
/// `schedule` call, then discarded. After a failed uniformity search
/// the member node selectors retain the last tried label value; callers
/// reusing a failed gang must reset them.
#[derive(Debug, Clone)]
pub struct GangSchedulingContext {
    pub queue: String,
    pub job_contexts: Vec<JobSchedulingContext>,
    /// Node label whose value must be identical across every node the
    /// gang lands on; `None` means no uniformity constraint.
    pub node_uniformity_label: Option<String>,
    /// True when every member is a previously running job being
    /// re-placed after eviction, rather than a new admission.
    pub all_jobs_evicted: bool,
}

impl GangSchedulingContext {
    /// Build a gang from its member contexts. The members must all
    /// belong to the same queue; the gang's queue is taken from the
    /// first member.
    pub fn new(
        job_contexts: Vec<JobSchedulingContext>,
        node_uniformity_label: Option<String>,
        all_jobs_evicted: bool,
    ) -> Self {
        let queue = job_contexts
            .first()
            .map(|jctx| jctx.job.queue().to_string())
            .unwrap_or_default();
        Self {
            queue,
            job_contexts,
            node_uniformity_label,
            all_jobs_evicted,
        }
    }

    pub fn cardinality(&self) -> usize {
        self.job_contexts.len()
    }

    /// Handles to the member jobs, in gang order.
    pub fn job_refs(&self) -> Vec<JobRef> {
        self.job_contexts
            .iter()
            .map(|jctx| jctx.job.clone())
            .collect()
    }
}
