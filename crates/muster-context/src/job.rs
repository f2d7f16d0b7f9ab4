//! Per-job attempt state.

use muster_core::{JobRef, PodRequirements};

/// Outcome of binding one pod to a node, set by the node database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSchedulingContext {
    /// Node the pod was bound to; `None` means unbound.
    pub node_id: Option<String>,
    /// Priority level at which the node database admitted the pod.
    /// Lower is better; `MIN_PRIORITY` means no displacement was needed.
    pub scheduled_at_priority: i32,
}

/// State of one job across a gang scheduling attempt.
#[derive(Clone)]
pub struct JobSchedulingContext {
    pub job: JobRef,
    /// Working copy of the job's requirements. The uniformity search
    /// mutates the node selector here; the job itself is never touched.
    pub pod_requirements: PodRequirements,
    /// Set once the node database has attempted a binding.
    pub pod_scheduling_context: Option<PodSchedulingContext>,
    /// Marks a member that must be recorded as failed even if the gang
    /// as a whole schedules.
    pub should_fail: bool,
    /// Why the job could not be scheduled; `None` until a failure is
    /// recorded.
    pub unschedulable_reason: Option<String>,
}

impl JobSchedulingContext {
    pub fn new(job: JobRef) -> Self {
        let pod_requirements = job.pod_requirements().clone();
        Self {
            job,
            pod_requirements,
            pod_scheduling_context: None,
            should_fail: false,
            unschedulable_reason: None,
        }
    }

    /// True iff the job is bound to a node and carries no failure reason.
    pub fn is_successful(&self) -> bool {
        self.unschedulable_reason.is_none()
            && self
                .pod_scheduling_context
                .as_ref()
                .is_some_and(|pctx| pctx.node_id.is_some())
    }

    /// Drop the node binding, keeping the rest of the attempt state.
    pub fn clear_node_binding(&mut self) {
        if let Some(pctx) = self.pod_scheduling_context.as_mut() {
            pctx.node_id = None;
        }
    }
}

impl std::fmt::Debug for JobSchedulingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSchedulingContext")
            .field("job", &self.job.id())
            .field("pod_scheduling_context", &self.pod_scheduling_context)
            .field("should_fail", &self.should_fail)
            .field("unschedulable_reason", &self.unschedulable_reason)
            .finish()
    }
}
