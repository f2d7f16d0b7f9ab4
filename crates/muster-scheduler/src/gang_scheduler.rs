//! Gang placement protocol.
//!
//! `GangScheduler` places one gang at a time and is not aware of
//! queues beyond the per-queue bookkeeping it performs. Every call
//! runs the same protocol: gate on round constraints, tentatively admit
//! the gang into the scheduling context, attempt placement inside node
//! database transactions (searching across uniformity-label values when
//! the gang asks for one), then record the outcome — success reserves
//! limiter tokens and evicts failed members, failure re-registers the
//! gang with its unschedulable reason and feeds the infeasibility
//! cache.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use muster_context::{GangSchedulingContext, SchedulingContext};
use muster_nodedb::{NodeDb, Txn, MIN_PRIORITY};

use crate::constraints::{ConstraintCheck, SchedulingConstraints};
use crate::error::{SchedulerError, SchedulerResult};

/// Outcome of a gang placement attempt that completed without an
/// internal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The gang is placed; bindings are committed to the node database.
    Scheduled,
    /// Routine no-fit. The reason is recorded on every member context.
    Unschedulable { reason: String },
}

impl ScheduleOutcome {
    fn unschedulable(reason: impl Into<String>) -> Self {
        Self::Unschedulable {
            reason: reason.into(),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled)
    }

    pub fn unschedulable_reason(&self) -> Option<&str> {
        match self {
            Self::Scheduled => None,
            Self::Unschedulable { reason } => Some(reason),
        }
    }
}

/// Schedules one gang at a time against a node database, recording
/// every decision in the round's scheduling context.
pub struct GangScheduler {
    constraints: SchedulingConstraints,
    sctx: SchedulingContext,
    node_db: NodeDb,
    /// If true, failed single-job gangs are not added to the
    /// infeasible-key cache.
    skip_unsuccessful_scheduling_key_check: bool,
}

impl GangScheduler {
    pub fn new(
        sctx: SchedulingContext,
        constraints: SchedulingConstraints,
        node_db: NodeDb,
    ) -> Self {
        Self {
            constraints,
            sctx,
            node_db,
            skip_unsuccessful_scheduling_key_check: false,
        }
    }

    /// Suppress infeasible-key caching (used by tests and replay paths).
    pub fn skip_unsuccessful_scheduling_key_check(&mut self) {
        self.skip_unsuccessful_scheduling_key_check = true;
    }

    pub fn context(&self) -> &SchedulingContext {
        &self.sctx
    }

    pub fn into_context(self) -> SchedulingContext {
        self.sctx
    }

    /// Attempt to place one gang.
    ///
    /// On `Ok(Scheduled)` the bindings are committed and the context
    /// reflects the placement. On `Ok(Unschedulable)` the context has
    /// recorded the attempt with its reason and the node database is
    /// unchanged. On `Err` the context may be mid-update and the caller
    /// should abandon the round.
    pub fn schedule(
        &mut self,
        token: &CancellationToken,
        gctx: &mut GangSchedulingContext,
    ) -> SchedulerResult<ScheduleOutcome> {
        // Exit immediately if this is a new gang and the round is
        // already at its limits; the context is untouched in that case.
        if !gctx.all_jobs_evicted {
            if let ConstraintCheck::Violated { reason } = self
                .constraints
                .check_round_constraints(&self.sctx, &gctx.queue)?
            {
                debug!(queue = %gctx.queue, %reason, "round gate refused gang");
                return Ok(ScheduleOutcome::unschedulable(reason));
            }
        }

        let mut gang_added = false;
        let outcome = self.try_schedule(token, gctx, &mut gang_added);
        self.record_outcome(gctx, gang_added, outcome)
    }

    /// Admission, gang constraints, and placement dispatch. Bookkeeping
    /// for whatever this returns happens in `record_outcome`.
    fn try_schedule(
        &mut self,
        token: &CancellationToken,
        gctx: &mut GangSchedulingContext,
        gang_added: &mut bool,
    ) -> SchedulerResult<ScheduleOutcome> {
        self.sctx.add_gang_scheduling_context(gctx)?;
        *gang_added = true;

        // Only gate new gangs, so re-placements are not preempted by
        // config changes made since they first scheduled.
        if !gctx.all_jobs_evicted {
            if let ConstraintCheck::Violated { reason } =
                self.constraints.check_constraints(&self.sctx, gctx)?
            {
                return Ok(ScheduleOutcome::unschedulable(reason));
            }
        }

        match gctx.node_uniformity_label.clone() {
            None => self.try_place(token, gctx),
            Some(label) => self.try_place_uniform(token, gctx, &label),
        }
    }

    /// One transactional attempt across all nodes; commits on success.
    fn try_place(
        &mut self,
        token: &CancellationToken,
        gctx: &mut GangSchedulingContext,
    ) -> SchedulerResult<ScheduleOutcome> {
        if token.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }
        let mut txn = self.node_db.txn(true);
        let outcome = self.try_place_with_txn(&mut txn, gctx)?;
        if outcome.is_scheduled() {
            txn.commit()?;
        } else {
            txn.abort();
        }
        Ok(outcome)
    }

    fn try_place_with_txn(
        &self,
        txn: &mut Txn,
        gctx: &mut GangSchedulingContext,
    ) -> SchedulerResult<ScheduleOutcome> {
        let ok = self
            .node_db
            .schedule_many_with_txn(txn, &mut gctx.job_contexts)?;
        if !ok {
            // Residual bindings from this or earlier attempts must not
            // leak out of a failed placement.
            for jctx in &mut gctx.job_contexts {
                jctx.clear_node_binding();
            }
            let reason = if gctx.cardinality() > 1 {
                "unable to schedule gang since minimum cardinality not met"
            } else {
                "job does not fit on any node"
            };
            return Ok(ScheduleOutcome::unschedulable(reason));
        }
        // The gang is placed; members marked to fail are recorded as
        // such and lose any binding left over from earlier attempts.
        for jctx in &mut gctx.job_contexts {
            if jctx.should_fail {
                jctx.clear_node_binding();
                jctx.unschedulable_reason = Some("job does not fit on any node".to_string());
            }
        }
        Ok(ScheduleOutcome::Scheduled)
    }

    /// Search the values of the uniformity label for the placement with
    /// the best mean scheduled-at priority.
    fn try_place_uniform(
        &mut self,
        token: &CancellationToken,
        gctx: &mut GangSchedulingContext,
        label: &str,
    ) -> SchedulerResult<ScheduleOutcome> {
        let Some(values) = self.node_db.indexed_node_label_values(label) else {
            return Ok(ScheduleOutcome::unschedulable(format!(
                "uniformity label {label} is not indexed"
            )));
        };
        if values.is_empty() {
            return Ok(ScheduleOutcome::unschedulable(format!(
                "no nodes with uniformity label {label}"
            )));
        }

        let total = values.len();
        let mut best_value: Option<String> = None;
        let mut min_mean = 0.0f64;
        for (i, value) in values.iter().enumerate() {
            if token.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            // Empty values cannot be selected for, but still count
            // toward the total used by the last-candidate early exit.
            if value.is_empty() {
                continue;
            }
            set_uniformity_selector(gctx, label, value);
            let mut txn = self.node_db.txn(true);
            let outcome = self.try_place_with_txn(&mut txn, gctx)?;
            if outcome.is_scheduled() {
                let Some(mean) = mean_scheduled_at_priority(gctx) else {
                    txn.abort();
                    continue;
                };
                if mean == f64::from(MIN_PRIORITY) {
                    // Best possible; no need to keep looking.
                    txn.commit()?;
                    return Ok(ScheduleOutcome::Scheduled);
                }
                if best_value.is_none() || mean <= min_mean {
                    if i + 1 == total {
                        // Minimal mean and no more options; keep it.
                        txn.commit()?;
                        return Ok(ScheduleOutcome::Scheduled);
                    }
                    best_value = Some(value.clone());
                    min_mean = mean;
                }
            }
            txn.abort();
        }

        let Some(best) = best_value else {
            return Ok(ScheduleOutcome::unschedulable(
                "at least one job in the gang does not fit on any node",
            ));
        };
        debug!(%label, value = %best, mean = min_mean, "uniformity search settled");
        set_uniformity_selector(gctx, label, &best);
        self.try_place(token, gctx)
    }

    /// Success/failure bookkeeping, run on every exit that did not hit
    /// an internal error.
    fn record_outcome(
        &mut self,
        gctx: &mut GangSchedulingContext,
        gang_added: bool,
        outcome: SchedulerResult<ScheduleOutcome>,
    ) -> SchedulerResult<ScheduleOutcome> {
        let outcome = outcome?;
        match &outcome {
            ScheduleOutcome::Scheduled => {
                // Account new admissions against the rate limiters,
                // timestamped at round start.
                if !gctx.all_jobs_evicted {
                    self.sctx
                        .limiter
                        .reserve_n(self.sctx.started, gctx.cardinality());
                    if let Some(limiter) = self
                        .sctx
                        .queue_context(&gctx.queue)
                        .and_then(|qctx| qctx.limiter.as_ref())
                    {
                        limiter.reserve_n(self.sctx.started, gctx.cardinality());
                    }
                }
                if gang_added {
                    // Min-max gangs may succeed with failed members;
                    // evict those so accounting reflects only placed
                    // jobs.
                    for jctx in &gctx.job_contexts {
                        if !jctx.is_successful() {
                            self.sctx.evict_job(jctx.job.as_ref())?;
                        }
                    }
                }
                info!(
                    queue = %gctx.queue,
                    jobs = gctx.cardinality(),
                    evicted = gctx.all_jobs_evicted,
                    "gang scheduled"
                );
            }
            ScheduleOutcome::Unschedulable { reason } => {
                if gang_added {
                    self.sctx.evict_gang(&gctx.job_refs())?;
                    // Re-register the gang with a reason on every
                    // member so the round records the failure.
                    for jctx in &mut gctx.job_contexts {
                        jctx.unschedulable_reason = Some(reason.clone());
                    }
                    self.sctx.add_gang_scheduling_context(gctx)?;
                    self.register_unfeasible_key(gctx);
                }
                info!(queue = %gctx.queue, jobs = gctx.cardinality(), %reason, "gang unschedulable");
            }
        }
        Ok(outcome)
    }

    /// Cache the scheduling key of a failed single-job gang. Gangs are
    /// excluded because a gang may be unschedulable even when each of
    /// its members is individually schedulable.
    fn register_unfeasible_key(&mut self, gctx: &GangSchedulingContext) {
        if self.skip_unsuccessful_scheduling_key_check || gctx.cardinality() != 1 {
            return;
        }
        let jctx = &gctx.job_contexts[0];
        let key = jctx
            .job
            .scheduling_key()
            .unwrap_or_else(|| self.sctx.scheduling_key_for_job(jctx.job.as_ref()));
        // Keep the first witnessing context for each key.
        self.sctx
            .unfeasible_scheduling_keys
            .entry(key)
            .or_insert_with(|| jctx.clone());
    }
}

/// Force every member to select the given uniformity label value.
fn set_uniformity_selector(gctx: &mut GangSchedulingContext, label: &str, value: &str) {
    for jctx in &mut gctx.job_contexts {
        jctx.pod_requirements
            .node_selector
            .insert(label.to_string(), value.to_string());
    }
}

/// Mean scheduled-at priority across all members, or `None` if any
/// member has no attempt recorded.
fn mean_scheduled_at_priority(gctx: &GangSchedulingContext) -> Option<f64> {
    if gctx.cardinality() == 0 {
        return None;
    }
    let mut sum = 0i64;
    for jctx in &gctx.job_contexts {
        let pctx = jctx.pod_scheduling_context.as_ref()?;
        sum += i64::from(pctx.scheduled_at_priority);
    }
    Some(sum as f64 / gctx.cardinality() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_context::{JobSchedulingContext, PodSchedulingContext};
    use muster_core::{Job, JobRef, PodRequirements, Resources};
    use std::sync::Arc;

    fn member(id: &str) -> JobSchedulingContext {
        JobSchedulingContext::new(Arc::new(Job::new(
            id,
            "batch",
            PodRequirements::new(Resources::new(1, 1)),
        )) as JobRef)
    }

    fn bound(id: &str, priority: i32) -> JobSchedulingContext {
        let mut jctx = member(id);
        jctx.pod_scheduling_context = Some(PodSchedulingContext {
            node_id: Some("n1".to_string()),
            scheduled_at_priority: priority,
        });
        jctx
    }

    #[test]
    fn mean_requires_every_member_to_have_an_attempt() {
        let gctx =
            GangSchedulingContext::new(vec![bound("a", 2), member("b")], None, false);
        assert_eq!(mean_scheduled_at_priority(&gctx), None);
    }

    #[test]
    fn mean_averages_over_cardinality() {
        let gctx =
            GangSchedulingContext::new(vec![bound("a", 2), bound("b", 4)], None, false);
        assert_eq!(mean_scheduled_at_priority(&gctx), Some(3.0));
    }

    #[test]
    fn uniformity_selector_overwrites_every_member() {
        let mut gctx = GangSchedulingContext::new(
            vec![member("a"), member("b")],
            Some("zone".to_string()),
            false,
        );
        set_uniformity_selector(&mut gctx, "zone", "a");
        set_uniformity_selector(&mut gctx, "zone", "b");
        for jctx in &gctx.job_contexts {
            assert_eq!(
                jctx.pod_requirements.node_selector.get("zone"),
                Some(&"b".to_string())
            );
        }
    }
}
