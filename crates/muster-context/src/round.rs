//! Round-scoped scheduling state.
//!
//! One `SchedulingContext` lives for the duration of a scheduling
//! round. It owns a per-queue sub-context for every queue it has seen,
//! the round's rate limiters, and the cache of scheduling keys already
//! proven infeasible this round.

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use muster_core::{JobRef, Resources, SchedulerJob, SchedulingKey};

use crate::error::{ContextError, ContextResult};
use crate::gang::GangSchedulingContext;
use crate::job::JobSchedulingContext;
use crate::limiter::RateLimiter;

/// Per-queue accounting for one round.
#[derive(Debug)]
pub struct QueueSchedulingContext {
    pub queue: String,
    /// Optional per-queue admission limiter.
    pub limiter: Option<RateLimiter>,
    /// Jobs admitted this round, keyed by job id.
    pub scheduled_jobs: HashMap<String, JobSchedulingContext>,
    /// Jobs recorded as unschedulable this round, with their reasons.
    pub unsuccessful_jobs: HashMap<String, JobSchedulingContext>,
    /// Running jobs evicted this round (not admitted this round),
    /// keyed by job id with the resources they held.
    pub evicted_jobs: HashMap<String, Resources>,
    pub scheduled_resources: Resources,
    pub evicted_resources: Resources,
}

impl QueueSchedulingContext {
    fn new(queue: &str, limiter: Option<RateLimiter>) -> Self {
        Self {
            queue: queue.to_string(),
            limiter,
            scheduled_jobs: HashMap::new(),
            unsuccessful_jobs: HashMap::new(),
            evicted_jobs: HashMap::new(),
            scheduled_resources: Resources::default(),
            evicted_resources: Resources::default(),
        }
    }

    /// Record one job context. Returns whether anything changed.
    fn add_job(&mut self, jctx: &JobSchedulingContext) -> bool {
        let job_id = jctx.job.id().to_string();
        let resources = jctx.pod_requirements.resources;

        if jctx.unschedulable_reason.is_some() {
            if self.unsuccessful_jobs.contains_key(&job_id) {
                return false;
            }
            self.unsuccessful_jobs.insert(job_id, jctx.clone());
            return true;
        }

        if self.scheduled_jobs.contains_key(&job_id) {
            return false;
        }
        if let Some(held) = self.evicted_jobs.remove(&job_id) {
            // Re-admitting a job evicted earlier this round.
            self.evicted_resources -= held;
        }
        self.unsuccessful_jobs.remove(&job_id);
        self.scheduled_jobs.insert(job_id, jctx.clone());
        self.scheduled_resources += resources;
        true
    }

    /// Remove one job's accounting. Returns whether anything changed.
    fn evict_job(&mut self, job: &dyn SchedulerJob) -> bool {
        let job_id = job.id();
        if let Some(jctx) = self.scheduled_jobs.remove(job_id) {
            self.scheduled_resources -= jctx.pod_requirements.resources;
            return true;
        }
        if self.unsuccessful_jobs.remove(job_id).is_some() {
            return true;
        }
        if self.evicted_jobs.contains_key(job_id) {
            return false;
        }
        // A running job from a previous round: mark it evicted so it
        // becomes a candidate for re-placement.
        let held = job.pod_requirements().resources;
        self.evicted_jobs.insert(job_id.to_string(), held);
        self.evicted_resources += held;
        true
    }
}

/// All state accumulated across one scheduling round.
pub struct SchedulingContext {
    /// Round start; reservations are timestamped against this.
    pub started: Instant,
    /// Global admission limiter.
    pub limiter: RateLimiter,
    pub queue_contexts: HashMap<String, QueueSchedulingContext>,
    /// Scheduling keys proven infeasible this round, each with the
    /// first job context that witnessed the failure.
    pub unfeasible_scheduling_keys: HashMap<SchedulingKey, JobSchedulingContext>,
}

impl SchedulingContext {
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            started: Instant::now(),
            limiter,
            queue_contexts: HashMap::new(),
            unfeasible_scheduling_keys: HashMap::new(),
        }
    }

    /// Register a queue up front, attaching its limiter. Queues not
    /// registered here are created on first use without a limiter.
    pub fn add_queue(&mut self, queue: &str, limiter: Option<RateLimiter>) {
        self.queue_contexts
            .entry(queue.to_string())
            .or_insert_with(|| QueueSchedulingContext::new(queue, limiter));
    }

    pub fn queue_context(&self, queue: &str) -> Option<&QueueSchedulingContext> {
        self.queue_contexts.get(queue)
    }

    fn queue_context_mut(&mut self, queue: &str) -> &mut QueueSchedulingContext {
        self.queue_contexts
            .entry(queue.to_string())
            .or_insert_with(|| QueueSchedulingContext::new(queue, None))
    }

    /// Record a gang's member contexts under its queue.
    ///
    /// Safe to call with an already-tracked gang: re-adding yields a
    /// zero delta. Returns whether any state changed.
    pub fn add_gang_scheduling_context(
        &mut self,
        gctx: &GangSchedulingContext,
    ) -> ContextResult<bool> {
        for jctx in &gctx.job_contexts {
            if jctx.job.queue() != gctx.queue {
                return Err(ContextError::QueueMismatch {
                    job_id: jctx.job.id().to_string(),
                    job_queue: jctx.job.queue().to_string(),
                    gang_queue: gctx.queue.clone(),
                });
            }
        }
        let qctx = self.queue_context_mut(&gctx.queue);
        let mut changed = false;
        for jctx in &gctx.job_contexts {
            changed |= qctx.add_job(jctx);
        }
        debug!(
            queue = %gctx.queue,
            jobs = gctx.cardinality(),
            changed,
            "gang added to scheduling context"
        );
        Ok(changed)
    }

    /// Remove one job's accounting. For a job admitted this round the
    /// admission is undone; for a running job the eviction is recorded.
    /// Returns whether any state changed.
    pub fn evict_job(&mut self, job: &dyn SchedulerJob) -> ContextResult<bool> {
        let changed = self.queue_context_mut(job.queue()).evict_job(job);
        debug!(job_id = %job.id(), queue = %job.queue(), changed, "job evicted from scheduling context");
        Ok(changed)
    }

    /// Evict every job of a gang. Returns whether any state changed.
    pub fn evict_gang(&mut self, jobs: &[JobRef]) -> ContextResult<bool> {
        let mut changed = false;
        for job in jobs {
            changed |= self.evict_job(job.as_ref())?;
        }
        Ok(changed)
    }

    /// Derive the scheduling key for a job that carries none of its own.
    pub fn scheduling_key_for_job(&self, job: &dyn SchedulerJob) -> SchedulingKey {
        SchedulingKey::of(job.queue(), job.pod_requirements())
    }

    /// Jobs admitted this round across all queues.
    pub fn num_scheduled_jobs(&self) -> usize {
        self.queue_contexts
            .values()
            .map(|qctx| qctx.scheduled_jobs.len())
            .sum()
    }

    /// Resources admitted this round across all queues.
    pub fn total_scheduled_resources(&self) -> Resources {
        let mut total = Resources::default();
        for qctx in self.queue_contexts.values() {
            total += qctx.scheduled_resources;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::{Job, PodRequirements};
    use std::sync::Arc;

    fn job(id: &str) -> Arc<Job> {
        Arc::new(Job::new(
            id,
            "batch",
            PodRequirements::new(Resources::new(100, 10)),
        ))
    }

    fn gang(ids: &[&str]) -> GangSchedulingContext {
        let jctxs = ids
            .iter()
            .map(|id| JobSchedulingContext::new(job(id) as JobRef))
            .collect();
        GangSchedulingContext::new(jctxs, None, false)
    }

    fn sctx() -> SchedulingContext {
        SchedulingContext::new(RateLimiter::new(10.0, 100.0))
    }

    #[test]
    fn add_tracks_resources_per_queue() {
        let mut sctx = sctx();
        sctx.add_gang_scheduling_context(&gang(&["a", "b"])).unwrap();
        let qctx = sctx.queue_context("batch").unwrap();
        assert_eq!(qctx.scheduled_jobs.len(), 2);
        assert_eq!(qctx.scheduled_resources, Resources::new(200, 20));
        assert_eq!(sctx.num_scheduled_jobs(), 2);
    }

    #[test]
    fn re_adding_a_tracked_gang_is_a_zero_delta() {
        let mut sctx = sctx();
        let gctx = gang(&["a", "b"]);
        assert!(sctx.add_gang_scheduling_context(&gctx).unwrap());
        assert!(!sctx.add_gang_scheduling_context(&gctx).unwrap());
        let qctx = sctx.queue_context("batch").unwrap();
        assert_eq!(qctx.scheduled_resources, Resources::new(200, 20));
    }

    #[test]
    fn evict_gang_reverses_add() {
        let mut sctx = sctx();
        let gctx = gang(&["a", "b"]);
        sctx.add_gang_scheduling_context(&gctx).unwrap();
        assert!(sctx.evict_gang(&gctx.job_refs()).unwrap());
        let qctx = sctx.queue_context("batch").unwrap();
        assert!(qctx.scheduled_jobs.is_empty());
        assert_eq!(qctx.scheduled_resources, Resources::default());
    }

    #[test]
    fn adding_with_reasons_records_failures_not_resources() {
        let mut sctx = sctx();
        let mut gctx = gang(&["a"]);
        gctx.job_contexts[0].unschedulable_reason = Some("no fit".to_string());
        sctx.add_gang_scheduling_context(&gctx).unwrap();
        let qctx = sctx.queue_context("batch").unwrap();
        assert!(qctx.scheduled_jobs.is_empty());
        assert_eq!(qctx.unsuccessful_jobs.len(), 1);
        assert_eq!(qctx.scheduled_resources, Resources::default());
    }

    #[test]
    fn evicting_a_running_job_records_the_eviction() {
        let mut sctx = sctx();
        let running = job("r1");
        assert!(sctx.evict_job(running.as_ref()).unwrap());
        // Second eviction changes nothing.
        assert!(!sctx.evict_job(running.as_ref()).unwrap());
        let qctx = sctx.queue_context("batch").unwrap();
        assert_eq!(qctx.evicted_resources, Resources::new(100, 10));
    }

    #[test]
    fn re_admitting_an_evicted_job_clears_the_eviction() {
        let mut sctx = sctx();
        let running = job("r1");
        sctx.evict_job(running.as_ref()).unwrap();
        let gctx = gang(&["r1"]);
        sctx.add_gang_scheduling_context(&gctx).unwrap();
        let qctx = sctx.queue_context("batch").unwrap();
        assert!(qctx.evicted_jobs.is_empty());
        assert_eq!(qctx.evicted_resources, Resources::default());
        assert_eq!(qctx.scheduled_jobs.len(), 1);
    }

    #[test]
    fn queue_mismatch_is_an_error() {
        let mut sctx = sctx();
        let other = Arc::new(Job::new(
            "x",
            "interactive",
            PodRequirements::new(Resources::new(1, 1)),
        ));
        let mut gctx = gang(&["a"]);
        gctx.job_contexts
            .push(JobSchedulingContext::new(other as JobRef));
        assert!(sctx.add_gang_scheduling_context(&gctx).is_err());
    }
}
