//! Admission constraints.
//!
//! Two gates guard gang admission. The round gate runs before a new
//! gang touches the scheduling context; the gang gate runs after the
//! gang has been tentatively admitted, so cumulative checks see the
//! gang's own resources. Neither gate applies to evicted gangs being
//! re-placed.

use muster_context::{GangSchedulingContext, SchedulingContext};
use muster_core::Resources;

use crate::config::SchedulingConfig;
use crate::error::SchedulerResult;

/// Result of a constraint check. A violation is a routine outcome, not
/// an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintCheck {
    Satisfied,
    Violated { reason: String },
}

impl ConstraintCheck {
    fn violated(reason: impl Into<String>) -> Self {
        Self::Violated {
            reason: reason.into(),
        }
    }
}

/// Static admission limits evaluated against the live scheduling
/// context.
#[derive(Debug, Clone, Default)]
pub struct SchedulingConstraints {
    min_job_resources: Resources,
    max_round_jobs: Option<usize>,
    max_queue_resources: Option<Resources>,
    max_gang_cardinality: Option<usize>,
    forbidden_node_selectors: Vec<String>,
}

impl SchedulingConstraints {
    pub fn from_config(config: &SchedulingConfig) -> Self {
        Self {
            min_job_resources: config.min_job_resources,
            max_round_jobs: config.max_round_jobs,
            max_queue_resources: config.max_queue_resources,
            max_gang_cardinality: config.max_gang_cardinality,
            forbidden_node_selectors: config.forbidden_node_selectors.clone(),
        }
    }

    /// Round-level gate, evaluated before a new gang is admitted.
    pub fn check_round_constraints(
        &self,
        sctx: &SchedulingContext,
        queue: &str,
    ) -> SchedulerResult<ConstraintCheck> {
        if let Some(cap) = self.max_round_jobs {
            if sctx.num_scheduled_jobs() >= cap {
                return Ok(ConstraintCheck::violated(
                    "maximum number of jobs scheduled this round reached",
                ));
            }
        }
        if sctx.limiter.tokens_at(sctx.started) < 1.0 {
            return Ok(ConstraintCheck::violated(
                "global scheduling rate limit exhausted",
            ));
        }
        if let Some(limiter) = sctx
            .queue_context(queue)
            .and_then(|qctx| qctx.limiter.as_ref())
        {
            if limiter.tokens_at(sctx.started) < 1.0 {
                return Ok(ConstraintCheck::violated(format!(
                    "queue {queue} scheduling rate limit exhausted"
                )));
            }
        }
        Ok(ConstraintCheck::Satisfied)
    }

    /// Per-gang gate, evaluated after tentative admission.
    pub fn check_constraints(
        &self,
        sctx: &SchedulingContext,
        gctx: &GangSchedulingContext,
    ) -> SchedulerResult<ConstraintCheck> {
        if let Some(cap) = self.max_gang_cardinality {
            if gctx.cardinality() > cap {
                return Ok(ConstraintCheck::violated(format!(
                    "gang cardinality {} exceeds maximum {cap}",
                    gctx.cardinality()
                )));
            }
        }
        for jctx in &gctx.job_contexts {
            if !self
                .min_job_resources
                .fits_within(jctx.pod_requirements.resources)
            {
                return Ok(ConstraintCheck::violated(format!(
                    "job {} requests less than the minimum job resources",
                    jctx.job.id()
                )));
            }
            for key in &self.forbidden_node_selectors {
                if jctx.pod_requirements.node_selector.contains_key(key) {
                    return Ok(ConstraintCheck::violated(format!(
                        "node selector {key} is not permitted"
                    )));
                }
            }
        }
        if let Some(cap) = self.max_queue_resources {
            if let Some(qctx) = sctx.queue_context(&gctx.queue) {
                if !qctx.scheduled_resources.fits_within(cap) {
                    return Ok(ConstraintCheck::violated(format!(
                        "queue {} resource quota exceeded",
                        gctx.queue
                    )));
                }
            }
        }
        Ok(ConstraintCheck::Satisfied)
    }
}
