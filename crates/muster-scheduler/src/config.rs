//! muster.toml configuration parser.

use std::path::Path;

use serde::{Deserialize, Serialize};

use muster_context::RateLimiter;
use muster_core::Resources;

/// Tunables for one scheduler instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Global admission rate in jobs per second.
    pub global_rate_per_second: f64,
    /// Global admission burst.
    pub global_burst: f64,
    /// Per-queue admission rate in jobs per second.
    pub queue_rate_per_second: f64,
    /// Per-queue admission burst.
    pub queue_burst: f64,
    /// Smallest job the scheduler will admit.
    pub min_job_resources: Resources,
    /// Cap on jobs admitted per round, if any.
    pub max_round_jobs: Option<usize>,
    /// Cap on resources admitted per queue per round, if any.
    pub max_queue_resources: Option<Resources>,
    /// Cap on gang size, if any.
    pub max_gang_cardinality: Option<usize>,
    /// Node-selector keys jobs are not allowed to use.
    pub forbidden_node_selectors: Vec<String>,
    /// Batch size for the lazy queued-jobs iterator.
    pub job_batch_size: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            global_rate_per_second: 100.0,
            global_burst: 1000.0,
            queue_rate_per_second: 50.0,
            queue_burst: 500.0,
            min_job_resources: Resources::default(),
            max_round_jobs: None,
            max_queue_resources: None,
            max_gang_cardinality: None,
            forbidden_node_selectors: Vec::new(),
            job_batch_size: 16,
        }
    }
}

impl SchedulingConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SchedulingConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Build the round's global limiter.
    pub fn global_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.global_rate_per_second, self.global_burst)
    }

    /// Build a fresh per-queue limiter.
    pub fn queue_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.queue_rate_per_second, self.queue_burst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let config = SchedulingConfig::default();
        assert!(config.max_round_jobs.is_none());
        assert!(config.max_queue_resources.is_none());
        assert!(config.forbidden_node_selectors.is_empty());
        assert_eq!(config.job_batch_size, 16);
    }

    #[test]
    fn parses_partial_toml() {
        let config: SchedulingConfig = toml::from_str(
            r#"
            global_rate_per_second = 10.0
            max_round_jobs = 200
            forbidden_node_selectors = ["kubernetes.io/hostname"]

            [min_job_resources]
            memory_bytes = 1048576
            cpu_millis = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.global_rate_per_second, 10.0);
        assert_eq!(config.max_round_jobs, Some(200));
        assert_eq!(config.min_job_resources, Resources::new(1_048_576, 100));
        // Unset fields fall back to defaults.
        assert_eq!(config.job_batch_size, 16);
    }
}
