//! muster-core — job and resource types for the muster gang scheduler.
//!
//! This crate defines the vocabulary shared by every other muster crate:
//!
//! - **`types`** — resource requests and pod placement requirements
//! - **`key`** — scheduling-key fingerprints for infeasibility caching
//! - **`job`** — the `SchedulerJob` abstraction and a concrete `Job`

pub mod job;
pub mod key;
pub mod types;

pub use job::{Job, JobRef, SchedulerJob};
pub use key::SchedulingKey;
pub use types::{PodRequirements, Resources};
