//! muster-context — in-memory bookkeeping for one scheduling round.
//!
//! A round owns a single `SchedulingContext`. As the outer scheduler
//! works through candidate gangs, the gang scheduler records every
//! decision here: which jobs were admitted, which failed and why, which
//! running jobs were evicted, and which scheduling keys are known to be
//! infeasible for the rest of the round.
//!
//! # Components
//!
//! - **`job`** — per-job and per-pod attempt state
//! - **`gang`** — the per-attempt unit handed to the gang scheduler
//! - **`round`** — the round-scoped and per-queue accumulators
//! - **`limiter`** — token-bucket rate limiter shared by both

pub mod error;
pub mod gang;
pub mod job;
pub mod limiter;
pub mod round;

pub use error::{ContextError, ContextResult};
pub use gang::GangSchedulingContext;
pub use job::{JobSchedulingContext, PodSchedulingContext};
pub use limiter::RateLimiter;
pub use round::{QueueSchedulingContext, SchedulingContext};
