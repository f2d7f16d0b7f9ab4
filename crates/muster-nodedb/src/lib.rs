//! muster-nodedb — transactional view over the node fleet.
//!
//! The node database answers one question: can this set of pods be
//! bound to nodes, and at what priority? Callers open a transaction,
//! speculatively bind a whole gang inside it, and either commit the
//! bindings (publishing them to subsequent transactions in the round)
//! or abort and leave the fleet untouched.
//!
//! # Components
//!
//! - **`node`** — a node's labels, taints, and priority-bucketed allocation
//! - **`db`** — the fleet, its label index, and the transaction type

pub mod db;
pub mod error;
pub mod node;

pub use db::{NodeDb, Txn};
pub use error::{NodeDbError, NodeDbResult};
pub use node::{Node, MIN_PRIORITY};
