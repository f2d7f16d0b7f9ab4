//! The node fleet and its transaction type.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use muster_context::{JobSchedulingContext, PodSchedulingContext};
use muster_core::PodRequirements;

use crate::error::{NodeDbError, NodeDbResult};
use crate::node::{Node, MIN_PRIORITY};

#[derive(Debug, Default)]
struct Fleet {
    nodes: HashMap<String, Node>,
    /// Labels for which a value index is maintained.
    indexed_labels: BTreeSet<String>,
    /// label → set of values observed across the fleet.
    label_values: HashMap<String, BTreeSet<String>>,
}

/// Thread-safe, transactional view over the node fleet.
///
/// Cheap to clone; clones share the fleet. Placement runs against a
/// transaction snapshot obtained from [`NodeDb::txn`]; at most one
/// write transaction should be open at a time, and a commit replaces
/// the fleet with the transaction's snapshot.
#[derive(Debug, Clone)]
pub struct NodeDb {
    inner: Arc<Mutex<Fleet>>,
}

impl NodeDb {
    pub fn new(indexed_labels: impl IntoIterator<Item = String>) -> Self {
        let indexed_labels: BTreeSet<String> = indexed_labels.into_iter().collect();
        let label_values = indexed_labels
            .iter()
            .map(|label| (label.clone(), BTreeSet::new()))
            .collect();
        let fleet = Fleet {
            nodes: HashMap::new(),
            indexed_labels,
            label_values,
        };
        Self {
            inner: Arc::new(Mutex::new(fleet)),
        }
    }

    /// Insert or replace a node, updating the label index.
    pub fn upsert(&self, node: Node) {
        let mut fleet = self.inner.lock();
        for (label, value) in &node.labels {
            if fleet.indexed_labels.contains(label) {
                fleet
                    .label_values
                    .entry(label.clone())
                    .or_default()
                    .insert(value.clone());
            }
        }
        debug!(node_id = %node.id, "node upserted");
        fleet.nodes.insert(node.id.clone(), node);
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.inner.lock().nodes.get(id).cloned()
    }

    pub fn num_nodes(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Values observed for an indexed label, in sorted order.
    /// Returns `None` if the label is not indexed.
    pub fn indexed_node_label_values(&self, label: &str) -> Option<Vec<String>> {
        let fleet = self.inner.lock();
        if !fleet.indexed_labels.contains(label) {
            return None;
        }
        Some(
            fleet
                .label_values
                .get(label)
                .map(|values| values.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Open a transaction holding a snapshot of the fleet.
    pub fn txn(&self, writable: bool) -> Txn {
        let nodes = self.inner.lock().nodes.clone();
        Txn {
            db: self.clone(),
            nodes,
            writable,
        }
    }

    /// Speculatively bind every member of a gang inside the transaction.
    ///
    /// Members are bound in order, each binding visible to the next, so
    /// the gang competes with itself for capacity. Members flagged
    /// `should_fail` are not attempted. Returns `Ok(false)` as soon as
    /// any member cannot be placed; bindings made before the failing
    /// member are left on their contexts and are discarded node-side
    /// when the caller aborts.
    pub fn schedule_many_with_txn(
        &self,
        txn: &mut Txn,
        jctxs: &mut [JobSchedulingContext],
    ) -> NodeDbResult<bool> {
        if !txn.writable {
            return Err(NodeDbError::ReadOnlyTxn);
        }
        for jctx in jctxs.iter_mut() {
            if jctx.should_fail {
                continue;
            }
            let Some((node_id, priority)) = select_node(&txn.nodes, &jctx.pod_requirements)
            else {
                debug!(job_id = %jctx.job.id(), "no node fits");
                return Ok(false);
            };
            if let Some(node) = txn.nodes.get_mut(&node_id) {
                node.allocate(
                    jctx.pod_requirements.priority_class_priority,
                    jctx.pod_requirements.resources,
                );
            }
            debug!(job_id = %jctx.job.id(), %node_id, priority, "pod bound");
            jctx.pod_scheduling_context = Some(PodSchedulingContext {
                node_id: Some(node_id),
                scheduled_at_priority: priority,
            });
        }
        Ok(true)
    }
}

/// A snapshot of the fleet. Commit publishes the snapshot; dropping the
/// transaction (or calling [`Txn::abort`]) discards it.
#[derive(Debug)]
pub struct Txn {
    db: NodeDb,
    nodes: HashMap<String, Node>,
    writable: bool,
}

impl Txn {
    /// Publish this transaction's bindings to the fleet.
    pub fn commit(self) -> NodeDbResult<()> {
        if !self.writable {
            return Err(NodeDbError::ReadOnlyTxn);
        }
        let mut fleet = self.db.inner.lock();
        debug!(nodes = self.nodes.len(), "node transaction committed");
        fleet.nodes = self.nodes;
        Ok(())
    }

    /// Discard this transaction.
    pub fn abort(self) {}

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }
}

/// Pick a node for the given requirements, preferring the lowest
/// feasible scheduled-at priority, then the strongest affinity match,
/// then the smallest node id.
fn select_node(nodes: &HashMap<String, Node>, reqs: &PodRequirements) -> Option<(String, i32)> {
    nodes
        .values()
        .filter(|node| node.matches_selector(&reqs.node_selector))
        .filter(|node| node.tolerated_by(&reqs.tolerations))
        .filter_map(|node| {
            min_feasible_priority(node, reqs).map(|priority| (node, priority))
        })
        .min_by_key(|(node, priority)| {
            (
                *priority,
                Reverse(node.affinity_matches(&reqs.affinity)),
                node.id.clone(),
            )
        })
        .map(|(node, priority)| (node.id.clone(), priority))
}

/// Lowest priority level at which the request fits on the node, if any.
///
/// `allocatable_at` is a step function that only changes just above an
/// occupied level, so those are the only levels worth probing.
fn min_feasible_priority(node: &Node, reqs: &PodRequirements) -> Option<i32> {
    let ceiling = reqs.priority_class_priority;
    if ceiling < MIN_PRIORITY {
        return None;
    }
    let mut candidates: Vec<i32> = vec![MIN_PRIORITY];
    candidates.extend(
        node.allocated
            .keys()
            .map(|level| level + 1)
            .filter(|p| *p > MIN_PRIORITY && *p <= ceiling),
    );
    candidates.sort_unstable();
    candidates
        .into_iter()
        .find(|p| reqs.resources.fits_within(node.allocatable_at(*p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::{Job, JobRef, Resources};

    fn jctx(id: &str, reqs: PodRequirements) -> JobSchedulingContext {
        let job = Job::new(id, "batch", reqs);
        JobSchedulingContext::new(Arc::new(job) as JobRef)
    }

    fn db_with(nodes: Vec<Node>) -> NodeDb {
        let db = NodeDb::new(["zone".to_string()]);
        for node in nodes {
            db.upsert(node);
        }
        db
    }

    #[test]
    fn schedule_binds_and_commit_publishes() {
        let db = db_with(vec![Node::new("n1", Resources::new(1000, 1000))]);
        let mut jctxs = vec![jctx("a", PodRequirements::new(Resources::new(400, 400)))];

        let mut txn = db.txn(true);
        assert!(db.schedule_many_with_txn(&mut txn, &mut jctxs).unwrap());
        txn.commit().unwrap();

        let pctx = jctxs[0].pod_scheduling_context.as_ref().unwrap();
        assert_eq!(pctx.node_id.as_deref(), Some("n1"));
        assert_eq!(pctx.scheduled_at_priority, MIN_PRIORITY);
        assert_eq!(
            db.node("n1").unwrap().allocatable_at(MIN_PRIORITY),
            Resources::new(600, 600)
        );
    }

    #[test]
    fn abort_discards_bindings() {
        let db = db_with(vec![Node::new("n1", Resources::new(1000, 1000))]);
        let mut jctxs = vec![jctx("a", PodRequirements::new(Resources::new(400, 400)))];

        let mut txn = db.txn(true);
        assert!(db.schedule_many_with_txn(&mut txn, &mut jctxs).unwrap());
        txn.abort();

        assert_eq!(
            db.node("n1").unwrap().allocatable_at(MIN_PRIORITY),
            Resources::new(1000, 1000)
        );
    }

    #[test]
    fn gang_members_compete_for_capacity() {
        let db = db_with(vec![Node::new("n1", Resources::new(500, 500))]);
        let mut jctxs = vec![
            jctx("a", PodRequirements::new(Resources::new(400, 400))),
            jctx("b", PodRequirements::new(Resources::new(400, 400))),
        ];

        let mut txn = db.txn(true);
        assert!(!db.schedule_many_with_txn(&mut txn, &mut jctxs).unwrap());
        // First member keeps its residual binding; second was never bound.
        assert!(jctxs[0].pod_scheduling_context.is_some());
        assert!(jctxs[1].pod_scheduling_context.is_none());
    }

    #[test]
    fn displacing_lower_priority_raises_scheduled_at() {
        let mut full = Node::new("n1", Resources::new(1000, 1000));
        full.allocate(0, Resources::new(900, 900));
        let db = db_with(vec![full]);

        let reqs = PodRequirements::new(Resources::new(500, 500)).with_priority(3);
        let mut jctxs = vec![jctx("a", reqs)];
        let mut txn = db.txn(true);
        assert!(db.schedule_many_with_txn(&mut txn, &mut jctxs).unwrap());
        let pctx = jctxs[0].pod_scheduling_context.as_ref().unwrap();
        assert_eq!(pctx.scheduled_at_priority, 1);
    }

    #[test]
    fn displacement_is_capped_by_class_priority() {
        let mut full = Node::new("n1", Resources::new(1000, 1000));
        full.allocate(5, Resources::new(900, 900));
        let db = db_with(vec![full]);

        // Priority 3 cannot displace a level-5 allocation.
        let reqs = PodRequirements::new(Resources::new(500, 500)).with_priority(3);
        let mut jctxs = vec![jctx("a", reqs)];
        let mut txn = db.txn(true);
        assert!(!db.schedule_many_with_txn(&mut txn, &mut jctxs).unwrap());
    }

    #[test]
    fn selector_restricts_candidates() {
        let db = db_with(vec![
            Node::new("n1", Resources::new(1000, 1000)).with_label("zone", "a"),
            Node::new("n2", Resources::new(1000, 1000)).with_label("zone", "b"),
        ]);
        let reqs =
            PodRequirements::new(Resources::new(100, 100)).with_node_selector("zone", "b");
        let mut jctxs = vec![jctx("a", reqs)];
        let mut txn = db.txn(true);
        assert!(db.schedule_many_with_txn(&mut txn, &mut jctxs).unwrap());
        let pctx = jctxs[0].pod_scheduling_context.as_ref().unwrap();
        assert_eq!(pctx.node_id.as_deref(), Some("n2"));
    }

    #[test]
    fn affinity_breaks_ties() {
        let db = db_with(vec![
            Node::new("n1", Resources::new(1000, 1000)),
            Node::new("n2", Resources::new(1000, 1000)).with_label("disk", "ssd"),
        ]);
        let reqs = PodRequirements::new(Resources::new(100, 100)).with_affinity("disk", "ssd");
        let mut jctxs = vec![jctx("a", reqs)];
        let mut txn = db.txn(true);
        assert!(db.schedule_many_with_txn(&mut txn, &mut jctxs).unwrap());
        let pctx = jctxs[0].pod_scheduling_context.as_ref().unwrap();
        assert_eq!(pctx.node_id.as_deref(), Some("n2"));
    }

    #[test]
    fn should_fail_members_are_not_attempted() {
        let db = db_with(vec![Node::new("n1", Resources::new(1000, 1000))]);
        let mut member = jctx("a", PodRequirements::new(Resources::new(100, 100)));
        member.should_fail = true;
        let mut jctxs = vec![member];
        let mut txn = db.txn(true);
        assert!(db.schedule_many_with_txn(&mut txn, &mut jctxs).unwrap());
        assert!(jctxs[0].pod_scheduling_context.is_none());
    }

    #[test]
    fn read_only_txn_rejects_writes() {
        let db = db_with(vec![Node::new("n1", Resources::new(1000, 1000))]);
        let mut jctxs = vec![jctx("a", PodRequirements::new(Resources::new(100, 100)))];
        let mut txn = db.txn(false);
        assert!(matches!(
            db.schedule_many_with_txn(&mut txn, &mut jctxs),
            Err(NodeDbError::ReadOnlyTxn)
        ));
        assert!(matches!(txn.commit(), Err(NodeDbError::ReadOnlyTxn)));
    }

    #[test]
    fn label_index_tracks_values() {
        let db = db_with(vec![
            Node::new("n1", Resources::new(1, 1)).with_label("zone", "b"),
            Node::new("n2", Resources::new(1, 1)).with_label("zone", "a"),
        ]);
        assert_eq!(
            db.indexed_node_label_values("zone"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(db.indexed_node_label_values("rack"), None);
    }

    #[test]
    fn committed_placements_are_visible_to_later_txns() {
        let db = db_with(vec![Node::new("n1", Resources::new(500, 500))]);
        let mut first = vec![jctx("a", PodRequirements::new(Resources::new(400, 400)))];
        let mut txn = db.txn(true);
        assert!(db.schedule_many_with_txn(&mut txn, &mut first).unwrap());
        txn.commit().unwrap();

        let mut second = vec![jctx("b", PodRequirements::new(Resources::new(400, 400)))];
        let mut txn = db.txn(true);
        assert!(!db.schedule_many_with_txn(&mut txn, &mut second).unwrap());
    }
}
