//! Schedulable node of the execution graph.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Index of a node inside its [`super::ExecutionGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position of the node in the graph's arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One unit of work: how many prerequisites it waits for and which nodes
/// wait for it.
///
/// The prerequisite count only changes while the graph is being built
/// (`&mut` access). The resolved count is shared by every predecessor that
/// completes during a run and is therefore atomic.
#[derive(Debug)]
pub struct ExecutionNode {
    name: String,
    prerequisites: usize,
    resolved: AtomicUsize,
    dependents: Vec<NodeId>,
}

impl ExecutionNode {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), prerequisites: 0, resolved: AtomicUsize::new(0), dependents: vec![] }
    }

    /// Unique name of the node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of declared prerequisites.
    pub fn prerequisite_count(&self) -> usize {
        self.prerequisites
    }

    /// Prerequisites satisfied so far in the current run.
    pub fn resolved_count(&self) -> usize {
        self.resolved.load(Ordering::Acquire)
    }

    /// Nodes that list this node as a prerequisite, in registration order.
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }

    /// Whether the node can start without waiting for anything.
    pub fn is_leaf(&self) -> bool {
        self.prerequisites == 0
    }

    /// Count one more prerequisite.
    pub fn add_prerequisite(&mut self) {
        self.prerequisites += 1;
    }

    /// Record `dependent` as waiting for this node.
    ///
    /// This is one half of an edge; the graph also calls
    /// [`ExecutionNode::add_prerequisite`] on the dependent.
    pub fn add_dependent(&mut self, dependent: NodeId) {
        self.dependents.push(dependent);
    }

    /// Mark one prerequisite as satisfied.
    ///
    /// Returns `true` for exactly one caller per run: the one whose
    /// increment reaches the prerequisite count.
    pub fn resolve_prerequisite(&self) -> bool {
        let resolved = self.resolved.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(
            resolved <= self.prerequisites,
            "node '{}' resolved {} of {} prerequisites",
            self.name,
            resolved,
            self.prerequisites
        );
        resolved == self.prerequisites
    }

    /// Reset the resolved count before a run.
    pub fn prepare_for_run(&mut self) {
        *self.resolved.get_mut() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_leaf() {
        let node = ExecutionNode::new("init");
        assert_eq!(node.name(), "init");
        assert!(node.is_leaf());
        assert_eq!(node.resolved_count(), 0);
        assert!(node.dependents().is_empty());
    }

    #[test]
    fn test_resolve_reaches_count_once() {
        let mut node = ExecutionNode::new("link");
        node.add_prerequisite();
        node.add_prerequisite();
        node.add_prerequisite();

        assert!(!node.resolve_prerequisite());
        assert!(!node.resolve_prerequisite());
        assert!(node.resolve_prerequisite());
        assert_eq!(node.resolved_count(), 3);
    }

    #[test]
    fn test_prepare_for_run_resets() {
        let mut node = ExecutionNode::new("link");
        node.add_prerequisite();
        assert!(node.resolve_prerequisite());

        node.prepare_for_run();
        assert_eq!(node.resolved_count(), 0);
        assert!(node.resolve_prerequisite());
    }

    #[test]
    fn test_concurrent_resolution_has_single_winner() {
        const PREDECESSORS: usize = 64;

        for _ in 0..20 {
            let mut node = ExecutionNode::new("join");
            for _ in 0..PREDECESSORS {
                node.add_prerequisite();
            }

            let winners = AtomicUsize::new(0);
            std::thread::scope(|s| {
                for _ in 0..8 {
                    s.spawn(|| {
                        for _ in 0..PREDECESSORS / 8 {
                            if node.resolve_prerequisite() {
                                winners.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                }
            });

            assert_eq!(winners.load(Ordering::SeqCst), 1);
            assert_eq!(node.resolved_count(), PREDECESSORS);
        }
    }

    #[test]
    fn test_node_id_index() {
        assert_eq!(NodeId(7).index(), 7);
        assert!(NodeId(1) < NodeId(2));
    }
}
