//! Parallel execution of the target graph.
//!
//! Nodes are walked wave by wave without precomputing levels: every node
//! is spawned on the worker pool the moment its last prerequisite
//! completes.
//!
//! # How It Works
//!
//! 1. Reject cyclic graphs and reset every node's resolved count
//! 2. Spawn every registered leaf inside a `rayon` scope
//! 3. When a node's visitor succeeds, resolve one prerequisite on each
//!    dependent; the dependent that becomes ready is spawned in turn
//! 4. When a visitor fails, record the failure and stop that branch; other
//!    branches keep running
//! 5. The scope returns once all spawned work has drained; collected
//!    failures are raised as one aggregate error
//!
//! # Example
//!
//! ```
//! use rivet::graph::ExecutionGraph;
//!
//! let mut graph = ExecutionGraph::new().with_jobs(2);
//! let compile = graph.get_node("compile");
//! let link = graph.get_node("link");
//! graph.register_dependant_node(compile, link);
//! graph.register_leaves();
//!
//! let stats = graph.run(|name| {
//!     println!("running {}", name);
//!     Ok(())
//! }).unwrap();
//! assert_eq!(stats.visited, 2);
//! ```

use super::node::{ExecutionNode, NodeId};
use crate::error::{BuildError, RunFailure};
use crate::location::Location;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stack size of each worker; visitors expand nested properties recursively.
const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Default number of parallel jobs (uses available parallelism).
pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Directed acyclic graph of named nodes, walked in parallel.
#[derive(Debug)]
pub struct ExecutionGraph {
    nodes: Vec<ExecutionNode>,
    index: HashMap<String, NodeId>,
    leaves: Vec<NodeId>,
    jobs: usize,
}

impl Default for ExecutionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self { nodes: Vec::new(), index: HashMap::new(), leaves: Vec::new(), jobs: default_jobs() }
    }

    /// Set the number of worker threads.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Get the number of worker threads.
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Return the node called `name`, creating it on first reference.
    pub fn get_node(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(ExecutionNode::new(name));
        self.index.insert(name.to_string(), id);
        id
    }

    /// Look up a node without creating it.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// Access a node.
    pub fn node(&self, id: NodeId) -> &ExecutionNode {
        &self.nodes[id.0]
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &ExecutionNode> {
        self.nodes.iter()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registered start points.
    pub fn leaves(&self) -> &[NodeId] {
        &self.leaves
    }

    /// Add the edge `prerequisite -> dependent`: `dependent` runs only after
    /// `prerequisite` succeeded.
    pub fn register_dependant_node(&mut self, prerequisite: NodeId, dependent: NodeId) {
        self.nodes[prerequisite.0].add_dependent(dependent);
        self.nodes[dependent.0].add_prerequisite();
    }

    /// Mark a node without prerequisites as a start point. Idempotent.
    pub fn register_leaf_node(&mut self, id: NodeId) -> Result<(), BuildError> {
        let node = &self.nodes[id.0];
        if !node.is_leaf() {
            return Err(BuildError::NotALeaf {
                name: node.name().to_string(),
                prerequisites: node.prerequisite_count(),
            });
        }
        if !self.leaves.contains(&id) {
            self.leaves.push(id);
        }
        Ok(())
    }

    /// Register every node that has no prerequisites as a start point.
    pub fn register_leaves(&mut self) {
        for (i, node) in self.nodes.iter().enumerate() {
            let id = NodeId(i);
            if node.is_leaf() && !self.leaves.contains(&id) {
                self.leaves.push(id);
            }
        }
    }

    /// Fail with [`BuildError::CircularDependency`] if the graph has a cycle.
    ///
    /// A node on a cycle can never have all prerequisites resolved, so the
    /// walk would silently skip its whole branch.
    pub fn check_acyclic(&self) -> Result<(), BuildError> {
        let mut pending: Vec<usize> = self.nodes.iter().map(|n| n.prerequisite_count()).collect();
        let mut ready: Vec<usize> = (0..self.nodes.len()).filter(|&i| pending[i] == 0).collect();
        let mut done = vec![false; self.nodes.len()];
        let mut processed = 0;

        while let Some(i) = ready.pop() {
            done[i] = true;
            processed += 1;
            for dependent in self.nodes[i].dependents() {
                pending[dependent.0] -= 1;
                if pending[dependent.0] == 0 {
                    ready.push(dependent.0);
                }
            }
        }

        if processed == self.nodes.len() {
            return Ok(());
        }

        Err(BuildError::CircularDependency { chain: self.find_cycle(&done), location: Location::Unknown })
    }

    /// Walk backwards over unfinished prerequisites until a node repeats.
    ///
    /// Every unfinished node has at least one unfinished prerequisite, so the
    /// walk always closes a cycle. The chain reads in "depends on" order.
    fn find_cycle(&self, done: &[bool]) -> Vec<String> {
        let mut prerequisites: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for dependent in node.dependents() {
                prerequisites[dependent.0].push(i);
            }
        }

        let Some(mut current) = done.iter().position(|d| !d) else {
            return Vec::new();
        };
        let mut path: Vec<usize> = Vec::new();

        loop {
            if let Some(start) = path.iter().position(|&p| p == current) {
                let mut chain: Vec<String> =
                    path[start..].iter().map(|&i| self.nodes[i].name().to_string()).collect();
                chain.push(self.nodes[current].name().to_string());
                return chain;
            }
            path.push(current);

            match prerequisites[current].iter().copied().filter(|&p| !done[p]).min() {
                Some(next) => current = next,
                None => return Vec::new(),
            }
        }
    }

    /// Visit every node reachable from the leaves, each exactly once and
    /// only after all its prerequisites succeeded.
    ///
    /// Blocks until all scheduled work has finished. If any visitor failed
    /// (returned an error or panicked), returns [`BuildError::Run`] headlined
    /// by the first recorded failure.
    pub fn run<F>(&mut self, visitor: F) -> Result<RunStats, BuildError>
    where
        F: Fn(&str) -> Result<(), BuildError> + Sync,
    {
        self.check_acyclic()?;
        for node in &mut self.nodes {
            node.prepare_for_run();
        }

        if self.leaves.is_empty() {
            debug!("no leaves registered, nothing to run");
            return Ok(RunStats { workers: self.jobs, ..RunStats::default() });
        }

        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("rivet-worker-{}", i))
            .stack_size(WORKER_STACK_SIZE)
            .build()?;

        debug!(nodes = self.nodes.len(), leaves = self.leaves.len(), jobs = self.jobs, "starting run");

        let run = RunState::new(&visitor);
        let graph: &ExecutionGraph = self;
        pool.scope(|scope| {
            for &leaf in &graph.leaves {
                graph.schedule(scope, &run, leaf);
            }
        });

        debug_assert_eq!(run.active.load(Ordering::Acquire), 0);
        let stats = run.stats(self.jobs, start.elapsed());
        info!("{}", stats);

        match RunFailure::from_failures(run.into_failures()) {
            Some(failure) => Err(failure.with_stats(stats).into()),
            None => Ok(stats),
        }
    }

    fn schedule<'s, 'v: 's, F>(
        &'s self,
        scope: &rayon::Scope<'s>,
        run: &'s RunState<'v, F>,
        id: NodeId,
    ) where
        F: Fn(&str) -> Result<(), BuildError> + Sync,
    {
        run.active.fetch_add(1, Ordering::AcqRel);

        scope.spawn(move |scope| {
            self.visit(scope, run, id);
            run.active.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn visit<'s, 'v: 's, F>(&'s self, scope: &rayon::Scope<'s>, run: &'s RunState<'v, F>, id: NodeId)
    where
        F: Fn(&str) -> Result<(), BuildError> + Sync,
    {
        let node = &self.nodes[id.0];
        debug!(node = node.name(), "visiting");

        let running = run.running.fetch_add(1, Ordering::AcqRel) + 1;
        run.peak.fetch_max(running, Ordering::AcqRel);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (run.visitor)(node.name())))
            .unwrap_or_else(|payload| Err(BuildError::Panic { message: panic_message(&*payload) }));
        run.running.fetch_sub(1, Ordering::AcqRel);
        run.visited.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(()) => {
                for &dependent in node.dependents() {
                    if self.nodes[dependent.0].resolve_prerequisite() {
                        self.schedule(scope, run, dependent);
                    }
                }
            }
            Err(err) => {
                warn!(node = node.name(), error = %err, "node failed");
                run.record_failure(BuildError::in_target(node.name(), &Location::Unknown, err));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Shared state of one run.
struct RunState<'v, F> {
    visitor: &'v F,
    failures: Mutex<Vec<BuildError>>,
    /// Nodes spawned but not yet finished
    active: AtomicUsize,
    /// Visitors currently executing
    running: AtomicUsize,
    peak: AtomicUsize,
    visited: AtomicUsize,
}

impl<'v, F> RunState<'v, F> {
    fn new(visitor: &'v F) -> Self {
        Self {
            visitor,
            failures: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            visited: AtomicUsize::new(0),
        }
    }

    fn record_failure(&self, failure: BuildError) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).push(failure);
    }

    fn stats(&self, workers: usize, duration: Duration) -> RunStats {
        let failed = self.failures.lock().unwrap_or_else(PoisonError::into_inner).len();
        RunStats {
            visited: self.visited.load(Ordering::Acquire),
            failed,
            workers,
            max_parallelism: self.peak.load(Ordering::Acquire),
            duration,
        }
    }

    fn into_failures(self) -> Vec<BuildError> {
        self.failures.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Statistics about one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Nodes whose visitor was invoked
    pub visited: usize,
    /// Nodes whose visitor failed
    pub failed: usize,
    /// Worker threads in the pool
    pub workers: usize,
    /// Most visitors running at the same time
    pub max_parallelism: usize,
    /// Wall-clock duration of the run
    #[serde(rename = "duration_ms", serialize_with = "crate::build::result::serialize_millis")]
    pub duration: Duration,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nodes visited ({} failed) on {} workers, max {} parallel, in {:?}",
            self.visited, self.failed, self.workers, self.max_parallelism, self.duration
        )
    }
}
