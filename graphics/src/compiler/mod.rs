//! Render graph compilation.
//!
//! Compiling a [`RenderGraph`] produces a [`CompiledGraph`]: the pass order
//! and the barriers to place between passes.
//!
//! 1. **Hazard analysis** - walk passes in declaration order and track, per
//!    resource, the last writer and the readers since that write. A read
//!    after a write, a write after reads, and a write after a write each add
//!    an edge from the earlier pass to the later one and a [`Barrier`] in
//!    front of the later one.
//! 2. **Topological sort** - Kahn's algorithm over hazard edges plus the
//!    graph's explicit dependencies. Ties are broken by declaration order.
//! 3. **Cycle detection** - explicit dependencies that contradict each other
//!    or the declaration order of conflicting passes are reported as
//!    [`GraphError::CyclicDependency`].
//!
//! Passes that only read a resource, or touch disjoint resources, get neither
//! an edge nor a barrier.

use std::collections::{BTreeSet, HashMap};

use sandpiper_core::pool::Poolable;

use crate::graph::{PassHandle, RenderGraph, ResourceKey};

/// Kind of data hazard a barrier resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hazard {
    ReadAfterWrite,
    WriteAfterRead,
    WriteAfterWrite,
}

/// Synchronization placed before `after` so it observes `before`'s access
/// to `resource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Barrier {
    pub resource: ResourceKey,
    pub before: PassHandle,
    pub after: PassHandle,
    pub hazard: Hazard,
}

/// A compiled render graph ready for execution.
///
/// Passes are executed sequentially in [`pass_order`](Self::pass_order)
/// within a single submission.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CompiledGraph {
    pass_order: Vec<PassHandle>,
    barriers: Vec<Barrier>,
}

impl CompiledGraph {
    /// Pass execution order respecting every dependency.
    pub fn pass_order(&self) -> &[PassHandle] {
        &self.pass_order
    }

    pub fn barriers(&self) -> &[Barrier] {
        &self.barriers
    }

    /// Barriers that must complete before `pass` starts.
    pub fn barriers_before(&self, pass: PassHandle) -> impl Iterator<Item = &Barrier> + '_ {
        self.barriers.iter().filter(move |b| b.after == pass)
    }

    pub fn pass_count(&self) -> usize {
        self.pass_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pass_order.is_empty()
    }
}

impl Poolable for CompiledGraph {
    fn new_empty() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.pass_order.clear();
        self.barriers.clear();
    }
}

/// Errors that can occur during graph construction or compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The graph contains a cyclic dependency.
    #[error("render graph contains cyclic dependency")]
    CyclicDependency,

    /// A handle that does not belong to the graph was used.
    #[error("invalid pass handle: {0:?}")]
    InvalidPassHandle(PassHandle),
}

#[derive(Default)]
struct ResourceState {
    last_writer: Option<PassHandle>,
    readers: Vec<PassHandle>,
}

/// Compile a render graph into an execution plan.
pub fn compile(graph: &RenderGraph) -> Result<CompiledGraph, GraphError> {
    let mut result = CompiledGraph::default();
    compile_into(graph, &mut result)?;
    Ok(result)
}

/// Compile into an existing [`CompiledGraph`], reusing its allocations.
pub fn compile_into(graph: &RenderGraph, target: &mut CompiledGraph) -> Result<(), GraphError> {
    target.reset();
    let n = graph.pass_count();
    if n == 0 {
        return Ok(());
    }

    for &(dependent, dependency) in graph.edges() {
        for handle in [dependent, dependency] {
            if handle.index() >= n {
                return Err(GraphError::InvalidPassHandle(handle));
            }
        }
    }

    // Hazard analysis in declaration order. A set keeps edges unique.
    let mut edges: BTreeSet<(PassHandle, PassHandle)> = graph.edges().iter().copied().collect();
    let mut states: HashMap<ResourceKey, ResourceState> = HashMap::new();

    for (index, pass) in graph.passes().iter().enumerate() {
        let handle = PassHandle::new(index as u32);

        for (key, intent) in pass.infer_resource_usage().intents() {
            let state = states.entry(key).or_default();
            let mut hazard = None;

            if let Some(writer) = state.last_writer {
                if intent.read {
                    hazard = Some((writer, Hazard::ReadAfterWrite));
                } else if intent.write && state.readers.is_empty() {
                    hazard = Some((writer, Hazard::WriteAfterWrite));
                }
                if intent.read || intent.write {
                    edges.insert((handle, writer));
                }
            }

            if intent.write {
                for &reader in state.readers.iter().filter(|&&r| r != handle) {
                    edges.insert((handle, reader));
                    hazard.get_or_insert((reader, Hazard::WriteAfterRead));
                }
                state.last_writer = Some(handle);
                state.readers.clear();
            } else if intent.read {
                state.readers.push(handle);
            }

            if let Some((before, hazard)) = hazard {
                target.barriers.push(Barrier {
                    resource: key,
                    before,
                    after: handle,
                    hazard,
                });
            }
        }
    }

    topological_sort(n, &edges, &mut target.pass_order)?;
    log::trace!(
        "Compiled render graph: {} passes, {} barriers",
        n,
        target.barriers.len()
    );
    Ok(())
}

/// Kahn's algorithm. Edge `(dependent, dependency)` orders `dependency` first.
fn topological_sort(
    n: usize,
    edges: &BTreeSet<(PassHandle, PassHandle)>,
    order: &mut Vec<PassHandle>,
) -> Result<(), GraphError> {
    let mut in_degree = vec![0u32; n];
    let mut dependents: Vec<Vec<PassHandle>> = vec![Vec::new(); n];
    for &(dependent, dependency) in edges {
        in_degree[dependent.index()] += 1;
        dependents[dependency.index()].push(dependent);
    }

    // Ready set ordered by declaration index
    let mut ready: BTreeSet<PassHandle> = (0..n as u32)
        .map(PassHandle::new)
        .filter(|h| in_degree[h.index()] == 0)
        .collect();

    while let Some(handle) = ready.pop_first() {
        order.push(handle);
        for &dependent in &dependents[handle.index()] {
            in_degree[dependent.index()] -= 1;
            if in_degree[dependent.index()] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != n {
        order.clear();
        return Err(GraphError::CyclicDependency);
    }
    Ok(())
}
