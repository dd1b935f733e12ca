//! Per-frame task graph.
//!
//! Passes are added in declaration order together with how they read and
//! write buffers, textures and the presentation surface. Compiling the graph
//! derives ordering edges from those intents (read-after-write,
//! write-after-read, write-after-write), adds explicit dependencies, sorts the
//! passes topologically and places a barrier in front of every pass that
//! consumes or overwrites another pass's result.
//!
//! # Example
//!
//! ```
//! use sandpiper_graphics::graph::{ColorAttachment, GraphicsPass, RenderGraph, TransferPass};
//!
//! let mut graph = RenderGraph::new();
//! let upload = graph.add_transfer_pass(TransferPass::new("upload"));
//! let main = graph.add_graphics_pass(
//!     GraphicsPass::new("main").with_color(ColorAttachment::from_surface()),
//! );
//! graph.add_dependency(main, upload).unwrap();
//!
//! let compiled = graph.compile().unwrap();
//! assert_eq!(compiled.pass_order(), &[upload, main]);
//! ```

mod pass;
mod resource_usage;
mod target;

pub use pass::{ComputePass, Draw, GraphicsPass, Pass, PassKind, TransferOperation, TransferPass};
pub use resource_usage::{
    AccessIntent, BufferAccessMode, BufferUsageDecl, PassResourceUsage, ResourceKey,
    SurfaceAccess, TextureAccessMode, TextureUsageDecl,
};
pub use target::{ColorAttachment, DepthAttachment, LoadOp, RenderTarget};

use crate::compiler::{self, CompiledGraph, GraphError};

/// Handle to a pass in the render graph.
///
/// `PassHandle` is `Copy` and cheap to pass around. It is only valid within
/// the `RenderGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassHandle(u32);

impl PassHandle {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The render graph describes a frame's GPU work.
#[derive(Debug, Default)]
pub struct RenderGraph {
    passes: Vec<Pass>,
    /// Explicit dependency edges stored as (dependent, dependency) pairs.
    edges: Vec<(PassHandle, PassHandle)>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, pass: Pass) -> PassHandle {
        let index = self.passes.len() as u32;
        self.passes.push(pass);
        PassHandle::new(index)
    }

    /// Add a graphics pass to the graph.
    ///
    /// The pass should be fully configured before adding.
    pub fn add_graphics_pass(&mut self, pass: GraphicsPass) -> PassHandle {
        self.push(Pass::Graphics(pass))
    }

    pub fn add_compute_pass(&mut self, pass: ComputePass) -> PassHandle {
        self.push(Pass::Compute(pass))
    }

    pub fn add_transfer_pass(&mut self, pass: TransferPass) -> PassHandle {
        self.push(Pass::Transfer(pass))
    }

    /// Require `dependent` to execute after `dependency`.
    pub fn add_dependency(
        &mut self,
        dependent: PassHandle,
        dependency: PassHandle,
    ) -> Result<(), GraphError> {
        for handle in [dependent, dependency] {
            if handle.index() >= self.passes.len() {
                return Err(GraphError::InvalidPassHandle(handle));
            }
        }
        if dependent == dependency {
            return Err(GraphError::CyclicDependency);
        }

        if !self.edges.contains(&(dependent, dependency)) {
            self.edges.push((dependent, dependency));
        }
        Ok(())
    }

    /// Explicit dependencies of a pass.
    pub fn dependencies(&self, handle: PassHandle) -> impl Iterator<Item = PassHandle> + '_ {
        self.edges
            .iter()
            .filter(move |&&(dependent, _)| dependent == handle)
            .map(|&(_, dependency)| dependency)
    }

    pub(crate) fn edges(&self) -> &[(PassHandle, PassHandle)] {
        &self.edges
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn pass(&self, handle: PassHandle) -> Option<&Pass> {
        self.passes.get(handle.index())
    }

    pub fn pass_mut(&mut self, handle: PassHandle) -> Option<&mut Pass> {
        self.passes.get_mut(handle.index())
    }

    /// Find a pass by name. The first match wins.
    pub fn find(&self, name: &str) -> Option<PassHandle> {
        self.passes
            .iter()
            .position(|p| p.name() == name)
            .map(|i| PassHandle::new(i as u32))
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Order the passes and derive barriers.
    pub fn compile(&self) -> Result<CompiledGraph, GraphError> {
        compiler::compile(self)
    }

    /// Clear all passes from the graph.
    pub fn clear(&mut self) {
        self.passes.clear();
        self.edges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_passes() {
        let mut graph = RenderGraph::new();
        graph.add_transfer_pass(TransferPass::new("upload"));
        graph.add_compute_pass(ComputePass::new("simulation"));
        let main = graph.add_graphics_pass(GraphicsPass::new("main"));

        assert_eq!(graph.pass_count(), 3);
        assert!(graph.passes()[0].is_transfer());
        assert!(graph.passes()[1].is_compute());
        assert_eq!(graph.pass(main).unwrap().kind(), PassKind::Graphics);
        assert_eq!(graph.find("simulation").map(PassHandle::index), Some(1));
    }

    #[test]
    fn test_add_dependency_dedups() {
        let mut graph = RenderGraph::new();
        let a = graph.add_graphics_pass(GraphicsPass::new("geometry"));
        let b = graph.add_graphics_pass(GraphicsPass::new("lighting"));

        graph.add_dependency(b, a).unwrap();
        graph.add_dependency(b, a).unwrap();

        assert_eq!(graph.dependencies(b).collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn test_add_dependency_rejects_bad_handles() {
        let mut graph = RenderGraph::new();
        let a = graph.add_graphics_pass(GraphicsPass::new("a"));
        let bogus = PassHandle::new(7);

        assert_eq!(
            graph.add_dependency(a, bogus),
            Err(GraphError::InvalidPassHandle(bogus))
        );
        assert_eq!(graph.add_dependency(a, a), Err(GraphError::CyclicDependency));
    }

    #[test]
    fn test_clear() {
        let mut graph = RenderGraph::new();
        graph.add_graphics_pass(GraphicsPass::new("test_pass"));
        graph.clear();
        assert!(graph.is_empty());
    }
}
