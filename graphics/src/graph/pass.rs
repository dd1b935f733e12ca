//! Render pass types.

use std::sync::Arc;

use crate::pipeline::PipelineRef;
use crate::resources::Buffer;

use super::resource_usage::{
    BufferAccessMode, PassResourceUsage, SurfaceAccess, TextureAccessMode,
};
use super::target::{ColorAttachment, DepthAttachment, RenderTarget};

/// Kind of GPU work a pass performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Graphics,
    Compute,
    Transfer,
}

/// A pass in the render graph.
///
/// Passes describe units of GPU work with their resource dependencies.
/// Each variant has its own configuration specific to that pass type.
#[derive(Debug)]
pub enum Pass {
    /// Graphics pass (vertex/fragment shaders, rasterization).
    Graphics(GraphicsPass),
    /// Transfer pass (buffer writes and copies).
    Transfer(TransferPass),
    /// Compute pass (compute shaders).
    Compute(ComputePass),
}

impl Pass {
    /// Get the pass name.
    pub fn name(&self) -> &str {
        match self {
            Pass::Graphics(p) => p.name(),
            Pass::Transfer(p) => p.name(),
            Pass::Compute(p) => p.name(),
        }
    }

    pub fn kind(&self) -> PassKind {
        match self {
            Pass::Graphics(_) => PassKind::Graphics,
            Pass::Transfer(_) => PassKind::Transfer,
            Pass::Compute(_) => PassKind::Compute,
        }
    }

    /// Get this pass as a graphics pass, if it is one.
    pub fn as_graphics(&self) -> Option<&GraphicsPass> {
        if let Pass::Graphics(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a mutable graphics pass, if it is one.
    pub fn as_graphics_mut(&mut self) -> Option<&mut GraphicsPass> {
        if let Pass::Graphics(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a transfer pass, if it is one.
    pub fn as_transfer(&self) -> Option<&TransferPass> {
        if let Pass::Transfer(p) = self {
            Some(p)
        } else {
            None
        }
    }

    /// Get this pass as a compute pass, if it is one.
    pub fn as_compute(&self) -> Option<&ComputePass> {
        if let Pass::Compute(p) = self {
            Some(p)
        } else {
            None
        }
    }

    pub fn is_graphics(&self) -> bool {
        matches!(self, Pass::Graphics(_))
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, Pass::Transfer(_))
    }

    pub fn is_compute(&self) -> bool {
        matches!(self, Pass::Compute(_))
    }

    /// Declared usages plus the usages implied by the pass configuration
    /// (attachments, indirect arguments, transfer operations).
    pub fn infer_resource_usage(&self) -> PassResourceUsage {
        match self {
            Pass::Graphics(p) => p.infer_resource_usage(),
            Pass::Transfer(p) => p.infer_resource_usage(),
            Pass::Compute(p) => p.infer_resource_usage(),
        }
    }
}

// ============================================================================
// Graphics Pass
// ============================================================================

/// One draw recorded into a graphics pass.
#[derive(Debug, Clone)]
pub enum Draw {
    Direct {
        vertex_count: u32,
        instance_count: u32,
        first_instance: u32,
    },
    /// Arguments read from a buffer of
    /// [`DrawIndirectArgs`](crate::types::DrawIndirectArgs).
    Indirect { args: Arc<Buffer>, offset: u64 },
}

/// Rasterization work into one color and an optional depth attachment.
#[derive(Debug)]
pub struct GraphicsPass {
    name: String,
    pipeline: Option<PipelineRef>,
    color: Option<ColorAttachment>,
    depth: Option<DepthAttachment>,
    bindings: Vec<Arc<Buffer>>,
    draws: Vec<Draw>,
    usage: PassResourceUsage,
}

impl GraphicsPass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipeline: None,
            color: None,
            depth: None,
            bindings: Vec::new(),
            draws: Vec::new(),
            usage: PassResourceUsage::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineRef) {
        self.pipeline = Some(pipeline);
    }

    pub fn with_pipeline(mut self, pipeline: PipelineRef) -> Self {
        self.set_pipeline(pipeline);
        self
    }

    pub fn pipeline(&self) -> Option<&PipelineRef> {
        self.pipeline.as_ref()
    }

    pub fn set_color(&mut self, attachment: ColorAttachment) {
        self.color = Some(attachment);
    }

    pub fn with_color(mut self, attachment: ColorAttachment) -> Self {
        self.set_color(attachment);
        self
    }

    pub fn color(&self) -> Option<&ColorAttachment> {
        self.color.as_ref()
    }

    pub fn with_depth(mut self, attachment: DepthAttachment) -> Self {
        self.depth = Some(attachment);
        self
    }

    pub fn depth(&self) -> Option<&DepthAttachment> {
        self.depth.as_ref()
    }

    /// Bind `buffer` to the next binding slot of group 0 and declare the access.
    pub fn bind_buffer(&mut self, buffer: Arc<Buffer>, access: BufferAccessMode) {
        self.usage.add_buffer(buffer.clone(), access);
        self.bindings.push(buffer);
    }

    pub fn with_binding(mut self, buffer: Arc<Buffer>, access: BufferAccessMode) -> Self {
        self.bind_buffer(buffer, access);
        self
    }

    pub fn bindings(&self) -> &[Arc<Buffer>] {
        &self.bindings
    }

    /// Declare an access to a resource that is not bound through this pass.
    pub fn usage_mut(&mut self) -> &mut PassResourceUsage {
        &mut self.usage
    }

    pub fn add_draw(&mut self, vertex_count: u32, instance_count: u32, first_instance: u32) {
        self.draws.push(Draw::Direct {
            vertex_count,
            instance_count,
            first_instance,
        });
    }

    pub fn add_draw_indirect(&mut self, args: Arc<Buffer>, offset: u64) {
        self.draws.push(Draw::Indirect { args, offset });
    }

    pub fn draws(&self) -> &[Draw] {
        &self.draws
    }

    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    pub fn infer_resource_usage(&self) -> PassResourceUsage {
        let mut usage = self.usage.clone();

        if let Some(color) = &self.color {
            match &color.target {
                RenderTarget::Surface => usage.set_surface_access(if color.load_op.is_load() {
                    SurfaceAccess::ReadWrite
                } else {
                    SurfaceAccess::Write
                }),
                RenderTarget::Texture(texture) => {
                    usage.add_texture(texture.clone(), TextureAccessMode::RenderTargetWrite)
                }
            }
        }
        if let Some(depth) = &self.depth {
            usage.add_texture(depth.texture.clone(), TextureAccessMode::DepthStencilWrite);
        }
        for draw in &self.draws {
            if let Draw::Indirect { args, .. } = draw {
                usage.add_buffer(args.clone(), BufferAccessMode::IndirectRead);
            }
        }

        usage
    }
}

// ============================================================================
// Compute Pass
// ============================================================================

/// Compute dispatches sharing one program and binding set.
#[derive(Debug)]
pub struct ComputePass {
    name: String,
    pipeline: Option<PipelineRef>,
    bindings: Vec<Arc<Buffer>>,
    dispatches: Vec<[u32; 3]>,
    usage: PassResourceUsage,
}

impl ComputePass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipeline: None,
            bindings: Vec::new(),
            dispatches: Vec::new(),
            usage: PassResourceUsage::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineRef) {
        self.pipeline = Some(pipeline);
    }

    pub fn with_pipeline(mut self, pipeline: PipelineRef) -> Self {
        self.set_pipeline(pipeline);
        self
    }

    pub fn pipeline(&self) -> Option<&PipelineRef> {
        self.pipeline.as_ref()
    }

    pub fn bind_buffer(&mut self, buffer: Arc<Buffer>, access: BufferAccessMode) {
        self.usage.add_buffer(buffer.clone(), access);
        self.bindings.push(buffer);
    }

    pub fn with_binding(mut self, buffer: Arc<Buffer>, access: BufferAccessMode) -> Self {
        self.bind_buffer(buffer, access);
        self
    }

    pub fn bindings(&self) -> &[Arc<Buffer>] {
        &self.bindings
    }

    pub fn usage_mut(&mut self) -> &mut PassResourceUsage {
        &mut self.usage
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.dispatches.push([x, y, z]);
    }

    pub fn with_dispatch(mut self, x: u32, y: u32, z: u32) -> Self {
        self.dispatch(x, y, z);
        self
    }

    pub fn dispatches(&self) -> &[[u32; 3]] {
        &self.dispatches
    }

    pub fn infer_resource_usage(&self) -> PassResourceUsage {
        self.usage.clone()
    }
}

// ============================================================================
// Transfer Pass
// ============================================================================

/// A buffer operation executed by a transfer pass.
#[derive(Debug, Clone)]
pub enum TransferOperation {
    /// Upload bytes from the CPU.
    WriteBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: Arc<Buffer>,
        src_offset: u64,
        dst: Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    },
}

/// Buffer uploads and copies.
#[derive(Debug)]
pub struct TransferPass {
    name: String,
    operations: Vec<TransferOperation>,
    usage: PassResourceUsage,
}

impl TransferPass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
            usage: PassResourceUsage::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write_buffer(&mut self, buffer: Arc<Buffer>, offset: u64, data: impl Into<Vec<u8>>) {
        self.operations.push(TransferOperation::WriteBuffer {
            buffer,
            offset,
            data: data.into(),
        });
    }

    pub fn with_write(mut self, buffer: Arc<Buffer>, offset: u64, data: impl Into<Vec<u8>>) -> Self {
        self.write_buffer(buffer, offset, data);
        self
    }

    /// Copy `size` bytes between buffers.
    pub fn copy_buffer(
        &mut self,
        src: Arc<Buffer>,
        src_offset: u64,
        dst: Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    ) {
        self.operations.push(TransferOperation::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    pub fn with_copy(mut self, src: Arc<Buffer>, dst: Arc<Buffer>, size: u64) -> Self {
        self.copy_buffer(src, 0, dst, 0, size);
        self
    }

    pub fn operations(&self) -> &[TransferOperation] {
        &self.operations
    }

    pub fn has_transfers(&self) -> bool {
        !self.operations.is_empty()
    }

    pub fn infer_resource_usage(&self) -> PassResourceUsage {
        let mut usage = self.usage.clone();
        for operation in &self.operations {
            match operation {
                TransferOperation::WriteBuffer { buffer, .. } => {
                    usage.add_buffer(buffer.clone(), BufferAccessMode::TransferWrite)
                }
                TransferOperation::CopyBuffer { src, dst, .. } => {
                    usage.add_buffer(src.clone(), BufferAccessMode::TransferRead);
                    usage.add_buffer(dst.clone(), BufferAccessMode::TransferWrite);
                }
            }
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::{DeviceCapabilities, GraphicsDevice};
    use crate::graph::resource_usage::{AccessIntent, ResourceKey};
    use crate::types::{BufferDescriptor, BufferUsage};

    fn device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(
            Arc::new(DummyBackend::new()),
            "pass-test",
            DeviceCapabilities::default(),
        )
    }

    #[test]
    fn test_surface_clear_is_write_only() {
        let pass = GraphicsPass::new("main")
            .with_color(ColorAttachment::from_surface().with_clear_color(0.0, 0.0, 0.0, 1.0));
        let usage = pass.infer_resource_usage();
        assert_eq!(usage.surface_access, Some(SurfaceAccess::Write));
    }

    #[test]
    fn test_surface_load_reads() {
        let pass = GraphicsPass::new("overlay").with_color(ColorAttachment::from_surface());
        let usage = pass.infer_resource_usage();
        assert_eq!(usage.surface_access, Some(SurfaceAccess::ReadWrite));
    }

    #[test]
    fn test_indirect_draw_declares_args() {
        let device = device();
        let args = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::INDIRECT))
            .unwrap();
        let mut pass = GraphicsPass::new("geometry");
        pass.add_draw_indirect(args.clone(), 0);

        let intents = pass.infer_resource_usage().intents();
        assert_eq!(
            intents,
            vec![(
                ResourceKey::Buffer(args.id()),
                AccessIntent {
                    read: true,
                    write: false
                }
            )]
        );
    }

    #[test]
    fn test_copy_reads_source_writes_destination() {
        let device = device();
        let src = device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::COPY_SRC))
            .unwrap();
        let dst = device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::COPY_DST))
            .unwrap();
        let pass = TransferPass::new("copy").with_copy(src.clone(), dst.clone(), 64);

        let intents = pass.infer_resource_usage().intents();
        assert_eq!(intents.len(), 2);
        assert!(intents[0].1.read && !intents[0].1.write);
        assert!(intents[1].1.write && !intents[1].1.read);
        assert!(pass.has_transfers());
    }
}
