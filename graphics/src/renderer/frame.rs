//! Per-frame state handed to the application between begin and end.

use std::sync::Arc;

use crate::draw_list::{DrawListUpload, DrawView};
use crate::graph::{BufferAccessMode, ColorAttachment, GraphicsPass, RenderGraph};
use crate::pipeline::PipelineRef;
use crate::resources::{Buffer, Texture};
use crate::swapchain::SurfaceImage;

/// Name of the pass the [`OverlayRecorder`] fills.
pub const OVERLAY_PASS: &str = "overlay";

/// Draws appended on top of the finished frame, typically UI.
///
/// The recorded pass loads the presentation image and is declared after
/// every other pass, so it is ordered after all earlier surface writes.
#[derive(Debug)]
pub struct OverlayRecorder {
    pass: GraphicsPass,
}

impl OverlayRecorder {
    pub(crate) fn new() -> Self {
        Self {
            pass: GraphicsPass::new(OVERLAY_PASS).with_color(ColorAttachment::from_surface()),
        }
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineRef) {
        self.pass.set_pipeline(pipeline);
    }

    /// Bind a buffer the overlay reads.
    pub fn bind_buffer(&mut self, buffer: Arc<Buffer>) {
        self.pass.bind_buffer(buffer, BufferAccessMode::StorageRead);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.pass.add_draw(vertex_count, instance_count, 0);
    }

    pub fn draw_indirect(&mut self, args: Arc<Buffer>, offset: u64) {
        self.pass.add_draw_indirect(args, offset);
    }

    pub fn draw_count(&self) -> usize {
        self.pass.draw_count()
    }

    pub fn is_empty(&self) -> bool {
        self.pass.draw_count() == 0
    }

    /// The overlay pass, if anything was recorded.
    pub(crate) fn finish(self) -> Option<GraphicsPass> {
        (!self.is_empty()).then_some(self.pass)
    }
}

/// Everything the application may touch while building one frame.
#[derive(Debug)]
pub struct FrameContext {
    pub(crate) graph: RenderGraph,
    pub(crate) overlay: OverlayRecorder,
    pub(crate) image: SurfaceImage,
    pub(crate) uploads: Vec<DrawListUpload>,
    pub(crate) depth: Arc<Texture>,
    pub(crate) globals: Arc<Buffer>,
    pub(crate) frame_index: u64,
    pub(crate) frame_slot: usize,
    pub(crate) delta_time: f32,
}

impl FrameContext {
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut RenderGraph {
        &mut self.graph
    }

    pub fn overlay(&mut self) -> &mut OverlayRecorder {
        &mut self.overlay
    }

    /// Frames started since the renderer was created, starting at 1.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn frame_slot(&self) -> usize {
        self.frame_slot
    }

    /// Size of the presentation image acquired for this frame.
    pub fn surface_size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// GPU copy of the committed draw list for `view`, if the view is active.
    pub fn draw_list(&self, view: DrawView) -> Option<&DrawListUpload> {
        self.uploads.iter().find(|upload| upload.view == view)
    }

    pub fn depth_target(&self) -> &Arc<Texture> {
        &self.depth
    }

    pub fn globals_buffer(&self) -> &Arc<Buffer> {
        &self.globals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LoadOp;

    #[test]
    fn test_empty_overlay_adds_no_pass() {
        let overlay = OverlayRecorder::new();
        assert!(overlay.is_empty());
        assert!(overlay.finish().is_none());
    }

    #[test]
    fn test_overlay_loads_surface() {
        let mut overlay = OverlayRecorder::new();
        overlay.draw(6, 1);
        overlay.draw(3, 2);
        assert_eq!(overlay.draw_count(), 2);

        let pass = overlay.finish().unwrap();
        assert_eq!(pass.name(), OVERLAY_PASS);
        let color = pass.color().unwrap();
        assert!(color.is_surface());
        assert_eq!(color.load_op, LoadOp::Load);
    }
}
