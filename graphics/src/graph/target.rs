//! Render target types for graphics passes.

use std::sync::Arc;

use crate::resources::Texture;
use crate::types::ClearColor;

/// Operation to perform when loading a color attachment at the start of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LoadOp {
    /// Clear the attachment with a color.
    Clear(ClearColor),
    /// Load the existing contents of the attachment.
    #[default]
    Load,
}

impl LoadOp {
    /// Create a clear operation with a color value.
    pub fn clear_color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Clear(ClearColor::rgba(r, g, b, a))
    }

    /// Whether the previous contents are read.
    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load)
    }
}

/// What a color attachment renders into.
#[derive(Debug, Clone)]
pub enum RenderTarget {
    /// The presentation image acquired for the frame.
    Surface,
    Texture(Arc<Texture>),
}

/// A color attachment for a graphics pass.
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub target: RenderTarget,
    pub load_op: LoadOp,
}

impl ColorAttachment {
    /// Render into the frame's presentation image, keeping its contents.
    pub fn from_surface() -> Self {
        Self {
            target: RenderTarget::Surface,
            load_op: LoadOp::Load,
        }
    }

    pub fn from_texture(texture: Arc<Texture>) -> Self {
        Self {
            target: RenderTarget::Texture(texture),
            load_op: LoadOp::Load,
        }
    }

    /// Clear to the given color at the start of the pass.
    pub fn with_clear_color(mut self, r: f32, g: f32, b: f32, a: f32) -> Self {
        self.load_op = LoadOp::clear_color(r, g, b, a);
        self
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    pub fn is_surface(&self) -> bool {
        matches!(self.target, RenderTarget::Surface)
    }
}

/// A depth attachment for a graphics pass.
#[derive(Debug, Clone)]
pub struct DepthAttachment {
    pub texture: Arc<Texture>,
    /// Clear value, or `None` to keep existing contents.
    pub clear: Option<f32>,
}

impl DepthAttachment {
    pub fn from_texture(texture: Arc<Texture>) -> Self {
        Self {
            texture,
            clear: None,
        }
    }

    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.clear = Some(depth);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_attachment_defaults_to_load() {
        let attachment = ColorAttachment::from_surface();
        assert!(attachment.is_surface());
        assert!(attachment.load_op.is_load());

        let cleared = attachment.with_clear_color(0.0, 0.0, 0.0, 1.0);
        assert_eq!(cleared.load_op, LoadOp::Clear(ClearColor::BLACK));
    }
}
