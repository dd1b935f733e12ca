//! Backend-facing command stream.
//!
//! The renderer lowers a compiled [`RenderGraph`](crate::graph::RenderGraph)
//! into a [`CommandList`]: passes in execution order with every resource
//! already resolved to a backend handle. Draws bound to a null pipeline never
//! reach this stage.

use crate::graph::{LoadOp, PassKind};

use super::{GpuBuffer, GpuProgram, GpuTexture};

/// A single recorded GPU command.
#[derive(Debug, Clone)]
pub enum GpuCommand {
    /// Write bytes into a buffer at the position of this command in the stream.
    WriteBuffer {
        buffer: GpuBuffer,
        offset: u64,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: GpuBuffer,
        src_offset: u64,
        dst: GpuBuffer,
        dst_offset: u64,
        size: u64,
    },
    Draw {
        program: GpuProgram,
        /// Buffers bound to group 0, binding `i` for element `i`.
        bindings: Vec<GpuBuffer>,
        vertex_count: u32,
        instance_count: u32,
        first_instance: u32,
    },
    DrawIndirect {
        program: GpuProgram,
        bindings: Vec<GpuBuffer>,
        args: GpuBuffer,
        offset: u64,
    },
    Dispatch {
        program: GpuProgram,
        bindings: Vec<GpuBuffer>,
        workgroups: [u32; 3],
    },
}

impl GpuCommand {
    pub fn is_draw(&self) -> bool {
        matches!(self, Self::Draw { .. } | Self::DrawIndirect { .. })
    }

    pub fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch { .. })
    }
}

/// Color attachment of a recorded graphics pass.
#[derive(Debug, Clone)]
pub enum RecordedAttachment {
    /// The presentation image acquired for this frame.
    Surface { load: LoadOp },
    Texture { texture: GpuTexture, load: LoadOp },
}

/// Depth attachment of a recorded graphics pass.
#[derive(Debug, Clone)]
pub struct RecordedDepth {
    pub texture: GpuTexture,
    /// Clear value, or `None` to load existing contents.
    pub clear: Option<f32>,
}

/// One pass of a [`CommandList`].
#[derive(Debug, Clone)]
pub struct RecordedPass {
    pub name: String,
    pub kind: PassKind,
    /// Number of barriers the graph placed before this pass.
    pub barriers: usize,
    pub color: Option<RecordedAttachment>,
    pub depth: Option<RecordedDepth>,
    pub commands: Vec<GpuCommand>,
}

impl RecordedPass {
    pub fn new(name: impl Into<String>, kind: PassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            barriers: 0,
            color: None,
            depth: None,
            commands: Vec::new(),
        }
    }

    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }

    pub fn dispatch_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_dispatch()).count()
    }

    /// Whether this pass renders into the presentation image.
    pub fn targets_surface(&self) -> bool {
        matches!(self.color, Some(RecordedAttachment::Surface { .. }))
    }
}

/// Ordered list of passes ready for submission.
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    passes: Vec<RecordedPass>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pass: RecordedPass) {
        self.passes.push(pass);
    }

    pub fn passes(&self) -> &[RecordedPass] {
        &self.passes
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Whether any pass renders into the presentation image.
    pub fn uses_surface(&self) -> bool {
        self.passes.iter().any(RecordedPass::targets_surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_counts() {
        let mut pass = RecordedPass::new("geometry", PassKind::Graphics);
        pass.color = Some(RecordedAttachment::Surface { load: LoadOp::Load });
        pass.commands.push(GpuCommand::Draw {
            program: GpuProgram::Dummy(1),
            bindings: Vec::new(),
            vertex_count: 3,
            instance_count: 1,
            first_instance: 0,
        });
        pass.commands.push(GpuCommand::Dispatch {
            program: GpuProgram::Dummy(2),
            bindings: Vec::new(),
            workgroups: [1, 1, 1],
        });

        assert_eq!(pass.draw_count(), 1);
        assert_eq!(pass.dispatch_count(), 1);

        let mut list = CommandList::new();
        assert!(!list.uses_surface());
        list.push(pass);
        assert!(list.uses_surface());
        assert_eq!(list.len(), 1);
    }
}
