//! Resource usage declarations for automatic barrier generation.
//!
//! Every pass declares how it touches buffers, textures and the presentation
//! surface. The graph compiler folds these into per-resource read/write
//! intents and derives ordering edges and barriers from them.

use std::fmt;
use std::sync::Arc;

use crate::resources::{Buffer, ResourceId, Texture};

/// How a texture is used within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureAccessMode {
    /// Written as color render target (color attachment).
    RenderTargetWrite,
    /// Written as depth/stencil render target (depth attachment).
    DepthStencilWrite,
    /// Read-only depth/stencil (sampling + depth test).
    DepthStencilReadOnly,
    /// Sampled in a shader (texture read).
    ShaderRead,
    /// Read/write as storage texture.
    StorageReadWrite,
    /// Source of a copy/transfer operation.
    TransferRead,
    /// Destination of a copy/transfer operation.
    TransferWrite,
}

impl TextureAccessMode {
    /// Check if this access mode is a write operation.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::RenderTargetWrite
                | Self::DepthStencilWrite
                | Self::StorageReadWrite
                | Self::TransferWrite
        )
    }

    /// Check if this access mode is a read operation.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::DepthStencilReadOnly
                | Self::ShaderRead
                | Self::StorageReadWrite
                | Self::TransferRead
        )
    }
}

/// How a buffer is used within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferAccessMode {
    VertexBuffer,
    IndexBuffer,
    /// Read as uniform buffer (constant data).
    UniformRead,
    StorageRead,
    StorageWrite,
    StorageReadWrite,
    /// Read as indirect draw arguments.
    IndirectRead,
    TransferRead,
    TransferWrite,
}

impl BufferAccessMode {
    /// Check if this access mode is a write operation.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::StorageWrite | Self::StorageReadWrite | Self::TransferWrite
        )
    }

    /// Check if this access mode is a read operation.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::VertexBuffer
                | Self::IndexBuffer
                | Self::UniformRead
                | Self::StorageRead
                | Self::StorageReadWrite
                | Self::IndirectRead
                | Self::TransferRead
        )
    }
}

/// How the presentation surface is accessed by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceAccess {
    /// Write only (clear load op).
    Write,
    /// Read existing contents then write (load op).
    ReadWrite,
}

impl SurfaceAccess {
    pub fn is_read(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Identity of a resource tracked by the graph compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    Buffer(ResourceId),
    Texture(ResourceId),
    /// The frame's presentation image.
    Surface,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(id) => write!(f, "buffer {id}"),
            Self::Texture(id) => write!(f, "texture {id}"),
            Self::Surface => write!(f, "surface"),
        }
    }
}

/// Combined read/write intent of one pass on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessIntent {
    pub read: bool,
    pub write: bool,
}

/// A texture usage declaration.
#[derive(Debug, Clone)]
pub struct TextureUsageDecl {
    pub texture: Arc<Texture>,
    pub access: TextureAccessMode,
}

/// A buffer usage declaration.
#[derive(Debug, Clone)]
pub struct BufferUsageDecl {
    pub buffer: Arc<Buffer>,
    pub access: BufferAccessMode,
}

/// Resource usage declarations for a pass.
#[derive(Debug, Default, Clone)]
pub struct PassResourceUsage {
    pub texture_usages: Vec<TextureUsageDecl>,
    pub buffer_usages: Vec<BufferUsageDecl>,
    /// Surface access mode, if the pass renders to the presentation image.
    pub surface_access: Option<SurfaceAccess>,
}

impl PassResourceUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a texture usage declaration using builder pattern.
    pub fn with_texture(mut self, texture: Arc<Texture>, access: TextureAccessMode) -> Self {
        self.add_texture(texture, access);
        self
    }

    pub fn add_texture(&mut self, texture: Arc<Texture>, access: TextureAccessMode) {
        self.texture_usages.push(TextureUsageDecl { texture, access });
    }

    /// Add a buffer usage declaration using builder pattern.
    pub fn with_buffer(mut self, buffer: Arc<Buffer>, access: BufferAccessMode) -> Self {
        self.add_buffer(buffer, access);
        self
    }

    pub fn add_buffer(&mut self, buffer: Arc<Buffer>, access: BufferAccessMode) {
        self.buffer_usages.push(BufferUsageDecl { buffer, access });
    }

    /// Set the surface access mode. A read-write access wins over write-only.
    pub fn set_surface_access(&mut self, access: SurfaceAccess) {
        self.surface_access = match (self.surface_access, access) {
            (Some(SurfaceAccess::ReadWrite), _) => Some(SurfaceAccess::ReadWrite),
            _ => Some(access),
        };
    }

    /// Merge another resource usage into this one.
    pub fn merge(&mut self, other: PassResourceUsage) {
        self.texture_usages.extend(other.texture_usages);
        self.buffer_usages.extend(other.buffer_usages);
        if let Some(access) = other.surface_access {
            self.set_surface_access(access);
        }
    }

    /// Check if any usage is a write operation.
    pub fn has_writes(&self) -> bool {
        self.texture_usages.iter().any(|u| u.access.is_write())
            || self.buffer_usages.iter().any(|u| u.access.is_write())
            || self.surface_access.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.texture_usages.is_empty()
            && self.buffer_usages.is_empty()
            && self.surface_access.is_none()
    }

    /// Fold all declarations into one intent per resource, in first-seen order.
    pub fn intents(&self) -> Vec<(ResourceKey, AccessIntent)> {
        let mut intents: Vec<(ResourceKey, AccessIntent)> = Vec::new();
        let mut record = |key: ResourceKey, read: bool, write: bool| {
            match intents.iter_mut().find(|(k, _)| *k == key) {
                Some((_, intent)) => {
                    intent.read |= read;
                    intent.write |= write;
                }
                None => intents.push((key, AccessIntent { read, write })),
            }
        };

        for usage in &self.buffer_usages {
            record(
                ResourceKey::Buffer(usage.buffer.id()),
                usage.access.is_read(),
                usage.access.is_write(),
            );
        }
        for usage in &self.texture_usages {
            record(
                ResourceKey::Texture(usage.texture.id()),
                usage.access.is_read(),
                usage.access.is_write(),
            );
        }
        if let Some(access) = self.surface_access {
            record(ResourceKey::Surface, access.is_read(), true);
        }

        intents
    }
}
