//! Per-view draw lists, double-buffered.
//!
//! Each frame the renderer rebuilds the write side of every enabled view from
//! the scene with [`DrawListStore::begin_write`], and after submission hands
//! it to the GPU side with [`DrawListStore::commit_and_swap`]. Geometry passes
//! read the committed list through the buffer returned by
//! [`DrawListStore::upload`].
//!
//! Only entities whose mesh, and material when they have one, are resident
//! get a draw command. Assets still loading and assets that failed to load
//! are skipped alike.

mod double_buffer;

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use sandpiper_core::asset::AssetId;
use sandpiper_core::scene::{EntityIndex, Scene};

use crate::context::GpuContext;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::streaming::ResidencyView;
use crate::types::{BufferDescriptor, BufferUsage};

pub use double_buffer::{BufferSlot, DoubleBuffer};

/// Camera view a draw list is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawView {
    Main,
    Observer,
}

impl DrawView {
    pub const ALL: [DrawView; 2] = [DrawView::Main, DrawView::Observer];

    fn index(self) -> usize {
        match self {
            Self::Main => 0,
            Self::Observer => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Main => "main draw list",
            Self::Observer => "observer draw list",
        }
    }
}

/// One entity to draw, resolved against resident assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    pub entity: EntityIndex,
    pub mesh: AssetId,
    pub material: Option<AssetId>,
    /// Residency slot of the mesh.
    pub mesh_slot: u32,
    pub material_slot: Option<u32>,
    pub vertex_count: u32,
}

/// GPU layout of a [`DrawCommand`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct GpuDrawCommand {
    pub entity_index: u32,
    pub mesh_slot: u32,
    /// [`GpuDrawCommand::NO_MATERIAL`] when the entity has no material.
    pub material_slot: u32,
    pub vertex_count: u32,
}

impl GpuDrawCommand {
    pub const NO_MATERIAL: u32 = u32::MAX;
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

impl From<&DrawCommand> for GpuDrawCommand {
    fn from(command: &DrawCommand) -> Self {
        Self {
            entity_index: command.entity.get(),
            mesh_slot: command.mesh_slot,
            material_slot: command.material_slot.unwrap_or(Self::NO_MATERIAL),
            vertex_count: command.vertex_count,
        }
    }
}

/// Identity of a list handed to the GPU side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadySlot {
    pub view: DrawView,
    pub slot: BufferSlot,
}

/// GPU copy of a committed draw list.
#[derive(Debug, Clone)]
pub struct DrawListUpload {
    pub view: DrawView,
    pub slot: BufferSlot,
    pub buffer: Arc<Buffer>,
    /// Number of [`GpuDrawCommand`]s written at offset 0.
    pub count: u32,
}

#[derive(Debug, Default)]
struct ViewLists {
    commands: DoubleBuffer<Vec<DrawCommand>>,
    /// GPU buffers indexed by [`BufferSlot::index`].
    gpu: [Option<Arc<Buffer>>; 2],
}

/// Owner of every view's draw lists and the entity index bound.
#[derive(Debug, Default)]
pub struct DrawListStore {
    views: [ViewLists; 2],
    observer_enabled: bool,
    max_entity_index: u32,
}

impl DrawListStore {
    /// Entries a freshly created GPU draw-list buffer holds.
    pub const MIN_GPU_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_observer_enabled(&mut self, enabled: bool) {
        self.observer_enabled = enabled;
    }

    pub fn observer_enabled(&self) -> bool {
        self.observer_enabled
    }

    /// Views the renderer builds this frame.
    pub fn active_views(&self) -> impl Iterator<Item = DrawView> + '_ {
        DrawView::ALL
            .into_iter()
            .filter(|view| *view == DrawView::Main || self.observer_enabled)
    }

    /// Bound on live entity indices as of the last [`begin_write`](Self::begin_write).
    pub fn max_entity_index(&self) -> u32 {
        self.max_entity_index
    }

    /// Rebuild the write side of `view` from `scene`.
    pub fn begin_write(
        &mut self,
        view: DrawView,
        scene: &Scene,
        residency: &dyn ResidencyView,
    ) -> &mut Vec<DrawCommand> {
        self.max_entity_index = scene.index_bound();

        let list = self.views[view.index()].commands.current_write_mut();
        list.clear();
        list.extend(
            scene
                .iter()
                .filter_map(|(entity, data)| resolve(entity, data.mesh?, data.material, residency)),
        );

        log::trace!(
            "Built {} with {} commands (entity bound {})",
            view.label(),
            list.len(),
            self.max_entity_index
        );
        list
    }

    /// Hand the just-written list of `view` to the GPU side.
    pub fn commit_and_swap(&mut self, view: DrawView) -> ReadySlot {
        let slot = self.views[view.index()].commands.swap();
        ReadySlot { view, slot }
    }

    /// The list last committed for GPU read.
    pub fn ready_commands(&self, view: DrawView) -> &[DrawCommand] {
        self.views[view.index()].commands.current_read()
    }

    /// The list currently being written.
    pub fn pending_commands(&self, view: DrawView) -> &[DrawCommand] {
        self.views[view.index()].commands.current_write()
    }

    /// Pack the committed list of `view` into its slot's GPU buffer.
    ///
    /// The buffer grows to the next power of two when the list outgrows it.
    pub fn upload(
        &mut self,
        context: &GpuContext,
        view: DrawView,
    ) -> Result<DrawListUpload, GraphicsError> {
        let lists = &mut self.views[view.index()];
        let slot = lists.commands.read_slot();
        let packed: Vec<GpuDrawCommand> = lists
            .commands
            .current_read()
            .iter()
            .map(GpuDrawCommand::from)
            .collect();
        let needed = packed.len().max(1) as u64 * GpuDrawCommand::SIZE;

        let device = context.device();
        let gpu = &mut lists.gpu[slot.index()];
        let reusable = gpu
            .as_ref()
            .filter(|buffer| buffer.size() >= needed && !buffer.is_released())
            .cloned();
        let buffer = match reusable {
            Some(buffer) => buffer,
            None => {
                if let Some(old) = gpu.take() {
                    device.destroy_buffer(&old);
                }
                let capacity = packed
                    .len()
                    .max(Self::MIN_GPU_CAPACITY)
                    .next_power_of_two() as u64
                    * GpuDrawCommand::SIZE;
                let buffer = device.create_buffer(
                    &BufferDescriptor::new(capacity, BufferUsage::STORAGE | BufferUsage::COPY_DST)
                        .with_label(context.unique_label(view.label())),
                )?;
                *gpu = Some(buffer.clone());
                buffer
            }
        };

        if !packed.is_empty() {
            device.write_buffer(&buffer, 0, bytemuck::cast_slice(&packed))?;
        }

        Ok(DrawListUpload {
            view,
            slot,
            buffer,
            count: packed.len() as u32,
        })
    }

    /// Release every GPU draw-list buffer.
    pub fn release(&mut self, device: &GraphicsDevice) {
        for lists in &mut self.views {
            for buffer in lists.gpu.iter_mut().filter_map(Option::take) {
                device.destroy_buffer(&buffer);
            }
        }
    }
}

fn resolve(
    entity: EntityIndex,
    mesh: AssetId,
    material: Option<AssetId>,
    residency: &dyn ResidencyView,
) -> Option<DrawCommand> {
    let mesh_slot = residency.slot(mesh)?;
    let material_slot = match material {
        Some(material) => Some(residency.slot(material)?),
        None => None,
    };
    Some(DrawCommand {
        entity,
        mesh,
        material,
        mesh_slot,
        material_slot,
        vertex_count: residency.vertex_count(mesh).unwrap_or(0),
    })
}
