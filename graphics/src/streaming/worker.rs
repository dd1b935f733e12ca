//! Asset worker threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use sandpiper_core::asset::AssetId;
use sandpiper_core::profiling::{profile_scope, set_thread_name};

use crate::config::RetryPolicy;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureUsage};

use super::{AssetHandle, AssetPayload, AssetResource, AssetSource, AssetState, ResidentAsset};

/// State shared by the streamer and its workers.
pub(super) struct Shared {
    pub device: Arc<GraphicsDevice>,
    pub source: Arc<dyn AssetSource>,
    pub retry: RetryPolicy,
    pub completions: Sender<AssetId>,
    pub shutting_down: AtomicBool,
    next_slot: AtomicU32,
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Shared {
    pub fn new(
        device: Arc<GraphicsDevice>,
        source: Arc<dyn AssetSource>,
        retry: RetryPolicy,
        completions: Sender<AssetId>,
    ) -> Self {
        Self {
            device,
            source,
            retry,
            completions,
            shutting_down: AtomicBool::new(false),
            next_slot: AtomicU32::new(0),
            pending: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    pub fn job_queued(&self) {
        *self.pending.lock() += 1;
    }

    pub fn job_finished(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Block until no job is queued or running, or `deadline` passes.
    pub fn wait_idle(&self, deadline: Instant) -> bool {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            if self.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

/// Worker loop. Ends when every job sender is dropped.
pub(super) fn run(index: usize, shared: Arc<Shared>, jobs: Receiver<AssetHandle>) {
    set_thread_name!("asset worker");
    log::trace!("Asset worker {} started", index);
    for handle in jobs.iter() {
        process(&shared, &handle);
        shared.job_finished();
    }
    log::trace!("Asset worker {} stopped", index);
}

fn process(shared: &Shared, handle: &AssetHandle) {
    profile_scope!("asset_load");

    if !handle.transition(AssetState::Requested, AssetState::Loading) {
        return;
    }

    let id = handle.id();
    let attempts = shared.retry.attempts();
    for attempt in 1..=attempts {
        handle.set_attempts(attempt);
        match load_once(shared, id) {
            Ok(asset) => {
                let slot = asset.slot;
                if handle.publish(asset) {
                    log::trace!("{} resident in slot {}", id, slot);
                    let _ = shared.completions.send(id);
                }
                return;
            }
            Err(e) => {
                log::warn!("Loading {} failed (attempt {}/{}): {}", id, attempt, attempts, e);
                handle.set_error(e.to_string());
                if shared.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                if attempt < attempts {
                    std::thread::sleep(shared.retry.backoff(attempt));
                }
            }
        }
    }

    if handle.transition(AssetState::Loading, AssetState::LoadFailed) {
        log::warn!("{} marked load-failed after {} attempts", id, handle.attempts());
    }
}

fn load_once(shared: &Shared, id: AssetId) -> Result<ResidentAsset, GraphicsError> {
    let payload = shared
        .source
        .load(id)
        .map_err(|e| GraphicsError::AssetLoadFailure {
            asset: id,
            message: e.to_string(),
        })?;

    let (resource, vertex_count) = upload(&shared.device, id, &payload)?;
    Ok(ResidentAsset {
        id,
        slot: shared.next_slot.fetch_add(1, Ordering::Relaxed),
        resource,
        vertex_count,
    })
}

fn upload(
    device: &Arc<GraphicsDevice>,
    id: AssetId,
    payload: &AssetPayload,
) -> Result<(AssetResource, u32), GraphicsError> {
    match payload {
        AssetPayload::Mesh {
            vertices,
            vertex_count,
        } => {
            let buffer = device.create_buffer(
                &BufferDescriptor::new(
                    vertices.len() as u64,
                    BufferUsage::VERTEX | BufferUsage::STORAGE | BufferUsage::COPY_DST,
                )
                .with_label(format!("{id} mesh")),
            )?;
            device.write_buffer(&buffer, 0, vertices)?;
            Ok((AssetResource::Mesh(buffer), *vertex_count))
        }
        AssetPayload::Texture {
            width,
            height,
            format,
            pixels,
        } => {
            let texture = device.create_texture(
                &TextureDescriptor::new_2d(
                    *width,
                    *height,
                    *format,
                    TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
                )
                .with_label(format!("{id} texture")),
            )?;
            device.write_texture(&texture, pixels)?;
            Ok((AssetResource::Texture(texture), 0))
        }
    }
}
