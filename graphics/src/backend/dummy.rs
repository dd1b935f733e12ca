//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't touch GPU hardware. Buffers are backed by host memory
//! and submissions execute their transfer commands in order, so tests can
//! observe data flowing through a frame. Each submission leaves a
//! [`SubmissionReport`] behind, and a small set of fault switches lets tests
//! provoke surface invalidation, submit failures and device loss.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::graph::PassKind;
use crate::pipeline::ProgramDescriptor;
use crate::swapchain::{SurfaceConfiguration, SurfaceTarget};
use crate::types::{BufferDescriptor, SamplerDescriptor, TextureDescriptor, TextureFormat};

use super::{
    CommandList, GpuBackend, GpuBuffer, GpuCommand, GpuFence, GpuProgram, GpuSampler, GpuSurface,
    GpuSurfaceImage, GpuTexture,
};

const DEFAULT_MAX_BUFFER_SIZE: u64 = 256 * 1024 * 1024;
const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

/// What happened to one pass of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub name: String,
    pub kind: PassKind,
    pub draw_calls: usize,
    pub dispatches: usize,
    pub barriers: usize,
}

/// Record of one successful [`GpuBackend::submit`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    pub passes: Vec<PassReport>,
    /// Size of the presentation image rendered to, if any.
    pub surface_size: Option<(u32, u32)>,
}

impl SubmissionReport {
    pub fn pass(&self, name: &str) -> Option<&PassReport> {
        self.passes.iter().find(|p| p.name == name)
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn total_draw_calls(&self) -> usize {
        self.passes.iter().map(|p| p.draw_calls).sum()
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    next_handle: AtomicU64,
    buffers: Mutex<HashMap<u64, Vec<u8>>>,
    textures: Mutex<HashMap<u64, usize>>,
    samplers: Mutex<HashMap<u64, ()>>,
    surface_formats: Mutex<Vec<TextureFormat>>,
    surface_size: Mutex<Option<(u32, u32)>>,
    reports: Mutex<Vec<SubmissionReport>>,
    presented: AtomicU64,
    fail_next_submit: AtomicBool,
    fail_next_present: AtomicBool,
    device_lost: AtomicBool,
    surface_outdated: AtomicBool,
    fail_surface_creation: AtomicBool,
    max_buffer_size: u64,
    max_texture_dimension: u32,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            buffers: Mutex::new(HashMap::new()),
            textures: Mutex::new(HashMap::new()),
            samplers: Mutex::new(HashMap::new()),
            surface_formats: Mutex::new(vec![
                TextureFormat::Bgra8UnormSrgb,
                TextureFormat::Bgra8Unorm,
                TextureFormat::Rgba8Unorm,
            ]),
            surface_size: Mutex::new(None),
            reports: Mutex::new(Vec::new()),
            presented: AtomicU64::new(0),
            fail_next_submit: AtomicBool::new(false),
            fail_next_present: AtomicBool::new(false),
            device_lost: AtomicBool::new(false),
            surface_outdated: AtomicBool::new(false),
            fail_surface_creation: AtomicBool::new(false),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
        }
    }

    /// Override the reported maximum buffer size.
    pub fn with_max_buffer_size(mut self, size: u64) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Replace the list of formats surfaces report as supported.
    pub fn set_surface_formats(&self, formats: Vec<TextureFormat>) {
        *self.surface_formats.lock() = formats;
    }

    /// Make the next `submit` fail with `FrameSubmitFailure`.
    pub fn fail_next_submit(&self) {
        self.fail_next_submit.store(true, Ordering::Release);
    }

    /// Make the next `present` fail with `SurfaceOutdated` after the frame
    /// was already submitted.
    pub fn fail_next_present(&self) {
        self.fail_next_present.store(true, Ordering::Release);
    }

    /// Mark the device as lost. Every later submission, acquire and resource
    /// creation fails with `DeviceLost`.
    pub fn lose_device(&self) {
        self.device_lost.store(true, Ordering::Release);
    }

    /// Make acquire fail with `SurfaceOutdated` until the surface is reconfigured.
    pub fn outdate_surface(&self) {
        self.surface_outdated.store(true, Ordering::Release);
    }

    /// Make `create_surface` fail.
    pub fn fail_surface_creation(&self) {
        self.fail_surface_creation.store(true, Ordering::Release);
    }

    /// Reports of every successful submission so far.
    pub fn reports(&self) -> Vec<SubmissionReport> {
        self.reports.lock().clone()
    }

    pub fn last_report(&self) -> Option<SubmissionReport> {
        self.reports.lock().last().cloned()
    }

    pub fn submission_count(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn presented_count(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }

    /// Number of buffers, textures and samplers not yet destroyed.
    pub fn live_allocations(&self) -> usize {
        self.buffers.lock().len() + self.textures.lock().len() + self.samplers.lock().len()
    }

    /// Current size of the configured surface.
    pub fn surface_size(&self) -> Option<(u32, u32)> {
        *self.surface_size.lock()
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn check_device(&self) -> Result<(), GraphicsError> {
        if self.device_lost.load(Ordering::Acquire) {
            Err(GraphicsError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn write_memory(
        buffers: &mut HashMap<u64, Vec<u8>>,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let memory = dummy_memory(buffers, buffer)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > memory.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                memory.len()
            )));
        }
        memory[start..end].copy_from_slice(data);
        Ok(())
    }

    fn execute(&self, commands: &CommandList) -> Result<Vec<PassReport>, GraphicsError> {
        let mut buffers = self.buffers.lock();
        let mut passes = Vec::with_capacity(commands.len());

        for pass in commands.passes() {
            log::trace!(
                "DummyBackend: executing pass '{}' ({} commands, {} barriers)",
                pass.name,
                pass.commands.len(),
                pass.barriers
            );

            for command in &pass.commands {
                match command {
                    GpuCommand::WriteBuffer {
                        buffer,
                        offset,
                        data,
                    } => Self::write_memory(&mut buffers, buffer, *offset, data)?,
                    GpuCommand::CopyBuffer {
                        src,
                        src_offset,
                        dst,
                        dst_offset,
                        size,
                    } => {
                        let source = dummy_memory(&mut buffers, src)?;
                        let start = *src_offset as usize;
                        let end = start + *size as usize;
                        if end > source.len() {
                            return Err(GraphicsError::InvalidParameter(format!(
                                "copy of {size} bytes at offset {src_offset} exceeds source size {}",
                                source.len()
                            )));
                        }
                        let bytes = source[start..end].to_vec();
                        Self::write_memory(&mut buffers, dst, *dst_offset, &bytes)?;
                    }
                    GpuCommand::Draw { .. }
                    | GpuCommand::DrawIndirect { .. }
                    | GpuCommand::Dispatch { .. } => {}
                }
            }

            passes.push(PassReport {
                name: pass.name.clone(),
                kind: pass.kind,
                draw_calls: pass.draw_count(),
                dispatches: pass.dispatch_count(),
                barriers: pass.barriers,
            });
        }

        Ok(passes)
    }
}

fn dummy_memory<'a>(
    buffers: &'a mut HashMap<u64, Vec<u8>>,
    buffer: &GpuBuffer,
) -> Result<&'a mut Vec<u8>, GraphicsError> {
    #[allow(irrefutable_let_patterns)]
    let GpuBuffer::Dummy(id) = buffer else {
        return Err(GraphicsError::InvalidParameter(
            "buffer does not belong to the dummy backend".into(),
        ));
    };
    buffers
        .get_mut(id)
        .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown buffer handle {id}")))
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn max_buffer_size(&self) -> u64 {
        self.max_buffer_size
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        self.check_device()?;
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let id = self.next_handle();
        self.buffers
            .lock()
            .insert(id, vec![0u8; descriptor.size as usize]);
        Ok(GpuBuffer::Dummy(id))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError> {
        self.check_device()?;
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );
        let id = self.next_handle();
        self.textures.lock().insert(id, 0);
        Ok(GpuTexture::Dummy(id))
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError> {
        self.check_device()?;
        log::trace!("DummyBackend: creating sampler {:?}", descriptor.label);
        let id = self.next_handle();
        self.samplers.lock().insert(id, ());
        Ok(GpuSampler::Dummy(id))
    }

    fn create_program(
        &self,
        descriptor: &ProgramDescriptor<'_>,
    ) -> Result<GpuProgram, GraphicsError> {
        self.check_device()?;
        log::trace!(
            "DummyBackend: creating program '{}' ({} stages)",
            descriptor.label,
            descriptor.stages.len()
        );
        Ok(GpuProgram::Dummy(self.next_handle()))
    }

    #[allow(irrefutable_let_patterns)]
    fn destroy_buffer(&self, buffer: &GpuBuffer) {
        if let GpuBuffer::Dummy(id) = buffer {
            self.buffers.lock().remove(id);
        }
    }

    #[allow(irrefutable_let_patterns)]
    fn destroy_texture(&self, texture: &GpuTexture) {
        if let GpuTexture::Dummy(id) = texture {
            self.textures.lock().remove(id);
        }
    }

    #[allow(irrefutable_let_patterns)]
    fn destroy_sampler(&self, sampler: &GpuSampler) {
        if let GpuSampler::Dummy(id) = sampler {
            self.samplers.lock().remove(id);
        }
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        self.check_device()?;
        log::trace!(
            "DummyBackend: write_buffer offset={} len={}",
            offset,
            data.len()
        );
        Self::write_memory(&mut self.buffers.lock(), buffer, offset, data)
    }

    #[allow(irrefutable_let_patterns)]
    fn write_texture(
        &self,
        texture: &GpuTexture,
        descriptor: &TextureDescriptor,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        self.check_device()?;
        let expected = descriptor.base_level_bytes();
        if data.len() as u64 != expected {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture upload of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        if let GpuTexture::Dummy(id) = texture
            && let Some(uploaded) = self.textures.lock().get_mut(id)
        {
            *uploaded = data.len();
        }
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        self.check_device()?;
        log::trace!("DummyBackend: read_buffer offset={} size={}", offset, size);
        let mut buffers = self.buffers.lock();
        let memory = dummy_memory(&mut buffers, buffer)?;
        let start = offset as usize;
        let end = start + size as usize;
        memory.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "read of {size} bytes at offset {offset} exceeds buffer size {}",
                memory.len()
            ))
        })
    }

    fn create_surface(&self, target: &SurfaceTarget) -> Result<GpuSurface, GraphicsError> {
        if self.fail_surface_creation.load(Ordering::Acquire) {
            return Err(GraphicsError::ResourceCreationFailed(
                "surface creation rejected".into(),
            ));
        }
        log::trace!("DummyBackend: creating surface for {:?}", target);
        Ok(GpuSurface::Dummy)
    }

    fn surface_formats(&self, _surface: &GpuSurface) -> Vec<TextureFormat> {
        self.surface_formats.lock().clone()
    }

    fn configure_surface(
        &self,
        _surface: &GpuSurface,
        config: &SurfaceConfiguration,
    ) -> Result<(), GraphicsError> {
        self.check_device()?;
        *self.surface_size.lock() = Some((config.width, config.height));
        self.surface_outdated.store(false, Ordering::Release);
        Ok(())
    }

    fn acquire_image(&self, _surface: &GpuSurface) -> Result<GpuSurfaceImage, GraphicsError> {
        self.check_device()?;
        if self.surface_outdated.load(Ordering::Acquire) {
            return Err(GraphicsError::SurfaceOutdated);
        }
        let (width, height) = self
            .surface_size
            .lock()
            .ok_or_else(|| GraphicsError::InvalidParameter("surface not configured".into()))?;
        Ok(GpuSurfaceImage::Dummy { width, height })
    }

    fn present(&self, _image: GpuSurfaceImage) -> Result<(), GraphicsError> {
        self.check_device()?;
        if self.fail_next_present.swap(false, Ordering::AcqRel) {
            return Err(GraphicsError::SurfaceOutdated);
        }
        self.presented.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> GpuFence {
        GpuFence::Dummy {
            signaled: AtomicBool::new(signaled),
        }
    }

    fn wait_fence(&self, fence: &GpuFence, timeout: Duration) -> bool {
        #[allow(irrefutable_let_patterns)]
        let GpuFence::Dummy { signaled } = fence else {
            return false;
        };
        let start = Instant::now();
        while !signaled.load(Ordering::Acquire) {
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::yield_now();
        }
        true
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        match fence {
            GpuFence::Dummy { signaled } => signaled.load(Ordering::Acquire),
            #[cfg(feature = "wgpu-backend")]
            GpuFence::Wgpu { .. } => false,
        }
    }

    #[allow(irrefutable_let_patterns)]
    fn submit(
        &self,
        commands: &CommandList,
        surface_image: Option<&GpuSurfaceImage>,
        fence: &GpuFence,
    ) -> Result<(), GraphicsError> {
        self.check_device()?;
        if self.fail_next_submit.swap(false, Ordering::AcqRel) {
            return Err(GraphicsError::FrameSubmitFailure(
                "injected submit failure".into(),
            ));
        }

        let passes = self.execute(commands)?;
        log::trace!("DummyBackend: submitted {} passes", passes.len());
        self.reports.lock().push(SubmissionReport {
            passes,
            surface_size: surface_image.map(GpuSurfaceImage::size),
        });

        // No real GPU work, so the fence signals immediately.
        if let GpuFence::Dummy { signaled } = fence {
            signaled.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.check_device()
    }
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferUsage;

    fn buffer(backend: &DummyBackend, size: u64) -> GpuBuffer {
        backend
            .create_buffer(&BufferDescriptor::new(size, BufferUsage::STORAGE))
            .unwrap()
    }

    #[test]
    fn test_buffer_memory_round_trip() {
        let backend = DummyBackend::new();
        let buf = buffer(&backend, 16);
        backend.write_buffer(&buf, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            backend.read_buffer(&buf, 0, 8).unwrap(),
            vec![0, 0, 0, 0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_out_of_bounds_write_rejected() {
        let backend = DummyBackend::new();
        let buf = buffer(&backend, 4);
        let err = backend.write_buffer(&buf, 2, &[0; 4]).unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidParameter(_)));
    }

    #[test]
    fn test_submit_executes_copies_in_order() {
        let backend = DummyBackend::new();
        let src = buffer(&backend, 4);
        let dst = buffer(&backend, 4);

        let mut list = CommandList::new();
        let mut pass = crate::backend::RecordedPass::new("upload", PassKind::Transfer);
        pass.commands.push(GpuCommand::WriteBuffer {
            buffer: src.clone(),
            offset: 0,
            data: vec![9, 8, 7, 6],
        });
        pass.commands.push(GpuCommand::CopyBuffer {
            src: src.clone(),
            src_offset: 0,
            dst: dst.clone(),
            dst_offset: 0,
            size: 4,
        });
        list.push(pass);

        let fence = backend.create_fence(false);
        backend.submit(&list, None, &fence).unwrap();

        assert!(backend.is_fence_signaled(&fence));
        assert_eq!(backend.read_buffer(&dst, 0, 4).unwrap(), vec![9, 8, 7, 6]);
        assert_eq!(backend.last_report().unwrap().pass_names(), vec!["upload"]);
    }

    #[test]
    fn test_injected_submit_failure_is_one_shot() {
        let backend = DummyBackend::new();
        backend.fail_next_submit();
        let fence = backend.create_fence(false);
        let list = CommandList::new();

        assert!(matches!(
            backend.submit(&list, None, &fence),
            Err(GraphicsError::FrameSubmitFailure(_))
        ));
        assert!(!backend.is_fence_signaled(&fence));
        backend.submit(&list, None, &fence).unwrap();
        assert_eq!(backend.submission_count(), 1);
    }

    #[test]
    fn test_device_loss_is_persistent() {
        let backend = DummyBackend::new();
        backend.lose_device();
        let fence = backend.create_fence(false);
        for _ in 0..2 {
            assert!(matches!(
                backend.submit(&CommandList::new(), None, &fence),
                Err(GraphicsError::DeviceLost)
            ));
        }
    }

    #[test]
    fn test_outdated_surface_until_reconfigured() {
        let backend = DummyBackend::new();
        let surface = backend.create_surface(&SurfaceTarget::Headless).unwrap();
        let config = SurfaceConfiguration::new(64, 32, TextureFormat::Rgba8Unorm);
        backend.configure_surface(&surface, &config).unwrap();

        backend.outdate_surface();
        assert!(matches!(
            backend.acquire_image(&surface),
            Err(GraphicsError::SurfaceOutdated)
        ));

        backend.configure_surface(&surface, &config).unwrap();
        let image = backend.acquire_image(&surface).unwrap();
        assert_eq!(image.size(), (64, 32));
    }

    #[test]
    fn test_destroy_releases_allocation() {
        let backend = DummyBackend::new();
        let buf = buffer(&backend, 8);
        assert_eq!(backend.live_allocations(), 1);
        backend.destroy_buffer(&buf);
        assert_eq!(backend.live_allocations(), 0);
    }
}
