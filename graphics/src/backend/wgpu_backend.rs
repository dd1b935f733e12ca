//! wgpu GPU backend implementation.
//!
//! This backend uses wgpu for cross-platform GPU access, supporting
//! Vulkan, Metal, DX12, and WebGPU. Programs are built from the validated
//! WGSL source with automatic layouts; buffers listed in a command's
//! bindings are bound to group 0 in order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::error::GraphicsError;
use crate::graph::LoadOp;
use crate::pipeline::{PipelineKind, ProgramDescriptor};
use crate::swapchain::{PresentMode, SurfaceConfiguration, SurfaceTarget};
use crate::types::{
    AddressMode, BufferDescriptor, BufferUsage, CompareFunction, FilterMode, SamplerDescriptor,
    TextureDescriptor, TextureFormat, TextureUsage,
};

use super::{
    CommandList, GpuBackend, GpuBuffer, GpuCommand, GpuFence, GpuProgram, GpuSampler, GpuSurface,
    GpuSurfaceImage, GpuTexture, RecordedAttachment, RecordedPass,
};

const READBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// A compiled wgpu pipeline.
#[derive(Debug)]
pub enum WgpuProgram {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

/// wgpu-based GPU backend.
pub struct WgpuBackend {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    device_lost: Arc<AtomicBool>,
    headless_size: Mutex<(u32, u32)>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter.get_info().name)
            .finish()
    }
}

impl WgpuBackend {
    /// Create a new wgpu backend.
    pub fn new() -> Result<Self, GraphicsError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| GraphicsError::FatalInit(format!("No compatible GPU adapter: {e}")))?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Sandpiper Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GraphicsError::FatalInit(format!("Device creation failed: {e}")))?;

        let device_lost = Arc::new(AtomicBool::new(false));
        let flag = device_lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::error!("wgpu device lost ({:?}): {}", reason, message);
            flag.store(true, Ordering::Release);
        });

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            device_lost,
            headless_size: Mutex::new((1, 1)),
        })
    }

    /// Get the wgpu device.
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Get the wgpu queue.
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    fn check_device(&self) -> Result<(), GraphicsError> {
        if self.device_lost.load(Ordering::Acquire) {
            Err(GraphicsError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn create_render_program(
        &self,
        module: &wgpu::ShaderModule,
        label: &str,
        (vertex_entry, fragment_entry): (&str, &str),
        color_format: TextureFormat,
        depth_format: Option<TextureFormat>,
    ) -> wgpu::RenderPipeline {
        let targets = [Some(wgpu::ColorTargetState {
            format: convert_texture_format(color_format),
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            write_mask: wgpu::ColorWrites::ALL,
        })];

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: None,
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some(vertex_entry),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(fragment_entry),
                    targets: &targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
                    format: convert_texture_format(format),
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
    }

    fn bind_group(
        &self,
        layout: wgpu::BindGroupLayout,
        bindings: &[GpuBuffer],
    ) -> Option<wgpu::BindGroup> {
        if bindings.is_empty() {
            return None;
        }
        let entries: Vec<wgpu::BindGroupEntry<'_>> = bindings
            .iter()
            .enumerate()
            .filter_map(|(i, buffer)| match buffer {
                GpuBuffer::Wgpu(buffer) => Some(wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: buffer.as_entire_binding(),
                }),
                GpuBuffer::Dummy(_) => None,
            })
            .collect();
        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &layout,
            entries: &entries,
        }))
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &RecordedPass,
        surface_view: Option<&wgpu::TextureView>,
    ) {
        // Buffer writes and copies are encoded in stream order ahead of the
        // pass's draws so that the pass observes them.
        for command in &pass.commands {
            match command {
                GpuCommand::WriteBuffer {
                    buffer: GpuBuffer::Wgpu(dst),
                    offset,
                    data,
                } => self.encode_write(encoder, dst, *offset, data),
                GpuCommand::CopyBuffer {
                    src: GpuBuffer::Wgpu(src),
                    src_offset,
                    dst: GpuBuffer::Wgpu(dst),
                    dst_offset,
                    size,
                } => encoder.copy_buffer_to_buffer(src, *src_offset, dst, *dst_offset, *size),
                _ => {}
            }
        }

        let has_work = pass
            .commands
            .iter()
            .any(|c| c.is_draw() || c.is_dispatch());

        if pass.color.is_some() || pass.depth.is_some() {
            self.encode_render_pass(encoder, pass, surface_view);
        } else if has_work {
            self.encode_compute_pass(encoder, pass);
        }
    }

    fn encode_write(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        dst: &wgpu::Buffer,
        offset: u64,
        data: &[u8],
    ) {
        if data.is_empty() {
            return;
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0
            || data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0
        {
            // Unaligned writes cannot be encoded as copies
            self.queue.write_buffer(dst, offset, data);
            return;
        }
        let staging = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Write Staging Buffer"),
                contents: data,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        encoder.copy_buffer_to_buffer(&staging, 0, dst, offset, data.len() as u64);
    }

    fn encode_render_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &RecordedPass,
        surface_view: Option<&wgpu::TextureView>,
    ) {
        let color_view = match &pass.color {
            Some(RecordedAttachment::Surface { load }) => surface_view.map(|view| (view, *load)),
            Some(RecordedAttachment::Texture {
                texture: GpuTexture::Wgpu { view, .. },
                load,
            }) => Some((view.as_ref(), *load)),
            _ => None,
        };

        if pass.color.is_some() && color_view.is_none() {
            log::trace!("Skipping graphics pass '{}': no wgpu color target", pass.name);
            return;
        }

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = color_view
            .map(|(view, load)| wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: convert_load_op(load),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })
            .into_iter()
            .map(Some)
            .collect();

        let depth_stencil_attachment = pass.depth.as_ref().and_then(|depth| match &depth.texture {
            GpuTexture::Wgpu { view, .. } => Some(wgpu::RenderPassDepthStencilAttachment {
                view: view.as_ref(),
                depth_ops: Some(wgpu::Operations {
                    load: depth.clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            GpuTexture::Dummy(_) => None,
        });

        // Bind groups are created before the pass borrows the encoder
        let mut bind_groups = Vec::new();
        for command in &pass.commands {
            if let GpuCommand::Draw {
                program: GpuProgram::Wgpu(program),
                bindings,
                ..
            }
            | GpuCommand::DrawIndirect {
                program: GpuProgram::Wgpu(program),
                bindings,
                ..
            } = command
                && let WgpuProgram::Render(pipeline) = program.as_ref()
            {
                bind_groups.push(self.bind_group(pipeline.get_bind_group_layout(0), bindings));
            }
        }

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&pass.name),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        let mut groups = bind_groups.iter();
        for command in &pass.commands {
            let (program, indirect) = match command {
                GpuCommand::Draw { program, .. } => (program, None),
                GpuCommand::DrawIndirect {
                    program,
                    args,
                    offset,
                    ..
                } => (program, Some((args, *offset))),
                _ => continue,
            };
            let GpuProgram::Wgpu(program) = program else {
                continue;
            };
            let WgpuProgram::Render(pipeline) = program.as_ref() else {
                continue;
            };

            render_pass.set_pipeline(pipeline);
            if let Some(Some(group)) = groups.next() {
                render_pass.set_bind_group(0, group, &[]);
            }

            match (command, indirect) {
                (
                    GpuCommand::Draw {
                        vertex_count,
                        instance_count,
                        first_instance,
                        ..
                    },
                    _,
                ) => render_pass.draw(
                    0..*vertex_count,
                    *first_instance..(*first_instance + *instance_count),
                ),
                (_, Some((GpuBuffer::Wgpu(args), offset))) => {
                    render_pass.draw_indirect(args, offset)
                }
                _ => {}
            }
        }
    }

    fn encode_compute_pass(&self, encoder: &mut wgpu::CommandEncoder, pass: &RecordedPass) {
        let mut dispatches = Vec::new();
        for command in &pass.commands {
            if let GpuCommand::Dispatch {
                program: GpuProgram::Wgpu(program),
                bindings,
                workgroups,
            } = command
                && let WgpuProgram::Compute(pipeline) = program.as_ref()
            {
                let group = self.bind_group(pipeline.get_bind_group_layout(0), bindings);
                dispatches.push((pipeline, group, *workgroups));
            }
        }

        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&pass.name),
            timestamp_writes: None,
        });
        for (pipeline, group, [x, y, z]) in &dispatches {
            compute_pass.set_pipeline(pipeline);
            if let Some(group) = group {
                compute_pass.set_bind_group(0, group, &[]);
            }
            compute_pass.dispatch_workgroups(*x, *y, *z);
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    fn max_buffer_size(&self) -> u64 {
        self.device.limits().max_buffer_size
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        self.check_device()?;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: descriptor.size,
            usage: convert_buffer_usage(descriptor.usage),
            mapped_at_creation: false,
        });
        Ok(GpuBuffer::Wgpu(Arc::new(buffer)))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError> {
        self.check_device()?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::Extent3d {
                width: descriptor.size.width,
                height: descriptor.size.height,
                depth_or_array_layers: descriptor.size.depth,
            },
            mip_level_count: descriptor.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: convert_texture_format(descriptor.format),
            usage: convert_texture_usage(descriptor.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(GpuTexture::Wgpu {
            texture: Arc::new(texture),
            view: Arc::new(view),
        })
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError> {
        self.check_device()?;
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: descriptor.label.as_deref(),
            address_mode_u: convert_address_mode(descriptor.address_modes[0]),
            address_mode_v: convert_address_mode(descriptor.address_modes[1]),
            address_mode_w: convert_address_mode(descriptor.address_modes[2]),
            mag_filter: convert_filter_mode(descriptor.mag_filter),
            min_filter: convert_filter_mode(descriptor.min_filter),
            mipmap_filter: convert_mipmap_filter_mode(descriptor.mipmap_filter),
            lod_min_clamp: descriptor.lod_min_clamp,
            lod_max_clamp: descriptor.lod_max_clamp,
            compare: descriptor.compare.map(convert_compare_function),
            anisotropy_clamp: descriptor.anisotropy_clamp,
            border_color: None,
        });
        Ok(GpuSampler::Wgpu(Arc::new(sampler)))
    }

    fn create_program(
        &self,
        descriptor: &ProgramDescriptor<'_>,
    ) -> Result<GpuProgram, GraphicsError> {
        self.check_device()?;
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(descriptor.label),
                source: wgpu::ShaderSource::Wgsl(descriptor.source.into()),
            });

        let program = match descriptor.kind {
            PipelineKind::Graphics {
                vertex_entry,
                fragment_entry,
                color_format,
                depth_format,
            } => WgpuProgram::Render(self.create_render_program(
                &module,
                descriptor.label,
                (vertex_entry, fragment_entry),
                *color_format,
                *depth_format,
            )),
            PipelineKind::Compute { entry } => WgpuProgram::Compute(
                self.device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(descriptor.label),
                        layout: None,
                        module: &module,
                        entry_point: Some(entry),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        cache: None,
                    }),
            ),
        };
        Ok(GpuProgram::Wgpu(Arc::new(program)))
    }

    fn destroy_buffer(&self, buffer: &GpuBuffer) {
        if let GpuBuffer::Wgpu(buffer) = buffer {
            buffer.destroy();
        }
    }

    fn destroy_texture(&self, texture: &GpuTexture) {
        if let GpuTexture::Wgpu { texture, .. } = texture {
            texture.destroy();
        }
    }

    fn destroy_sampler(&self, _sampler: &GpuSampler) {
        // Samplers are freed when the last handle drops
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        self.check_device()?;
        if let GpuBuffer::Wgpu(buffer) = buffer {
            self.queue.write_buffer(buffer, offset, data);
        }
        Ok(())
    }

    fn write_texture(
        &self,
        texture: &GpuTexture,
        descriptor: &TextureDescriptor,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        self.check_device()?;
        if let GpuTexture::Wgpu { texture, .. } = texture {
            let size = descriptor.size;
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(size.width * descriptor.format.block_size()),
                    rows_per_image: Some(size.height),
                },
                wgpu::Extent3d {
                    width: size.width,
                    height: size.height,
                    depth_or_array_layers: size.depth,
                },
            );
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
        let GpuBuffer::Wgpu(source) = buffer else {
            return Err(GraphicsError::InvalidParameter(
                "buffer does not belong to the wgpu backend".into(),
            ));
        };

        // Copies must be 4-byte aligned; read the covering range and trim
        let start = offset - offset % wgpu::COPY_BUFFER_ALIGNMENT;
        let end = (offset + size).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let padded = end - start;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Read Staging Buffer"),
            size: padded,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Read Buffer Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, start, &staging, 0, padded);
        let index = self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(index),
                timeout: Some(READBACK_TIMEOUT),
            })
            .map_err(|e| GraphicsError::FrameSubmitFailure(format!("readback poll: {e}")))?;

        match rx.recv_timeout(READBACK_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(GraphicsError::InvalidParameter(format!(
                    "buffer map failed: {e}"
                )));
            }
            Err(_) => return Err(GraphicsError::DeviceLost),
        }

        let skip = (offset - start) as usize;
        let data = slice.get_mapped_range()[skip..skip + size as usize].to_vec();
        staging.unmap();
        Ok(data)
    }

    fn create_surface(&self, target: &SurfaceTarget) -> Result<GpuSurface, GraphicsError> {
        self.check_device()?;
        match target {
            SurfaceTarget::Headless => Ok(GpuSurface::Dummy),
            SurfaceTarget::Window(window) => {
                let surface = self
                    .instance
                    .create_surface(window.clone())
                    .map_err(|e| GraphicsError::FatalInit(format!("surface creation: {e}")))?;
                Ok(GpuSurface::Wgpu(Arc::new(surface)))
            }
        }
    }

    fn surface_formats(&self, surface: &GpuSurface) -> Vec<TextureFormat> {
        match surface {
            GpuSurface::Dummy => vec![TextureFormat::Rgba8Unorm],
            GpuSurface::Wgpu(surface) => surface
                .get_capabilities(&self.adapter)
                .formats
                .into_iter()
                .filter_map(from_wgpu_format)
                .collect(),
        }
    }

    fn configure_surface(
        &self,
        surface: &GpuSurface,
        config: &SurfaceConfiguration,
    ) -> Result<(), GraphicsError> {
        self.check_device()?;
        let GpuSurface::Wgpu(surface) = surface else {
            *self.headless_size.lock() = (config.width, config.height);
            return Ok(());
        };

        let capabilities = surface.get_capabilities(&self.adapter);
        let mut present_mode = convert_present_mode(config.present_mode);
        if !capabilities.present_modes.contains(&present_mode) {
            log::warn!(
                "Present mode {:?} unsupported, falling back to Fifo",
                config.present_mode
            );
            present_mode = wgpu::PresentMode::Fifo;
        }

        surface.configure(
            &self.device,
            &wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format: convert_texture_format(config.format),
                width: config.width,
                height: config.height,
                present_mode,
                desired_maximum_frame_latency: 2,
                alpha_mode: wgpu::CompositeAlphaMode::Auto,
                view_formats: vec![],
            },
        );
        Ok(())
    }

    fn acquire_image(&self, surface: &GpuSurface) -> Result<GpuSurfaceImage, GraphicsError> {
        self.check_device()?;
        let GpuSurface::Wgpu(surface) = surface else {
            let (width, height) = *self.headless_size.lock();
            return Ok(GpuSurfaceImage::Dummy { width, height });
        };

        match surface.get_current_texture() {
            Ok(texture) => {
                let view = texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok(GpuSurfaceImage::Wgpu { texture, view })
            }
            Err(wgpu::SurfaceError::Outdated) => Err(GraphicsError::SurfaceOutdated),
            Err(wgpu::SurfaceError::Lost) => Err(GraphicsError::SurfaceInvalidated),
            Err(e) => Err(GraphicsError::FrameSubmitFailure(format!(
                "surface acquire: {e}"
            ))),
        }
    }

    fn present(&self, image: GpuSurfaceImage) -> Result<(), GraphicsError> {
        self.check_device()?;
        if let GpuSurfaceImage::Wgpu { texture, view } = image {
            drop(view);
            texture.present();
        }
        Ok(())
    }

    fn create_fence(&self, _signaled: bool) -> GpuFence {
        // Without a submission index the fence reads as signaled
        GpuFence::Wgpu {
            device: self.device.clone(),
            submission_index: Mutex::new(None),
        }
    }

    fn wait_fence(&self, fence: &GpuFence, timeout: Duration) -> bool {
        let GpuFence::Wgpu {
            device,
            submission_index,
        } = fence
        else {
            return true;
        };
        let Some(index) = submission_index.lock().clone() else {
            return true;
        };
        device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(index),
                timeout: Some(timeout),
            })
            .is_ok()
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        let GpuFence::Wgpu {
            device,
            submission_index,
        } = fence
        else {
            return true;
        };
        if submission_index.lock().is_none() {
            return true;
        }
        device
            .poll(wgpu::PollType::Poll)
            .map(|status| status.is_queue_empty())
            .unwrap_or(false)
    }

    fn submit(
        &self,
        commands: &CommandList,
        surface_image: Option<&GpuSurfaceImage>,
        fence: &GpuFence,
    ) -> Result<(), GraphicsError> {
        self.check_device()?;

        let surface_view = match surface_image {
            Some(GpuSurfaceImage::Wgpu { view, .. }) => Some(view),
            _ => None,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        for pass in commands.passes() {
            self.encode_pass(&mut encoder, pass, surface_view);
        }
        let index = self.queue.submit(std::iter::once(encoder.finish()));

        if let GpuFence::Wgpu {
            submission_index, ..
        } = fence
        {
            *submission_index.lock() = Some(index);
        }

        self.check_device()
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| GraphicsError::FrameSubmitFailure(format!("wait idle: {e}")))
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    const TABLE: [(BufferUsage, wgpu::BufferUsages); 9] = [
        (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
        (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsage::INDIRECT, wgpu::BufferUsages::INDIRECT),
        (BufferUsage::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
        (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
        (BufferUsage::MAP_READ, wgpu::BufferUsages::MAP_READ),
        (BufferUsage::MAP_WRITE, wgpu::BufferUsages::MAP_WRITE),
    ];
    TABLE
        .iter()
        .filter(|(ours, _)| usage.contains(*ours))
        .fold(wgpu::BufferUsages::empty(), |acc, (_, theirs)| acc | *theirs)
}

fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn from_wgpu_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    Some(match format {
        wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
        _ => return None,
    })
}

fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut result = wgpu::TextureUsages::empty();

    if usage.contains(TextureUsage::COPY_SRC) {
        result |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        result |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }

    result
}

fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        AddressMode::ClampToBorder => wgpu::AddressMode::ClampToBorder,
    }
}

fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn convert_mipmap_filter_mode(mode: FilterMode) -> wgpu::MipmapFilterMode {
    match mode {
        FilterMode::Nearest => wgpu::MipmapFilterMode::Nearest,
        FilterMode::Linear => wgpu::MipmapFilterMode::Linear,
    }
}

fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
    match func {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn convert_load_op(op: LoadOp) -> wgpu::LoadOp<wgpu::Color> {
    match op {
        LoadOp::Load => wgpu::LoadOp::Load,
        LoadOp::Clear(color) => wgpu::LoadOp::Clear(wgpu::Color {
            r: color.r as f64,
            g: color.g as f64,
            b: color.b as f64,
            a: color.a as f64,
        }),
    }
}

fn convert_present_mode(mode: PresentMode) -> wgpu::PresentMode {
    match mode {
        PresentMode::Immediate => wgpu::PresentMode::Immediate,
        PresentMode::Mailbox => wgpu::PresentMode::Mailbox,
        PresentMode::Fifo => wgpu::PresentMode::Fifo,
        PresentMode::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
    }
}
