//! The per-frame orchestrator.
//!
//! A [`Renderer`] drives one frame through a fixed sequence of stages:
//!
//! ```text
//! begin_frame                                 end_frame
//! ┌───────────────────────────────────────┐   ┌─────────────────────────────────────────┐
//! │ drain residency → wait slot → resize? │   │ overlay → compile → record → submit     │
//! │ → draw lists → acquire → upload       │──►│ → present → reset transients → commit   │
//! └───────────────────────────────────────┘   └─────────────────────────────────────────┘
//!                 ▲                                 │
//!                 └─────── application passes ──────┘
//! ```
//!
//! Between the two calls the application adds its own passes to the
//! [`FrameContext`] graph and records overlay draws. [`Renderer::render_frame`]
//! runs both halves with only the default passes.
//!
//! Recoverable failures never escape: a stale surface discards the frame and
//! recreates the surface, a rejected submission skips the frame. Only
//! [`GraphicsError::is_fatal`] errors are returned.

mod frame;
mod record;

use std::time::Instant;

use sandpiper_core::pool::Pooled;
use sandpiper_core::profiling::{frame_mark, profile_function, profile_message, profile_scope};
use sandpiper_core::scene::{CameraState, Scene};

use crate::compiler::{self, CompiledGraph};
use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::draw_list::{DrawListStore, DrawView};
use crate::error::GraphicsError;
use crate::graph::{
    BufferAccessMode, ColorAttachment, DepthAttachment, GraphicsPass, LoadOp, RenderGraph,
};
use crate::pipeline::PipelineRef;
use crate::resize::ResizeSignal;
use crate::scheduler::{FRAME_SLOT_TIMEOUT, FramePipeline};
use crate::streaming::AssetStreamer;

pub use frame::{FrameContext, OVERLAY_PASS, OverlayRecorder};

/// Name of the default pass drawing the main view.
pub const GEOMETRY_PASS: &str = "geometry";

/// Name of the default pass drawing the observer view.
pub const OBSERVER_PASS: &str = "observer";

/// Draw-list GPU buffers exist once per double-buffer slot, so at most two
/// frames may be in flight.
const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Camera states for the views drawn this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameCameras {
    pub main: CameraState,
    pub observer: Option<CameraState>,
}

impl FrameCameras {
    pub fn new(main: CameraState) -> Self {
        Self {
            main,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: CameraState) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Result of [`Renderer::begin_frame`].
#[derive(Debug)]
pub enum FrameStatus {
    /// The frame is ready for the application to add passes.
    Ready(FrameContext),
    /// Nothing was acquired. Call `begin_frame` again next tick.
    Discarded,
}

/// Result of [`Renderer::end_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The surface changed under the frame. It was recreated and the frame
    /// thrown away.
    Discarded,
    /// The frame could not be compiled, recorded or submitted.
    Skipped,
}

/// Frame counters since the renderer was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub presented: u64,
    pub discarded: u64,
    pub skipped: u64,
    pub surface_recreations: u64,
    /// Assets reported resident by the streamer.
    pub assets_resident: u64,
}

/// Builds, submits and presents frames.
#[derive(Debug)]
pub struct Renderer {
    config: RendererConfig,
    frames: FramePipeline,
    draw_lists: DrawListStore,
    resize: ResizeSignal,
    geometry_pipeline: Option<PipelineRef>,
    observer_pipeline: Option<PipelineRef>,
    compiled: Pooled<CompiledGraph>,
    spare_graph: Option<RenderGraph>,
    debug_capture: bool,
    last_frame: Instant,
    stats: RendererStats,
}

impl Renderer {
    pub fn new(context: &GpuContext, config: RendererConfig) -> Self {
        let frames_in_flight = context.config().frames_in_flight.min(MAX_FRAMES_IN_FLIGHT);
        let mut draw_lists = DrawListStore::new();
        draw_lists.set_observer_enabled(config.observer);

        log::info!(
            "Renderer created: {} frames in flight, observer {}",
            frames_in_flight,
            if config.observer { "on" } else { "off" }
        );

        Self {
            config,
            frames: FramePipeline::new(frames_in_flight),
            draw_lists,
            resize: ResizeSignal::new(),
            geometry_pipeline: None,
            observer_pipeline: None,
            compiled: Pooled::default(),
            spare_graph: None,
            debug_capture: false,
            last_frame: Instant::now(),
            stats: RendererStats::default(),
        }
    }

    /// Use `signal` instead of the renderer's own, e.g. one with a debounce.
    pub fn with_resize_signal(mut self, signal: ResizeSignal) -> Self {
        self.resize = signal;
        self
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Handle for the window to report new sizes through.
    pub fn resize_signal(&self) -> ResizeSignal {
        self.resize.clone()
    }

    pub fn set_geometry_pipeline(&mut self, pipeline: PipelineRef) {
        self.geometry_pipeline = Some(pipeline);
    }

    pub fn set_observer_pipeline(&mut self, pipeline: PipelineRef) {
        self.observer_pipeline = Some(pipeline);
    }

    pub fn set_observer_enabled(&mut self, enabled: bool) {
        self.config.observer = enabled;
        self.draw_lists.set_observer_enabled(enabled);
    }

    /// Copy the debug buffer back after the next submission.
    pub fn request_debug_capture(&mut self) {
        self.debug_capture = true;
    }

    pub fn draw_lists(&self) -> &DrawListStore {
        &self.draw_lists
    }

    pub fn frames(&self) -> &FramePipeline {
        &self.frames
    }

    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    /// Start a frame.
    ///
    /// Requests every asset `scene` references, builds the draw lists of the
    /// active views from what is resident, acquires the presentation image
    /// and uploads the committed draw lists and shader globals.
    pub fn begin_frame(
        &mut self,
        context: &mut GpuContext,
        scene: &Scene,
        cameras: &FrameCameras,
        streamer: &AssetStreamer,
    ) -> Result<FrameStatus, GraphicsError> {
        profile_function!();

        request_scene_assets(scene, streamer);
        let resident = streamer.drain_newly_resident();
        if !resident.is_empty() {
            log::trace!("{} assets became resident", resident.len());
            self.stats.assets_resident += resident.len() as u64;
        }

        self.frames.begin_frame(FRAME_SLOT_TIMEOUT)?;

        if let Some((width, height)) = self.resize.take() {
            self.recreate_surface(context, width, height)?;
        }

        let views: Vec<DrawView> = self.draw_lists.active_views().collect();
        for &view in &views {
            self.draw_lists.begin_write(view, scene, streamer);
        }

        let image = match context.acquire_image() {
            Ok(image) => image,
            Err(e) if e.needs_surface_recreation() => {
                log::info!("Surface lost on acquire, recreating: {}", e);
                let (width, height) = context.surface().size();
                self.recreate_surface(context, width, height)?;
                self.abandon(context, None, FrameOutcome::Discarded);
                return Ok(FrameStatus::Discarded);
            }
            Err(e) => {
                contain(e, "acquire")?;
                self.abandon(context, None, FrameOutcome::Discarded);
                return Ok(FrameStatus::Discarded);
            }
        };

        let mut uploads = Vec::with_capacity(views.len());
        for &view in &views {
            match self.draw_lists.upload(context, view) {
                Ok(upload) => uploads.push(upload),
                Err(e) => {
                    contain(e, "draw list upload")?;
                    self.abandon(context, None, FrameOutcome::Discarded);
                    return Ok(FrameStatus::Discarded);
                }
            }
        }

        let now = Instant::now();
        let delta_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let mut globals = context.base_globals().with_main_camera(&cameras.main);
        if let Some(observer) = &cameras.observer {
            globals = globals.with_observer_camera(observer);
        }
        globals.delta_time = delta_time;
        globals.frame_index = self.frames.frame_count() as u32;
        if let Err(e) = context.update_globals(&globals) {
            contain(e, "globals upload")?;
            self.abandon(context, None, FrameOutcome::Discarded);
            return Ok(FrameStatus::Discarded);
        }

        let mut graph = self.spare_graph.take().unwrap_or_default();
        graph.clear();

        Ok(FrameStatus::Ready(FrameContext {
            graph,
            overlay: OverlayRecorder::new(),
            image,
            uploads,
            depth: context.depth_target().clone(),
            globals: context.globals_buffer().clone(),
            frame_index: self.frames.frame_count(),
            frame_slot: self.frames.current_slot(),
            delta_time,
        }))
    }

    /// Add the geometry pass, and the observer pass when enabled.
    ///
    /// Each committed draw command becomes one draw whose first instance is
    /// its position in the GPU draw list.
    pub fn add_default_passes(&self, frame: &mut FrameContext) {
        let geometry = self.view_pass(
            frame,
            DrawView::Main,
            GEOMETRY_PASS,
            LoadOp::Clear(self.config.clear_color),
            Some(1.0),
            self.geometry_pipeline.as_ref(),
        );
        frame.graph.add_graphics_pass(geometry);

        if self.draw_lists.observer_enabled() {
            let observer = self.view_pass(
                frame,
                DrawView::Observer,
                OBSERVER_PASS,
                LoadOp::Load,
                None,
                self.observer_pipeline.as_ref(),
            );
            frame.graph.add_graphics_pass(observer);
        }
    }

    fn view_pass(
        &self,
        frame: &FrameContext,
        view: DrawView,
        name: &str,
        load: LoadOp,
        clear_depth: Option<f32>,
        pipeline: Option<&PipelineRef>,
    ) -> GraphicsPass {
        let mut depth = DepthAttachment::from_texture(frame.depth.clone());
        depth.clear = clear_depth;

        let mut pass = GraphicsPass::new(name)
            .with_color(ColorAttachment::from_surface().with_load_op(load))
            .with_depth(depth)
            .with_binding(frame.globals.clone(), BufferAccessMode::UniformRead);
        if let Some(upload) = frame.draw_list(view) {
            pass.bind_buffer(upload.buffer.clone(), BufferAccessMode::StorageRead);
        }
        if let Some(pipeline) = pipeline {
            pass.set_pipeline(pipeline.clone());
        }
        for (index, command) in self.draw_lists.ready_commands(view).iter().enumerate() {
            pass.add_draw(command.vertex_count, 1, index as u32);
        }
        pass
    }

    /// Finish a frame started by [`begin_frame`](Self::begin_frame).
    pub fn end_frame(
        &mut self,
        context: &mut GpuContext,
        frame: FrameContext,
    ) -> Result<FrameOutcome, GraphicsError> {
        profile_function!();

        let FrameContext {
            mut graph,
            overlay,
            image,
            frame_index,
            ..
        } = frame;
        if let Some(pass) = overlay.finish() {
            graph.add_graphics_pass(pass);
        }

        if let Some((width, height)) = self.resize.take() {
            log::info!("Discarding frame {}: surface resized", frame_index);
            drop(image);
            self.recreate_surface(context, width, height)?;
            return Ok(self.abandon(context, Some(graph), FrameOutcome::Discarded));
        }

        let compiled = {
            profile_scope!("compile_graph");
            compiler::compile_into(&graph, self.compiled.activate())
        };
        if let Err(e) = compiled {
            log::warn!("Frame {} skipped: {}", frame_index, e);
            return Ok(self.abandon(context, Some(graph), FrameOutcome::Skipped));
        }

        let commands = record::record(&graph, self.compiled.inner());
        self.compiled.release();
        let commands = match commands {
            Ok(commands) => commands,
            Err(e) => {
                contain(e, "command recording")?;
                return Ok(self.abandon(context, Some(graph), FrameOutcome::Skipped));
            }
        };

        let fence = context.device().create_fence();
        let submitted = {
            profile_scope!("submit");
            context
                .device()
                .backend()
                .submit(&commands, Some(image.gpu()), fence.gpu())
        };
        if let Err(e) = submitted {
            contain(e, "submission")?;
            log::warn!("Frame {} skipped", frame_index);
            return Ok(self.abandon(context, Some(graph), FrameOutcome::Skipped));
        }
        self.frames.end_frame(fence);

        // The submitted frame reads the uploaded slots, so the lists advance
        // with the frame slot whether or not presentation succeeds.
        let views: Vec<DrawView> = self.draw_lists.active_views().collect();
        for view in views {
            self.draw_lists.commit_and_swap(view);
        }

        if std::mem::take(&mut self.debug_capture)
            && let Err(e) = context.capture_debug(frame_index)
        {
            contain(e, "debug capture")?;
        }

        let presented = {
            profile_scope!("present");
            context.present(image)
        };
        context.reset_frame();
        self.recycle(graph);

        if let Err(e) = presented {
            if e.needs_surface_recreation() {
                log::info!("Surface lost on present, recreating: {}", e);
                let (width, height) = context.surface().size();
                self.recreate_surface(context, width, height)?;
            } else {
                contain(e, "present")?;
            }
            self.stats.discarded += 1;
            return Ok(FrameOutcome::Discarded);
        }

        self.stats.presented += 1;
        frame_mark!();
        Ok(FrameOutcome::Presented)
    }

    /// Begin, add the default passes and end in one call.
    pub fn render_frame(
        &mut self,
        context: &mut GpuContext,
        scene: &Scene,
        cameras: &FrameCameras,
        streamer: &AssetStreamer,
    ) -> Result<FrameOutcome, GraphicsError> {
        match self.begin_frame(context, scene, cameras, streamer)? {
            FrameStatus::Ready(mut frame) => {
                self.add_default_passes(&mut frame);
                self.end_frame(context, frame)
            }
            FrameStatus::Discarded => Ok(FrameOutcome::Discarded),
        }
    }

    /// Wait for in-flight frames and release the draw-list buffers.
    pub fn release(&mut self, context: &GpuContext) {
        if !self.frames.wait_idle(FRAME_SLOT_TIMEOUT) {
            log::warn!("In-flight frames did not finish before release");
        }
        self.draw_lists.release(context.device());
        log::info!(
            "Renderer released after {} presented frames",
            self.stats.presented
        );
    }

    fn recreate_surface(
        &mut self,
        context: &mut GpuContext,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        if !self.frames.wait_idle(FRAME_SLOT_TIMEOUT) {
            log::error!("In-flight frames did not finish before surface recreation");
            return Err(GraphicsError::DeviceLost);
        }
        match context.recreate_surface(width, height) {
            Ok(()) => {
                profile_message!("surface recreated");
                self.stats.surface_recreations += 1;
                Ok(())
            }
            Err(e) => contain(e, "surface recreation"),
        }
    }

    /// End a frame that submitted nothing.
    fn abandon(
        &mut self,
        context: &mut GpuContext,
        graph: Option<RenderGraph>,
        outcome: FrameOutcome,
    ) -> FrameOutcome {
        self.frames.end_frame_without_submit();
        context.reset_frame();
        if let Some(graph) = graph {
            self.recycle(graph);
        }
        match outcome {
            FrameOutcome::Presented => self.stats.presented += 1,
            FrameOutcome::Discarded => self.stats.discarded += 1,
            FrameOutcome::Skipped => self.stats.skipped += 1,
        }
        outcome
    }

    fn recycle(&mut self, mut graph: RenderGraph) {
        graph.clear();
        self.spare_graph = Some(graph);
    }
}

fn request_scene_assets(scene: &Scene, streamer: &AssetStreamer) {
    for (_, entity) in scene.iter() {
        for asset in entity.mesh.into_iter().chain(entity.material) {
            streamer.request(asset);
        }
    }
}

/// Pass fatal errors through, log and swallow the rest.
fn contain(error: GraphicsError, stage: &str) -> Result<(), GraphicsError> {
    if error.is_fatal() {
        log::error!("Fatal error during {}: {}", stage, error);
        Err(error)
    } else {
        log::warn!("Recoverable error during {}: {}", stage, error);
        Ok(())
    }
}
