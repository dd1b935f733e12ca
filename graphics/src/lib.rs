//! # Sandpiper Graphics
//!
//! Frame orchestration core of the Sandpiper renderer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GpuContext`] - Device, surface, samplers, globals and transient memory
//! - [`PipelineRegistry`] - GPU programs compiled once per source, null on failure
//! - [`RenderGraph`] - Declarative passes with hazard-derived ordering and barriers
//! - [`DrawListStore`] - Double-buffered per-view draw lists
//! - [`AssetStreamer`] - Worker pool loading assets off the render thread
//! - [`Renderer`] - The per-frame state machine tying the above together
//! - Backends: wgpu (feature `wgpu-backend`) and Dummy (headless, for testing)
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use sandpiper_core::asset::AssetId;
//! use sandpiper_core::scene::Scene;
//! use sandpiper_graphics::backend::DummyBackend;
//! use sandpiper_graphics::{
//!     AssetPayload, AssetSourceError, AssetStreamer, ContextConfig, FrameCameras, FrameOutcome,
//!     GpuContext, Renderer, RendererConfig, StreamingConfig, SurfaceTarget,
//! };
//!
//! let mut context = GpuContext::with_backend(
//!     Arc::new(DummyBackend::new()),
//!     ContextConfig::default(),
//!     SurfaceTarget::Headless,
//! )
//! .unwrap();
//! let source = |_id: AssetId| -> Result<AssetPayload, AssetSourceError> {
//!     Ok(AssetPayload::mesh(vec![0; 36], 3))
//! };
//! let mut streamer =
//!     AssetStreamer::new(context.device().clone(), Arc::new(source), StreamingConfig::default())
//!         .unwrap();
//! let mut renderer = Renderer::new(&context, RendererConfig::default());
//!
//! let outcome = renderer
//!     .render_frame(&mut context, &Scene::new(), &FrameCameras::default(), &streamer)
//!     .unwrap();
//! assert_eq!(outcome, FrameOutcome::Presented);
//!
//! renderer.release(&context);
//! streamer.shutdown();
//! assert_eq!(context.shutdown(), 0);
//! ```

pub mod backend;
pub mod compiler;
pub mod config;
pub mod context;
pub mod debug;
pub mod device;
pub mod draw_list;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod renderer;
pub mod resize;
pub mod resources;
pub mod scheduler;
pub mod streaming;
pub mod swapchain;
pub mod transient;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendKind, DummyBackend, GpuBackend};
pub use compiler::{Barrier, CompiledGraph, GraphError, Hazard};
pub use config::{ContextConfig, RendererConfig, RetryPolicy, StreamingConfig};
pub use context::{GpuContext, SamplerSet, ShaderGlobals};
pub use debug::{DebugChannel, ReadbackEntry};
pub use device::{DeviceCapabilities, GraphicsDevice};
pub use draw_list::{DoubleBuffer, DrawCommand, DrawListStore, DrawView, GpuDrawCommand};
pub use error::GraphicsError;
pub use graph::{
    BufferAccessMode, ColorAttachment, ComputePass, DepthAttachment, GraphicsPass, LoadOp,
    PassHandle, RenderGraph, TextureAccessMode, TransferPass,
};
pub use pipeline::{
    PipelineDescriptor, PipelineKind, PipelineRef, PipelineRegistry, ShaderCompileOptions,
};
pub use renderer::{
    FrameCameras, FrameContext, FrameOutcome, FrameStatus, OverlayRecorder, Renderer,
};
pub use resize::ResizeSignal;
pub use resources::{Buffer, ResourceId, Sampler, Texture};
pub use scheduler::{Fence, FramePipeline};
pub use streaming::{
    AssetHandle, AssetPayload, AssetSource, AssetSourceError, AssetState, AssetStreamer,
    ResidencyView,
};
pub use swapchain::{PresentMode, SurfaceTarget};
pub use transient::{TransientHandle, TransientPool};
pub use types::{
    BufferDescriptor, BufferUsage, ClearColor, SamplerDescriptor, TextureDescriptor,
    TextureFormat, TextureUsage,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
