//! Common utilities for integration tests.
//!
//! This module provides shared test infrastructure that can be reused
//! across different backend implementations.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sandpiper_core::asset::AssetId;
use sandpiper_core::scene::Scene;
use sandpiper_graphics::backend::{self, DummyBackend, GpuBackend};
use sandpiper_graphics::{
    AssetPayload, AssetSource, AssetSourceError, AssetStreamer, BackendKind, ContextConfig,
    FrameCameras, FrameContext, FrameOutcome, FrameStatus, GpuContext, Renderer, RendererConfig,
    RetryPolicy, StreamingConfig, SurfaceTarget,
};

/// Initial surface size of every test context.
pub const SURFACE_SIZE: (u32, u32) = (320, 240);

/// Upper bound for waiting on asset workers.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Install the test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic byte pattern of the given length.
pub fn generate_test_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (no actual GPU operations).
    Dummy,
    /// WebGPU backend (via wgpu).
    WebGpu,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            Backend::WebGpu => backend::has_gpu_backend(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
            Backend::WebGpu => "webgpu",
        }
    }
}

// ============================================================================
// Asset Source
// ============================================================================

/// In-memory asset source that counts loads and fails chosen ids.
#[derive(Debug, Default)]
pub struct MapSource {
    assets: HashMap<AssetId, AssetPayload>,
    failing: HashSet<AssetId>,
    loads: AtomicUsize,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A triangle-sized mesh payload.
    pub fn with_mesh(mut self, id: u64, vertex_count: u32) -> Self {
        self.assets.insert(
            AssetId::new(id),
            AssetPayload::mesh(generate_test_pattern(vertex_count as usize * 12), vertex_count),
        );
        self
    }

    pub fn with_payload(mut self, id: u64, payload: AssetPayload) -> Self {
        self.assets.insert(AssetId::new(id), payload);
        self
    }

    /// Every load of `id` fails with a decode error.
    pub fn with_failure(mut self, id: u64) -> Self {
        self.failing.insert(AssetId::new(id));
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl AssetSource for MapSource {
    fn load(&self, id: AssetId) -> Result<AssetPayload, AssetSourceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&id) {
            return Err(AssetSourceError::Decode {
                asset: id,
                message: "corrupt payload".into(),
            });
        }
        self.assets
            .get(&id)
            .cloned()
            .ok_or(AssetSourceError::NotFound(id))
    }
}

/// Retries that finish in a few milliseconds.
pub fn fast_streaming() -> StreamingConfig {
    StreamingConfig::default().with_retry(RetryPolicy::default().with_backoff(
        Duration::from_millis(1),
        2.0,
        Duration::from_millis(4),
    ))
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context owning a device context, streamer and renderer.
pub struct TestContext {
    pub backend: Backend,
    /// Set for [`Backend::Dummy`], for fault injection and submission reports.
    dummy: Option<Arc<DummyBackend>>,
    pub source: Arc<MapSource>,
    pub context: GpuContext,
    pub streamer: AssetStreamer,
    pub renderer: Renderer,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not available.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_options(backend, MapSource::new(), RendererConfig::default())
    }

    pub fn with_options(
        backend: Backend,
        source: MapSource,
        renderer_config: RendererConfig,
    ) -> Option<Self> {
        init_logging();
        if !backend.is_available() {
            return None;
        }

        let (gpu, dummy) = match backend {
            Backend::Dummy => {
                let dummy = Arc::new(DummyBackend::new());
                (dummy.clone() as Arc<dyn GpuBackend>, Some(dummy))
            }
            Backend::WebGpu => (backend::create_backend(BackendKind::Wgpu).ok()?, None),
        };

        let config = ContextConfig::default()
            .with_label(format!("{} test", backend.name()))
            .with_size(SURFACE_SIZE.0, SURFACE_SIZE.1);
        let context = GpuContext::with_backend(gpu, config, SurfaceTarget::Headless).ok()?;

        let source = Arc::new(source);
        let streamer =
            AssetStreamer::new(context.device().clone(), source.clone(), fast_streaming()).ok()?;
        let renderer = Renderer::new(&context, renderer_config);

        Some(Self {
            backend,
            dummy,
            source,
            context,
            streamer,
            renderer,
        })
    }

    pub fn dummy(&self) -> Option<&DummyBackend> {
        self.dummy.as_deref()
    }

    /// Render one frame with the default passes.
    pub fn render(&mut self, scene: &Scene) -> FrameOutcome {
        self.renderer
            .render_frame(
                &mut self.context,
                scene,
                &FrameCameras::default(),
                &self.streamer,
            )
            .expect("frame failed fatally")
    }

    /// Begin a frame and expect it to be ready.
    pub fn begin(&mut self, scene: &Scene) -> FrameContext {
        match self
            .renderer
            .begin_frame(
                &mut self.context,
                scene,
                &FrameCameras::default(),
                &self.streamer,
            )
            .expect("begin_frame failed fatally")
        {
            FrameStatus::Ready(frame) => frame,
            FrameStatus::Discarded => panic!("frame was discarded"),
        }
    }

    pub fn end(&mut self, frame: FrameContext) -> FrameOutcome {
        self.renderer
            .end_frame(&mut self.context, frame)
            .expect("end_frame failed fatally")
    }

    /// Wait until every requested asset finished loading or failing.
    pub fn settle(&self) {
        assert!(
            self.streamer.wait_idle(SETTLE_TIMEOUT),
            "asset workers did not go idle"
        );
    }

    /// Tear everything down in reverse order. Returns the leaked resource count.
    pub fn shutdown(mut self) -> usize {
        self.renderer.release(&self.context);
        self.streamer.shutdown();
        self.context.shutdown()
    }
}
