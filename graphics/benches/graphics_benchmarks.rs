use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use sandpiper_core::asset::AssetId;
use sandpiper_core::scene::Scene;
use sandpiper_graphics::backend::DummyBackend;
use sandpiper_graphics::compiler::compile_into;
use sandpiper_graphics::device::{DeviceCapabilities, GraphicsDevice};
use sandpiper_graphics::{
    AssetPayload, AssetSourceError, AssetStreamer, BufferAccessMode, BufferDescriptor,
    BufferUsage, ColorAttachment, CompiledGraph, ComputePass, ContextConfig, FrameCameras,
    GpuContext, GraphicsPass, RenderGraph, Renderer, RendererConfig, StreamingConfig,
    SurfaceTarget, TransferPass, TransientPool,
};

fn dummy_device() -> Arc<GraphicsDevice> {
    GraphicsDevice::new(
        Arc::new(DummyBackend::new()),
        "bench",
        DeviceCapabilities::default(),
    )
}

// ---------------------------------------------------------------------------
// Render graph compilation
// ---------------------------------------------------------------------------

fn chain_graph(device: &Arc<GraphicsDevice>, length: usize) -> RenderGraph {
    let buffer = device
        .create_buffer(&BufferDescriptor::new(
            256,
            BufferUsage::STORAGE | BufferUsage::COPY_DST,
        ))
        .expect("bench buffer");

    let mut graph = RenderGraph::new();
    graph.add_transfer_pass(TransferPass::new("upload").with_write(
        buffer.clone(),
        0,
        vec![0; 64],
    ));
    for i in 0..length {
        graph.add_compute_pass(
            ComputePass::new(format!("compute_{i}"))
                .with_binding(buffer.clone(), BufferAccessMode::StorageReadWrite),
        );
    }
    graph
}

fn diamond_graph(device: &Arc<GraphicsDevice>, width: usize) -> RenderGraph {
    let source = device
        .create_buffer(&BufferDescriptor::new(256, BufferUsage::STORAGE))
        .expect("bench buffer");

    let mut graph = RenderGraph::new();
    graph.add_compute_pass(
        ComputePass::new("produce").with_binding(source.clone(), BufferAccessMode::StorageWrite),
    );
    for i in 0..width {
        graph.add_compute_pass(
            ComputePass::new(format!("consume_{i}"))
                .with_binding(source.clone(), BufferAccessMode::StorageRead),
        );
    }
    graph.add_graphics_pass(
        GraphicsPass::new("present")
            .with_color(ColorAttachment::from_surface())
            .with_binding(source, BufferAccessMode::StorageWrite),
    );
    graph
}

fn bench_graph_compile_chain(c: &mut Criterion) {
    let device = dummy_device();
    let graph = chain_graph(&device, 32);
    let mut compiled = CompiledGraph::default();

    c.bench_function("render_graph_compile_32_pass_chain", |b| {
        b.iter(|| {
            compile_into(black_box(&graph), &mut compiled).expect("acyclic");
            black_box(compiled.barriers().len());
        });
    });
}

fn bench_graph_compile_diamond(c: &mut Criterion) {
    let device = dummy_device();
    let graph = diamond_graph(&device, 16);
    let mut compiled = CompiledGraph::default();

    c.bench_function("render_graph_compile_16_wide_diamond", |b| {
        b.iter(|| {
            compile_into(black_box(&graph), &mut compiled).expect("acyclic");
            black_box(compiled.pass_order().len());
        });
    });
}

// ---------------------------------------------------------------------------
// Transient memory
// ---------------------------------------------------------------------------

fn bench_transient_allocate(c: &mut Criterion) {
    let device = dummy_device();
    let mut pool = TransientPool::new(&device, 1 << 20, 2, "bench transient").expect("pool");

    c.bench_function("transient_allocate_64x256_then_reset", |b| {
        b.iter(|| {
            for _ in 0..64 {
                black_box(pool.allocate(256).expect("fits"));
            }
            pool.reset_frame();
        });
    });
}

// ---------------------------------------------------------------------------
// Full frame
// ---------------------------------------------------------------------------

fn bench_dummy_frame(c: &mut Criterion) {
    let mut context = GpuContext::with_backend(
        Arc::new(DummyBackend::new()),
        ContextConfig::default(),
        SurfaceTarget::Headless,
    )
    .expect("context");
    let source = |_id: AssetId| -> Result<AssetPayload, AssetSourceError> {
        Ok(AssetPayload::mesh(vec![0; 36], 3))
    };
    let mut streamer = AssetStreamer::new(
        context.device().clone(),
        Arc::new(source),
        StreamingConfig::default(),
    )
    .expect("streamer");
    let mut renderer = Renderer::new(&context, RendererConfig::default());
    let scene = Scene::new();
    let cameras = FrameCameras::default();

    c.bench_function("dummy_frame_empty_scene", |b| {
        b.iter(|| {
            black_box(
                renderer
                    .render_frame(&mut context, &scene, &cameras, &streamer)
                    .expect("frame"),
            );
        });
    });

    renderer.release(&context);
    streamer.shutdown();
    context.shutdown();
}

criterion_group!(
    benches,
    bench_graph_compile_chain,
    bench_graph_compile_diamond,
    bench_transient_allocate,
    bench_dummy_frame,
);

criterion_main!(benches);
