//! Lowering a compiled graph into a backend command list.

use std::sync::Arc;

use sandpiper_core::profiling::profile_scope;

use crate::backend::{
    CommandList, GpuBuffer, GpuCommand, GpuProgram, RecordedAttachment, RecordedDepth, RecordedPass,
};
use crate::compiler::{CompiledGraph, GraphError};
use crate::error::GraphicsError;
use crate::graph::{
    ComputePass, Draw, GraphicsPass, Pass, RenderGraph, RenderTarget, TransferOperation,
    TransferPass,
};
use crate::pipeline::PipelineRef;
use crate::resources::{Buffer, Texture};

/// Record every pass of `graph` in the order `compiled` prescribes.
///
/// Draws and dispatches bound to a null pipeline, or to no pipeline at all,
/// are dropped: the pass still runs its load and clear operations but records
/// zero draw calls.
pub(crate) fn record(
    graph: &RenderGraph,
    compiled: &CompiledGraph,
) -> Result<CommandList, GraphicsError> {
    profile_scope!("record_commands");

    let mut list = CommandList::new();
    for &handle in compiled.pass_order() {
        let pass = graph
            .pass(handle)
            .ok_or(GraphError::InvalidPassHandle(handle))?;

        let mut recorded = RecordedPass::new(pass.name(), pass.kind());
        recorded.barriers = compiled.barriers_before(handle).count();

        match pass {
            Pass::Graphics(graphics) => record_graphics(graphics, &mut recorded)?,
            Pass::Compute(compute) => record_compute(compute, &mut recorded)?,
            Pass::Transfer(transfer) => record_transfer(transfer, &mut recorded)?,
        }

        log::trace!(
            "Recorded pass '{}': {} commands, {} barriers",
            recorded.name,
            recorded.commands.len(),
            recorded.barriers
        );
        list.push(recorded);
    }
    Ok(list)
}

fn record_graphics(pass: &GraphicsPass, recorded: &mut RecordedPass) -> Result<(), GraphicsError> {
    recorded.color = pass
        .color()
        .map(|color| {
            let target = match &color.target {
                RenderTarget::Surface => RecordedAttachment::Surface {
                    load: color.load_op,
                },
                RenderTarget::Texture(texture) => RecordedAttachment::Texture {
                    texture: live_texture(texture)?.gpu().clone(),
                    load: color.load_op,
                },
            };
            Ok::<_, GraphicsError>(target)
        })
        .transpose()?;

    recorded.depth = pass
        .depth()
        .map(|depth| {
            Ok::<_, GraphicsError>(RecordedDepth {
                texture: live_texture(&depth.texture)?.gpu().clone(),
                clear: depth.clear,
            })
        })
        .transpose()?;

    let Some(program) = program_of(pass.name(), pass.pipeline(), pass.draws().len()) else {
        return Ok(());
    };
    let bindings = gpu_bindings(pass.bindings())?;

    for draw in pass.draws() {
        let command = match draw {
            Draw::Direct {
                vertex_count,
                instance_count,
                first_instance,
            } => GpuCommand::Draw {
                program: program.clone(),
                bindings: bindings.clone(),
                vertex_count: *vertex_count,
                instance_count: *instance_count,
                first_instance: *first_instance,
            },
            Draw::Indirect { args, offset } => GpuCommand::DrawIndirect {
                program: program.clone(),
                bindings: bindings.clone(),
                args: live_buffer(args)?.gpu().clone(),
                offset: *offset,
            },
        };
        recorded.commands.push(command);
    }
    Ok(())
}

fn record_compute(pass: &ComputePass, recorded: &mut RecordedPass) -> Result<(), GraphicsError> {
    let Some(program) = program_of(pass.name(), pass.pipeline(), pass.dispatches().len()) else {
        return Ok(());
    };
    let bindings = gpu_bindings(pass.bindings())?;

    recorded
        .commands
        .extend(pass.dispatches().iter().map(|workgroups| GpuCommand::Dispatch {
            program: program.clone(),
            bindings: bindings.clone(),
            workgroups: *workgroups,
        }));
    Ok(())
}

fn record_transfer(pass: &TransferPass, recorded: &mut RecordedPass) -> Result<(), GraphicsError> {
    for operation in pass.operations() {
        let command = match operation {
            TransferOperation::WriteBuffer {
                buffer,
                offset,
                data,
            } => GpuCommand::WriteBuffer {
                buffer: live_buffer(buffer)?.gpu().clone(),
                offset: *offset,
                data: data.clone(),
            },
            TransferOperation::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => GpuCommand::CopyBuffer {
                src: live_buffer(src)?.gpu().clone(),
                src_offset: *src_offset,
                dst: live_buffer(dst)?.gpu().clone(),
                dst_offset: *dst_offset,
                size: *size,
            },
        };
        recorded.commands.push(command);
    }
    Ok(())
}

/// The program to record `work` items with, or `None` if they are skipped.
fn program_of(pass: &str, pipeline: Option<&PipelineRef>, work: usize) -> Option<GpuProgram> {
    let program = pipeline.and_then(|pipeline| pipeline.program()).cloned();
    if program.is_none() && work > 0 {
        log::trace!(
            "Pass '{}' has no usable pipeline, skipping {} work items",
            pass,
            work
        );
    }
    program
}

fn gpu_bindings(bindings: &[Arc<Buffer>]) -> Result<Vec<GpuBuffer>, GraphicsError> {
    bindings
        .iter()
        .map(|buffer| live_buffer(buffer).map(|buffer| buffer.gpu().clone()))
        .collect()
}

fn live_buffer(buffer: &Buffer) -> Result<&Buffer, GraphicsError> {
    if buffer.is_released() {
        return Err(GraphicsError::InvalidParameter(format!(
            "buffer {:?} used after release",
            buffer.label().unwrap_or("unnamed")
        )));
    }
    Ok(buffer)
}

fn live_texture(texture: &Texture) -> Result<&Texture, GraphicsError> {
    if texture.is_released() {
        return Err(GraphicsError::InvalidParameter(format!(
            "texture {:?} used after release",
            texture.label().unwrap_or("unnamed")
        )));
    }
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::{DeviceCapabilities, GraphicsDevice};
    use crate::graph::{BufferAccessMode, ColorAttachment};
    use crate::pipeline::PipelineKind;
    use crate::types::{BufferDescriptor, BufferUsage, TextureFormat};

    fn device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(
            Arc::new(DummyBackend::new()),
            "record test",
            DeviceCapabilities::default(),
        )
    }

    fn buffer(device: &Arc<GraphicsDevice>) -> Arc<Buffer> {
        device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::STORAGE | BufferUsage::COPY_DST))
            .unwrap()
    }

    #[test]
    fn test_null_pipeline_records_no_draws() {
        let mut graph = RenderGraph::new();
        let mut pass = GraphicsPass::new("geometry")
            .with_color(ColorAttachment::from_surface().with_clear_color(0.0, 0.0, 0.0, 1.0))
            .with_pipeline(PipelineRef::null(
                "broken",
                PipelineKind::graphics(TextureFormat::Rgba8Unorm),
                Some("syntax error".into()),
            ));
        pass.add_draw(3, 1, 0);
        pass.add_draw(6, 1, 1);
        graph.add_graphics_pass(pass);

        let compiled = graph.compile().unwrap();
        let list = record(&graph, &compiled).unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list.passes()[0].draw_count(), 0);
        assert!(list.passes()[0].targets_surface());
    }

    #[test]
    fn test_pass_order_and_barriers_follow_compiled_graph() {
        let device = device();
        let data = buffer(&device);

        let mut graph = RenderGraph::new();
        let writer = graph.add_transfer_pass(TransferPass::new("writer").with_write(
            data.clone(),
            0,
            vec![1, 2, 3, 4],
        ));
        graph.add_compute_pass(
            crate::graph::ComputePass::new("reader")
                .with_binding(data.clone(), BufferAccessMode::StorageRead)
                .with_dispatch(1, 1, 1),
        );
        let late = graph.add_transfer_pass(TransferPass::new("late"));
        graph.add_dependency(writer, late).unwrap();

        let compiled = graph.compile().unwrap();
        let list = record(&graph, &compiled).unwrap();

        let names: Vec<_> = list.passes().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["late", "writer", "reader"]);
        assert_eq!(list.passes()[1].barriers, 0);
        assert_eq!(list.passes()[2].barriers, 1);
        assert!(matches!(
            list.passes()[1].commands[0],
            GpuCommand::WriteBuffer { .. }
        ));
        // No pipeline bound, so the dispatch is dropped.
        assert_eq!(list.passes()[2].dispatch_count(), 0);
    }

    #[test]
    fn test_released_binding_is_rejected() {
        let device = device();
        let data = buffer(&device);
        device.destroy_buffer(&data);

        let mut graph = RenderGraph::new();
        graph.add_transfer_pass(TransferPass::new("upload").with_write(data, 0, vec![0; 4]));

        let compiled = graph.compile().unwrap();
        let err = record(&graph, &compiled).unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidParameter(_)));
    }
}
