//! Graphics error types.

use sandpiper_core::asset::AssetId;

use crate::compiler::GraphError;

/// Errors that can occur in the graphics system.
///
/// Only [`FatalInit`](Self::FatalInit) and [`DeviceLost`](Self::DeviceLost)
/// end a session. Every other variant is contained by the component that
/// produced it and shows up as a log line plus a degraded frame.
#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    /// Device or surface creation failed during startup.
    #[error("initialization failed: {0}")]
    FatalInit(String),
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// The presentation surface is gone and must be recreated.
    #[error("surface invalidated, needs recreation")]
    SurfaceInvalidated,
    /// The surface no longer matches the window and must be reconfigured.
    #[error("surface outdated, needs reconfiguration")]
    SurfaceOutdated,
    /// A GPU program failed to compile.
    #[error("pipeline `{source_id}` failed to compile: {message}")]
    PipelineCompileFailure { source_id: String, message: String },
    /// A streamed asset could not be loaded or uploaded.
    #[error("{asset} failed to load: {message}")]
    AssetLoadFailure { asset: AssetId, message: String },
    /// The device rejected a frame's command submission.
    #[error("frame submission failed: {0}")]
    FrameSubmitFailure(String),
    /// A GPU resource could not be created.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A transient allocation was used after the frame that issued it was reset.
    #[error("transient allocation from epoch {issued} used in epoch {current}")]
    StaleTransient { issued: u64, current: u64 },
    /// The transient region for this frame has no room left.
    #[error("transient memory exhausted: requested {requested} bytes, {available} available")]
    OutOfTransientMemory { requested: u64, available: u64 },
    /// The debug readback queue has not been drained.
    #[error("debug readback queue is full ({capacity} entries)")]
    ReadbackQueueFull { capacity: usize },
    /// The frame's task graph could not be compiled.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Filesystem access for shader sources or the artifact cache failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphicsError {
    /// Whether the error ends the rendering session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalInit(_) | Self::DeviceLost)
    }

    /// Whether the error is fixed by recreating the presentation surface.
    pub fn needs_surface_recreation(&self) -> bool {
        matches!(self, Self::SurfaceInvalidated | Self::SurfaceOutdated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::DeviceLost;
        assert_eq!(err.to_string(), "GPU device lost");

        let err = GraphicsError::FatalInit("no adapter".to_string());
        assert_eq!(err.to_string(), "initialization failed: no adapter");

        let err = GraphicsError::StaleTransient {
            issued: 3,
            current: 4,
        };
        assert_eq!(
            err.to_string(),
            "transient allocation from epoch 3 used in epoch 4"
        );
    }

    #[test]
    fn test_only_init_and_device_loss_are_fatal() {
        assert!(GraphicsError::FatalInit(String::new()).is_fatal());
        assert!(GraphicsError::DeviceLost.is_fatal());
        assert!(!GraphicsError::SurfaceOutdated.is_fatal());
        assert!(!GraphicsError::FrameSubmitFailure(String::new()).is_fatal());
        assert!(
            !GraphicsError::PipelineCompileFailure {
                source_id: "a".into(),
                message: "b".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_surface_errors_request_recreation() {
        assert!(GraphicsError::SurfaceOutdated.needs_surface_recreation());
        assert!(GraphicsError::SurfaceInvalidated.needs_surface_recreation());
        assert!(!GraphicsError::DeviceLost.needs_surface_recreation());
    }
}
