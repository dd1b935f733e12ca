//! GPU program registry.
//!
//! Programs are described by a [`PipelineDescriptor`] and keyed by its
//! `source_id`. The [`PipelineRegistry`] compiles each one on first request
//! (WGSL → validated naga IR → SPIR-V per entry point), caches the result in
//! memory and on disk, and hands out [`PipelineRef`]s.
//!
//! A program that fails to compile is replaced by a *null pipeline*: a valid
//! reference without a GPU program. Passes bound to it still take part in the
//! frame graph but record no draws or dispatches.
//!
//! ```text
//! uncompiled ──► compiling ──┬──► ready
//!                            └──► failed (null pipeline)
//! ```

mod cache;
mod compile;
mod registry;

use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::GpuProgram;
use crate::types::TextureFormat;

pub use cache::ShaderCache;
pub use compile::{ShaderCompileOptions, ShaderCompiler, ShaderLanguage};
pub use registry::{PipelineRegistry, RegistryStats};

/// Programmable stage of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub(crate) fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        }
    }
}

/// What kind of program a descriptor builds, with its entry points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics {
        vertex_entry: String,
        fragment_entry: String,
        color_format: TextureFormat,
        depth_format: Option<TextureFormat>,
    },
    Compute {
        entry: String,
    },
}

impl PipelineKind {
    /// Graphics program with `vs_main`/`fs_main` entry points.
    pub fn graphics(color_format: TextureFormat) -> Self {
        Self::Graphics {
            vertex_entry: "vs_main".into(),
            fragment_entry: "fs_main".into(),
            color_format,
            depth_format: None,
        }
    }

    /// Compute program with a `cs_main` entry point.
    pub fn compute() -> Self {
        Self::Compute {
            entry: "cs_main".into(),
        }
    }

    pub fn with_depth(self, format: TextureFormat) -> Self {
        match self {
            Self::Graphics {
                vertex_entry,
                fragment_entry,
                color_format,
                ..
            } => Self::Graphics {
                vertex_entry,
                fragment_entry,
                color_format,
                depth_format: Some(format),
            },
            compute => compute,
        }
    }

    /// `(stage, entry point)` pairs to compile.
    pub fn entry_points(&self) -> Vec<(ShaderStage, &str)> {
        match self {
            Self::Graphics {
                vertex_entry,
                fragment_entry,
                ..
            } => vec![
                (ShaderStage::Vertex, vertex_entry.as_str()),
                (ShaderStage::Fragment, fragment_entry.as_str()),
            ],
            Self::Compute { entry } => vec![(ShaderStage::Compute, entry.as_str())],
        }
    }

    pub fn is_compute(&self) -> bool {
        matches!(self, Self::Compute { .. })
    }
}

/// Where a program's source text comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    /// Path resolved against the compile options' root paths.
    File(PathBuf),
    /// Source text held in memory, for generated and test programs.
    Inline(String),
}

/// Everything needed to build one program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineDescriptor {
    /// Stable identity used as the registry key.
    pub source_id: String,
    pub source: ShaderSource,
    pub kind: PipelineKind,
}

impl PipelineDescriptor {
    /// Program loaded from the file named by `source_id`.
    pub fn from_file(source_id: impl Into<String>, kind: PipelineKind) -> Self {
        let source_id = source_id.into();
        Self {
            source: ShaderSource::File(PathBuf::from(&source_id)),
            source_id,
            kind,
        }
    }

    pub fn inline(source_id: impl Into<String>, code: impl Into<String>, kind: PipelineKind) -> Self {
        Self {
            source_id: source_id.into(),
            source: ShaderSource::Inline(code.into()),
            kind,
        }
    }
}

/// SPIR-V for one entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledStage {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub spirv: Vec<u32>,
}

/// Input to [`GpuBackend::create_program`](crate::backend::GpuBackend::create_program).
#[derive(Debug, Clone, Copy)]
pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    /// Preprocessed WGSL source.
    pub source: &'a str,
    pub kind: &'a PipelineKind,
    pub stages: &'a [CompiledStage],
}

/// Lifecycle of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uncompiled,
    Compiling,
    Ready,
    Failed,
}

/// A compiled program, or the null program standing in for a failed one.
pub struct Pipeline {
    source_id: String,
    kind: PipelineKind,
    program: Option<GpuProgram>,
    stages: Vec<CompiledStage>,
    generation: u64,
    error: Option<String>,
}

impl Pipeline {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn kind(&self) -> &PipelineKind {
        &self.kind
    }

    /// Whether this is a null pipeline.
    pub fn is_null(&self) -> bool {
        self.program.is_none()
    }

    pub fn program(&self) -> Option<&GpuProgram> {
        self.program.as_ref()
    }

    pub fn stages(&self) -> &[CompiledStage] {
        &self.stages
    }

    /// Number of times this source id was (re)built, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Compile error that produced a null pipeline.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("source_id", &self.source_id)
            .field("null", &self.is_null())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Shared reference to a [`Pipeline`].
///
/// A frame that captured a reference keeps that program alive even if the
/// registry swaps in a reloaded one meanwhile.
#[derive(Debug, Clone)]
pub struct PipelineRef(Arc<Pipeline>);

impl PipelineRef {
    pub(crate) fn ready(
        source_id: &str,
        kind: PipelineKind,
        program: GpuProgram,
        stages: Vec<CompiledStage>,
        generation: u64,
    ) -> Self {
        Self(Arc::new(Pipeline {
            source_id: source_id.to_string(),
            kind,
            program: Some(program),
            stages,
            generation,
            error: None,
        }))
    }

    /// A null pipeline for `source_id`.
    pub fn null(source_id: &str, kind: PipelineKind, error: Option<String>) -> Self {
        Self(Arc::new(Pipeline {
            source_id: source_id.to_string(),
            kind,
            program: None,
            stages: Vec::new(),
            generation: 0,
            error,
        }))
    }

    /// Whether both references point to the same program object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for PipelineRef {
    type Target = Pipeline;

    fn deref(&self) -> &Pipeline {
        &self.0
    }
}

static_assertions::assert_impl_all!(PipelineRef: Send, Sync);
