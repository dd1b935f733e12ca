//! WGSL compilation through naga.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sandpiper_core::profiling::profile_scope;

use crate::error::GraphicsError;

use super::{CompiledStage, PipelineDescriptor, PipelineKind, ShaderSource};

/// Source language accepted by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderLanguage {
    #[default]
    Wgsl,
}

/// Shader compile options, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCompileOptions {
    /// Directories searched in order for file sources and includes.
    pub root_paths: Vec<PathBuf>,
    /// Where compiled SPIR-V is cached. `None` disables the disk cache.
    pub cache_dir: Option<PathBuf>,
    /// If set, the include-resolved source of every compile is written here.
    pub preprocessed_dir: Option<PathBuf>,
    /// If set, raw SPIR-V of every compiled stage is written here.
    pub binary_dir: Option<PathBuf>,
    /// Emit debug info into the SPIR-V.
    pub debug_info: bool,
    pub language: ShaderLanguage,
    /// Register a null pipeline when a source fails to compile the first time.
    /// Otherwise the next request retries the compile.
    pub register_null_on_first_failure: bool,
}

impl Default for ShaderCompileOptions {
    fn default() -> Self {
        Self {
            root_paths: vec![PathBuf::from("./src")],
            cache_dir: Some(PathBuf::from("spv")),
            preprocessed_dir: None,
            binary_dir: None,
            debug_info: true,
            language: ShaderLanguage::Wgsl,
            register_null_on_first_failure: true,
        }
    }
}

impl ShaderCompileOptions {
    pub fn with_root_paths(mut self, roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.root_paths = roots.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    pub fn with_preprocessed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preprocessed_dir = Some(dir.into());
        self
    }

    pub fn with_binary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.binary_dir = Some(dir.into());
        self
    }

    pub fn with_debug_info(mut self, debug_info: bool) -> Self {
        self.debug_info = debug_info;
        self
    }

    pub fn with_register_null_on_first_failure(mut self, register: bool) -> Self {
        self.register_null_on_first_failure = register;
        self
    }

    /// Stable text folded into cache keys. Only options that change the
    /// produced binaries take part.
    pub(crate) fn fingerprint(&self) -> String {
        format!("{:?};debug={}", self.language, self.debug_info)
    }
}

/// Loads, preprocesses and compiles shader sources.
#[derive(Debug, Clone)]
pub struct ShaderCompiler {
    options: ShaderCompileOptions,
}

impl ShaderCompiler {
    pub fn new(options: ShaderCompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ShaderCompileOptions {
        &self.options
    }

    /// Locate `path` under the root paths, first match wins.
    pub fn resolve_path(&self, path: &Path) -> Option<PathBuf> {
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        self.options
            .root_paths
            .iter()
            .map(|root| root.join(path))
            .find(|candidate| candidate.is_file())
    }

    /// Load the descriptor's source and expand `#include "path"` lines.
    pub fn load_source(&self, descriptor: &PipelineDescriptor) -> Result<String, GraphicsError> {
        let raw = match &descriptor.source {
            ShaderSource::Inline(code) => code.clone(),
            ShaderSource::File(path) => {
                let resolved = self.resolve_path(path).ok_or_else(|| {
                    compile_failure(
                        &descriptor.source_id,
                        format!("source {} not found under {:?}", path.display(), self.options.root_paths),
                    )
                })?;
                std::fs::read_to_string(&resolved)?
            }
        };

        let mut included = HashSet::new();
        let source = self.resolve_includes(&descriptor.source_id, &raw, &mut included)?;

        if let Some(dir) = &self.options.preprocessed_dir {
            write_artifact(dir, &format!("{}.wgsl", file_stem(&descriptor.source_id)), source.as_bytes());
        }

        Ok(source)
    }

    fn resolve_includes(
        &self,
        source_id: &str,
        source: &str,
        included: &mut HashSet<String>,
    ) -> Result<String, GraphicsError> {
        let mut result = String::with_capacity(source.len());

        for line in source.lines() {
            if let Some(path) = parse_include_directive(line.trim()) {
                // Each file is pasted at most once
                if !included.insert(path.to_string()) {
                    continue;
                }
                let resolved = self.resolve_path(Path::new(path)).ok_or_else(|| {
                    compile_failure(source_id, format!("include not found: \"{path}\""))
                })?;
                let text = std::fs::read_to_string(resolved)?;
                result.push_str(&self.resolve_includes(source_id, &text, included)?);
            } else {
                result.push_str(line);
            }
            result.push('\n');
        }

        Ok(result)
    }

    /// Compile preprocessed WGSL into one SPIR-V module per entry point.
    pub fn compile(
        &self,
        source_id: &str,
        source: &str,
        kind: &PipelineKind,
    ) -> Result<Vec<CompiledStage>, GraphicsError> {
        profile_scope!("shader_compile");

        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| compile_failure(source_id, e.emit_to_string(source)))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator
            .validate(&module)
            .map_err(|e| compile_failure(source_id, format!("validation error: {e}")))?;

        let flags = if self.options.debug_info {
            naga::back::spv::WriterFlags::DEBUG
        } else {
            naga::back::spv::WriterFlags::empty()
        };
        let options = naga::back::spv::Options {
            lang_version: (1, 3),
            flags,
            ..Default::default()
        };

        let mut stages = Vec::new();
        for (stage, entry_point) in kind.entry_points() {
            let naga_stage = stage.to_naga();
            if !module
                .entry_points
                .iter()
                .any(|ep| ep.name == entry_point && ep.stage == naga_stage)
            {
                return Err(compile_failure(
                    source_id,
                    format!("entry point '{entry_point}' not found for stage {stage:?}"),
                ));
            }

            let pipeline_options = naga::back::spv::PipelineOptions {
                shader_stage: naga_stage,
                entry_point: entry_point.to_string(),
            };
            let spirv =
                naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
                    .map_err(|e| {
                        compile_failure(source_id, format!("SPIR-V generation error: {e}"))
                    })?;

            if let Some(dir) = &self.options.binary_dir {
                let name = format!("{}.{}.spv", file_stem(source_id), entry_point);
                write_artifact(dir, &name, bytemuck::cast_slice(&spirv));
            }

            stages.push(CompiledStage {
                stage,
                entry_point: entry_point.to_string(),
                spirv,
            });
        }

        log::trace!("Compiled '{}' ({} stages)", source_id, stages.len());
        Ok(stages)
    }
}

fn compile_failure(source_id: &str, message: impl Into<String>) -> GraphicsError {
    GraphicsError::PipelineCompileFailure {
        source_id: source_id.to_string(),
        message: message.into(),
    }
}

/// Parse a `#include "path"` directive, returning the path if found.
fn parse_include_directive(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("#include")?.trim();
    if let Some(inner) = rest.strip_prefix('"') {
        inner.strip_suffix('"')
    } else if let Some(inner) = rest.strip_prefix('<') {
        inner.strip_suffix('>')
    } else {
        None
    }
}

/// Flatten a source id into a file name.
pub(crate) fn file_stem(source_id: &str) -> String {
    source_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Best-effort debug dump; failures are logged and ignored.
fn write_artifact(dir: &Path, name: &str, bytes: &[u8]) {
    let result = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(dir.join(name), bytes));
    if let Err(e) = result {
        log::warn!("Failed to write {}: {}", dir.join(name).display(), e);
    }
}
