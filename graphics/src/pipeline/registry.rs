//! Compile-on-demand program registry with hot reload.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;

use super::{
    PipelineDescriptor, PipelineRef, PipelineState, ProgramDescriptor, ShaderCache,
    ShaderCompileOptions, ShaderCompiler, ShaderSource,
};

/// Counts of registered programs by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub ready: usize,
    pub failed: usize,
}

struct Entry {
    pipeline: PipelineRef,
    descriptor: PipelineDescriptor,
    generation: u64,
    source_mtime: Option<SystemTime>,
}

/// Registry of GPU programs keyed by source id.
///
/// Lookups take a read lock and clone an `Arc`. Compilation runs on the
/// calling thread, one source at a time, outside the map lock.
pub struct PipelineRegistry {
    device: Arc<GraphicsDevice>,
    compiler: ShaderCompiler,
    cache: Option<ShaderCache>,
    entries: RwLock<HashMap<String, Entry>>,
    compiling: Mutex<HashSet<String>>,
    compile_lock: Mutex<()>,
    compilations: AtomicU64,
    cache_hits: AtomicU64,
}

impl PipelineRegistry {
    pub fn new(device: Arc<GraphicsDevice>, options: ShaderCompileOptions) -> Self {
        let cache = options.cache_dir.clone().map(ShaderCache::new);
        Self {
            device,
            compiler: ShaderCompiler::new(options),
            cache,
            entries: RwLock::new(HashMap::new()),
            compiling: Mutex::new(HashSet::new()),
            compile_lock: Mutex::new(()),
            compilations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub fn compiler(&self) -> &ShaderCompiler {
        &self.compiler
    }

    /// Return the program for `descriptor`, compiling it on first request.
    ///
    /// Never fails. A source that does not compile yields a null pipeline,
    /// which is registered under the source id when
    /// [`register_null_on_first_failure`](ShaderCompileOptions::register_null_on_first_failure)
    /// is set.
    pub fn get_or_compile(&self, descriptor: &PipelineDescriptor) -> PipelineRef {
        if let Some(pipeline) = self.get(&descriptor.source_id) {
            return pipeline;
        }

        let _guard = self.compile_lock.lock();
        // Another thread may have finished the same source while we waited
        if let Some(pipeline) = self.get(&descriptor.source_id) {
            return pipeline;
        }

        match self.build(descriptor, 1) {
            Ok((pipeline, source_mtime)) => {
                self.insert(descriptor, pipeline.clone(), 1, source_mtime);
                pipeline
            }
            Err(e) => {
                log::warn!("Using null pipeline for '{}': {}", descriptor.source_id, e);
                let null = PipelineRef::null(
                    &descriptor.source_id,
                    descriptor.kind.clone(),
                    Some(e.to_string()),
                );
                if self.compiler.options().register_null_on_first_failure {
                    let mtime = self.source_mtime(descriptor);
                    self.insert(descriptor, null.clone(), 0, mtime);
                }
                null
            }
        }
    }

    /// Registered program for `source_id`, if any.
    pub fn get(&self, source_id: &str) -> Option<PipelineRef> {
        self.entries
            .read()
            .get(source_id)
            .map(|entry| entry.pipeline.clone())
    }

    pub fn state(&self, source_id: &str) -> PipelineState {
        if self.compiling.lock().contains(source_id) {
            return PipelineState::Compiling;
        }
        match self.entries.read().get(source_id) {
            Some(entry) if entry.pipeline.is_null() => PipelineState::Failed,
            Some(_) => PipelineState::Ready,
            None => PipelineState::Uncompiled,
        }
    }

    /// Recompile a registered program and swap it in.
    ///
    /// On failure the previous program stays registered and the error is
    /// returned.
    pub fn reload(&self, source_id: &str) -> Result<PipelineRef, GraphicsError> {
        // Held across read and publish so concurrent reloads get distinct generations
        let _guard = self.compile_lock.lock();
        let (descriptor, generation) = {
            let entries = self.entries.read();
            let entry = entries.get(source_id).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("unknown pipeline '{source_id}'"))
            })?;
            (entry.descriptor.clone(), entry.generation + 1)
        };

        match self.build(&descriptor, generation) {
            Ok((pipeline, source_mtime)) => {
                log::info!("Reloaded pipeline '{}' (generation {})", source_id, generation);
                self.insert(&descriptor, pipeline.clone(), generation, source_mtime);
                Ok(pipeline)
            }
            Err(e) => {
                log::warn!("Reload of '{}' failed, keeping previous program: {}", source_id, e);
                // Remember the new timestamp so a broken file is not retried every poll
                if let Some(entry) = self.entries.write().get_mut(source_id) {
                    entry.source_mtime = self.source_mtime(&descriptor);
                }
                Err(e)
            }
        }
    }

    /// Reload every file-backed program whose source changed on disk.
    /// Returns the ids that were rebuilt successfully.
    pub fn reload_modified(&self) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| {
                let current = self.source_mtime(&entry.descriptor);
                current.is_some() && current != entry.source_mtime
            })
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter(|id| self.reload(id).is_ok())
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.read();
        let failed = entries.values().filter(|e| e.pipeline.is_null()).count();
        RegistryStats {
            ready: entries.len() - failed,
            failed,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of compiles served from the disk cache.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Number of compiles that ran the shader compiler.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Drop every registered program.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn insert(
        &self,
        descriptor: &PipelineDescriptor,
        pipeline: PipelineRef,
        generation: u64,
        source_mtime: Option<SystemTime>,
    ) {
        self.entries.write().insert(
            descriptor.source_id.clone(),
            Entry {
                pipeline,
                descriptor: descriptor.clone(),
                generation,
                source_mtime,
            },
        );
    }

    fn source_mtime(&self, descriptor: &PipelineDescriptor) -> Option<SystemTime> {
        match &descriptor.source {
            ShaderSource::File(path) => self
                .compiler
                .resolve_path(path)
                .and_then(|p| std::fs::metadata(p).ok())
                .and_then(|m| m.modified().ok()),
            ShaderSource::Inline(_) => None,
        }
    }

    fn build(
        &self,
        descriptor: &PipelineDescriptor,
        generation: u64,
    ) -> Result<(PipelineRef, Option<SystemTime>), GraphicsError> {
        let source_id = descriptor.source_id.as_str();
        self.compiling.lock().insert(source_id.to_string());
        let result = self.build_inner(descriptor, generation);
        self.compiling.lock().remove(source_id);
        result
    }

    fn build_inner(
        &self,
        descriptor: &PipelineDescriptor,
        generation: u64,
    ) -> Result<(PipelineRef, Option<SystemTime>), GraphicsError> {
        let source_mtime = self.source_mtime(descriptor);
        let source = self.compiler.load_source(descriptor)?;
        let key = ShaderCache::key(
            &source,
            &self.compiler.options().fingerprint(),
            &descriptor.kind,
        );

        let cached = self.cache.as_ref().and_then(|cache| cache.load(&key));
        let stages = match cached {
            Some(stages) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                stages
            }
            None => {
                self.compilations.fetch_add(1, Ordering::Relaxed);
                let stages =
                    self.compiler
                        .compile(&descriptor.source_id, &source, &descriptor.kind)?;
                if let Some(cache) = &self.cache
                    && let Err(e) = cache.store(&key, &stages)
                {
                    log::warn!("Failed to cache '{}': {}", descriptor.source_id, e);
                }
                stages
            }
        };

        let program = self.device.create_program(&ProgramDescriptor {
            label: &descriptor.source_id,
            source: &source,
            kind: &descriptor.kind,
            stages: &stages,
        })?;

        Ok((
            PipelineRef::ready(
                &descriptor.source_id,
                descriptor.kind.clone(),
                program,
                stages,
                generation,
            ),
            source_mtime,
        ))
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("pipelines", &self.len())
            .field("compilations", &self.compilations())
            .field("cache_hits", &self.cache_hits())
            .finish()
    }
}

static_assertions::assert_impl_all!(PipelineRegistry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::DeviceCapabilities;
    use crate::pipeline::PipelineKind;
    use std::path::Path;

    const COMPUTE: &str = "@compute @workgroup_size(1) fn cs_main() {}";
    const COMPUTE_V2: &str = "@compute @workgroup_size(2) fn cs_main() {}";

    fn device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(
            Arc::new(DummyBackend::new()),
            "registry-test",
            DeviceCapabilities::default(),
        )
    }

    fn options(cache: Option<&Path>) -> ShaderCompileOptions {
        ShaderCompileOptions::default().with_cache_dir(cache.map(Path::to_path_buf))
    }

    #[test]
    fn test_compiles_once() {
        let registry = PipelineRegistry::new(device(), options(None));
        let desc = PipelineDescriptor::inline("blit", COMPUTE, PipelineKind::compute());

        assert_eq!(registry.state("blit"), PipelineState::Uncompiled);
        let first = registry.get_or_compile(&desc);
        let second = registry.get_or_compile(&desc);

        assert!(!first.is_null());
        assert!(first.ptr_eq(&second));
        assert_eq!(registry.compilations(), 1);
        assert_eq!(registry.state("blit"), PipelineState::Ready);
        assert_eq!(first.generation(), 1);
    }

    #[test]
    fn test_failure_registers_null_pipeline() {
        let registry = PipelineRegistry::new(device(), options(None));
        let desc = PipelineDescriptor::inline("broken", "fn (", PipelineKind::compute());

        let pipeline = registry.get_or_compile(&desc);
        assert!(pipeline.is_null());
        assert!(pipeline.error().is_some());
        assert_eq!(registry.state("broken"), PipelineState::Failed);
        assert!(registry.get("broken").unwrap().ptr_eq(&pipeline));
        assert_eq!(registry.stats(), RegistryStats { ready: 0, failed: 1 });
    }

    #[test]
    fn test_failure_without_registration_retries() {
        let registry = PipelineRegistry::new(
            device(),
            options(None).with_register_null_on_first_failure(false),
        );
        let desc = PipelineDescriptor::inline("broken", "fn (", PipelineKind::compute());

        assert!(registry.get_or_compile(&desc).is_null());
        assert!(registry.get("broken").is_none());
        registry.get_or_compile(&desc);
        assert_eq!(registry.compilations(), 2);
    }

    #[test]
    fn test_disk_cache_shared_between_registries() {
        let dir = tempfile::tempdir().unwrap();
        let desc = PipelineDescriptor::inline("blit", COMPUTE, PipelineKind::compute());

        let first = PipelineRegistry::new(device(), options(Some(dir.path())));
        first.get_or_compile(&desc);
        assert_eq!((first.compilations(), first.cache_hits()), (1, 0));

        let second = PipelineRegistry::new(device(), options(Some(dir.path())));
        let pipeline = second.get_or_compile(&desc);
        assert!(!pipeline.is_null());
        assert_eq!((second.compilations(), second.cache_hits()), (0, 1));
    }

    #[test]
    fn test_reload_keeps_old_program_alive_for_holders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.wgsl");
        std::fs::write(&path, COMPUTE).unwrap();

        let registry = PipelineRegistry::new(
            device(),
            options(None).with_root_paths([dir.path()]),
        );
        let desc = PipelineDescriptor::from_file("sim.wgsl", PipelineKind::compute());
        let old = registry.get_or_compile(&desc);

        std::fs::write(&path, COMPUTE_V2).unwrap();
        let new = registry.reload("sim.wgsl").unwrap();

        assert!(!old.ptr_eq(&new));
        assert!(!old.is_null());
        assert_eq!(new.generation(), 2);
        assert!(registry.get("sim.wgsl").unwrap().ptr_eq(&new));
    }

    #[test]
    fn test_failed_reload_keeps_last_good() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.wgsl");
        std::fs::write(&path, COMPUTE).unwrap();

        let registry = PipelineRegistry::new(
            device(),
            options(None).with_root_paths([dir.path()]),
        );
        let desc = PipelineDescriptor::from_file("sim.wgsl", PipelineKind::compute());
        let good = registry.get_or_compile(&desc);

        std::fs::write(&path, "fn (").unwrap();
        assert!(registry.reload("sim.wgsl").is_err());
        assert!(registry.get("sim.wgsl").unwrap().ptr_eq(&good));
    }

    #[test]
    fn test_concurrent_reloads_get_distinct_generations() {
        let registry = PipelineRegistry::new(device(), options(None));
        registry.get_or_compile(&PipelineDescriptor::inline(
            "blit",
            COMPUTE,
            PipelineKind::compute(),
        ));

        let mut generations: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| registry.reload("blit").unwrap().generation()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        generations.sort_unstable();

        assert_eq!(generations, vec![2, 3, 4, 5]);
        assert_eq!(registry.get("blit").unwrap().generation(), 5);
    }

    #[test]
    fn test_reload_unknown_source() {
        let registry = PipelineRegistry::new(device(), options(None));
        assert!(matches!(
            registry.reload("nope"),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_reload_modified_skips_unchanged() {
        let registry = PipelineRegistry::new(device(), options(None));
        registry.get_or_compile(&PipelineDescriptor::inline(
            "blit",
            COMPUTE,
            PipelineKind::compute(),
        ));
        assert!(registry.reload_modified().is_empty());
    }
}
