//! Asset streaming off the render thread.
//!
//! The [`AssetStreamer`] owns a fixed pool of worker threads. The render
//! thread calls [`request`](AssetStreamer::request) for every asset a scene
//! references; a worker fetches the decoded payload from the
//! [`AssetSource`], uploads it through the device and publishes the result on
//! the asset's [`AssetHandle`]. Once per frame the renderer collects newly
//! resident ids with [`drain_newly_resident`](AssetStreamer::drain_newly_resident).
//!
//! Workers never block the render thread: results are published once through
//! a `OnceLock` and announced on a channel. A loader that hangs stalls only
//! its own asset.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use sandpiper_core::asset::AssetId;
//! use sandpiper_graphics::backend::DummyBackend;
//! use sandpiper_graphics::config::StreamingConfig;
//! use sandpiper_graphics::device::{DeviceCapabilities, GraphicsDevice};
//! use sandpiper_graphics::streaming::{AssetPayload, AssetSourceError, AssetState, AssetStreamer};
//!
//! let device = GraphicsDevice::new(
//!     Arc::new(DummyBackend::new()),
//!     "streaming",
//!     DeviceCapabilities::default(),
//! );
//! let source = |_id: AssetId| -> Result<AssetPayload, AssetSourceError> {
//!     Ok(AssetPayload::mesh(vec![0; 36], 3))
//! };
//! let mut streamer = AssetStreamer::new(device, Arc::new(source), StreamingConfig::default()).unwrap();
//!
//! let handle = streamer.request(AssetId::new(7));
//! assert!(streamer.wait_idle(Duration::from_secs(5)));
//! assert_eq!(handle.state(), AssetState::Resident);
//! assert_eq!(streamer.drain_newly_resident(), vec![AssetId::new(7)]);
//! streamer.shutdown();
//! ```

mod handle;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use sandpiper_core::asset::AssetId;

use crate::config::StreamingConfig;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::TextureFormat;

pub use crate::config::RetryPolicy;
pub use handle::{AssetHandle, AssetResource, AssetState, ResidentAsset};

use worker::Shared;

/// Decoded asset data ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetPayload {
    Mesh {
        vertices: Vec<u8>,
        vertex_count: u32,
    },
    Texture {
        width: u32,
        height: u32,
        format: TextureFormat,
        /// Tightly packed base level.
        pixels: Vec<u8>,
    },
}

impl AssetPayload {
    pub fn mesh(vertices: Vec<u8>, vertex_count: u32) -> Self {
        Self::Mesh {
            vertices,
            vertex_count,
        }
    }

    pub fn texture(width: u32, height: u32, format: TextureFormat, pixels: Vec<u8>) -> Self {
        Self::Texture {
            width,
            height,
            format,
            pixels,
        }
    }
}

/// Failure reported by an [`AssetSource`].
#[derive(Debug, thiserror::Error)]
pub enum AssetSourceError {
    #[error("{0} not found")]
    NotFound(AssetId),
    #[error("failed to decode {asset}: {message}")]
    Decode { asset: AssetId, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Collaborator producing decoded assets. Called from worker threads.
pub trait AssetSource: Send + Sync {
    fn load(&self, id: AssetId) -> Result<AssetPayload, AssetSourceError>;
}

impl<F> AssetSource for F
where
    F: Fn(AssetId) -> Result<AssetPayload, AssetSourceError> + Send + Sync,
{
    fn load(&self, id: AssetId) -> Result<AssetPayload, AssetSourceError> {
        self(id)
    }
}

/// Read-only residency queries used to build draw lists.
pub trait ResidencyView {
    fn is_resident(&self, asset: AssetId) -> bool;

    /// Residency slot of a resident asset.
    fn slot(&self, asset: AssetId) -> Option<u32>;

    /// Vertex count of a resident mesh.
    fn vertex_count(&self, asset: AssetId) -> Option<u32>;
}

/// Worker-pool driven asset loader.
pub struct AssetStreamer {
    shared: Arc<Shared>,
    entries: RwLock<HashMap<AssetId, AssetHandle>>,
    jobs: Option<Sender<AssetHandle>>,
    completions: Receiver<AssetId>,
    workers: Vec<JoinHandle<()>>,
}

impl AssetStreamer {
    /// Spawn `config.workers` worker threads.
    pub fn new(
        device: Arc<GraphicsDevice>,
        source: Arc<dyn AssetSource>,
        config: StreamingConfig,
    ) -> Result<Self, GraphicsError> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<AssetHandle>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<AssetId>();
        let shared = Arc::new(Shared::new(device, source, config.retry, done_tx));

        let worker_count = config.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = shared.clone();
            let jobs = job_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("asset-worker-{index}"))
                .spawn(move || worker::run(index, shared, jobs))?;
            workers.push(handle);
        }

        log::info!("Asset streamer started with {} workers", worker_count);

        Ok(Self {
            shared,
            entries: RwLock::new(HashMap::new()),
            jobs: Some(job_tx),
            completions: done_rx,
            workers,
        })
    }

    /// Request an asset. Repeated requests return the same handle and queue
    /// no further work.
    pub fn request(&self, id: AssetId) -> AssetHandle {
        if let Some(handle) = self.entries.read().get(&id) {
            return handle.clone();
        }

        let handle = {
            let mut entries = self.entries.write();
            if let Some(handle) = entries.get(&id) {
                return handle.clone();
            }
            let handle = AssetHandle::new(id);
            entries.insert(id, handle.clone());
            handle
        };

        log::trace!("Requested {}", id);
        self.enqueue(&handle);
        handle
    }

    /// Put a load-failed asset back in the queue. Returns `false` for any
    /// other state.
    pub fn retry_failed(&self, id: AssetId) -> bool {
        let Some(handle) = self.handle(id) else {
            return false;
        };
        if !handle.transition(AssetState::LoadFailed, AssetState::Requested) {
            return false;
        }
        handle.set_attempts(0);
        log::info!("Retrying {}", id);
        self.enqueue(&handle);
        true
    }

    fn enqueue(&self, handle: &AssetHandle) {
        let Some(jobs) = &self.jobs else {
            log::warn!("Asset streamer is shut down, {} stays requested", handle.id());
            return;
        };
        self.shared.job_queued();
        if jobs.send(handle.clone()).is_err() {
            self.shared.job_finished();
            log::warn!("Asset workers are gone, {} stays requested", handle.id());
        }
    }

    pub fn handle(&self, id: AssetId) -> Option<AssetHandle> {
        self.entries.read().get(&id).cloned()
    }

    pub fn state(&self, id: AssetId) -> Option<AssetState> {
        self.entries.read().get(&id).map(AssetHandle::state)
    }

    pub fn resident(&self, id: AssetId) -> Option<Arc<ResidentAsset>> {
        self.entries.read().get(&id)?.resident().cloned()
    }

    pub fn residency_slot(&self, id: AssetId) -> Option<u32> {
        self.entries.read().get(&id)?.resident().map(|asset| asset.slot)
    }

    /// Ids that became resident since the previous call.
    pub fn drain_newly_resident(&self) -> Vec<AssetId> {
        self.completions.try_iter().collect()
    }

    /// Number of requested assets, in any state.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// Block until every queued job has finished. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.wait_idle(Instant::now() + timeout)
    }

    /// Stop accepting work, join the workers and release every uploaded
    /// resource. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        let Some(jobs) = self.jobs.take() else {
            return;
        };
        drop(jobs);

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Asset worker panicked");
            }
        }

        let device = &self.shared.device;
        let mut released = 0;
        for asset in self.entries.read().values().filter_map(AssetHandle::resident) {
            asset.release(device);
            released += 1;
        }
        log::info!("Asset streamer shut down, released {} assets", released);
    }
}

impl ResidencyView for AssetStreamer {
    fn is_resident(&self, asset: AssetId) -> bool {
        self.state(asset) == Some(AssetState::Resident)
    }

    fn slot(&self, asset: AssetId) -> Option<u32> {
        self.residency_slot(asset)
    }

    fn vertex_count(&self, asset: AssetId) -> Option<u32> {
        self.entries
            .read()
            .get(&asset)?
            .resident()
            .map(|asset| asset.vertex_count)
    }
}

impl Drop for AssetStreamer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AssetStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStreamer")
            .field("assets", &self.len())
            .field("pending", &self.pending())
            .field("workers", &self.workers.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(AssetStreamer: Send, Sync);
static_assertions::assert_impl_all!(AssetHandle: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::DeviceCapabilities;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(
            Arc::new(DummyBackend::new()),
            "streaming test",
            DeviceCapabilities::default(),
        )
    }

    fn fast_retry() -> StreamingConfig {
        StreamingConfig::default().with_retry(RetryPolicy::default().with_backoff(
            Duration::from_millis(1),
            2.0,
            Duration::from_millis(4),
        ))
    }

    /// Source that counts loads and fails the first `failures` of them.
    struct CountingSource {
        loads: AtomicUsize,
        failures: usize,
    }

    impl CountingSource {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                failures,
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl AssetSource for CountingSource {
        fn load(&self, id: AssetId) -> Result<AssetPayload, AssetSourceError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(AssetSourceError::Decode {
                    asset: id,
                    message: format!("failure {n}"),
                });
            }
            if id.raw() >= 100 {
                Ok(AssetPayload::texture(
                    2,
                    2,
                    TextureFormat::Rgba8Unorm,
                    vec![255; 16],
                ))
            } else {
                Ok(AssetPayload::mesh(vec![1; 48], 4))
            }
        }
    }

    #[test]
    fn test_mesh_and_texture_become_resident() {
        let device = device();
        let source = CountingSource::new(0);
        let streamer = AssetStreamer::new(device.clone(), source, fast_retry()).unwrap();

        let mesh = streamer.request(AssetId::new(1));
        let texture = streamer.request(AssetId::new(100));
        assert!(streamer.wait_idle(TIMEOUT));

        assert!(mesh.is_resident());
        assert!(texture.is_resident());
        assert!(matches!(
            mesh.resident().map(|a| &a.resource),
            Some(AssetResource::Mesh(_))
        ));
        assert_eq!(streamer.vertex_count(AssetId::new(1)), Some(4));
        assert_eq!(streamer.vertex_count(AssetId::new(100)), Some(0));

        let mut slots = vec![
            streamer.residency_slot(AssetId::new(1)).unwrap(),
            streamer.residency_slot(AssetId::new(100)).unwrap(),
        ];
        slots.sort();
        assert_eq!(slots, vec![0, 1]);

        let mut drained = streamer.drain_newly_resident();
        drained.sort();
        assert_eq!(drained, vec![AssetId::new(1), AssetId::new(100)]);
        assert!(streamer.drain_newly_resident().is_empty());
        assert_eq!(device.buffer_count(), 1);
        assert_eq!(device.texture_count(), 1);
    }

    #[test]
    fn test_repeated_request_is_idempotent() {
        let source = CountingSource::new(0);
        let streamer = AssetStreamer::new(device(), source.clone(), fast_retry()).unwrap();

        let first = streamer.request(AssetId::new(5));
        assert!(streamer.wait_idle(TIMEOUT));
        let second = streamer.request(AssetId::new(5));

        assert!(first.ptr_eq(&second));
        assert_eq!(source.loads(), 1);
        assert_eq!(streamer.len(), 1);
        assert_eq!(streamer.pending(), 0);
    }

    #[test]
    fn test_concurrent_requests_load_once() {
        let source = CountingSource::new(0);
        let streamer = AssetStreamer::new(device(), source.clone(), fast_retry()).unwrap();
        let barrier = Barrier::new(2);

        let (a, b) = std::thread::scope(|scope| {
            let first = scope.spawn(|| {
                barrier.wait();
                streamer.request(AssetId::new(9))
            });
            let second = scope.spawn(|| {
                barrier.wait();
                streamer.request(AssetId::new(9))
            });
            (first.join().unwrap(), second.join().unwrap())
        });

        assert!(streamer.wait_idle(TIMEOUT));
        assert!(a.ptr_eq(&b));
        assert!(a.is_resident() && b.is_resident());
        assert_eq!(source.loads(), 1);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let source = CountingSource::new(2);
        let streamer = AssetStreamer::new(device(), source.clone(), fast_retry()).unwrap();

        let handle = streamer.request(AssetId::new(3));
        assert!(streamer.wait_idle(TIMEOUT));

        assert_eq!(handle.state(), AssetState::Resident);
        assert_eq!(handle.attempts(), 3);
        assert_eq!(source.loads(), 3);
    }

    #[test]
    fn test_exhausted_retries_mark_load_failed() {
        let source = CountingSource::new(usize::MAX);
        let streamer = AssetStreamer::new(device(), source.clone(), fast_retry()).unwrap();

        let handle = streamer.request(AssetId::new(3));
        assert!(streamer.wait_idle(TIMEOUT));

        assert_eq!(handle.state(), AssetState::LoadFailed);
        assert_eq!(handle.attempts(), 3);
        assert_eq!(source.loads(), 3);
        assert!(handle.last_error().is_some_and(|e| e.contains("failure 2")));
        assert!(streamer.drain_newly_resident().is_empty());

        // Terminal until retried explicitly.
        streamer.request(AssetId::new(3));
        assert!(streamer.wait_idle(TIMEOUT));
        assert_eq!(source.loads(), 3);
    }

    #[test]
    fn test_retry_failed_requeues() {
        let source = CountingSource::new(1);
        let config = StreamingConfig::default().with_retry(RetryPolicy::no_retry());
        let streamer = AssetStreamer::new(device(), source.clone(), config).unwrap();

        let handle = streamer.request(AssetId::new(4));
        assert!(streamer.wait_idle(TIMEOUT));
        assert_eq!(handle.state(), AssetState::LoadFailed);

        assert!(streamer.retry_failed(AssetId::new(4)));
        assert!(streamer.wait_idle(TIMEOUT));
        assert_eq!(handle.state(), AssetState::Resident);
        assert!(!streamer.retry_failed(AssetId::new(4)));
        assert!(!streamer.retry_failed(AssetId::new(99)));
    }

    #[test]
    fn test_resident_is_never_revisited() {
        let source = CountingSource::new(0);
        let streamer = AssetStreamer::new(device(), source, fast_retry()).unwrap();
        let handle = streamer.request(AssetId::new(1));

        let mut seen_resident = false;
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            match handle.state() {
                AssetState::Resident => seen_resident = true,
                state => assert!(!seen_resident, "went back to {state:?}"),
            }
            if seen_resident && streamer.pending() == 0 {
                break;
            }
        }
        assert!(seen_resident);
    }

    #[test]
    fn test_shutdown_releases_uploads() {
        let device = device();
        let mut streamer =
            AssetStreamer::new(device.clone(), CountingSource::new(0), fast_retry()).unwrap();
        streamer.request(AssetId::new(1));
        streamer.request(AssetId::new(100));
        assert!(streamer.wait_idle(TIMEOUT));
        assert_eq!(device.live_resource_count(), 2);

        streamer.shutdown();
        streamer.shutdown();
        assert_eq!(device.live_resource_count(), 0);

        let late = streamer.request(AssetId::new(2));
        assert_eq!(late.state(), AssetState::Requested);
    }
}
