//! # Sandpiper Core
//!
//! Backend-agnostic data shared by the renderer and its collaborators: scene
//! entities and camera state, asset identities, sampler enums, pooled
//! per-frame storage and optional profiling hooks.

pub mod asset;
pub mod pool;
pub mod profiling;
pub mod sampler;
pub mod scene;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
