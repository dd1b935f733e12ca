//! Scene and camera data read by the renderer.
//!
//! The renderer never mutates a [`Scene`]; it walks the live entities to build
//! draw lists and reads [`Scene::index_bound`] to size per-entity GPU arrays.

mod camera;
mod entity;

pub use camera::{CameraState, IDENTITY_MATRIX, Matrix4};
pub use entity::{EntityIndex, Scene, SceneEntity};
