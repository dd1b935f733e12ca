/// Column-major 4x4 matrix.
pub type Matrix4 = [[f32; 4]; 4];

pub const IDENTITY_MATRIX: Matrix4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Camera matrices produced by the camera controller for one view.
///
/// Projection uses the `[0, 1]` depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub view: Matrix4,
    pub projection: Matrix4,
    /// World-space eye position.
    pub position: [f32; 3],
}

impl CameraState {
    pub fn new(view: Matrix4, projection: Matrix4, position: [f32; 3]) -> Self {
        Self {
            view,
            projection,
            position,
        }
    }
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            view: IDENTITY_MATRIX,
            projection: IDENTITY_MATRIX,
            position: [0.0; 3],
        }
    }
}
