//! Camera and view management.

use glam::{Mat4, Vec3};
use strata_core::Frustum;

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 8.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Create a new camera looking at a target.
    pub fn new(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let direction = (target - position).normalize();
        Self {
            position,
            direction,
            up,
            fov,
            aspect,
            near,
            far,
        }
    }

    /// Set the camera position.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio (after a resize).
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get camera uniforms for GPU.
    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms::from(self)
    }

    /// Extract frustum planes from the current camera state.
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(self.view_projection_matrix())
    }

    /// Get frustum uniforms for the culling shader.
    pub fn frustum_uniforms(&self) -> FrustumUniforms {
        FrustumUniforms::from(self.frustum())
    }
}

/// Camera uniform buffer data for GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    /// Inverse view-projection, used for ray reconstruction.
    pub inverse_view_projection: [[f32; 4]; 4],
    pub position: [f32; 4],
}

impl CameraUniforms {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

impl From<&Camera> for CameraUniforms {
    fn from(camera: &Camera) -> Self {
        let view_projection = camera.view_projection_matrix();
        Self {
            view: camera.view_matrix().to_cols_array_2d(),
            projection: camera.projection_matrix().to_cols_array_2d(),
            view_projection: view_projection.to_cols_array_2d(),
            inverse_view_projection: view_projection.inverse().to_cols_array_2d(),
            position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
        }
    }
}

/// Frustum plane data for the culling shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrustumUniforms {
    /// Six planes as (nx, ny, nz, d).
    pub planes: [[f32; 4]; 6],
}

impl FrustumUniforms {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

impl From<Frustum> for FrustumUniforms {
    fn from(frustum: Frustum) -> Self {
        Self {
            planes: frustum.planes.map(|p| p.to_array()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_uniforms_layout() {
        // Four mat4s plus a vec4, std140-compatible
        assert_eq!(CameraUniforms::SIZE, 4 * 64 + 16);
        assert_eq!(std::mem::offset_of!(CameraUniforms, view), 0);
        assert_eq!(std::mem::offset_of!(CameraUniforms, projection), 64);
        assert_eq!(std::mem::offset_of!(CameraUniforms, view_projection), 128);
        assert_eq!(
            std::mem::offset_of!(CameraUniforms, inverse_view_projection),
            192
        );
        assert_eq!(std::mem::offset_of!(CameraUniforms, position), 256);
    }

    #[test]
    fn frustum_uniforms_layout() {
        assert_eq!(FrustumUniforms::SIZE, 6 * 16);
    }

    #[test]
    fn look_at_normalizes_direction() {
        let mut camera = Camera::default();
        camera.set_position(Vec3::ZERO);
        camera.look_at(Vec3::new(10.0, 0.0, 0.0));
        approx::assert_relative_eq!(camera.direction.length(), 1.0, epsilon = 1e-6);
        approx::assert_relative_eq!(camera.direction.x, 1.0, epsilon = 1e-6);
    }
}
