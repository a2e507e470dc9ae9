//! Draw batching, GPU culling and frame orchestration for the Strata engine.
//!
//! The rendering model: meshes are packed into mini-batches (few large
//! vertex/index buffers, one indirect draw each), a compute pass frustum
//! culls the indirect commands on the GPU, an optional ray-query pass traces
//! sun shadows against the scene acceleration structure, and a raster pass
//! draws lighting plus an object-ID target used for mouse picking.

pub mod batch;
pub mod camera;
pub mod cull_pass;
pub mod lighting_pass;
pub mod loader;
pub mod mesh;
pub mod picking;
pub mod renderer;
pub mod shadow_pass;

pub use batch::{
    BatchAccumulator, BatchManager, DrawCommand, GpuAabb, MiniBatch, PendingBatch, SceneBuffers,
    UploadContext, MAX_BATCH_BYTES,
};
pub use camera::{Camera, CameraUniforms, FrustumUniforms};
pub use cull_pass::CullPass;
pub use lighting_pass::{LightingPass, LightingShaders, RenderTarget, NO_OBJECT, OBJECT_ID_FORMAT};
pub use loader::{import_meshes, RawMesh};
pub use mesh::{MeshData, Vertex};
pub use picking::PickingReadback;
pub use renderer::{Renderer, RendererConfig, RendererShaders, SceneObject};
pub use shadow_pass::{ShadowPass, SHADOW_FORMAT};
