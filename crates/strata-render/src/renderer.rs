//! Frame orchestration.
//!
//! Ties the passes into one ordered GPU frame:
//! culling compute → shadow rays → lighting + object-ID raster → present,
//! chained with semaphores. Each pass follows the same protocol per frame
//! slot: wait the pass fence (previous use of this slot's command buffer),
//! reset it, write CPU-visible buffers, re-record, submit with the fence.
//! All waits are unbounded; a GPU hang surfaces as a CPU hang.

use ash::vk;
use glam::{Mat4, Vec3};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use strata_gpu::command::{self, CommandPool};
use strata_gpu::error::{GpuError, Result};
use strata_gpu::memory::{GpuBuffer, GpuImage};
use strata_gpu::raytracing::{self, AccelerationStructure, BlasInput};
use strata_gpu::surface::{SurfaceContext, Swapchain};
use strata_gpu::sync::{FrameSyncManager, PassSync};
use strata_gpu::{DescriptorAllocator, DescriptorLayoutCache, GpuContext};

use crate::batch::{BatchManager, UploadContext};
use crate::camera::Camera;
use crate::cull_pass::CullPass;
use crate::lighting_pass::{LightingPass, LightingShaders, RenderTarget};
use crate::mesh::{MeshData, Vertex};
use crate::picking::PickingReadback;
use crate::shadow_pass::{self, ShadowPass};

/// SPIR-V for every pipeline the renderer owns.
pub struct RendererShaders {
    /// Frustum-culling compute shader.
    pub cull: Vec<u32>,
    /// Lighting + object-ID pipelines.
    pub lighting: LightingShaders,
    /// Ray-query shadow compute shader; `None` disables the shadow pass.
    pub shadow: Option<Vec<u32>>,
}

/// Renderer configuration.
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub frames_in_flight: usize,
    pub sun_direction: Vec3,
    pub shaders: RendererShaders,
}

/// One object of the scene: a mesh instance with a caller-chosen ID
/// returned by picking.
pub struct SceneObject {
    pub mesh: MeshData,
    pub transform: Mat4,
    pub object_id: u32,
}

/// Device-address geometry buffers retained for the acceleration structure.
struct RtGeometry {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    blas: AccelerationStructure,
    tlas: AccelerationStructure,
}

/// The engine's frame orchestrator.
///
/// Explicitly constructed and handed the [`GpuContext`] by reference on
/// every call; owns everything else: surface, swapchain, passes, batches,
/// synchronization.
pub struct Renderer {
    surface: SurfaceContext,
    swapchain: Swapchain,
    frame_sync: FrameSyncManager,

    command_pool: CommandPool,
    cull_cmds: Vec<vk::CommandBuffer>,
    shadow_cmds: Vec<vk::CommandBuffer>,
    light_cmds: Vec<vk::CommandBuffer>,
    cull_sync: Vec<PassSync>,
    shadow_sync: Vec<PassSync>,
    light_sync: Vec<PassSync>,

    descriptor_cache: DescriptorLayoutCache,
    descriptor_allocator: DescriptorAllocator,

    cull_pass: CullPass,
    lighting_pass: LightingPass,
    shadow_pass: Option<ShadowPass>,
    // Bound as the shadow mask when the shadow pass is disabled.
    fallback_mask: Option<(GpuImage, vk::ImageView)>,

    batch_manager: BatchManager,
    rt_geometry: Option<RtGeometry>,
    picking: PickingReadback,

    sun_direction: Vec3,
    frames_in_flight: usize,
    vsync: bool,
}

impl Renderer {
    /// Create the renderer for a window.
    ///
    /// # Safety
    /// The GPU context must be valid and the window handles must outlive the
    /// surface.
    pub unsafe fn new<W>(gpu: &GpuContext, window: &W, config: RendererConfig) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let device = gpu.device();
        let frames_in_flight = config.frames_in_flight.max(1);

        let surface = SurfaceContext::from_window(gpu, window)?;
        let swapchain =
            surface.create_swapchain(gpu, config.width, config.height, config.vsync, None)?;

        let frame_sync = FrameSyncManager::new(device, frames_in_flight)?;

        let command_pool = CommandPool::new(
            device,
            gpu.graphics_queue_family(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let cull_cmds = command_pool.allocate_command_buffers(
            device,
            vk::CommandBufferLevel::PRIMARY,
            frames_in_flight as u32,
        )?;
        let shadow_cmds = command_pool.allocate_command_buffers(
            device,
            vk::CommandBufferLevel::PRIMARY,
            frames_in_flight as u32,
        )?;
        let light_cmds = command_pool.allocate_command_buffers(
            device,
            vk::CommandBufferLevel::PRIMARY,
            frames_in_flight as u32,
        )?;

        let mut cull_sync = Vec::with_capacity(frames_in_flight);
        let mut shadow_sync = Vec::with_capacity(frames_in_flight);
        let mut light_sync = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            cull_sync.push(PassSync::new(device)?);
            shadow_sync.push(PassSync::new(device)?);
            light_sync.push(PassSync::new(device)?);
        }

        let mut descriptor_cache = DescriptorLayoutCache::new();
        let mut descriptor_allocator = DescriptorAllocator::new();
        let mut allocator = gpu.allocator().lock();

        let cull_pass = CullPass::new(
            device,
            &mut allocator,
            &mut descriptor_cache,
            &config.shaders.cull,
            frames_in_flight,
        )?;

        let lighting_pass = LightingPass::new(
            device,
            &mut allocator,
            &mut descriptor_cache,
            &mut descriptor_allocator,
            &config.shaders.lighting,
            swapchain.format,
            swapchain.extent,
            frames_in_flight,
        )?;

        let shadow_pass = match &config.shaders.shadow {
            Some(shader) if gpu.ray_tracing_enabled() => Some(ShadowPass::new(
                device,
                &mut allocator,
                &mut descriptor_cache,
                &command_pool,
                gpu.graphics_queue(),
                shader,
                swapchain.extent,
                frames_in_flight,
            )?),
            Some(_) => {
                tracing::warn!("shadow shader supplied but ray tracing unavailable, disabling");
                None
            }
            None => None,
        };

        let fallback_mask = if shadow_pass.is_none() {
            Some(shadow_pass::create_fallback_mask(
                device,
                &mut allocator,
                &command_pool,
                gpu.graphics_queue(),
            )?)
        } else {
            None
        };

        let picking = PickingReadback::new(&mut allocator)?;
        drop(allocator);

        Ok(Self {
            surface,
            swapchain,
            frame_sync,
            command_pool,
            cull_cmds,
            shadow_cmds,
            light_cmds,
            cull_sync,
            shadow_sync,
            light_sync,
            descriptor_cache,
            descriptor_allocator,
            cull_pass,
            lighting_pass,
            shadow_pass,
            fallback_mask,
            batch_manager: BatchManager::new(),
            rt_geometry: None,
            picking,
            sun_direction: config.sun_direction.normalize_or_zero(),
            frames_in_flight,
            vsync: config.vsync,
        })
    }

    /// Number of objects in the current scene.
    pub fn object_count(&self) -> u32 {
        self.batch_manager.object_count()
    }

    /// Number of frame slots cycling through the pass fences.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Replace the scene wholesale.
    ///
    /// Any topology change goes through here: waits for the device, clears
    /// the batch manager and descriptor pools, re-accumulates every mesh,
    /// flushes, uploads the scene mirrors, rebuilds the acceleration
    /// structures, and rebinds every pass.
    ///
    /// `textures` is the bindless material array (may be empty); indices
    /// into it come from the material system, out of scope here.
    ///
    /// # Safety
    /// The GPU context must be valid; texture image views must outlive the
    /// scene.
    pub unsafe fn set_scene(
        &mut self,
        gpu: &GpuContext,
        objects: &[SceneObject],
        textures: &[vk::DescriptorImageInfo],
    ) -> Result<()> {
        let device = gpu.device();

        // Nothing from previous frames may survive a topology change.
        gpu.wait_idle()?;

        let mut allocator = gpu.allocator().lock();
        self.batch_manager.clear(&mut allocator)?;
        if let Some(rt) = self.rt_geometry.take() {
            let loader = gpu.accel_loader()?;
            rt.tlas.destroy(loader, &mut allocator)?;
            rt.blas.destroy(loader, &mut allocator)?;
            let mut vb = rt.vertex_buffer;
            let mut ib = rt.index_buffer;
            allocator.free_buffer(&mut vb)?;
            allocator.free_buffer(&mut ib)?;
        }

        // All sets are invalidated together; everything below rebinds.
        self.descriptor_allocator.reset_pools(device)?;
        self.lighting_pass.rebind_frame_sets(
            device,
            &mut self.descriptor_cache,
            &mut self.descriptor_allocator,
        )?;

        let mut upload = UploadContext {
            device,
            allocator: &mut allocator,
            pool: &self.command_pool,
            queue: gpu.graphics_queue(),
        };

        for object in objects {
            self.batch_manager.add_mesh(
                &mut upload,
                &object.mesh,
                object.transform,
                object.object_id,
                false,
            )?;
        }
        self.batch_manager.flush(&mut upload)?;
        self.batch_manager.upload_scene_buffers(&mut upload)?;

        let Some(scene) = self.batch_manager.scene_buffers() else {
            // Empty scene: passes keep no stale bindings
            return Ok(());
        };

        self.cull_pass.bind_scene(
            device,
            &mut self.descriptor_cache,
            &mut self.descriptor_allocator,
            scene,
        )?;

        // Acceleration structures over the flattened static geometry
        if let Some(shadow_pass) = &mut self.shadow_pass {
            let loader = gpu.accel_loader()?;
            let as_usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

            let vertex_buffer = allocator.create_buffer_init(
                device,
                &self.command_pool,
                gpu.graphics_queue(),
                as_usage,
                bytemuck::cast_slice(self.batch_manager.scene_vertices()),
                "rt_vertices",
            )?;
            let index_buffer = allocator.create_buffer_init(
                device,
                &self.command_pool,
                gpu.graphics_queue(),
                as_usage,
                bytemuck::cast_slice(self.batch_manager.scene_indices()),
                "rt_indices",
            )?;

            let blas_input = BlasInput {
                vertex_address: vertex_buffer.device_address(device),
                vertex_count: self.batch_manager.scene_vertices().len() as u32,
                vertex_stride: Vertex::SIZE as u64,
                index_address: index_buffer.device_address(device),
                index_count: self.batch_manager.scene_indices().len() as u32,
            };

            let blas = raytracing::build_blas(
                device,
                loader,
                &mut allocator,
                &self.command_pool,
                gpu.graphics_queue(),
                &blas_input,
            )?;
            let tlas = raytracing::build_tlas(
                device,
                loader,
                &mut allocator,
                &self.command_pool,
                gpu.graphics_queue(),
                &blas,
            )?;

            shadow_pass.bind_scene(
                device,
                &mut self.descriptor_cache,
                &mut self.descriptor_allocator,
                tlas.handle,
            )?;

            self.rt_geometry = Some(RtGeometry {
                vertex_buffer,
                index_buffer,
                blas,
                tlas,
            });
        }

        let shadow_view = match (&self.shadow_pass, &self.fallback_mask) {
            (Some(pass), _) => pass.mask_view(),
            (None, Some((_, view))) => *view,
            (None, None) => {
                return Err(GpuError::InvalidState(
                    "no shadow mask available".to_string(),
                ))
            }
        };

        self.lighting_pass.bind_scene(
            device,
            &mut self.descriptor_cache,
            &mut self.descriptor_allocator,
            scene,
            textures,
            shadow_view,
        )?;

        tracing::info!(
            "scene set: {} objects in {} mini-batches",
            self.batch_manager.object_count(),
            self.batch_manager.batches().len(),
        );

        Ok(())
    }

    /// Render and present one frame.
    ///
    /// Returns `true` when the swapchain is suboptimal or out of date and
    /// the caller should [`Self::resize`].
    ///
    /// # Safety
    /// The GPU context must be valid; `set_scene` defines what is drawn.
    pub unsafe fn render_frame(&mut self, gpu: &GpuContext, camera: &Camera) -> Result<bool> {
        let device = gpu.device();
        let queue = gpu.graphics_queue();
        let slot = self.frame_sync.current_frame();

        let (image_index, mut suboptimal) = self.swapchain.acquire_next_image(
            &self.surface.swapchain_loader,
            self.frame_sync.current().image_available,
            u64::MAX,
        )?;

        let target = RenderTarget {
            image: self.swapchain.images[image_index as usize],
            view: self.swapchain.image_views[image_index as usize],
            extent: self.swapchain.extent,
        };

        let camera_uniforms = camera.uniforms();
        let frustum_uniforms = camera.frustum_uniforms();
        let image_available = self.frame_sync.current().image_available;
        let render_finished = self.frame_sync.current().render_finished;

        let has_scene = self.batch_manager.scene_buffers().is_some();
        let draw_count = self.batch_manager.total_draw_count();

        // Light pass waits on the last stage that ran before it.
        let light_wait = image_available;
        let mut light_wait_extra: Option<vk::Semaphore> = None;

        if has_scene && draw_count > 0 {
            // Culling
            let scene = self.batch_manager.scene_buffers().expect("checked above");
            let sync = &mut self.cull_sync[slot];
            sync.begin_frame(device)?;
            let cmd = self.cull_cmds[slot];
            command::begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            self.cull_pass
                .record(device, cmd, slot, scene, &frustum_uniforms, draw_count)?;
            command::end_command_buffer(device, cmd)?;
            command::submit_with_sync(device, queue, cmd, &[], &[sync.complete], sync.fence)?;
            sync.submitted()?;

            let mut previous = sync.complete;

            // Shadow rays
            if let Some(shadow_pass) = &self.shadow_pass {
                let sync = &mut self.shadow_sync[slot];
                sync.begin_frame(device)?;
                let cmd = self.shadow_cmds[slot];
                command::begin_command_buffer(
                    device,
                    cmd,
                    vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                )?;
                shadow_pass.record(device, cmd, slot, &camera_uniforms, self.sun_direction)?;
                command::end_command_buffer(device, cmd)?;
                command::submit_with_sync(
                    device,
                    queue,
                    cmd,
                    &[(previous, vk::PipelineStageFlags2::COMPUTE_SHADER)],
                    &[sync.complete],
                    sync.fence,
                )?;
                sync.submitted()?;
                previous = sync.complete;
            }

            light_wait_extra = Some(previous);
        }

        // Lighting + object ID
        {
            let sync = &mut self.light_sync[slot];
            sync.begin_frame(device)?;
            let cmd = self.light_cmds[slot];
            command::begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

            if has_scene && draw_count > 0 {
                let scene = self.batch_manager.scene_buffers().expect("checked above");
                self.lighting_pass.record(
                    device,
                    cmd,
                    slot,
                    &target,
                    self.batch_manager.batches(),
                    scene,
                    &camera_uniforms,
                    self.sun_direction,
                )?;
            } else {
                self.lighting_pass.record_clear(device, cmd, &target);
            }

            command::end_command_buffer(device, cmd)?;

            let mut waits = vec![(
                light_wait,
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            )];
            if let Some(previous) = light_wait_extra {
                waits.push((previous, vk::PipelineStageFlags2::DRAW_INDIRECT));
            }

            command::submit_with_sync(device, queue, cmd, &waits, &[render_finished], sync.fence)?;
            sync.submitted()?;
        }

        // Present
        suboptimal |= self.swapchain.present(
            &self.surface.swapchain_loader,
            queue,
            image_index,
            &[render_finished],
        )?;

        self.frame_sync.advance();
        Ok(suboptimal)
    }

    /// Read the object ID under a pixel (blocking, see picking module).
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn pick(&self, gpu: &GpuContext, x: u32, y: u32) -> Result<Option<u32>> {
        // Before the first scene renders, the ID image has never been
        // written (or transitioned); there is nothing to pick.
        if self.batch_manager.scene_buffers().is_none() {
            return Ok(None);
        }
        self.picking.pick(
            gpu.device(),
            &self.command_pool,
            gpu.graphics_queue(),
            self.lighting_pass.object_id_image(),
            x,
            y,
        )
    }

    /// Recreate the swapchain and size-dependent targets.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn resize(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
        gpu.wait_idle()?;

        self.swapchain =
            self.surface
                .recreate_swapchain(gpu, &mut self.swapchain, width, height, self.vsync)?;

        let extent = self.swapchain.extent;
        let mut allocator = gpu.allocator().lock();
        self.lighting_pass.resize(gpu.device(), &mut allocator, extent)?;
        if let Some(shadow_pass) = &mut self.shadow_pass {
            shadow_pass.resize(
                gpu.device(),
                &mut allocator,
                &self.command_pool,
                gpu.graphics_queue(),
                extent,
            )?;
        }

        tracing::debug!("resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Destroy everything the renderer owns.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn destroy(mut self, gpu: &GpuContext) -> Result<()> {
        gpu.wait_idle()?;
        let device = gpu.device();
        let mut allocator = gpu.allocator().lock();

        self.batch_manager.clear(&mut allocator)?;
        if let Some(rt) = self.rt_geometry.take() {
            let loader = gpu.accel_loader()?;
            rt.tlas.destroy(loader, &mut allocator)?;
            rt.blas.destroy(loader, &mut allocator)?;
            let mut vb = rt.vertex_buffer;
            let mut ib = rt.index_buffer;
            allocator.free_buffer(&mut vb)?;
            allocator.free_buffer(&mut ib)?;
        }

        self.picking.destroy(&mut allocator)?;
        if let Some((mut image, view)) = self.fallback_mask.take() {
            device.destroy_image_view(view, None);
            allocator.free_image(&mut image)?;
        }
        if let Some(shadow_pass) = self.shadow_pass.take() {
            shadow_pass.destroy(device, &mut allocator)?;
        }
        self.lighting_pass.destroy(device, &mut allocator)?;
        self.cull_pass.destroy(device, &mut allocator)?;

        self.descriptor_allocator.destroy(device);
        self.descriptor_cache.destroy(device);

        for sync in self
            .cull_sync
            .iter()
            .chain(&self.shadow_sync)
            .chain(&self.light_sync)
        {
            sync.destroy(device);
        }
        self.frame_sync.destroy(device);
        self.command_pool.destroy(device);

        self.swapchain.destroy(device, &self.surface.swapchain_loader);
        self.surface.destroy();

        Ok(())
    }
}
