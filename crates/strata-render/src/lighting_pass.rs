//! Lighting and object-ID raster pass.
//!
//! One pass component owning the depth and object-ID targets and two
//! pipelines over the shared batch vertex layout. Recording order per frame:
//! lighting pass into the swapchain image, then the object-ID pass into the
//! picking target, both iterating the mini-batches with one indirect draw
//! per batch.
//!
//! Descriptor set indices are fixed by pipeline layout position:
//! 0 = camera, 1 = object data, 2 = bindless material textures,
//! 3 = shadow mask.

use ash::vk;
use gpu_allocator::MemoryLocation;
use strata_gpu::descriptors::{DescriptorAllocator, DescriptorBuilder, DescriptorLayoutCache};
use strata_gpu::error::{GpuError, Result};
use strata_gpu::memory::{GpuAllocator, GpuBuffer, GpuImage};
use strata_gpu::pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
use strata_gpu::LayoutBinding;

use crate::batch::{DrawCommand, MiniBatch, SceneBuffers};
use crate::camera::CameraUniforms;
use crate::mesh::Vertex;

/// Format of the object-ID picking target; the red channel carries the
/// object index.
pub const OBJECT_ID_FORMAT: vk::Format = vk::Format::R32G32B32A32_UINT;

/// Depth buffer format.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Object-ID clear value meaning "no object here".
pub const NO_OBJECT: u32 = u32::MAX;

/// SPIR-V for the pass's two pipelines.
pub struct LightingShaders {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
    pub id_vertex: Vec<u32>,
    pub id_fragment: Vec<u32>,
}

/// Push constants for the lighting fragment shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct LightingPushConstants {
    sun_direction: [f32; 4],
}

/// The frame's output target (a swapchain image).
pub struct RenderTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

/// Lighting + object-ID raster pass component.
pub struct LightingPass {
    lighting_pipeline: GraphicsPipeline,
    id_pipeline: GraphicsPipeline,

    depth_image: GpuImage,
    depth_view: vk::ImageView,
    id_image: GpuImage,
    id_view: vk::ImageView,

    camera_buffers: Vec<GpuBuffer>,
    camera_sets: Vec<vk::DescriptorSet>,
    object_set: Option<vk::DescriptorSet>,
    texture_set: Option<vk::DescriptorSet>,
    shadow_set: Option<vk::DescriptorSet>,

    shadow_sampler: vk::Sampler,
    extent: vk::Extent2D,
    frames_in_flight: usize,
}

impl LightingPass {
    /// Create the pass: pipelines, depth/ID targets and per-frame camera
    /// buffers + sets.
    ///
    /// # Safety
    /// The device must be valid; shader code must match the fixed set
    /// layout.
    pub unsafe fn new(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        cache: &mut DescriptorLayoutCache,
        descriptor_allocator: &mut DescriptorAllocator,
        shaders: &LightingShaders,
        color_format: vk::Format,
        extent: vk::Extent2D,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let camera_layout = cache.get_or_create(device, &Self::camera_bindings())?;
        let object_layout = cache.get_or_create(device, &Self::object_bindings())?;
        let texture_layout = cache.get_or_create(device, &Self::texture_bindings())?;
        let shadow_layout = cache.get_or_create(device, &Self::shadow_bindings())?;

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(std::mem::size_of::<LightingPushConstants>() as u32);

        let lighting_config = GraphicsPipelineConfig {
            vertex_shader: shaders.vertex.clone(),
            fragment_shader: shaders.fragment.clone(),
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions(),
            color_formats: vec![color_format],
            depth_format: Some(DEPTH_FORMAT),
            ..GraphicsPipelineConfig::default()
        };

        let lighting_pipeline = GraphicsPipeline::new(
            device,
            &lighting_config,
            &[camera_layout, object_layout, texture_layout, shadow_layout],
            &[push_constant_range],
        )?;

        // The ID pass re-rasterizes over the lighting pass's depth, writing
        // only where a surface is actually visible.
        let id_config = GraphicsPipelineConfig {
            vertex_shader: shaders.id_vertex.clone(),
            fragment_shader: shaders.id_fragment.clone(),
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions(),
            color_formats: vec![OBJECT_ID_FORMAT],
            depth_format: Some(DEPTH_FORMAT),
            depth_write: false,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            ..GraphicsPipelineConfig::default()
        };

        let id_pipeline =
            GraphicsPipeline::new(device, &id_config, &[camera_layout, object_layout], &[])?;

        let (depth_image, depth_view, id_image, id_view) =
            Self::create_targets(device, allocator, extent)?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let shadow_sampler = device.create_sampler(&sampler_info, None)?;

        // Per-frame camera uniforms, written before each recording
        let mut camera_buffers = Vec::with_capacity(frames_in_flight);
        let mut camera_sets = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            let buffer = allocator.create_buffer(
                CameraUniforms::SIZE as u64,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &format!("camera_uniforms_{i}"),
            )?;

            let info = vk::DescriptorBufferInfo::default()
                .buffer(buffer.buffer)
                .offset(0)
                .range(CameraUniforms::SIZE as u64);
            let (set, _) = DescriptorBuilder::new()
                .bind_buffer(
                    0,
                    info,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                )
                .build(device, cache, descriptor_allocator)?;

            camera_buffers.push(buffer);
            camera_sets.push(set);
        }

        Ok(Self {
            lighting_pipeline,
            id_pipeline,
            depth_image,
            depth_view,
            id_image,
            id_view,
            camera_buffers,
            camera_sets,
            object_set: None,
            texture_set: None,
            shadow_set: None,
            shadow_sampler,
            extent,
            frames_in_flight,
        })
    }

    fn camera_bindings() -> [LayoutBinding; 1] {
        [LayoutBinding::new(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )]
    }

    fn object_bindings() -> [LayoutBinding; 2] {
        [
            // Binding 0: transforms, indexed by first_instance
            LayoutBinding::new(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            ),
            // Binding 1: object IDs, indexed by first_instance
            LayoutBinding::new(
                1,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            ),
        ]
    }

    fn texture_bindings() -> [LayoutBinding; 1] {
        [LayoutBinding::bindless(
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )]
    }

    fn shadow_bindings() -> [LayoutBinding; 1] {
        [LayoutBinding::new(
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )]
    }

    unsafe fn create_targets(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        extent: vk::Extent2D,
    ) -> Result<(GpuImage, vk::ImageView, GpuImage, vk::ImageView)> {
        let extent3d = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };

        let depth_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .extent(extent3d)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let depth_image = allocator.create_image(&depth_info, MemoryLocation::GpuOnly, "depth")?;

        let depth_view_info = vk::ImageViewCreateInfo::default()
            .image(depth_image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(subresource_range(vk::ImageAspectFlags::DEPTH));
        let depth_view = device.create_image_view(&depth_view_info, None)?;

        let id_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(OBJECT_ID_FORMAT)
            .extent(extent3d)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let id_image = allocator.create_image(&id_info, MemoryLocation::GpuOnly, "object_id")?;

        let id_view_info = vk::ImageViewCreateInfo::default()
            .image(id_image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(OBJECT_ID_FORMAT)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR));
        let id_view = device.create_image_view(&id_view_info, None)?;

        Ok((depth_image, depth_view, id_image, id_view))
    }

    /// Bind a new scene generation: object-data set, bindless texture set,
    /// shadow mask set.
    ///
    /// `textures` may be empty (untextured scene); the bindless set is still
    /// allocated with zero live elements.
    ///
    /// # Safety
    /// The device must be valid; no in-flight frame may use the previous
    /// sets.
    pub unsafe fn bind_scene(
        &mut self,
        device: &ash::Device,
        cache: &mut DescriptorLayoutCache,
        descriptor_allocator: &mut DescriptorAllocator,
        scene: &SceneBuffers,
        textures: &[vk::DescriptorImageInfo],
        shadow_view: vk::ImageView,
    ) -> Result<()> {
        let transform_info = vk::DescriptorBufferInfo::default()
            .buffer(scene.transforms.buffer)
            .offset(0)
            .range(scene.transforms.size);
        let id_info = vk::DescriptorBufferInfo::default()
            .buffer(scene.object_ids.buffer)
            .offset(0)
            .range(scene.object_ids.size);

        let (object_set, _) = DescriptorBuilder::new()
            .bind_buffer(
                0,
                transform_info,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            )
            .bind_buffer(
                1,
                id_info,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )
            .build(device, cache, descriptor_allocator)?;

        let (texture_set, _) = DescriptorBuilder::new()
            .bind_image_array(
                0,
                textures.to_vec(),
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(device, cache, descriptor_allocator)?;

        let shadow_info = vk::DescriptorImageInfo::default()
            .sampler(self.shadow_sampler)
            .image_view(shadow_view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let (shadow_set, _) = DescriptorBuilder::new()
            .bind_image(
                0,
                shadow_info,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(device, cache, descriptor_allocator)?;

        self.object_set = Some(object_set);
        self.texture_set = Some(texture_set);
        self.shadow_set = Some(shadow_set);

        Ok(())
    }

    /// The object-ID image (picking readback source).
    pub fn object_id_image(&self) -> &GpuImage {
        &self.id_image
    }

    /// Current target extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Recreate the depth and object-ID targets after a resize.
    ///
    /// # Safety
    /// No in-flight frame may reference the old targets.
    pub unsafe fn resize(
        &mut self,
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        extent: vk::Extent2D,
    ) -> Result<()> {
        device.destroy_image_view(self.depth_view, None);
        device.destroy_image_view(self.id_view, None);
        allocator.free_image(&mut self.depth_image)?;
        allocator.free_image(&mut self.id_image)?;

        let (depth_image, depth_view, id_image, id_view) =
            Self::create_targets(device, allocator, extent)?;
        self.depth_image = depth_image;
        self.depth_view = depth_view;
        self.id_image = id_image;
        self.id_view = id_view;
        self.extent = extent;

        Ok(())
    }

    /// Record the lighting pass followed by the object-ID pass.
    ///
    /// Camera uniforms for this frame are written first so the GPU reads the
    /// freshest view on this submission. Ends with the object-ID image in
    /// TRANSFER_SRC (picking) and the target image in PRESENT_SRC.
    ///
    /// # Safety
    /// The command buffer must be in recording state and `bind_scene` must
    /// have run for the current scene.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame_index: usize,
        target: &RenderTarget,
        batches: &[MiniBatch],
        scene: &SceneBuffers,
        camera: &CameraUniforms,
        sun_direction: glam::Vec3,
    ) -> Result<()> {
        debug_assert!(frame_index < self.frames_in_flight);

        let no_scene = || GpuError::InvalidState("lighting pass has no bound scene".to_string());
        let object_set = self.object_set.ok_or_else(no_scene)?;
        let texture_set = self.texture_set.ok_or_else(no_scene)?;
        let shadow_set = self.shadow_set.ok_or_else(no_scene)?;

        self.camera_buffers[frame_index].write(std::slice::from_ref(camera))?;

        // Target and depth to attachment layouts
        image_barrier(
            device,
            cmd,
            target.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::NONE,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        );
        image_barrier(
            device,
            cmd,
            self.depth_image.image,
            vk::ImageAspectFlags::DEPTH,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::NONE,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

        // Lighting pass
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(target.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.05, 0.05, 0.08, 1.0],
                },
            });

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth_view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: target.extent,
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        device.cmd_begin_rendering(cmd, &rendering_info);
        self.set_viewport(device, cmd, target.extent);

        device.cmd_bind_pipeline(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.lighting_pipeline.pipeline,
        );
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.lighting_pipeline.layout,
            0,
            &[
                self.camera_sets[frame_index],
                object_set,
                texture_set,
                shadow_set,
            ],
            &[],
        );

        let push = LightingPushConstants {
            sun_direction: [sun_direction.x, sun_direction.y, sun_direction.z, 0.0],
        };
        device.cmd_push_constants(
            cmd,
            self.lighting_pipeline.layout,
            vk::ShaderStageFlags::FRAGMENT,
            0,
            bytemuck::bytes_of(&push),
        );

        self.draw_batches(device, cmd, batches, scene);
        device.cmd_end_rendering(cmd);

        // Object-ID pass over the same geometry
        image_barrier(
            device,
            cmd,
            self.id_image.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::NONE,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        );

        let id_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.id_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    uint32: [NO_OBJECT; 4],
                },
            });

        let id_depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth_view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::NONE);

        let id_rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&id_attachment))
            .depth_attachment(&id_depth_attachment);

        device.cmd_begin_rendering(cmd, &id_rendering_info);
        self.set_viewport(device, cmd, target.extent);

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.id_pipeline.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.id_pipeline.layout,
            0,
            &[self.camera_sets[frame_index], object_set],
            &[],
        );

        self.draw_batches(device, cmd, batches, scene);
        device.cmd_end_rendering(cmd);

        // Object-ID image to the picking readback layout
        image_barrier(
            device,
            cmd,
            self.id_image.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        );

        // Target to present
        image_barrier(
            device,
            cmd,
            target.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::NONE,
        );

        Ok(())
    }

    /// Record a clear-and-present frame for an empty scene (no batches, no
    /// bound sets).
    ///
    /// # Safety
    /// The command buffer must be in recording state.
    pub unsafe fn record_clear(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        target: &RenderTarget,
    ) {
        image_barrier(
            device,
            cmd,
            target.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::NONE,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        );

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(target.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.05, 0.05, 0.08, 1.0],
                },
            });

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: target.extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));

        device.cmd_begin_rendering(cmd, &rendering_info);
        device.cmd_end_rendering(cmd);

        image_barrier(
            device,
            cmd,
            target.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::NONE,
        );
    }

    /// Recreate the per-frame camera descriptor sets (after a descriptor
    /// pool reset invalidated them). The camera buffers themselves survive.
    ///
    /// # Safety
    /// The device must be valid; no in-flight frame may use the old sets.
    pub unsafe fn rebind_frame_sets(
        &mut self,
        device: &ash::Device,
        cache: &mut DescriptorLayoutCache,
        descriptor_allocator: &mut DescriptorAllocator,
    ) -> Result<()> {
        for frame in 0..self.frames_in_flight {
            let info = vk::DescriptorBufferInfo::default()
                .buffer(self.camera_buffers[frame].buffer)
                .offset(0)
                .range(CameraUniforms::SIZE as u64);
            let (set, _) = DescriptorBuilder::new()
                .bind_buffer(
                    0,
                    info,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                )
                .build(device, cache, descriptor_allocator)?;
            self.camera_sets[frame] = set;
        }
        Ok(())
    }

    /// One bind + one indirect draw per mini-batch.
    unsafe fn draw_batches(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        batches: &[MiniBatch],
        scene: &SceneBuffers,
    ) {
        for batch in batches {
            device.cmd_bind_vertex_buffers(cmd, 0, &[batch.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, batch.index_buffer.buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed_indirect(
                cmd,
                scene.command_out.buffer,
                batch.indirect_offset,
                batch.command_count(),
                DrawCommand::SIZE as u32,
            );
        }
    }

    unsafe fn set_viewport(&self, device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
    }

    /// Destroy all GPU resources.
    ///
    /// # Safety
    /// The device must be valid and the pass must not be in use.
    pub unsafe fn destroy(
        mut self,
        device: &ash::Device,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        device.destroy_sampler(self.shadow_sampler, None);
        device.destroy_image_view(self.depth_view, None);
        device.destroy_image_view(self.id_view, None);
        allocator.free_image(&mut self.depth_image)?;
        allocator.free_image(&mut self.id_image)?;
        for buffer in &mut self.camera_buffers {
            allocator.free_buffer(buffer)?;
        }
        self.lighting_pipeline.destroy(device);
        self.id_pipeline.destroy(device);
        Ok(())
    }
}

pub(crate) fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Record a single image layout transition.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_stage: vk::PipelineStageFlags2,
    src_access: vk::AccessFlags2,
    dst_stage: vk::PipelineStageFlags2,
    dst_access: vk::AccessFlags2,
) {
    let barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .image(image)
        .subresource_range(subresource_range(aspect));

    let dependency_info =
        vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));

    device.cmd_pipeline_barrier2(cmd, &dependency_info);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_set_indices_are_stable() {
        // The shader contract: set 0 camera, set 1 object data,
        // set 2 textures, set 3 shadow mask.
        assert_eq!(LightingPass::camera_bindings().len(), 1);
        assert_eq!(LightingPass::object_bindings().len(), 2);
        assert!(LightingPass::texture_bindings()[0].is_bindless());
        assert_eq!(
            LightingPass::shadow_bindings()[0].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn push_constants_layout() {
        assert_eq!(std::mem::size_of::<LightingPushConstants>(), 16);
    }
}
