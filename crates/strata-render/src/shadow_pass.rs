//! Ray-traced shadow pass.
//!
//! A compute dispatch traces one shadow ray per pixel toward the sun using
//! VK_KHR_ray_query against the scene TLAS, writing an occlusion mask into
//! an R8 storage image. The lighting pass samples the mask, so recording
//! ends with the image in SHADER_READ_ONLY. When ray tracing is
//! unavailable the image stays at its cleared "fully lit" state and the
//! dispatch is simply never recorded.

use ash::vk;
use gpu_allocator::MemoryLocation;
use strata_gpu::command::{self, CommandPool};
use strata_gpu::descriptors::{
    write_acceleration_structure, write_buffer, write_storage_image, DescriptorAllocator,
    DescriptorLayoutCache,
};
use strata_gpu::error::Result;
use strata_gpu::memory::{GpuAllocator, GpuBuffer, GpuImage};
use strata_gpu::pipeline::ComputePipeline;
use strata_gpu::LayoutBinding;

use crate::camera::CameraUniforms;
use crate::lighting_pass::{image_barrier, subresource_range};

/// Shadow mask format: one occlusion factor per pixel.
pub const SHADOW_FORMAT: vk::Format = vk::Format::R8_UNORM;

/// Threads per workgroup axis; must match the compute shader.
const SHADOW_WORKGROUP_SIZE: u32 = 8;

/// Push constants for the shadow dispatch.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ShadowPushConstants {
    sun_direction: [f32; 4],
    screen_size: [u32; 2],
    _pad: [u32; 2],
}

/// Create a 1×1 fully-lit mask for renderers running without the shadow
/// pass; the lighting shader samples 1.0 everywhere.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn create_fallback_mask(
    device: &ash::Device,
    allocator: &mut GpuAllocator,
    pool: &CommandPool,
    queue: vk::Queue,
) -> Result<(GpuImage, vk::ImageView)> {
    ShadowPass::create_mask(
        device,
        allocator,
        pool,
        queue,
        vk::Extent2D {
            width: 1,
            height: 1,
        },
    )
}

/// Ray-query shadow pass component.
pub struct ShadowPass {
    pipeline: ComputePipeline,
    mask_image: GpuImage,
    mask_view: vk::ImageView,
    camera_buffers: Vec<GpuBuffer>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    extent: vk::Extent2D,
    frames_in_flight: usize,
}

impl ShadowPass {
    /// Create the pass and initialize the mask to fully lit.
    ///
    /// # Safety
    /// The device must be valid; the shader must be the ray-query shadow
    /// compute shader (requires the ray query device feature).
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        cache: &mut DescriptorLayoutCache,
        pool: &CommandPool,
        queue: vk::Queue,
        shader_code: &[u32],
        extent: vk::Extent2D,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let layout = cache.get_or_create(device, &Self::layout_bindings())?;

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<ShadowPushConstants>() as u32);

        let pipeline = ComputePipeline::new(device, shader_code, &[layout], &[push_constant_range])?;

        let (mask_image, mask_view) = Self::create_mask(device, allocator, pool, queue, extent)?;

        let mut camera_buffers = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            camera_buffers.push(allocator.create_buffer(
                CameraUniforms::SIZE as u64,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &format!("shadow_camera_{i}"),
            )?);
        }

        Ok(Self {
            pipeline,
            mask_image,
            mask_view,
            camera_buffers,
            descriptor_sets: Vec::new(),
            extent,
            frames_in_flight,
        })
    }

    fn layout_bindings() -> [LayoutBinding; 3] {
        [
            // Binding 0: camera (ray reconstruction)
            LayoutBinding::new(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
            ),
            // Binding 1: scene TLAS
            LayoutBinding::new(
                1,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                vk::ShaderStageFlags::COMPUTE,
            ),
            // Binding 2: occlusion mask output
            LayoutBinding::new(
                2,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
            ),
        ]
    }

    /// Create the mask image and clear it to 1.0 (unshadowed) so the
    /// lighting pass can sample it before the first dispatch.
    unsafe fn create_mask(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        pool: &CommandPool,
        queue: vk::Queue,
        extent: vk::Extent2D,
    ) -> Result<(GpuImage, vk::ImageView)> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(SHADOW_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mask_image = allocator.create_image(&image_info, MemoryLocation::GpuOnly, "shadow_mask")?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(mask_image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(SHADOW_FORMAT)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR));
        let mask_view = device.create_image_view(&view_info, None)?;

        command::execute_single_time_commands(device, pool, queue, |cmd| {
            image_barrier(
                device,
                cmd,
                mask_image.image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::PipelineStageFlags2::TOP_OF_PIPE,
                vk::AccessFlags2::NONE,
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
            );

            let clear = vk::ClearColorValue {
                float32: [1.0; 4],
            };
            device.cmd_clear_color_image(
                cmd,
                mask_image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear,
                &[subresource_range(vk::ImageAspectFlags::COLOR)],
            );

            image_barrier(
                device,
                cmd,
                mask_image.image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
            );
        })?;

        Ok((mask_image, mask_view))
    }

    /// The mask view for the lighting pass's shadow sampler.
    pub fn mask_view(&self) -> vk::ImageView {
        self.mask_view
    }

    /// (Re)build the per-frame descriptor sets against the scene TLAS.
    ///
    /// # Safety
    /// The device and TLAS must be valid; no in-flight frame may use the
    /// previous sets.
    pub unsafe fn bind_scene(
        &mut self,
        device: &ash::Device,
        cache: &mut DescriptorLayoutCache,
        descriptor_allocator: &mut DescriptorAllocator,
        tlas: vk::AccelerationStructureKHR,
    ) -> Result<()> {
        let layout = cache.get_or_create(device, &Self::layout_bindings())?;

        self.descriptor_sets.clear();
        for frame in 0..self.frames_in_flight {
            let set = descriptor_allocator.allocate(device, layout)?;

            write_buffer(
                device,
                set,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                self.camera_buffers[frame].buffer,
                0,
                CameraUniforms::SIZE as u64,
            );
            write_acceleration_structure(device, set, 1, tlas);
            write_storage_image(device, set, 2, self.mask_view, vk::ImageLayout::GENERAL);

            self.descriptor_sets.push(set);
        }

        Ok(())
    }

    /// Record the shadow dispatch.
    ///
    /// # Safety
    /// The command buffer must be in recording state and `bind_scene` must
    /// have run for the current scene.
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame_index: usize,
        camera: &CameraUniforms,
        sun_direction: glam::Vec3,
    ) -> Result<()> {
        self.camera_buffers[frame_index].write(std::slice::from_ref(camera))?;

        // Mask to GENERAL for storage writes
        image_barrier(
            device,
            cmd,
            self.mask_image.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
        );

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            self.pipeline.layout,
            0,
            &[self.descriptor_sets[frame_index]],
            &[],
        );

        let push = ShadowPushConstants {
            sun_direction: [sun_direction.x, sun_direction.y, sun_direction.z, 0.0],
            screen_size: [self.extent.width, self.extent.height],
            _pad: [0; 2],
        };
        device.cmd_push_constants(
            cmd,
            self.pipeline.layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(&push),
        );

        device.cmd_dispatch(
            cmd,
            self.extent.width.div_ceil(SHADOW_WORKGROUP_SIZE),
            self.extent.height.div_ceil(SHADOW_WORKGROUP_SIZE),
            1,
        );

        // Mask to sampled-read for the lighting fragment shader
        image_barrier(
            device,
            cmd,
            self.mask_image.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        );

        Ok(())
    }

    /// Recreate the mask after a resize and repoint the existing sets at it.
    ///
    /// # Safety
    /// No in-flight frame may reference the old mask.
    pub unsafe fn resize(
        &mut self,
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        pool: &CommandPool,
        queue: vk::Queue,
        extent: vk::Extent2D,
    ) -> Result<()> {
        device.destroy_image_view(self.mask_view, None);
        allocator.free_image(&mut self.mask_image)?;

        let (mask_image, mask_view) = Self::create_mask(device, allocator, pool, queue, extent)?;
        self.mask_image = mask_image;
        self.mask_view = mask_view;
        self.extent = extent;

        for &set in &self.descriptor_sets {
            write_storage_image(device, set, 2, self.mask_view, vk::ImageLayout::GENERAL);
        }

        Ok(())
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
        device.destroy_image_view(self.mask_view, None);
        allocator.free_image(&mut self.mask_image)?;
        for buffer in &mut self.camera_buffers {
            allocator.free_buffer(buffer)?;
        }
        self.pipeline.destroy(device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_layout() {
        assert_eq!(std::mem::size_of::<ShadowPushConstants>(), 32);
        assert_eq!(std::mem::offset_of!(ShadowPushConstants, sun_direction), 0);
        assert_eq!(std::mem::offset_of!(ShadowPushConstants, screen_size), 16);
    }

    #[test]
    fn layout_has_acceleration_structure_binding() {
        let bindings = ShadowPass::layout_bindings();
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        );
    }
}
