//! GPU frustum culling pass.
//!
//! A compute dispatch reads the source draw commands and per-object bounds,
//! tests each against the camera frustum, and writes the command into the
//! output buffer with `instance_count` zeroed when culled. The output buffer
//! keeps the exact layout of the source, so the raster pass issues the full
//! per-batch command count and culled entries degenerate to empty draws.

use ash::vk;
use gpu_allocator::MemoryLocation;
use strata_gpu::descriptors::{DescriptorAllocator, DescriptorBuilder, DescriptorLayoutCache};
use strata_gpu::error::Result;
use strata_gpu::memory::{GpuAllocator, GpuBuffer};
use strata_gpu::pipeline::ComputePipeline;

use crate::batch::SceneBuffers;
use crate::camera::FrustumUniforms;

/// Threads per culling workgroup; must match the compute shader.
const CULL_WORKGROUP_SIZE: u32 = 64;

/// Push constants for the culling dispatch.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CullPushConstants {
    draw_count: u32,
}

/// Compute frustum-culling pass component.
///
/// Owns the pipeline and per-frame frustum uniform buffers. Descriptor sets
/// are rebuilt per scene generation since they reference the batch manager's
/// mirror buffers.
pub struct CullPass {
    pipeline: ComputePipeline,
    frustum_buffers: Vec<GpuBuffer>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    frames_in_flight: usize,
}

impl CullPass {
    /// Create the culling pass.
    ///
    /// # Safety
    /// The device must be valid and the shader code must be the culling
    /// compute shader's SPIR-V.
    pub unsafe fn new(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        cache: &mut DescriptorLayoutCache,
        shader_code: &[u32],
        frames_in_flight: usize,
    ) -> Result<Self> {
        // Layout is resolved through the cache up front so pipeline creation
        // does not depend on a live scene.
        let layout = cache.get_or_create(device, &Self::layout_bindings())?;

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<CullPushConstants>() as u32);

        let pipeline = ComputePipeline::new(device, shader_code, &[layout], &[push_constant_range])?;

        let mut frustum_buffers = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            frustum_buffers.push(allocator.create_buffer(
                FrustumUniforms::SIZE as u64,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &format!("cull_frustum_{i}"),
            )?);
        }

        Ok(Self {
            pipeline,
            frustum_buffers,
            descriptor_sets: Vec::new(),
            frames_in_flight,
        })
    }

    fn layout_bindings() -> [strata_gpu::LayoutBinding; 4] {
        use strata_gpu::LayoutBinding;
        [
            // Binding 0: frustum planes
            LayoutBinding::new(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
            ),
            // Binding 1: source draw commands
            LayoutBinding::new(
                1,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
            ),
            // Binding 2: culled output commands
            LayoutBinding::new(
                2,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
            ),
            // Binding 3: per-object world-space bounds
            LayoutBinding::new(
                3,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
            ),
        ]
    }

    /// (Re)build the per-frame descriptor sets against a new scene
    /// generation's mirror buffers.
    ///
    /// # Safety
    /// The device must be valid; no in-flight frame may still use the
    /// previous sets (device-idle wait on scene rebuild guarantees this).
    pub unsafe fn bind_scene(
        &mut self,
        device: &ash::Device,
        cache: &mut DescriptorLayoutCache,
        descriptor_allocator: &mut DescriptorAllocator,
        scene: &SceneBuffers,
    ) -> Result<()> {
        self.descriptor_sets.clear();

        for frame in 0..self.frames_in_flight {
            let frustum_info = vk::DescriptorBufferInfo::default()
                .buffer(self.frustum_buffers[frame].buffer)
                .offset(0)
                .range(FrustumUniforms::SIZE as u64);
            let src_info = vk::DescriptorBufferInfo::default()
                .buffer(scene.command_src.buffer)
                .offset(0)
                .range(scene.command_src.size);
            let out_info = vk::DescriptorBufferInfo::default()
                .buffer(scene.command_out.buffer)
                .offset(0)
                .range(scene.command_out.size);
            let aabb_info = vk::DescriptorBufferInfo::default()
                .buffer(scene.aabbs.buffer)
                .offset(0)
                .range(scene.aabbs.size);

            let (set, _layout) = DescriptorBuilder::new()
                .bind_buffer(
                    0,
                    frustum_info,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    vk::ShaderStageFlags::COMPUTE,
                )
                .bind_buffer(
                    1,
                    src_info,
                    vk::DescriptorType::STORAGE_BUFFER,
                    vk::ShaderStageFlags::COMPUTE,
                )
                .bind_buffer(
                    2,
                    out_info,
                    vk::DescriptorType::STORAGE_BUFFER,
                    vk::ShaderStageFlags::COMPUTE,
                )
                .bind_buffer(
                    3,
                    aabb_info,
                    vk::DescriptorType::STORAGE_BUFFER,
                    vk::ShaderStageFlags::COMPUTE,
                )
                .build(device, cache, descriptor_allocator)?;

            self.descriptor_sets.push(set);
        }

        Ok(())
    }

    /// Record the culling dispatch.
    ///
    /// Writes this frame's frustum uniforms first (the CPU-visible buffer is
    /// read by the dispatch recorded here), then fences the output buffer
    /// between its indirect-draw consumer and the shader writes.
    ///
    /// # Safety
    /// The command buffer must be in recording state and `bind_scene` must
    /// have run for the current scene.
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame_index: usize,
        scene: &SceneBuffers,
        frustum: &FrustumUniforms,
        draw_count: u32,
    ) -> Result<()> {
        if draw_count == 0 {
            return Ok(());
        }

        self.frustum_buffers[frame_index].write(std::slice::from_ref(frustum))?;

        // Previous frame's indirect reads must finish before we overwrite
        let to_write = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::DRAW_INDIRECT)
            .src_access_mask(vk::AccessFlags2::INDIRECT_COMMAND_READ)
            .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .dst_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
            .buffer(scene.command_out.buffer)
            .size(vk::WHOLE_SIZE);

        let dependency =
            vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&to_write));
        device.cmd_pipeline_barrier2(cmd, &dependency);

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            self.pipeline.layout,
            0,
            &[self.descriptor_sets[frame_index]],
            &[],
        );

        let push = CullPushConstants { draw_count };
        device.cmd_push_constants(
            cmd,
            self.pipeline.layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(&push),
        );

        device.cmd_dispatch(cmd, draw_count.div_ceil(CULL_WORKGROUP_SIZE), 1, 1);

        // Culled commands must be visible to the indirect draw consumer
        let to_read = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::DRAW_INDIRECT)
            .dst_access_mask(vk::AccessFlags2::INDIRECT_COMMAND_READ)
            .buffer(scene.command_out.buffer)
            .size(vk::WHOLE_SIZE);

        let dependency =
            vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&to_read));
        device.cmd_pipeline_barrier2(cmd, &dependency);

        Ok(())
    }

    /// Destroy all GPU resources.
    ///
    /// # Safety
    /// The device must be valid and the pass must not be in use.
    pub unsafe fn destroy(mut self, device: &ash::Device, allocator: &mut GpuAllocator) -> Result<()> {
        for buffer in &mut self.frustum_buffers {
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
        assert_eq!(std::mem::size_of::<CullPushConstants>(), 4);
    }

    #[test]
    fn layout_bindings_are_compute_visible() {
        for binding in CullPass::layout_bindings() {
            assert_eq!(binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
            assert_eq!(binding.count, 1);
        }
    }
}
