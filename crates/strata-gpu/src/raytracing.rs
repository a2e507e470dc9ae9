//! Ray tracing acceleration structures.
//!
//! The whole static scene becomes one bottom-level structure built from the
//! flattened vertex/index buffers; the top-level structure wraps a single
//! instance of it. Builds go through a one-time command buffer and are
//! waited on synchronously, so they belong in the load path, never in the
//! steady-state frame loop.

use crate::command::{self, CommandPool};
use crate::error::{GpuError, Result};
use crate::memory::{GpuAllocator, GpuBuffer};
use ash::vk;
use gpu_allocator::MemoryLocation;

/// An acceleration structure with its backing buffer.
pub struct AccelerationStructure {
    /// Buffer holding the acceleration structure storage.
    pub buffer: GpuBuffer,
    /// The acceleration structure handle.
    pub handle: vk::AccelerationStructureKHR,
    /// Device address for instance references and shader access.
    pub device_address: vk::DeviceAddress,
}

impl AccelerationStructure {
    /// Destroy the acceleration structure and free its buffer.
    ///
    /// # Safety
    /// The loader and allocator must be valid; the structure must not be in
    /// use by any in-flight work.
    pub unsafe fn destroy(
        mut self,
        loader: &ash::khr::acceleration_structure::Device,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        loader.destroy_acceleration_structure(self.handle, None);
        allocator.free_buffer(&mut self.buffer)?;
        Ok(())
    }
}

/// Geometry inputs for a bottom-level build.
///
/// The vertex and index buffers must have been created with
/// `ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY` and
/// `SHADER_DEVICE_ADDRESS` usage.
pub struct BlasInput {
    /// Device address of the vertex buffer (positions at offset 0).
    pub vertex_address: vk::DeviceAddress,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Stride between consecutive vertices in bytes.
    pub vertex_stride: u64,
    /// Device address of the 32-bit index buffer.
    pub index_address: vk::DeviceAddress,
    /// Number of indices (a multiple of 3).
    pub index_count: u32,
}

/// Build a bottom-level acceleration structure over triangle geometry.
///
/// Allocates the storage and a scratch buffer, records the build into a
/// one-time command buffer, waits for the queue to drain, and frees the
/// scratch.
///
/// # Safety
/// All handles must be valid; the geometry buffers must stay alive until the
/// build completes (guaranteed here by the synchronous wait).
pub unsafe fn build_blas(
    device: &ash::Device,
    loader: &ash::khr::acceleration_structure::Device,
    allocator: &mut GpuAllocator,
    pool: &CommandPool,
    queue: vk::Queue,
    input: &BlasInput,
) -> Result<AccelerationStructure> {
    if input.index_count == 0 || input.index_count % 3 != 0 {
        return Err(GpuError::InvalidState(format!(
            "BLAS index count {} is not a positive multiple of 3",
            input.index_count
        )));
    }

    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: input.vertex_address,
        })
        .vertex_stride(input.vertex_stride)
        .max_vertex(input.vertex_count.saturating_sub(1))
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: input.index_address,
        });

    let geometry = vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles });

    let primitive_count = input.index_count / 3;

    build_structure(
        device,
        loader,
        allocator,
        pool,
        queue,
        vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        geometry,
        primitive_count,
        "scene_blas",
    )
}

/// Build a top-level acceleration structure over a single BLAS instance
/// with an identity transform.
///
/// # Safety
/// All handles must be valid; the BLAS must outlive the TLAS.
pub unsafe fn build_tlas(
    device: &ash::Device,
    loader: &ash::khr::acceleration_structure::Device,
    allocator: &mut GpuAllocator,
    pool: &CommandPool,
    queue: vk::Queue,
    blas: &AccelerationStructure,
) -> Result<AccelerationStructure> {
    let identity = vk::TransformMatrixKHR {
        matrix: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ],
    };

    let instance = vk::AccelerationStructureInstanceKHR {
        transform: identity,
        instance_custom_index_and_mask: vk::Packed24_8::new(0, 0xFF),
        instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
            0,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: blas.device_address,
        },
    };

    // The instance buffer only needs to live through the synchronous build.
    let instance_size = std::mem::size_of::<vk::AccelerationStructureInstanceKHR>();
    let mut instance_buffer = allocator.create_buffer(
        instance_size as u64,
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryLocation::CpuToGpu,
        "tlas_instances",
    )?;
    instance_buffer.write_bytes(0, std::slice::from_raw_parts(
        std::ptr::addr_of!(instance).cast::<u8>(),
        instance_size,
    ))?;

    let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
        .array_of_pointers(false)
        .data(vk::DeviceOrHostAddressConstKHR {
            device_address: instance_buffer.device_address(device),
        });

    let geometry = vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: instances_data,
        });

    let result = build_structure(
        device,
        loader,
        allocator,
        pool,
        queue,
        vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        geometry,
        1,
        "scene_tlas",
    );

    allocator.free_buffer(&mut instance_buffer)?;
    result
}

/// Shared build path: size query, storage + scratch allocation, one-time
/// build submit, scratch free.
#[allow(clippy::too_many_arguments)]
unsafe fn build_structure(
    device: &ash::Device,
    loader: &ash::khr::acceleration_structure::Device,
    allocator: &mut GpuAllocator,
    pool: &CommandPool,
    queue: vk::Queue,
    ty: vk::AccelerationStructureTypeKHR,
    geometry: vk::AccelerationStructureGeometryKHR,
    primitive_count: u32,
    name: &str,
) -> Result<AccelerationStructure> {
    let geometries = [geometry];
    let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(ty)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(&geometries);

    let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
    loader.get_acceleration_structure_build_sizes(
        vk::AccelerationStructureBuildTypeKHR::DEVICE,
        &build_info,
        &[primitive_count],
        &mut sizes,
    );

    let buffer = allocator.create_buffer(
        sizes.acceleration_structure_size,
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryLocation::GpuOnly,
        name,
    )?;

    let create_info = vk::AccelerationStructureCreateInfoKHR::default()
        .buffer(buffer.buffer)
        .size(sizes.acceleration_structure_size)
        .ty(ty);

    let handle = loader
        .create_acceleration_structure(&create_info, None)
        .map_err(GpuError::from)?;

    let mut scratch = allocator.create_buffer(
        sizes.build_scratch_size,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryLocation::GpuOnly,
        "as_scratch",
    )?;

    build_info = build_info
        .dst_acceleration_structure(handle)
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: scratch.device_address(device),
        });

    let range = vk::AccelerationStructureBuildRangeInfoKHR::default()
        .primitive_count(primitive_count);

    let build_result = command::execute_single_time_commands(device, pool, queue, |cmd| {
        loader.cmd_build_acceleration_structures(cmd, &[build_info], &[&[range]]);
    });

    // Scratch is only needed during the build; free it on both paths.
    allocator.free_buffer(&mut scratch)?;
    build_result?;

    let address_info =
        vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);
    let device_address = loader.get_acceleration_structure_device_address(&address_info);

    tracing::debug!(
        "built {:?} acceleration structure ({} primitives, {} bytes)",
        ty,
        primitive_count,
        sizes.acceleration_structure_size
    );

    Ok(AccelerationStructure {
        buffer,
        handle,
        device_address,
    })
}
