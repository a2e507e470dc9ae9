//! Mouse-picking readback.
//!
//! On click, one texel of the object-ID image is copied to a host-visible
//! buffer and read back synchronously. This is a blocking GPU→CPU transfer,
//! deliberately exempt from the async frame pipeline: selection latency is
//! paid once per click, not per frame.

use ash::vk;
use bytemuck::cast_slice;
use gpu_allocator::MemoryLocation;
use strata_gpu::command::{self, CommandPool};
use strata_gpu::error::Result;
use strata_gpu::memory::{GpuAllocator, GpuBuffer, GpuImage};

use crate::lighting_pass::NO_OBJECT;

/// One RGBA32_UINT texel.
const TEXEL_BYTES: u64 = 16;

/// Persistent readback buffer for object picking.
pub struct PickingReadback {
    buffer: GpuBuffer,
}

impl PickingReadback {
    /// Create the readback buffer.
    pub fn new(allocator: &mut GpuAllocator) -> Result<Self> {
        let buffer = allocator.create_buffer(
            TEXEL_BYTES,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "picking_readback",
        )?;
        Ok(Self { buffer })
    }

    /// Read the object index under the given pixel.
    ///
    /// The object-ID image must be in TRANSFER_SRC layout (the lighting pass
    /// leaves it there). Returns `None` for out-of-bounds coordinates or
    /// when the pixel holds the clear value.
    ///
    /// # Safety
    /// All handles must be valid; the image must not be written while the
    /// copy is in flight (guaranteed by the synchronous wait).
    pub unsafe fn pick(
        &self,
        device: &ash::Device,
        pool: &CommandPool,
        queue: vk::Queue,
        id_image: &GpuImage,
        x: u32,
        y: u32,
    ) -> Result<Option<u32>> {
        if x >= id_image.extent.width || y >= id_image.extent.height {
            return Ok(None);
        }

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D {
                x: x as i32,
                y: y as i32,
                z: 0,
            })
            .image_extent(vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            });

        command::execute_single_time_commands(device, pool, queue, |cmd| {
            device.cmd_copy_image_to_buffer(
                cmd,
                id_image.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.buffer.buffer,
                &[region],
            );
        })?;

        let mut bytes = [0u8; TEXEL_BYTES as usize];
        self.buffer.read_bytes(0, &mut bytes)?;
        let texel: &[u32] = cast_slice(&bytes);

        // The red channel carries the object index
        let index = texel[0];
        Ok((index != NO_OBJECT).then_some(index))
    }

    /// Destroy the readback buffer.
    pub fn destroy(mut self, allocator: &mut GpuAllocator) -> Result<()> {
        allocator.free_buffer(&mut self.buffer)
    }
}
