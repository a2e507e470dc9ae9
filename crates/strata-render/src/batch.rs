//! Mini-batch accumulation and the batch manager.
//!
//! Many small meshes are packed into few large vertex/index buffers so the
//! frame loop binds a handful of buffers and issues one indirect draw per
//! mini-batch instead of one draw per mesh. Accumulation is CPU-side; a
//! batch is sealed (uploaded to device-local buffers through a staging copy)
//! when the accumulated payload reaches [`MAX_BATCH_BYTES`] or on an
//! explicit flush.

use ash::vk;
use glam::Mat4;
use gpu_allocator::MemoryLocation;
use strata_core::Aabb;
use strata_gpu::command::CommandPool;
use strata_gpu::error::{GpuError, Result};
use strata_gpu::memory::{GpuAllocator, GpuBuffer};

use crate::mesh::{MeshData, Vertex};

/// Seal threshold for one mini-batch's vertex + index payload (3 MiB).
///
/// The trigger is inclusive after append: reaching the threshold exactly
/// seals the batch. A mesh is never split, so a single mesh larger than the
/// threshold seals alone.
pub const MAX_BATCH_BYTES: u64 = 3 * 1024 * 1024;

/// GPU-visible indirect draw command.
///
/// Mirrors `VkDrawIndexedIndirectCommand` exactly. `first_index` and
/// `vertex_offset` are index-unit offsets into the mini-batch's shared
/// buffers; `first_instance` carries the manager-wide object index used by
/// shaders to fetch per-object transform/material/ID data.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

impl DrawCommand {
    /// Size in bytes (the indirect buffer stride).
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// GPU-visible world-space bounding box for the culling shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuAabb {
    pub min: [f32; 3],
    pub _pad0: f32,
    pub max: [f32; 3],
    pub _pad1: f32,
}

impl From<Aabb> for GpuAabb {
    fn from(aabb: Aabb) -> Self {
        Self {
            min: aabb.min.to_array(),
            _pad0: 0.0,
            max: aabb.max.to_array(),
            _pad1: 0.0,
        }
    }
}

/// CPU-side accumulation state for the mini-batch under construction.
///
/// A value type: [`BatchAccumulator::seal`] is the only transition out of
/// accumulation and leaves the accumulator structurally empty, so there is
/// no reset bookkeeping to get wrong.
#[derive(Default)]
pub struct BatchAccumulator {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    commands: Vec<DrawCommand>,
}

impl BatchAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Accumulated vertex payload in bytes.
    pub fn vertex_bytes(&self) -> u64 {
        (self.vertices.len() * Vertex::SIZE) as u64
    }

    /// Accumulated index payload in bytes.
    pub fn index_bytes(&self) -> u64 {
        (self.indices.len() * std::mem::size_of::<u32>()) as u64
    }

    /// Accumulated total payload in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.vertex_bytes() + self.index_bytes()
    }

    /// Whether the accumulated payload has reached the seal threshold.
    pub fn should_seal(&self) -> bool {
        self.total_bytes() >= MAX_BATCH_BYTES
    }

    /// Append a mesh and record its draw command.
    ///
    /// The command's offsets are the accumulated counts *before* the append,
    /// so within one batch commands tile the shared buffers exactly in
    /// accumulation order with no gaps or overlap.
    pub fn add(&mut self, mesh: &MeshData, object_index: u32) -> DrawCommand {
        let command = DrawCommand {
            index_count: mesh.indices.len() as u32,
            instance_count: 1,
            first_index: self.indices.len() as u32,
            vertex_offset: self.vertices.len() as i32,
            first_instance: object_index,
        };

        self.vertices.extend_from_slice(&mesh.vertices);
        self.indices.extend_from_slice(&mesh.indices);
        self.commands.push(command);
        command
    }

    /// Seal the accumulation: move everything accumulated out as a
    /// [`PendingBatch`] and leave the accumulator empty.
    ///
    /// Returns `None` when nothing is accumulated, which makes repeated
    /// flushes no-ops.
    pub fn seal(&mut self) -> Option<PendingBatch> {
        if self.commands.is_empty() {
            return None;
        }
        Some(PendingBatch {
            vertices: std::mem::take(&mut self.vertices),
            indices: std::mem::take(&mut self.indices),
            commands: std::mem::take(&mut self.commands),
        })
    }
}

/// A sealed batch awaiting GPU upload.
pub struct PendingBatch {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub commands: Vec<DrawCommand>,
}

impl PendingBatch {
    /// Total size of this batch's vertex + index payload in bytes.
    pub fn payload_bytes(&self) -> u64 {
        (self.vertices.len() * Vertex::SIZE + self.indices.len() * std::mem::size_of::<u32>())
            as u64
    }

    /// Size of this batch's command list in bytes.
    pub fn command_bytes(&self) -> u64 {
        (self.commands.len() * DrawCommand::SIZE) as u64
    }
}

/// A sealed, uploaded mini-batch.
pub struct MiniBatch {
    /// Device-local vertex buffer.
    pub vertex_buffer: GpuBuffer,
    /// Device-local index buffer.
    pub index_buffer: GpuBuffer,
    /// This batch's draw commands, in accumulation order.
    pub commands: Vec<DrawCommand>,
    /// Byte offset of this batch's commands in the manager-wide indirect
    /// command buffer.
    pub indirect_offset: u64,
}

impl MiniBatch {
    /// Number of indirect draws issued for this batch.
    pub fn command_count(&self) -> u32 {
        self.commands.len() as u32
    }
}

/// Handles needed for device-local uploads at seal time.
pub struct UploadContext<'a> {
    pub device: &'a ash::Device,
    pub allocator: &'a mut GpuAllocator,
    pub pool: &'a CommandPool,
    pub queue: vk::Queue,
}

/// GPU mirror buffers shared by the culling and raster passes.
pub struct SceneBuffers {
    /// All draw commands in batch order (compute read).
    pub command_src: GpuBuffer,
    /// Culling output; consumed by the indirect draws (compute write).
    pub command_out: GpuBuffer,
    /// Per-object transforms, indexed by `first_instance`.
    pub transforms: GpuBuffer,
    /// Per-object world-space bounds, indexed by `first_instance`.
    pub aabbs: GpuBuffer,
    /// Per-object caller IDs, indexed by `first_instance`.
    pub object_ids: GpuBuffer,
}

impl SceneBuffers {
    unsafe fn destroy(mut self, allocator: &mut GpuAllocator) -> Result<()> {
        allocator.free_buffer(&mut self.command_src)?;
        allocator.free_buffer(&mut self.command_out)?;
        allocator.free_buffer(&mut self.transforms)?;
        allocator.free_buffer(&mut self.aabbs)?;
        allocator.free_buffer(&mut self.object_ids)?;
        Ok(())
    }
}

/// Owns the mini-batches and the flattened per-object scene data.
///
/// Lifetime model: one generation of static geometry. Any topology change
/// (model add/remove) destroys the whole manager state via [`Self::clear`]
/// and rebuilds from scratch.
#[derive(Default)]
pub struct BatchManager {
    accumulator: BatchAccumulator,
    batches: Vec<MiniBatch>,

    // Byte cursor into the manager-wide flattened indirect command buffer.
    // Advances on every seal and never resets between seals.
    indirect_cursor: u64,
    object_count: u32,

    transforms: Vec<Mat4>,
    aabbs: Vec<GpuAabb>,
    object_ids: Vec<u32>,

    // Flattened copies retained for the acceleration structure build.
    scene_vertices: Vec<Vertex>,
    scene_indices: Vec<u32>,

    scene_buffers: Option<SceneBuffers>,
}

impl BatchManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// The sealed mini-batches.
    pub fn batches(&self) -> &[MiniBatch] {
        &self.batches
    }

    /// Total number of draw commands across all sealed batches.
    pub fn total_draw_count(&self) -> u32 {
        self.batches.iter().map(MiniBatch::command_count).sum()
    }

    /// Number of objects added (sealed or still accumulating).
    pub fn object_count(&self) -> u32 {
        self.object_count
    }

    /// Uploaded scene mirror buffers, if [`Self::upload_scene_buffers`] ran.
    pub fn scene_buffers(&self) -> Option<&SceneBuffers> {
        self.scene_buffers.as_ref()
    }

    /// Flattened scene vertices (acceleration structure input).
    pub fn scene_vertices(&self) -> &[Vertex] {
        &self.scene_vertices
    }

    /// Flattened scene indices, rebased into [`Self::scene_vertices`].
    pub fn scene_indices(&self) -> &[u32] {
        &self.scene_indices
    }

    /// Add a mesh to the current mini-batch.
    ///
    /// Records the draw command, appends the per-object data, and seals the
    /// batch when the payload reaches the threshold or `force_flush` is set.
    /// Returns the object index assigned to this mesh (its
    /// `first_instance`).
    ///
    /// # Safety
    /// The upload context handles must be valid.
    pub unsafe fn add_mesh(
        &mut self,
        upload: &mut UploadContext,
        mesh: &MeshData,
        transform: Mat4,
        object_id: u32,
        force_flush: bool,
    ) -> Result<u32> {
        let object_index = self.record_mesh(mesh, transform, object_id);

        if self.accumulator.should_seal() || force_flush {
            self.seal_accumulated(upload)?;
        }

        Ok(object_index)
    }

    /// Upload whatever is accumulated but below threshold (end of a load
    /// pass). No-op when nothing is accumulated.
    ///
    /// # Safety
    /// The upload context handles must be valid.
    pub unsafe fn flush(&mut self, upload: &mut UploadContext) -> Result<()> {
        self.seal_accumulated(upload)
    }

    /// CPU-side bookkeeping for one mesh; no GPU calls.
    fn record_mesh(&mut self, mesh: &MeshData, transform: Mat4, object_id: u32) -> u32 {
        let object_index = self.object_count;
        self.object_count += 1;

        self.accumulator.add(mesh, object_index);

        self.transforms.push(transform);
        self.aabbs
            .push(mesh.local_aabb().transform(transform).into());
        self.object_ids.push(object_id);

        // Rebased flattened copy for the BLAS build.
        let base = self.scene_vertices.len() as u32;
        self.scene_vertices.extend_from_slice(&mesh.vertices);
        self.scene_indices
            .extend(mesh.indices.iter().map(|&i| base + i));

        object_index
    }

    /// Record a sealed batch's position in the flattened indirect buffer and
    /// advance the cursor. CPU-side only.
    fn note_sealed(&mut self, pending: &PendingBatch) -> u64 {
        let offset = self.indirect_cursor;
        self.indirect_cursor += pending.command_bytes();
        offset
    }

    unsafe fn seal_accumulated(&mut self, upload: &mut UploadContext) -> Result<()> {
        let Some(pending) = self.accumulator.seal() else {
            return Ok(());
        };

        let indirect_offset = self.note_sealed(&pending);
        let batch_index = self.batches.len();

        let vertex_buffer = upload.allocator.create_buffer_init(
            upload.device,
            upload.pool,
            upload.queue,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&pending.vertices),
            &format!("batch_vertices_{batch_index}"),
        )?;

        let index_buffer = upload.allocator.create_buffer_init(
            upload.device,
            upload.pool,
            upload.queue,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&pending.indices),
            &format!("batch_indices_{batch_index}"),
        )?;

        tracing::debug!(
            "sealed mini-batch {batch_index}: {} draws, {} bytes",
            pending.commands.len(),
            pending.payload_bytes(),
        );

        self.batches.push(MiniBatch {
            vertex_buffer,
            index_buffer,
            commands: pending.commands,
            indirect_offset,
        });

        Ok(())
    }

    /// Build the manager-wide GPU mirror buffers: the flattened indirect
    /// command buffer (source + culling output) and the per-object
    /// transform/AABB/object-ID storage buffers.
    ///
    /// Call after all meshes are added and flushed. Replaces any previously
    /// uploaded mirrors.
    ///
    /// # Safety
    /// The upload context handles must be valid and no in-flight frame may
    /// reference the previous mirrors.
    pub unsafe fn upload_scene_buffers(&mut self, upload: &mut UploadContext) -> Result<()> {
        if !self.accumulator.is_empty() {
            return Err(GpuError::InvalidState(
                "upload_scene_buffers called with unsealed accumulation".to_string(),
            ));
        }

        let total_draws = self.total_draw_count() as usize;
        if total_draws != self.object_ids.len()
            || total_draws != self.transforms.len()
            || total_draws != self.aabbs.len()
        {
            return Err(GpuError::InvalidState(format!(
                "scene invariant violated: {} draws, {} ids, {} transforms, {} aabbs",
                total_draws,
                self.object_ids.len(),
                self.transforms.len(),
                self.aabbs.len(),
            )));
        }

        if let Some(old) = self.scene_buffers.take() {
            old.destroy(upload.allocator)?;
        }

        if total_draws == 0 {
            return Ok(());
        }

        // Flatten commands in batch order; each batch's slice starts at its
        // recorded indirect offset.
        let mut flat_commands: Vec<DrawCommand> = Vec::with_capacity(total_draws);
        for batch in &self.batches {
            debug_assert_eq!(
                batch.indirect_offset,
                (flat_commands.len() * DrawCommand::SIZE) as u64
            );
            flat_commands.extend_from_slice(&batch.commands);
        }
        debug_assert_eq!(
            self.indirect_cursor,
            (flat_commands.len() * DrawCommand::SIZE) as u64
        );

        let command_src = upload.allocator.create_buffer_init(
            upload.device,
            upload.pool,
            upload.queue,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            bytemuck::cast_slice(&flat_commands),
            "draw_commands_src",
        )?;

        // Seeded with the unculled commands so draws are valid even before
        // the first culling dispatch runs.
        let command_out = upload.allocator.create_buffer_init(
            upload.device,
            upload.pool,
            upload.queue,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDIRECT_BUFFER,
            bytemuck::cast_slice(&flat_commands),
            "draw_commands_out",
        )?;

        let transforms = upload.allocator.create_buffer_init(
            upload.device,
            upload.pool,
            upload.queue,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            bytemuck::cast_slice(&self.transforms),
            "object_transforms",
        )?;

        let aabbs = upload.allocator.create_buffer_init(
            upload.device,
            upload.pool,
            upload.queue,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            bytemuck::cast_slice(&self.aabbs),
            "object_aabbs",
        )?;

        let object_ids = upload.allocator.create_buffer_init(
            upload.device,
            upload.pool,
            upload.queue,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            bytemuck::cast_slice(&self.object_ids),
            "object_ids",
        )?;

        tracing::info!(
            "uploaded scene buffers: {} batches, {} draws, {} objects",
            self.batches.len(),
            total_draws,
            self.object_count,
        );

        self.scene_buffers = Some(SceneBuffers {
            command_src,
            command_out,
            transforms,
            aabbs,
            object_ids,
        });

        Ok(())
    }

    /// Destroy all GPU buffers and reset every counter and list.
    ///
    /// The manager is afterwards indistinguishable from a fresh one; this is
    /// the topology-change path (the whole manager is rebuilt).
    ///
    /// # Safety
    /// No in-flight work may reference any of the manager's buffers
    /// (device-idle wait first).
    pub unsafe fn clear(&mut self, allocator: &mut GpuAllocator) -> Result<()> {
        for mut batch in self.batches.drain(..) {
            allocator.free_buffer(&mut batch.vertex_buffer)?;
            allocator.free_buffer(&mut batch.index_buffer)?;
        }
        if let Some(buffers) = self.scene_buffers.take() {
            buffers.destroy(allocator)?;
        }

        self.accumulator = BatchAccumulator::new();
        self.indirect_cursor = 0;
        self.object_count = 0;
        self.transforms.clear();
        self.aabbs.clear();
        self.object_ids.clear();
        self.scene_vertices.clear();
        self.scene_indices.clear();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A mesh with `n` triangles fanned from vertex 0.
    fn mesh_with_triangles(n: usize) -> MeshData {
        let vertices: Vec<Vertex> = (0..n + 2)
            .map(|i| Vertex {
                position: [i as f32, 0.0, 0.0],
                normal: [0.0, 1.0, 0.0],
                uv: [0.0, 0.0],
            })
            .collect();
        let indices: Vec<u32> = (0..n)
            .flat_map(|i| [0, i as u32 + 1, i as u32 + 2])
            .collect();
        MeshData::new(vertices, indices).unwrap()
    }

    /// A mesh sized to an exact byte payload. Takes multiples of 32 bytes:
    /// 24 indices (96 bytes) plus vertex padding.
    fn mesh_with_bytes(total_bytes: u64) -> MeshData {
        assert_eq!(total_bytes % Vertex::SIZE as u64, 0);
        assert!(total_bytes >= 192);
        let vertex_count = ((total_bytes - 96) / Vertex::SIZE as u64) as usize;
        let vertices = vec![Vertex::default(); vertex_count];
        let indices: Vec<u32> = (0..24).map(|i| i % 3).collect();
        let mesh = MeshData::new(vertices, indices).unwrap();
        assert_eq!(mesh.total_bytes(), total_bytes);
        mesh
    }

    #[test]
    fn draw_command_matches_vulkan_layout() {
        assert_eq!(
            DrawCommand::SIZE,
            std::mem::size_of::<vk::DrawIndexedIndirectCommand>()
        );
        assert_eq!(std::mem::offset_of!(DrawCommand, index_count), 0);
        assert_eq!(std::mem::offset_of!(DrawCommand, instance_count), 4);
        assert_eq!(std::mem::offset_of!(DrawCommand, first_index), 8);
        assert_eq!(std::mem::offset_of!(DrawCommand, vertex_offset), 12);
        assert_eq!(std::mem::offset_of!(DrawCommand, first_instance), 16);
    }

    #[test]
    fn gpu_aabb_layout() {
        assert_eq!(std::mem::size_of::<GpuAabb>(), 32);
        assert_eq!(std::mem::offset_of!(GpuAabb, min), 0);
        assert_eq!(std::mem::offset_of!(GpuAabb, max), 16);
    }

    #[test]
    fn commands_tile_buffers_in_order() {
        let meshes = [
            mesh_with_triangles(1),
            mesh_with_triangles(4),
            mesh_with_triangles(2),
        ];

        let mut accumulator = BatchAccumulator::new();
        for (i, mesh) in meshes.iter().enumerate() {
            accumulator.add(mesh, i as u32);
        }
        let pending = accumulator.seal().unwrap();

        // Slicing the concatenated arrays at each command's offsets must
        // reconstruct every input mesh exactly, in input order.
        for (i, mesh) in meshes.iter().enumerate() {
            let cmd = pending.commands[i];
            assert_eq!(cmd.first_instance, i as u32);
            assert_eq!(cmd.instance_count, 1);
            assert_eq!(cmd.index_count as usize, mesh.indices.len());

            let v0 = cmd.vertex_offset as usize;
            assert_eq!(
                &pending.vertices[v0..v0 + mesh.vertices.len()],
                &mesh.vertices[..]
            );

            let i0 = cmd.first_index as usize;
            assert_eq!(
                &pending.indices[i0..i0 + mesh.indices.len()],
                &mesh.indices[..]
            );
        }

        // No gaps, no overlap: offsets are exactly the running totals.
        assert_eq!(pending.commands[0].vertex_offset, 0);
        assert_eq!(pending.commands[0].first_index, 0);
        assert_eq!(
            pending.commands[1].vertex_offset as usize,
            meshes[0].vertices.len()
        );
        assert_eq!(
            pending.commands[2].first_index as usize,
            meshes[0].indices.len() + meshes[1].indices.len()
        );
    }

    #[test]
    fn seal_resets_everything() {
        let mut accumulator = BatchAccumulator::new();
        accumulator.add(&mesh_with_triangles(3), 0);
        assert!(!accumulator.is_empty());

        accumulator.seal().unwrap();
        assert!(accumulator.is_empty());
        assert_eq!(accumulator.total_bytes(), 0);

        // Sealing again with no intervening adds is a no-op.
        assert!(accumulator.seal().is_none());
        assert!(accumulator.seal().is_none());
    }

    #[test]
    fn threshold_is_inclusive_after_append() {
        let mut accumulator = BatchAccumulator::new();

        let below = mesh_with_bytes(MAX_BATCH_BYTES - Vertex::SIZE as u64);
        accumulator.add(&below, 0);
        assert!(!accumulator.should_seal());

        // Topping up to exactly the threshold triggers the seal.
        let mut accumulator = BatchAccumulator::new();
        accumulator.add(&mesh_with_bytes(MAX_BATCH_BYTES / 2), 0);
        accumulator.add(&mesh_with_bytes(MAX_BATCH_BYTES / 2), 1);
        assert_eq!(accumulator.total_bytes(), MAX_BATCH_BYTES);
        assert!(accumulator.should_seal());

        // Both meshes are in the sealed batch.
        let pending = accumulator.seal().unwrap();
        assert_eq!(pending.commands.len(), 2);
    }

    #[test]
    fn batch_never_exceeds_threshold_plus_trigger_mesh() {
        let mut accumulator = BatchAccumulator::new();
        let chunk = mesh_with_bytes(1024 * 1024);

        let mut sealed_sizes = Vec::new();
        for i in 0..10 {
            accumulator.add(&chunk, i);
            if accumulator.should_seal() {
                let pending = accumulator.seal().unwrap();
                sealed_sizes.push(pending.payload_bytes());
            }
        }

        for size in sealed_sizes {
            assert!(size <= MAX_BATCH_BYTES + chunk.total_bytes());
        }
    }

    #[test]
    fn oversized_mesh_seals_alone() {
        let mut accumulator = BatchAccumulator::new();
        let huge = mesh_with_bytes(MAX_BATCH_BYTES + 4 * Vertex::SIZE as u64);

        accumulator.add(&huge, 0);
        assert!(accumulator.should_seal());

        let pending = accumulator.seal().unwrap();
        assert_eq!(pending.commands.len(), 1);
        assert_eq!(pending.vertices.len(), huge.vertices.len());
    }

    #[test]
    fn indirect_cursor_is_monotonic_across_seals() {
        let mut manager = BatchManager::new();

        // First generation of accumulation.
        manager.record_mesh(&mesh_with_triangles(2), Mat4::IDENTITY, 100);
        manager.record_mesh(&mesh_with_triangles(1), Mat4::IDENTITY, 101);
        let first = manager.accumulator.seal().unwrap();
        let first_offset = manager.note_sealed(&first);

        // Second generation: local counters restarted, cursor did not.
        manager.record_mesh(&mesh_with_triangles(5), Mat4::IDENTITY, 102);
        assert_eq!(manager.accumulator.commands[0].vertex_offset, 0);
        assert_eq!(manager.accumulator.commands[0].first_index, 0);
        let second = manager.accumulator.seal().unwrap();
        let second_offset = manager.note_sealed(&second);

        assert_eq!(first_offset, 0);
        assert_eq!(second_offset, 2 * DrawCommand::SIZE as u64);
        assert_eq!(
            manager.indirect_cursor,
            second_offset + DrawCommand::SIZE as u64
        );

        // Object indices keep running across seals.
        assert_eq!(second.commands[0].first_instance, 2);
        assert_eq!(manager.object_count(), 3);
    }

    #[test]
    fn record_keeps_flattened_lists_in_sync() {
        let mut manager = BatchManager::new();
        manager.record_mesh(&mesh_with_triangles(2), Mat4::IDENTITY, 7);
        manager.record_mesh(
            &mesh_with_triangles(3),
            Mat4::from_translation(glam::Vec3::X),
            9,
        );

        assert_eq!(manager.transforms.len(), 2);
        assert_eq!(manager.aabbs.len(), 2);
        assert_eq!(manager.object_ids, vec![7, 9]);

        // Scene indices are rebased into the flattened vertex array.
        let first_len = mesh_with_triangles(2).vertices.len() as u32;
        let second = mesh_with_triangles(3);
        let rebased: Vec<u32> = second.indices.iter().map(|&i| i + first_len).collect();
        let tail = &manager.scene_indices[mesh_with_triangles(2).indices.len()..];
        assert_eq!(tail, &rebased[..]);
    }
}
