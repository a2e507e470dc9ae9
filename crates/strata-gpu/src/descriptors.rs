//! Descriptor set management: layout cache, pool allocator, and builder.
//!
//! Three layers that cooperate:
//! - [`DescriptorLayoutCache`] deduplicates set layouts by structural hash so
//!   identical binding lists share one `VkDescriptorSetLayout`.
//! - [`DescriptorAllocator`] hands out sets from a rotating list of pools and
//!   grows a fresh pool on exhaustion.
//! - [`DescriptorBuilder`] accumulates bindings plus deferred writes and
//!   produces one set + layout per `build` call.

use crate::error::{GpuError, Result};
use ash::vk;
use hashbrown::HashMap;

/// Declared element count of a bindless (variable-count) binding.
pub const MAX_BINDLESS_DESCRIPTORS: u32 = 1000;

/// Sets per descriptor pool.
const POOL_MAX_SETS: u32 = 1000;

/// Weighted distribution of descriptor types per pool, scaled by
/// [`POOL_MAX_SETS`].
const POOL_SIZE_WEIGHTS: &[(vk::DescriptorType, f32)] = &[
    (vk::DescriptorType::SAMPLER, 0.5),
    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
    (vk::DescriptorType::SAMPLED_IMAGE, 4.0),
    (vk::DescriptorType::STORAGE_IMAGE, 1.0),
    (vk::DescriptorType::UNIFORM_BUFFER, 2.0),
    (vk::DescriptorType::STORAGE_BUFFER, 2.0),
    (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1.0),
    (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1.0),
    (vk::DescriptorType::INPUT_ATTACHMENT, 0.5),
];

/// One binding of a set layout as plain data, so binding lists can be
/// sorted, hashed and compared without Vulkan handle lifetimes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
    pub flags: vk::DescriptorBindingFlags,
}

impl LayoutBinding {
    /// A single-descriptor binding with no binding flags.
    pub fn new(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            binding,
            descriptor_type,
            count: 1,
            stage_flags,
            flags: vk::DescriptorBindingFlags::empty(),
        }
    }

    /// A bindless binding: variable count up to [`MAX_BINDLESS_DESCRIPTORS`],
    /// partially bound, updatable after bind.
    pub fn bindless(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            binding,
            descriptor_type,
            count: MAX_BINDLESS_DESCRIPTORS,
            stage_flags,
            flags: vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
                | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND,
        }
    }

    /// Whether this binding uses the variable-count allocation path.
    pub fn is_bindless(&self) -> bool {
        self.flags
            .contains(vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
    }
}

/// Cache key: the binding list, always sorted by binding index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LayoutKey {
    bindings: Vec<LayoutBinding>,
}

impl LayoutKey {
    /// Unsorted input is sorted on ingestion.
    fn new(bindings: &[LayoutBinding]) -> Self {
        let mut bindings = bindings.to_vec();
        bindings.sort_by_key(|b| b.binding);
        Self { bindings }
    }
}

/// Deduplicating cache of descriptor set layouts.
///
/// Two structurally identical binding lists always resolve to the same
/// layout handle. Layouts live until [`DescriptorLayoutCache::destroy`]
/// at device teardown.
#[derive(Default)]
pub struct DescriptorLayoutCache {
    layouts: HashMap<LayoutKey, vk::DescriptorSetLayout>,
}

impl DescriptorLayoutCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct layouts created so far.
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// Whether the cache holds no layouts.
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Return the canonical layout for the given bindings, creating it on
    /// first request.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn get_or_create(
        &mut self,
        device: &ash::Device,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let key = LayoutKey::new(bindings);

        if let Some(&layout) = self.layouts.get(&key) {
            return Ok(layout);
        }

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = key
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stage_flags)
            })
            .collect();

        let binding_flags: Vec<vk::DescriptorBindingFlags> =
            key.bindings.iter().map(|b| b.flags).collect();
        let has_flags = binding_flags.iter().any(|f| !f.is_empty());
        let needs_update_after_bind = key
            .bindings
            .iter()
            .any(|b| b.flags.contains(vk::DescriptorBindingFlags::UPDATE_AFTER_BIND));

        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&binding_flags);

        let mut layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        if needs_update_after_bind {
            layout_info =
                layout_info.flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL);
        }
        if has_flags {
            layout_info = layout_info.push_next(&mut flags_info);
        }

        let layout = device.create_descriptor_set_layout(&layout_info, None)?;
        self.layouts.insert(key, layout);
        Ok(layout)
    }

    /// Destroy all cached layouts.
    ///
    /// # Safety
    /// The device must be valid and no layout may still be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for (_, layout) in self.layouts.drain() {
            device.destroy_descriptor_set_layout(layout, None);
        }
    }
}

/// Descriptor pool allocator with grow-on-exhaustion.
///
/// Callers never reason about pool capacity: allocation from the current
/// pool that fails with `FRAGMENTED_POOL` or `OUT_OF_POOL_MEMORY` rotates in
/// a fresh pool and retries exactly once. [`DescriptorAllocator::reset_pools`]
/// is the only reclamation path.
#[derive(Default)]
pub struct DescriptorAllocator {
    current_pool: Option<vk::DescriptorPool>,
    used_pools: Vec<vk::DescriptorPool>,
    free_pools: Vec<vk::DescriptorPool>,
}

impl DescriptorAllocator {
    /// Create an allocator with no pools; the first pool is created lazily.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool sizes for a fresh pool, from the weighted distribution.
    fn pool_sizes() -> Vec<vk::DescriptorPoolSize> {
        POOL_SIZE_WEIGHTS
            .iter()
            .map(|&(ty, weight)| {
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count((weight * POOL_MAX_SETS as f32) as u32)
            })
            .collect()
    }

    /// Reuse a free pool or create a fresh one.
    ///
    /// # Safety
    /// The device must be valid.
    unsafe fn grab_pool(&mut self, device: &ash::Device) -> Result<vk::DescriptorPool> {
        if let Some(pool) = self.free_pools.pop() {
            return Ok(pool);
        }

        let sizes = Self::pool_sizes();
        // UPDATE_AFTER_BIND on every pool lets one rotation serve both the
        // classic and the bindless allocation paths.
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(POOL_MAX_SETS)
            .pool_sizes(&sizes)
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        tracing::debug!("created descriptor pool ({POOL_MAX_SETS} sets)");
        Ok(pool)
    }

    /// Allocate one descriptor set for the given layout.
    ///
    /// On pool exhaustion a fresh pool is grown and the allocation retried
    /// once; a second failure (or any other error) is returned as
    /// [`GpuError::DescriptorAllocation`] and the caller must not use the
    /// set.
    ///
    /// # Safety
    /// The device and layout must be valid.
    pub unsafe fn allocate(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        self.allocate_inner(device, layout, None)
    }

    /// Allocate one descriptor set whose variable-count binding has
    /// `count` live elements (≤ [`MAX_BINDLESS_DESCRIPTORS`]).
    ///
    /// The layout must have been created with the bindless binding flags
    /// (see [`LayoutBinding::bindless`]).
    ///
    /// # Safety
    /// The device and layout must be valid.
    pub unsafe fn allocate_bindless(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<vk::DescriptorSet> {
        if count > MAX_BINDLESS_DESCRIPTORS {
            return Err(GpuError::InvalidState(format!(
                "bindless count {count} exceeds declared maximum {MAX_BINDLESS_DESCRIPTORS}"
            )));
        }
        self.allocate_inner(device, layout, Some(count))
    }

    unsafe fn allocate_inner(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> Result<vk::DescriptorSet> {
        let pool = match self.current_pool {
            Some(pool) => pool,
            None => {
                let pool = self.grab_pool(device)?;
                self.current_pool = Some(pool);
                pool
            }
        };

        match Self::try_allocate(device, pool, layout, variable_count) {
            Ok(set) => Ok(set),
            Err(vk::Result::ERROR_FRAGMENTED_POOL | vk::Result::ERROR_OUT_OF_POOL_MEMORY) => {
                // Rotate in a fresh pool and retry exactly once.
                tracing::debug!("descriptor pool exhausted, growing a new pool");
                self.used_pools.push(pool);
                let fresh = self.grab_pool(device)?;
                self.current_pool = Some(fresh);

                Self::try_allocate(device, fresh, layout, variable_count)
                    .map_err(GpuError::DescriptorAllocation)
            }
            Err(e) => Err(GpuError::DescriptorAllocation(e)),
        }
    }

    unsafe fn try_allocate(
        device: &ash::Device,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let counts = [variable_count.unwrap_or(0)];

        let mut variable_info = vk::DescriptorSetVariableDescriptorCountAllocateInfo::default()
            .descriptor_counts(&counts);

        let mut alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        if variable_count.is_some() {
            alloc_info = alloc_info.push_next(&mut variable_info);
        }

        let sets = device.allocate_descriptor_sets(&alloc_info)?;
        Ok(sets[0])
    }

    /// Return every used pool to the free list and clear the current pool.
    ///
    /// This is the only path that returns descriptor-set memory for reuse.
    /// Must only be called once no in-flight command buffer references sets
    /// from these pools (after a device-idle wait).
    ///
    /// # Safety
    /// The device must be valid and no set from any pool may be in use.
    pub unsafe fn reset_pools(&mut self, device: &ash::Device) -> Result<()> {
        if let Some(pool) = self.current_pool.take() {
            self.used_pools.push(pool);
        }
        for pool in self.used_pools.drain(..) {
            device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
            self.free_pools.push(pool);
        }
        Ok(())
    }

    /// Destroy all pools.
    ///
    /// # Safety
    /// The device must be valid and no set from any pool may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if let Some(pool) = self.current_pool.take() {
            device.destroy_descriptor_pool(pool, None);
        }
        for pool in self.used_pools.drain(..) {
            device.destroy_descriptor_pool(pool, None);
        }
        for pool in self.free_pools.drain(..) {
            device.destroy_descriptor_pool(pool, None);
        }
    }
}

/// A deferred descriptor write; `dst_set` is filled in at build time.
struct DeferredWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    buffer_info: Option<vk::DescriptorBufferInfo>,
    image_infos: Vec<vk::DescriptorImageInfo>,
}

/// Single-use accumulator pairing a binding list with a write list.
///
/// `build` resolves the layout through the cache, allocates a set through
/// the allocator (bindless path when a bindless binding is present), patches
/// the deferred writes and issues them in one `vkUpdateDescriptorSets` call.
#[derive(Default)]
pub struct DescriptorBuilder {
    bindings: Vec<LayoutBinding>,
    writes: Vec<DeferredWrite>,
}

impl DescriptorBuilder {
    /// Start a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a buffer.
    pub fn bind_buffer(
        mut self,
        binding: u32,
        buffer_info: vk::DescriptorBufferInfo,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings
            .push(LayoutBinding::new(binding, descriptor_type, stage_flags));
        self.writes.push(DeferredWrite {
            binding,
            descriptor_type,
            buffer_info: Some(buffer_info),
            image_infos: Vec::new(),
        });
        self
    }

    /// Bind a single image.
    pub fn bind_image(
        mut self,
        binding: u32,
        image_info: vk::DescriptorImageInfo,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings
            .push(LayoutBinding::new(binding, descriptor_type, stage_flags));
        self.writes.push(DeferredWrite {
            binding,
            descriptor_type,
            buffer_info: None,
            image_infos: vec![image_info],
        });
        self
    }

    /// Bind a bindless image array. The layout declares
    /// [`MAX_BINDLESS_DESCRIPTORS`] elements; only `image_infos.len()` are
    /// allocated and written.
    pub fn bind_image_array(
        mut self,
        binding: u32,
        image_infos: Vec<vk::DescriptorImageInfo>,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings
            .push(LayoutBinding::bindless(binding, descriptor_type, stage_flags));
        self.writes.push(DeferredWrite {
            binding,
            descriptor_type,
            buffer_info: None,
            image_infos,
        });
        self
    }

    /// Resolve the layout, allocate the set, and issue all writes.
    ///
    /// On allocation failure the error is returned and no set exists.
    ///
    /// # Safety
    /// The device must be valid; bound resources must outlive the set's use.
    pub unsafe fn build(
        self,
        device: &ash::Device,
        cache: &mut DescriptorLayoutCache,
        allocator: &mut DescriptorAllocator,
    ) -> Result<(vk::DescriptorSet, vk::DescriptorSetLayout)> {
        let layout = cache.get_or_create(device, &self.bindings)?;

        // A bindless binding routes through the variable-count path with the
        // actual number of elements supplied.
        let variable_count = self
            .bindings
            .iter()
            .position(LayoutBinding::is_bindless)
            .map(|i| self.writes[i].image_infos.len() as u32);

        let set = match variable_count {
            Some(count) => allocator.allocate_bindless(device, layout, count)?,
            None => allocator.allocate(device, layout)?,
        };

        let vk_writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .filter(|w| w.buffer_info.is_some() || !w.image_infos.is_empty())
            .map(|w| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(w.binding)
                    .descriptor_type(w.descriptor_type);
                match &w.buffer_info {
                    Some(info) => write.buffer_info(std::slice::from_ref(info)),
                    None => write.image_info(&w.image_infos),
                }
            })
            .collect();

        device.update_descriptor_sets(&vk_writes, &[]);

        Ok((set, layout))
    }
}

/// Write a single buffer descriptor into an existing set.
///
/// # Safety
/// Device, set and buffer must be valid.
pub unsafe fn write_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write a storage image descriptor into an existing set.
///
/// # Safety
/// Device, set and image view must be valid.
pub unsafe fn write_storage_image(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_view: vk::ImageView,
    layout: vk::ImageLayout,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .image_layout(layout);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
        .image_info(std::slice::from_ref(&image_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write an acceleration structure descriptor into an existing set.
///
/// # Safety
/// Device, set and acceleration structure must be valid.
pub unsafe fn write_acceleration_structure(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    accel: vk::AccelerationStructureKHR,
) {
    let handles = [accel];
    let mut accel_info =
        vk::WriteDescriptorSetAccelerationStructureKHR::default().acceleration_structures(&handles);

    let mut write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
        .push_next(&mut accel_info);
    // The acceleration structure count lives in the pNext chain.
    write.descriptor_count = 1;

    device.update_descriptor_sets(&[write], &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(index: u32, ty: vk::DescriptorType) -> LayoutBinding {
        LayoutBinding::new(index, ty, vk::ShaderStageFlags::FRAGMENT)
    }

    #[test]
    fn layout_key_sorts_on_ingestion() {
        let forward = LayoutKey::new(&[
            binding(0, vk::DescriptorType::UNIFORM_BUFFER),
            binding(1, vk::DescriptorType::STORAGE_BUFFER),
            binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        ]);
        let shuffled = LayoutKey::new(&[
            binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            binding(0, vk::DescriptorType::UNIFORM_BUFFER),
            binding(1, vk::DescriptorType::STORAGE_BUFFER),
        ]);

        assert_eq!(forward, shuffled);

        use std::hash::{BuildHasher, RandomState};
        let hasher = RandomState::new();
        assert_eq!(hasher.hash_one(&forward), hasher.hash_one(&shuffled));
    }

    #[test]
    fn layout_key_distinguishes_stage_flags() {
        let fragment = LayoutKey::new(&[binding(0, vk::DescriptorType::UNIFORM_BUFFER)]);
        let compute = LayoutKey::new(&[LayoutBinding::new(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::COMPUTE,
        )]);
        assert_ne!(fragment, compute);
    }

    #[test]
    fn layout_key_distinguishes_counts() {
        let single = LayoutKey::new(&[binding(0, vk::DescriptorType::SAMPLED_IMAGE)]);
        let array = LayoutKey::new(&[LayoutBinding::bindless(
            0,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::ShaderStageFlags::FRAGMENT,
        )]);
        assert_ne!(single, array);
    }

    #[test]
    fn bindless_binding_flags() {
        let b = LayoutBinding::bindless(
            3,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::ShaderStageFlags::FRAGMENT,
        );
        assert!(b.is_bindless());
        assert_eq!(b.count, MAX_BINDLESS_DESCRIPTORS);
        assert!(b
            .flags
            .contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND));
        assert!(b
            .flags
            .contains(vk::DescriptorBindingFlags::UPDATE_AFTER_BIND));
    }

    #[test]
    fn pool_sizes_cover_weight_table() {
        let sizes = DescriptorAllocator::pool_sizes();
        assert_eq!(sizes.len(), POOL_SIZE_WEIGHTS.len());
        for size in &sizes {
            assert!(size.descriptor_count > 0);
        }
        // The heaviest weight is the sampler/image class used by materials.
        let samplers = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .unwrap();
        assert_eq!(samplers.descriptor_count, 4000);
    }
}
