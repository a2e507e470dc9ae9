//! Vulkan abstraction layer for the Strata engine.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - GPU capability detection (including ray tracing extensions)
//! - Memory allocation via gpu-allocator, with staged device-local uploads
//! - Descriptor management: layout cache, pool allocator, builder, bindless
//! - Command buffer and synchronization management
//! - Acceleration structure builds for the shadow ray path
//! - Surface/swapchain presentation

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod raytracing;
pub mod shader;
pub mod surface;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor, RayTracingCapabilities};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    DescriptorAllocator, DescriptorBuilder, DescriptorLayoutCache, LayoutBinding,
    MAX_BINDLESS_DESCRIPTORS,
};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{ComputePipeline, GraphicsPipeline, GraphicsPipelineConfig};
pub use raytracing::{AccelerationStructure, BlasInput};
pub use surface::{SurfaceContext, Swapchain};
pub use sync::{FrameSync, FrameSyncManager, PassSync, RecordState};
