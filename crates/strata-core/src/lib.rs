//! Core types and math for the Strata engine.
//!
//! This crate provides the foundational types used throughout the engine:
//! - Math utilities (AABB, frustum) shared between CPU culling bookkeeping
//!   and their GPU mirrors
//! - Common error types

pub mod error;
pub mod math;

pub use error::{Error, Result};
pub use math::{Aabb, Frustum};
