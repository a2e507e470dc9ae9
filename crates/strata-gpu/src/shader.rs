//! SPIR-V shader loading.
//!
//! Shader compilation happens outside the engine; binaries arrive as opaque
//! byte blobs and only need re-alignment to the `u32` words Vulkan expects.

use crate::error::{GpuError, Result};
use std::path::Path;

/// SPIR-V magic number (first word of every valid module).
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Convert a byte slice to aligned u32 words (SPIR-V requires 4-byte units).
pub fn bytes_to_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(GpuError::ShaderCompilation(format!(
            "SPIR-V byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        _ => Err(GpuError::ShaderCompilation(
            "missing SPIR-V magic number".to_string(),
        )),
    }
}

/// Load a SPIR-V module from a file.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        GpuError::ShaderCompilation(format!("failed to read {}: {e}", path.display()))
    })?;
    bytes_to_spirv(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_module() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&u32::to_le_bytes(word));
        }
        let words = bytes_to_spirv(&bytes).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words.len(), 5);
    }

    #[test]
    fn rejects_misaligned_length() {
        let bytes = [0x03, 0x02, 0x23];
        assert!(bytes_to_spirv(&bytes).is_err());
    }

    #[test]
    fn rejects_missing_magic() {
        let bytes = [0u8; 8];
        assert!(bytes_to_spirv(&bytes).is_err());
    }
}
