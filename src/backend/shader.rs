// Shader loading and shader modules
//
// Vulkan consumes SPIR-V: a stream of 32-bit words. Bytecode is read from
// disk once; modules only live long enough to build a pipeline.

use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::device::LogicalDevice;
use super::error::{RenderError, Result};

/// Read a compiled shader from disk.
pub fn read_bytecode(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            RenderError::ShaderNotFound { path: path.to_path_buf() }
        } else {
            RenderError::ShaderIo { path: path.to_path_buf(), source }
        }
    })
}

/// Reinterpret bytecode as SPIR-V words, checking length and magic number.
pub fn spirv_words(stage: &'static str, bytecode: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytecode)).map_err(|source| RenderError::InvalidSpirv { stage, source })
}

pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    device: Arc<LogicalDevice>,
}

impl ShaderModule {
    /// `stage` only labels the error when creation fails.
    pub fn new(device: Arc<LogicalDevice>, stage: &'static str, bytecode: &[u8]) -> Result<Self> {
        let words = spirv_words(stage, bytecode)?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

        let handle = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(|code| RenderError::ShaderCompile { stage, code })?;

        Ok(Self { handle, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_bytecode(dir.path().join("missing.spv")).unwrap_err();
        assert!(matches!(err, RenderError::ShaderNotFound { .. }), "{err:?}");
    }

    #[test]
    fn directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_bytecode(dir.path()).unwrap_err();
        assert!(matches!(err, RenderError::ShaderIo { .. }), "{err:?}");
    }

    #[test]
    fn bytes_are_returned_unchanged() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000].iter().flat_map(|w| w.to_le_bytes()).collect();
        file.write_all(&bytes).unwrap();

        let read = read_bytecode(file.path()).unwrap();
        assert_eq!(read, bytes);
        assert_eq!(spirv_words("vertex", &read).unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn truncated_bytecode_is_invalid_spirv_not_a_native_failure() {
        let bytes = SPIRV_MAGIC.to_le_bytes();
        let err = spirv_words("fragment", &bytes[..3]).unwrap_err();
        match &err {
            RenderError::InvalidSpirv { stage, .. } => assert_eq!(*stage, "fragment"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!err.to_string().contains("Error code"));
    }

    #[test]
    fn wrong_magic_number_is_invalid_spirv() {
        let bytes = 0xdead_beefu32.to_le_bytes();
        assert!(matches!(spirv_words("vertex", &bytes), Err(RenderError::InvalidSpirv { .. })));
    }
}
