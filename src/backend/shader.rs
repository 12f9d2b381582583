// Shader module loading
//
// Bytecode is produced ahead of time (see build.rs) and treated as opaque:
// the only check is that it is non-empty and made of whole 32-bit words.

use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::LogicalDevice;
use crate::error::{InitError, ShaderError};

/// Entry point symbol for both stages.
pub const SHADER_ENTRY_POINT: &std::ffi::CStr = c"main";

/// Read a SPIR-V file into words.
pub fn read_bytecode(path: &Path) -> Result<Vec<u32>, ShaderError> {
    let bytes = std::fs::read(path).map_err(|source| ShaderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let words = bytecode_from_bytes(&bytes)?;
    log::info!("Loaded shader {:?} with size {}", path, bytes.len());
    Ok(words)
}

pub fn bytecode_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    if bytes.is_empty() {
        return Err(ShaderError::Empty);
    }
    if bytes.len() % 4 != 0 {
        return Err(ShaderError::Misaligned(bytes.len()));
    }
    // read_spv copies into u32 storage, so the input needs no alignment
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|_| ShaderError::Misaligned(bytes.len()))
}

/// Shader module that lives only until the pipeline using it is built.
pub struct ShaderModule<'a> {
    pub handle: vk::ShaderModule,
    device: &'a LogicalDevice,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a LogicalDevice, code: &[u32]) -> Result<Self, InitError> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let handle = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(InitError::creation("create shader module from bytecode"))?;

        Ok(Self { handle, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.handle, None) };
    }
}
