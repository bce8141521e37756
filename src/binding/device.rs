//! Device seam. The crate never talks to a graphics API directly; resource
//! creation and binding go through these traits.

use thiserror::Error;

use crate::compiler::reflection::SlotIndex;
use crate::schema::{
    BufferKind, SamplerAddress, SamplerFilter, ShaderStage, TextureFormat, TextureKind,
};

/// Opaque device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: String,
    pub kind: BufferKind,
    pub size: u64,
    pub stride: u32,
    pub cpu_writable: bool,
    pub gpu_writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub kind: TextureKind,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    /// Array layers or volume depth.
    pub layers: u32,
    pub storage: bool,
}

impl TextureDesc {
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width)
            * u64::from(self.height)
            * u64::from(self.layers)
            * u64::from(self.format.bytes_per_texel())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerDesc {
    pub label: String,
    pub filter: SamplerFilter,
    pub address: SamplerAddress,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("allocation of {requested} bytes exceeds the device limit of {limit} bytes")]
    OutOfMemory { requested: u64, limit: u64 },

    #[error("unknown resource handle {0:?}")]
    UnknownHandle(ResourceHandle),

    #[error("no resource named '{0}' is registered")]
    UnknownResource(String),

    #[error("handle {handle:?} is not a buffer")]
    NotABuffer { handle: ResourceHandle },

    #[error("access of {len} bytes at offset {offset} overruns a {size}-byte buffer")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
}

/// Creates and owns GPU resources.
pub trait ResourceDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<ResourceHandle, DeviceError>;
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<ResourceHandle, DeviceError>;
    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<ResourceHandle, DeviceError>;
    fn write_buffer(
        &mut self,
        handle: ResourceHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    fn read_buffer(
        &self,
        handle: ResourceHandle,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, DeviceError>;
    fn destroy(&mut self, handle: ResourceHandle) -> Result<(), DeviceError>;
}

/// Records bindings for the next draw or dispatch.
pub trait DeviceContext {
    fn bind_resource(&mut self, stage: ShaderStage, slot: SlotIndex, handle: ResourceHandle);
}
