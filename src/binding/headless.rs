use std::collections::BTreeMap;

use crate::binding::device::{
    BufferDesc, DeviceContext, DeviceError, ResourceDevice, ResourceHandle, SamplerDesc,
    TextureDesc,
};
use crate::compiler::reflection::SlotIndex;
use crate::schema::ShaderStage;

#[derive(Debug, Clone)]
enum HeadlessResource {
    Buffer { desc: BufferDesc, data: Vec<u8> },
    Texture(TextureDesc),
    Sampler(SamplerDesc),
}

/// In-memory device: buffers are byte vectors, textures and samplers are
/// descriptors only.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_handle: u64,
    resources: BTreeMap<ResourceHandle, HeadlessResource>,
    max_allocation: Option<u64>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any single buffer or texture allocation larger than `bytes`.
    pub fn with_allocation_limit(mut self, bytes: u64) -> Self {
        self.max_allocation = Some(bytes);
        self
    }

    pub fn live_count(&self) -> usize {
        self.resources.len()
    }

    pub fn is_live(&self, handle: ResourceHandle) -> bool {
        self.resources.contains_key(&handle)
    }

    pub fn buffer_desc(&self, handle: ResourceHandle) -> Option<&BufferDesc> {
        match self.resources.get(&handle)? {
            HeadlessResource::Buffer { desc, .. } => Some(desc),
            _ => None,
        }
    }

    pub fn texture_desc(&self, handle: ResourceHandle) -> Option<&TextureDesc> {
        match self.resources.get(&handle)? {
            HeadlessResource::Texture(desc) => Some(desc),
            _ => None,
        }
    }

    pub fn sampler_desc(&self, handle: ResourceHandle) -> Option<&SamplerDesc> {
        match self.resources.get(&handle)? {
            HeadlessResource::Sampler(desc) => Some(desc),
            _ => None,
        }
    }

    fn check_limit(&self, requested: u64) -> Result<(), DeviceError> {
        match self.max_allocation {
            Some(limit) if requested > limit => Err(DeviceError::OutOfMemory { requested, limit }),
            _ => Ok(()),
        }
    }

    fn alloc(&mut self, resource: HeadlessResource) -> ResourceHandle {
        self.next_handle += 1;
        let handle = ResourceHandle(self.next_handle);
        self.resources.insert(handle, resource);
        handle
    }

    fn buffer_mut(&mut self, handle: ResourceHandle) -> Result<&mut Vec<u8>, DeviceError> {
        match self.resources.get_mut(&handle) {
            Some(HeadlessResource::Buffer { data, .. }) => Ok(data),
            Some(_) => Err(DeviceError::NotABuffer { handle }),
            None => Err(DeviceError::UnknownHandle(handle)),
        }
    }
}

fn range(offset: u64, len: u64, size: u64) -> Result<std::ops::Range<usize>, DeviceError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset as usize..end as usize),
        _ => Err(DeviceError::OutOfBounds { offset, len, size }),
    }
}

impl ResourceDevice for HeadlessDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<ResourceHandle, DeviceError> {
        self.check_limit(desc.size)?;
        Ok(self.alloc(HeadlessResource::Buffer {
            desc: desc.clone(),
            data: vec![0; desc.size as usize],
        }))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<ResourceHandle, DeviceError> {
        self.check_limit(desc.byte_size())?;
        Ok(self.alloc(HeadlessResource::Texture(desc.clone())))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<ResourceHandle, DeviceError> {
        Ok(self.alloc(HeadlessResource::Sampler(desc.clone())))
    }

    fn write_buffer(
        &mut self,
        handle: ResourceHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let buffer = self.buffer_mut(handle)?;
        let range = range(offset, data.len() as u64, buffer.len() as u64)?;
        buffer[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        handle: ResourceHandle,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, DeviceError> {
        match self.resources.get(&handle) {
            Some(HeadlessResource::Buffer { data, .. }) => {
                let range = range(offset, len, data.len() as u64)?;
                Ok(data[range].to_vec())
            }
            Some(_) => Err(DeviceError::NotABuffer { handle }),
            None => Err(DeviceError::UnknownHandle(handle)),
        }
    }

    fn destroy(&mut self, handle: ResourceHandle) -> Result<(), DeviceError> {
        self.resources
            .remove(&handle)
            .map(|_| ())
            .ok_or(DeviceError::UnknownHandle(handle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindCall {
    pub stage: ShaderStage,
    pub slot: SlotIndex,
    pub handle: ResourceHandle,
}

/// Context that records every bind call in order.
#[derive(Debug, Default)]
pub struct HeadlessContext {
    calls: Vec<BindCall>,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[BindCall] {
        &self.calls
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl DeviceContext for HeadlessContext {
    fn bind_resource(&mut self, stage: ShaderStage, slot: SlotIndex, handle: ResourceHandle) {
        self.calls.push(BindCall {
            stage,
            slot,
            handle,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BufferKind, SamplerAddress, SamplerFilter};

    fn buffer(size: u64) -> BufferDesc {
        BufferDesc {
            label: "b".to_string(),
            kind: BufferKind::Structured,
            size,
            stride: 4,
            cpu_writable: true,
            gpu_writable: false,
        }
    }

    #[test]
    fn buffers_round_trip_bytes() {
        let mut device = HeadlessDevice::new();
        let handle = device.create_buffer(&buffer(8)).unwrap();
        device.write_buffer(handle, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.read_buffer(handle, 0, 8).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(
            device.write_buffer(handle, 6, &[0; 4]),
            Err(DeviceError::OutOfBounds { offset: 6, len: 4, size: 8 })
        );
    }

    #[test]
    fn allocation_limit_rejects_large_buffers() {
        let mut device = HeadlessDevice::new().with_allocation_limit(16);
        assert!(device.create_buffer(&buffer(16)).is_ok());
        assert_eq!(
            device.create_buffer(&buffer(17)),
            Err(DeviceError::OutOfMemory { requested: 17, limit: 16 })
        );
    }

    #[test]
    fn destroy_releases_handles_once() {
        let mut device = HeadlessDevice::new();
        let handle = device.create_buffer(&buffer(4)).unwrap();
        assert!(device.is_live(handle));
        device.destroy(handle).unwrap();
        assert!(!device.is_live(handle));
        assert_eq!(device.destroy(handle), Err(DeviceError::UnknownHandle(handle)));
    }

    #[test]
    fn samplers_keep_their_descriptor() {
        let mut device = HeadlessDevice::new().with_allocation_limit(0);
        let desc = SamplerDesc {
            label: "LinearClamp".to_string(),
            filter: SamplerFilter::Linear,
            address: SamplerAddress::Clamp,
        };
        let handle = device.create_sampler(&desc).unwrap();
        assert_eq!(device.sampler_desc(handle), Some(&desc));
        assert_eq!(device.texture_desc(handle), None);
        assert_eq!(device.buffer_desc(handle), None);
    }
}
